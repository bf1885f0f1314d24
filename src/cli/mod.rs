//! # CLI Module
//!
//! Operator tooling for checking a deployment's identity provider setup
//! without running the protected application.
//!
//! ## Commands
//!
//! ```bash
//! # Print the discovered OpenID configuration
//! aadgate --config gate.toml discover
//!
//! # List published signing keys
//! aadgate --config gate.toml keys
//!
//! # Run the authentication decision for a token
//! aadgate --config gate.toml verify --token eyJhbGciOi...
//!
//! # Print the first logout redirect
//! aadgate --config gate.toml logout-url --host app.example.com
//! ```
//!
//! `--config` points at a TOML file with an `[init_params]` table holding
//! the filter init parameters. Application settings (`AADGATE_TENANT`,
//! `AADGATE_APPLICATION_ID`, ...) come from the environment.

mod commands;


pub use commands::{run, run_cli, Cli, Commands};
