//! # aadgate
//!
//! **aadgate** gates HTTP requests to a web application behind Azure AD or
//! Azure AD B2C using OpenID Connect ID tokens.
//!
//! ## Overview
//!
//! The crate discovers the identity provider's configuration, fetches and
//! caches its signing keys, verifies the ID token a browser presents in a
//! cookie, and either lets the request through, redirects the browser to
//! sign in, or rejects it. A separate logout endpoint ends the session with
//! both the provider and the application.
//!
//! ## Architecture
//!
//! - **[`cache`]** - TTL- and size-bounded caches with one shared sweeper
//! - **[`algorithms`]** - Registry of accepted signing algorithms
//! - **[`discovery`]** - Discovery document and key set loaders/parsers
//! - **[`token`]** - ID token parsing, verification and freshness
//! - **[`filter`]** - The authentication filter and the logout flow
//! - **[`server`]** - Request/response shapes at the container boundary
//! - **[`settings`]** - Environment-sourced application settings
//! - **[`logging`]** - `tracing` subscriber setup
//! - **[`cli`]** - The `aadgate` operator CLI
//!
//! ### Request Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Browser
//!     participant Filter as AuthenticationFilter
//!     participant Caches as configuration/key caches
//!     participant IdP as Identity provider
//!     participant App as Protected handler
//!
//!     Browser->>Filter: GET /reports (Cookie: id_token=...)
//!     Filter->>Caches: configuration(), key_store()
//!     Caches-->>IdP: on miss: discovery document, JWKS
//!     Caches-->>Filter: Configuration, KeyStore
//!     Filter->>Filter: parse, verify signature and claims, check freshness
//!     alt active token
//!         Filter->>App: request + principal
//!         App-->>Browser: 200
//!     else missing or expired token
//!         Filter-->>Browser: 302 to authorization endpoint
//!     else invalid token
//!         Filter-->>Browser: 401 invalid_token
//!     end
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use aadgate::filter::{AuthenticationFilter, Filter, FilterConfig};
//! use aadgate::server::{FilterRequest, FilterResponse};
//! use aadgate::settings::ApplicationSettings;
//!
//! let filter = AuthenticationFilter::init(&FilterConfig::new(), ApplicationSettings::from_env()?)?;
//!
//! let mut request = FilterRequest::from_http(&http_request);
//! let response = filter.do_filter(&mut request, &mut |req: &mut FilterRequest| {
//!     let user = req.principal().map(|p| p.subject.clone());
//!     FilterResponse::ok(serde_json::json!({ "user": user }))
//! });
//! ```
//!
//! ## Failure Policy
//!
//! Discovery and key fetch failures never let a request through. Without a
//! configuration the filter answers 503; without keys every token is
//! rejected. Logout is best effort and always ends on the landing page.

pub mod algorithms;
pub mod cache;
pub mod cli;
pub mod clock;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod logging;
pub mod server;
pub mod settings;
pub mod token;

pub use error::{SecurityError, SecurityResult};
pub use filter::{AuthDecision, AuthenticationFilter, Filter, FilterChain, FilterConfig, LogoutFlow};
pub use server::{FilterRequest, FilterResponse};
pub use settings::ApplicationSettings;
pub use token::{Principal, TokenError};
