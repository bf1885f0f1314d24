use crate::filter::{AuthenticationFilter, Filter, FilterConfig};
use crate::server::FilterRequest;
use crate::settings::ApplicationSettings;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use http::Method;
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Command-line interface for aadgate
#[derive(Parser)]
#[command(name = "aadgate")]
#[command(about = "Azure AD / B2C OpenID Connect gate", long_about = None)]
pub struct Cli {
    /// TOML file with an `[init_params]` table
    #[arg(short, long, global = true, env = "AADGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Fetch and print the OpenID discovery document
    Discover,
    /// List the signing keys the provider publishes
    Keys,
    /// Run the authentication decision for a token
    Verify {
        /// Compact JWT, as it would arrive in the token cookie
        #[arg(long, env = "AADGATE_TOKEN")]
        token: String,
    },
    /// Print the redirect that starts a logout
    LogoutUrl {
        /// Host the logout endpoint is served from
        #[arg(long)]
        host: Option<String>,

        /// Logout endpoint path (default: the configured logout path)
        #[arg(long)]
        path: Option<String>,
    },
}

fn load_filter_config(path: Option<&Path>) -> Result<FilterConfig> {
    match path {
        Some(path) => {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            FilterConfig::from_toml_str(&source)
                .with_context(|| format!("failed to parse {}", path.display()))
        }
        None => Ok(FilterConfig::new()),
    }
}

/// Parse arguments from the process and run.
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    let mut stdout = std::io::stdout().lock();
    run(&cli, &mut stdout)
}

/// Run `cli`, writing command output to `out`.
pub fn run(cli: &Cli, out: &mut dyn Write) -> Result<()> {
    let config = load_filter_config(cli.config.as_deref())?;
    let settings = ApplicationSettings::from_env().context("failed to load application settings")?;
    let filter = AuthenticationFilter::init(&config, settings)?;
    let result = execute(&filter, &cli.command, out);
    filter.destroy();
    result
}

fn execute(filter: &AuthenticationFilter, command: &Commands, out: &mut dyn Write) -> Result<()> {
    match command {
        Commands::Discover => {
            let configuration = filter
                .provider()
                .configuration()
                .with_context(|| format!("discovery failed ({})", filter.provider().discovery_url()))?;
            writeln!(out, "{}", serde_json::to_string_pretty(&*configuration)?)?;
        }
        Commands::Keys => {
            let configuration = filter.provider().configuration().context("discovery failed")?;
            let keys = filter
                .provider()
                .key_store(&configuration)
                .with_context(|| format!("key set fetch failed ({})", configuration.key_store_endpoint))?;
            let listing: Vec<_> = keys
                .keys()
                .into_iter()
                .map(|k| {
                    json!({
                        "kid": k.name,
                        "nbf": k.not_before,
                        "modulus_bits": k.modulus.len() * 8,
                    })
                })
                .collect();
            writeln!(out, "{}", serde_json::to_string_pretty(&listing)?)?;
        }
        Commands::Verify { token } => {
            let request = FilterRequest::new(Method::GET, "/")
                .with_cookie(filter.configuration().token_cookie_name.clone(), token.clone());
            let decision = filter.authenticate(&request);
            writeln!(out, "{}", serde_json::to_string_pretty(&decision.to_json())?)?;
        }
        Commands::LogoutUrl { host, path } => {
            let path = path
                .clone()
                .unwrap_or_else(|| filter.configuration().logout_path.clone());
            let mut request = FilterRequest::new(Method::GET, path);
            if let Some(host) = host {
                request = request.with_header("host", host.clone());
            }
            let url = filter
                .logout_flow()
                .logout_url(&request)
                .context("cannot build logout URL")?;
            writeln!(out, "{}", url)?;
        }
    }
    Ok(())
}
