use aadgate::cli::run_cli;
use aadgate::logging::init_logging;
use std::process::ExitCode;

fn main() -> ExitCode {
    // Must outlive every log call so buffered lines are flushed on return.
    let _log_guard = match init_logging() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Warning: {:#}", e);
            None
        }
    };
    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
