use std::process::ExitCode;

use clap::Parser;
use payrecon_lib::cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    payrecon_lib::init_tracing();

    match payrecon_lib::run(&cli) {
        Ok(summary) if summary.is_clean() => ExitCode::SUCCESS,
        Ok(summary) => {
            tracing::error!(
                unrecorded = summary.unrecorded.len(),
                "Some documents were processed but are missing from the ledger"
            );
            ExitCode::from(2)
        }
        Err(e) => {
            tracing::error!(error = %e, "Run failed");
            ExitCode::FAILURE
        }
    }
}
