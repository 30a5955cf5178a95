use std::process::ExitCode;

use console::style;

#[tokio::main]
async fn main() -> ExitCode {
    // Pick up IMGHARVEST_* variables from a local .env file.
    let _ = dotenvy::dotenv();

    match imgharvest::cli::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", style("✗").red(), e);
            ExitCode::FAILURE
        }
    }
}
