use std::process::ExitCode;

use clap::Parser;

use apiloom::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    match apiloom::cli::dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("apiloom-run: {err}");
            ExitCode::FAILURE
        }
    }
}
