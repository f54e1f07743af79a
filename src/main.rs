use stcp::cli::initialize_from_arguments;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match initialize_from_arguments().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("stcp: {e}");
            ExitCode::FAILURE
        }
    }
}
