use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match discharge_extract::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            eprintln!("discharge-extract: {e}");
            ExitCode::FAILURE
        }
    }
}
