use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match registrar::start_server().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("registrar: {e}");
            ExitCode::FAILURE
        }
    }
}
