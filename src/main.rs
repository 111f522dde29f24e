use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    kimmio_launcher_lib::run().await
}
