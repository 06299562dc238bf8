use table_queue_cli::run_cli;
use tracing::error;

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        error!(error = %e, "CLI error");
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}
