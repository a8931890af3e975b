use clap::Parser;
use registry_sync::cli::{run, Cli};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Load environment
    dotenvy::dotenv().ok();

    // stdout is reserved for command output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("CLI application startup: tracing initialised, environment loaded");

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => tracing::info!("CLI completed successfully"),
        Err(e) => {
            tracing::error!(error = %e, "CLI exited with error");
            eprintln!("[ERROR] {e:#}");
            // Supervisor restarts us from the persisted cursor.
            std::process::exit(1);
        }
    }
}
