use clap::Parser;
use noted_sync::cli::{self, Cli};

#[tokio::main]
async fn main() {
    let filter = if std::env::var_os("DNOTE_DEBUG").is_some() {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let cli = Cli::parse();
    if let Err(err) = cli::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(err.exit_code());
    }
}
