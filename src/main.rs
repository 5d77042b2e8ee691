mod app;
mod codec;
mod command;
mod config;
mod devices;
mod homeassistant;
mod model;
mod reconcile;
mod router;
mod server;
mod session;
mod stats;

use config::LoggingConfig;
use std::fs::OpenOptions;
use std::sync::Mutex;

#[tokio::main]
async fn main() {
    if std::env::args().nth(1).as_deref() == Some("config-init") {
        if let Err(err) = app::handle_config_init() {
            eprintln!("config-init failed: {err}");
            std::process::exit(1);
        }
        return;
    }

    let config = match config::Config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("config error: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = init_logging(&config.logging) {
        eprintln!("logging setup failed: {err}");
        std::process::exit(1);
    }

    if let Err(err) = app::run(config).await {
        tracing::error!(error = %err, "fatal");
        std::process::exit(1);
    }
}

fn init_logging(logging: &LoggingConfig) -> std::io::Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match logging.file.as_deref().filter(|path| !path.trim().is_empty()) {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            fmt().with_env_filter(filter).with_target(false).init();
        }
    }
    Ok(())
}
