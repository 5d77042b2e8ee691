use crate::command::CommandGateway;
use crate::config::Config;
use crate::devices::DeviceRegistry;
use crate::homeassistant::HomeAssistantClient;
use crate::reconcile::{run_sink_worker, Reconciler};
use crate::router::MessageRouter;
use crate::session::{Session, SessionSettings};
use crate::stats::Counters;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let registry = DeviceRegistry::from_config(&config.devices);
    tracing::info!(
        mapped_devices = registry.len(),
        gateway = %format!("{}:{}", config.gateway.host, config.gateway.port),
        "starting gateway bridge"
    );
    if registry.is_empty() {
        tracing::warn!("no devices mapped; switch reports will not reach home assistant");
    }

    let sink = HomeAssistantClient::builder(config.home_assistant.base_url(), &config.home_assistant.token)
        .entity_prefix(&config.home_assistant.entity_prefix)
        .timeout(Duration::from_secs(config.home_assistant.timeout_secs.max(1)))
        .build()?;

    let counters = Arc::new(Counters::default());
    let shutdown = CancellationToken::new();

    let (reconciler, updates) = Reconciler::channel();
    let sink_task = tokio::spawn(run_sink_worker(
        sink,
        updates,
        counters.clone(),
        shutdown.clone(),
    ));

    let router = MessageRouter::new(registry, reconciler);
    let session = Session::new(
        SessionSettings::from_config(&config.gateway),
        router,
        counters,
    );
    let session_task = tokio::spawn(session.clone().run(shutdown.clone()));

    let http = &config.http_server;
    let commands = CommandGateway::new(session);

    let result: Result<(), Box<dyn std::error::Error>> = tokio::select! {
        res = crate::server::start(&http.host, http.port, commands, http.token.clone(), shutdown.clone()) => {
            res.map_err(|err| {
                Box::<dyn std::error::Error>::from(format!("rest api on {}:{}: {err}", http.host, http.port))
            })
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown: ctrl-c");
            Ok(())
        }
    };

    shutdown.cancel();
    let _ = session_task.await;
    let _ = sink_task.await;
    result
}

pub fn handle_config_init() -> Result<(), Box<dyn std::error::Error>> {
    let path = Config::default_path();
    Config::write_default(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
