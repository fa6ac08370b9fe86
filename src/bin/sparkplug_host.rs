// Sparkplug B primary host entry point.
//
// Wires together the MQTT ingestion loop, the SQLite-backed store, the HTTP
// query surface and the interactive shell. Grounded on the teacher's
// `main()`/`shutdown_signal()` in `src/bin/storage_node.rs`: clap CLI
// parsing, layered config loading, `tracing_subscriber` initialization,
// an axum server run with graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sparkplug_host::config::{load_config, AppConfig, Cli};
use sparkplug_host::engine::Engine;
use sparkplug_host::error::HostError;
use sparkplug_host::http;
use sparkplug_host::model::Model;
use sparkplug_host::repl::Repl;
use sparkplug_host::store::Store;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    info!("loading configuration from {:?}", cli.config);
    let config = load_config(&cli.config)?;

    let model = Arc::new(Model::new(Arc::new(Store::open(&config.db.url)?)));

    if cli.shell {
        let repl = Repl::new((*model).clone());
        return repl.run().map_err(Into::into);
    }

    run_host(config, model).await
}

/// The REPL and the MQTT engine each need their own `Store`, both backed by
/// the same SQLite file; `rusqlite::Connection` is not `Sync` so a single
/// instance can't be shared across the blocking shell thread and the async
/// engine task.
fn store_clone_for_model(config: &AppConfig) -> Result<Store, HostError> {
    Store::open(&config.db.url)
}

async fn run_host(config: AppConfig, model: Arc<Model>) -> Result<(), anyhow::Error> {
    let engine_store = store_clone_for_model(&config)?;
    let engine = Arc::new(Engine::new(engine_store, &config.id, config.zones.clone()));

    let mut mqtt_options = MqttOptions::new(&config.mqtt.client_id, &config.mqtt.host, config.mqtt.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    let offline_state = serde_json::json!({ "online": false, "timestamp": now() }).to_string();
    mqtt_options.set_last_will(rumqttc::LastWill::new(
        engine.state_topic(),
        offline_state,
        QoS::AtLeastOnce,
        true,
    ));

    let (client, mut event_loop) = AsyncClient::new(mqtt_options, 64);

    for topic in engine.subscriptions() {
        client.subscribe(&topic, QoS::AtLeastOnce).await?;
    }

    let online_state = engine.state_message(true, now());
    client
        .publish(&online_state.topic, QoS::AtLeastOnce, online_state.retain, online_state.payload)
        .await?;

    let mqtt_client = client.clone();
    let mqtt_engine = engine.clone();
    let mqtt_task = tokio::spawn(async move {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    match mqtt_engine.handle_message(&publish.topic, &publish.payload) {
                        Ok(outgoing) => {
                            for message in outgoing {
                                if let Err(e) = mqtt_client
                                    .publish(&message.topic, QoS::AtLeastOnce, message.retain, message.payload)
                                    .await
                                {
                                    error!("failed to publish {}: {e}", message.topic);
                                }
                            }
                        }
                        Err(e) => warn!("dropping message on {}: {e}", publish.topic),
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("mqtt (re)connected, republishing online state");
                    let online = mqtt_engine.state_message(true, now());
                    if let Err(e) = mqtt_client
                        .publish(&online.topic, QoS::AtLeastOnce, online.retain, online.payload)
                        .await
                    {
                        error!("failed to republish online state: {e}");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("mqtt connection error: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    let addr: SocketAddr = config.http.listen_addr.parse()?;
    let app = http::create_router(model);
    info!("sparkplug host {} listening on {addr}", config.id);
    let server = axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    let result = server.await;
    mqtt_task.abort();

    let offline = engine.state_message(false, now());
    let _ = client
        .publish(&offline.topic, QoS::AtLeastOnce, offline.retain, offline.payload)
        .await;

    result.map_err(|e| anyhow::anyhow!("http server failed: {e}"))
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down gracefully..."),
        _ = terminate => info!("received terminate signal, shutting down gracefully..."),
    }
}
