use std::process::ExitCode;

use serde_json::json;
use tracing::{error, info, warn};

use mqrelay::client::{Delivery, HandlerError, Subscriber};
use mqrelay::config::load_config;
use mqrelay::utils::logging;
use mqrelay::{ErrorKind, Event, QoS, Session, WebSocketTransport};

const SENSORS: &str = "sensors/#";
const COMMANDS: &str = "commands/#";

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&settings.logging.level);

    let session = Session::new(settings.session_config(), WebSocketTransport);
    let mut events = session.events();
    info!(client_id = session.client_id(), endpoint = %settings.broker.endpoint, "starting relay");

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                Event::StateChanged { old, new } => info!(?old, ?new, "connection state"),
                Event::Error {
                    kind: ErrorKind::HandlerFailed,
                    detail,
                } => warn!("{detail}"),
                Event::Error { kind, detail } => error!(?kind, "{detail}"),
                Event::Message(_) => {}
            }
        }
    });

    let sensors = Subscriber::from_fn(session.new_subscriber_id(), |delivery: Delivery| async move {
        handle_sensor_data(&delivery);
        Ok::<(), HandlerError>(())
    });
    let responder = session.clone();
    let commands = Subscriber::from_fn(session.new_subscriber_id(), move |delivery: Delivery| {
        handle_command(&responder, &delivery);
        async { Ok::<(), HandlerError>(()) }
    });

    for (filter, subscriber) in [(SENSORS, sensors), (COMMANDS, commands)] {
        if let Err(e) = session.subscribe_with(filter, QoS::AtLeastOnce, subscriber).await {
            error!(filter, "failed to subscribe: {e}");
            return ExitCode::FAILURE;
        }
    }

    if let Err(e) = session.connect(&settings.broker.endpoint).await {
        error!("failed to connect: {e}");
        return ExitCode::FAILURE;
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }
    info!("shutting down");
    session.disconnect().await;
    ExitCode::SUCCESS
}

fn handle_sensor_data(delivery: &Delivery) {
    match serde_json::from_slice::<serde_json::Value>(&delivery.payload) {
        Ok(data) => info!(topic = %delivery.topic, replay = delivery.replay, %data, "sensor data"),
        Err(e) => warn!(topic = %delivery.topic, "unparseable sensor payload: {e}"),
    }
}

/// Acknowledges a command on the matching `responses/` topic. The response
/// is published from its own task so the handler returns straight away.
fn handle_command(session: &Session<WebSocketTransport>, delivery: &Delivery) {
    if delivery.replay {
        info!(topic = %delivery.topic, "ignoring retained command");
        return;
    }
    info!(topic = %delivery.topic, payload = delivery.payload_str().unwrap_or("<binary>"), "command received");

    let Some(device) = delivery.topic.strip_prefix("commands/") else {
        return;
    };
    let response = json!({
        "status": "executed",
        "timestamp": chrono::Utc::now().timestamp_millis(),
    });
    let topic = format!("responses/{device}");
    let session = session.clone();
    tokio::spawn(async move {
        if let Err(e) = session
            .publish(&topic, response.to_string(), QoS::AtLeastOnce, false)
            .await
        {
            warn!(topic = %topic, "failed to publish response: {e}");
        }
    });
}
