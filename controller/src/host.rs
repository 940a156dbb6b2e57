use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::{
    net::{TcpListener, UdpSocket},
    sync::watch,
};
use tracing::{info, warn};

use zonelight_common::{
    CommandError, DriverSettings, PatternError, RuntimeConfig, ZoneAttributes, ZoneEngine,
    COMMAND_TOPICS, TOPIC_CMD_CAPTURE, TOPIC_CMD_DISCOVERY, TOPIC_CMD_PATTERN, TOPIC_CMD_POWER,
    TOPIC_CMD_REFRESH, TOPIC_ZONE_STATE,
};

use crate::{
    runtime::{spawn_zone, HandleError, ZoneCommand, ZoneHandle},
    store::StateStore,
    transport::HttpTransport,
};

#[derive(Clone)]
struct AppState {
    zone: ZoneHandle,
    store: StateStore,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct RenameRequest {
    from: String,
    to: String,
}

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = StateStore::from_env();
    let mut config = store.load_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut config);
    config.sanitize();

    let context = store.load_context().await.unwrap_or_else(|err| {
        warn!("failed to load zone state from store, starting fresh: {err:#}");
        Default::default()
    });
    let engine = ZoneEngine::new(&config, context);
    let transport = Arc::new(HttpTransport::new().context("failed to build http client")?);
    let (zone, attributes) = spawn_zone(engine, transport, Some(store.clone()));

    let mut mqtt_options = MqttOptions::new(
        "zonelight-controller",
        config.network.mqtt_host.clone(),
        config.network.mqtt_port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    if !config.network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(
            config.network.mqtt_user.clone(),
            config.network.mqtt_pass.clone(),
        );
    }
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let app_state = AppState {
        zone: zone.clone(),
        store,
    };

    subscribe_topics(&mqtt).await?;
    spawn_mqtt_loop(zone, mqtt.clone(), eventloop);
    spawn_state_publish_loop(mqtt, attributes);

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/power/on", post(handle_power_on))
        .route("/api/power/off", post(handle_power_off))
        .route("/api/patterns", get(handle_get_patterns))
        .route("/api/patterns/apply", post(handle_apply_pattern))
        .route("/api/patterns/capture", post(handle_capture))
        .route("/api/patterns/rename", put(handle_rename_pattern))
        .route("/api/patterns/predefined", post(handle_load_predefined))
        .route("/api/patterns/{name}", delete(handle_delete_pattern))
        .route("/api/refresh", post(handle_refresh))
        .route("/api/discovery/start", post(handle_discovery_start))
        .route("/api/discovery/stop", post(handle_discovery_stop))
        .route("/api/config", get(handle_get_config).put(handle_put_config))
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.network.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("zonelight controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn apply_env_overrides(config: &mut RuntimeConfig) {
    let network = &mut config.network;
    if let Ok(host) = std::env::var("MQTT_HOST") {
        network.mqtt_host = host;
    }
    if let Some(port) = env_parse::<u16>("MQTT_PORT") {
        network.mqtt_port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        network.mqtt_user = user;
    }
    if let Ok(pass) = std::env::var("MQTT_PASS") {
        network.mqtt_pass = pass;
    }
    if let Some(port) = env_parse::<u16>("ZONELIGHT_HTTP_PORT") {
        network.http_port = port;
    }
    if let Ok(address) = std::env::var("ZONELIGHT_CONTROLLER") {
        config.driver.controller_address = Some(address);
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse::<T>().ok())
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    for topic in COMMAND_TOPICS {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(zone: ZoneHandle, mqtt: AsyncClient, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&zone, &message.topic, message.payload.to_vec()).await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    // Subscriptions do not survive a clean reconnect.
                    if let Err(err) = subscribe_topics(&mqtt).await {
                        warn!("mqtt resubscribe failed: {err:#}");
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_state_publish_loop(mqtt: AsyncClient, mut attributes: watch::Receiver<ZoneAttributes>) {
    tokio::spawn(async move {
        loop {
            let payload = serde_json::to_vec(&*attributes.borrow_and_update());
            match payload {
                Ok(body) => {
                    if let Err(err) = mqtt
                        .publish(TOPIC_ZONE_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("zone state publish failed: {err}");
                    }
                }
                Err(err) => warn!("zone state serialization failed: {err}"),
            }

            if attributes.changed().await.is_err() {
                break;
            }
        }
    });
}

async fn handle_mqtt_message(zone: &ZoneHandle, topic: &str, payload: Vec<u8>) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;
    let message = message.trim();

    let command = match topic {
        TOPIC_CMD_POWER => match message.to_ascii_lowercase().as_str() {
            "on" => ZoneCommand::PowerOn,
            "off" => ZoneCommand::PowerOff,
            other => {
                warn!("ignoring unknown power payload '{other}'");
                return Ok(());
            }
        },
        TOPIC_CMD_PATTERN if !message.is_empty() => ZoneCommand::ApplyPattern(message.to_string()),
        TOPIC_CMD_CAPTURE => ZoneCommand::Capture,
        TOPIC_CMD_REFRESH => ZoneCommand::Refresh,
        TOPIC_CMD_DISCOVERY => match message.to_ascii_lowercase().as_str() {
            "stop" => ZoneCommand::StopDiscovery,
            _ => ZoneCommand::StartDiscovery {
                hub_subnet: hub_subnet().await,
            },
        },
        _ => return Ok(()),
    };

    zone.command(command).await?;
    Ok(())
}

/// First three octets of the address this host would use to reach the LAN.
/// Connecting a UDP socket sends nothing; it only selects a route.
async fn hub_subnet() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    socket.connect("192.0.2.1:80").await.ok()?;
    lan_subnet(socket.local_addr().ok()?.ip())
}

fn lan_subnet(ip: IpAddr) -> Option<String> {
    match ip {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => {
            let [a, b, c, _] = ip.octets();
            Some(format!("{a}.{b}.{c}"))
        }
        _ => None,
    }
}

async fn run_command(state: &AppState, command: ZoneCommand) -> axum::response::Response {
    match state.zone.command(command).await {
        Ok(view) => Json(view).into_response(),
        Err(err) => command_error_response(err),
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.zone.view().await {
        Ok(view) => Json(view).into_response(),
        Err(err) => command_error_response(err),
    }
}

async fn handle_power_on(State(state): State<AppState>) -> impl IntoResponse {
    run_command(&state, ZoneCommand::PowerOn).await
}

async fn handle_power_off(State(state): State<AppState>) -> impl IntoResponse {
    run_command(&state, ZoneCommand::PowerOff).await
}

async fn handle_get_patterns(State(state): State<AppState>) -> impl IntoResponse {
    match state.zone.view().await {
        Ok(view) => Json(view.patterns).into_response(),
        Err(err) => command_error_response(err),
    }
}

async fn handle_apply_pattern(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(name) = params.get("name").filter(|name| !name.trim().is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'name' parameter");
    };
    run_command(&state, ZoneCommand::ApplyPattern(name.clone())).await
}

async fn handle_capture(State(state): State<AppState>) -> impl IntoResponse {
    run_command(&state, ZoneCommand::Capture).await
}

async fn handle_rename_pattern(
    State(state): State<AppState>,
    Json(request): Json<RenameRequest>,
) -> impl IntoResponse {
    if request.to.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "New pattern name cannot be empty");
    }
    run_command(
        &state,
        ZoneCommand::RenamePattern {
            from: request.from,
            to: request.to,
        },
    )
    .await
}

async fn handle_delete_pattern(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    run_command(&state, ZoneCommand::DeletePattern(name)).await
}

async fn handle_load_predefined(State(state): State<AppState>) -> impl IntoResponse {
    run_command(&state, ZoneCommand::LoadPredefined).await
}

async fn handle_refresh(State(state): State<AppState>) -> impl IntoResponse {
    run_command(&state, ZoneCommand::Refresh).await
}

async fn handle_discovery_start(State(state): State<AppState>) -> impl IntoResponse {
    let hub_subnet = hub_subnet().await;
    info!("starting discovery, hub subnet {hub_subnet:?}");
    run_command(&state, ZoneCommand::StartDiscovery { hub_subnet }).await
}

async fn handle_discovery_stop(State(state): State<AppState>) -> impl IntoResponse {
    run_command(&state, ZoneCommand::StopDiscovery).await
}

async fn handle_get_config(State(state): State<AppState>) -> impl IntoResponse {
    match state.zone.view().await {
        Ok(view) => Json(view.settings).into_response(),
        Err(err) => command_error_response(err),
    }
}

async fn handle_put_config(
    State(state): State<AppState>,
    Json(mut settings): Json<DriverSettings>,
) -> impl IntoResponse {
    settings.sanitize();

    let mut config = state.store.load_config().await.unwrap_or_else(|err| {
        warn!("failed to load existing runtime config for update: {err:#}");
        RuntimeConfig::default()
    });
    config.driver = settings.clone();

    if let Err(err) = state.store.save_config(&config).await {
        warn!("failed to persist driver settings: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist driver settings",
        );
    }

    match state.zone.command(ZoneCommand::UpdateSettings(settings)).await {
        Ok(view) => Json(view.settings).into_response(),
        Err(err) => command_error_response(err),
    }
}

fn command_error_response(err: HandleError) -> axum::response::Response {
    let status = match &err {
        HandleError::Stopped => StatusCode::INTERNAL_SERVER_ERROR,
        HandleError::Command(command) => match command {
            CommandError::Validation(_) | CommandError::Pattern(PatternError::Validation(_)) => {
                StatusCode::BAD_REQUEST
            }
            CommandError::Pattern(PatternError::NotFound(_)) => StatusCode::NOT_FOUND,
            CommandError::Pattern(PatternError::NameTaken(_) | PatternError::Capacity(_))
            | CommandError::Busy(_)
            | CommandError::NoPatterns => StatusCode::CONFLICT,
            CommandError::NoController => StatusCode::SERVICE_UNAVAILABLE,
        },
    };
    error_response(status, &err.to_string())
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lan_subnet_keeps_first_three_octets() {
        assert_eq!(
            lan_subnet(IpAddr::V4(Ipv4Addr::new(192, 168, 4, 17))).as_deref(),
            Some("192.168.4")
        );
        assert_eq!(lan_subnet(IpAddr::V4(Ipv4Addr::LOCALHOST)), None);
        assert_eq!(lan_subnet(IpAddr::V4(Ipv4Addr::UNSPECIFIED)), None);
        assert_eq!(lan_subnet(IpAddr::V6(Ipv6Addr::LOCALHOST)), None);
    }

    #[tokio::test]
    async fn hub_subnet_is_a_normalised_subnet_when_routable() {
        if let Some(subnet) = hub_subnet().await {
            let normalised = zonelight_common::config::normalize_subnet(&subnet);
            assert_eq!(normalised.as_deref(), Some(subnet.as_str()));
        }
    }
}
