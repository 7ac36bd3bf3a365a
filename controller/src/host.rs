use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use chrono_tz::Tz;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot, Mutex},
};
use tracing::{debug, info, warn};

use heating_common::{
    device_setpoint_topic, parse_device_topic, EngineAction, HeatingConfig, HeatingEngine,
    HeatingError, HouseState, NotificationLevel, ScheduledWindow, TOPIC_CMD_MODE,
    TOPIC_CONTROLLER_NOTIFICATION, TOPIC_CONTROLLER_STATE, TOPIC_DEVICE_ANNOUNCE,
    TOPIC_DEVICE_LEVEL, TOPIC_DEVICE_REMOVED,
};

use crate::{
    command::{parse_mqtt_command, parse_query_command},
    cron::CronTable,
};

#[derive(Clone)]
struct AppState {
    engine: Arc<Mutex<HeatingEngine>>,
    cron: Arc<Mutex<CronTable>>,
    timezone: Arc<String>,
    time_synced: Arc<AtomicBool>,
    mqtt: AsyncClient,
    store: AppStore,
    actions: ActionQueue,
}

/// Engine output queued for the executor, in the order the engine produced it.
struct ActionBatch {
    actions: Vec<EngineAction>,
    done: Option<oneshot::Sender<()>>,
}

/// Single ordered path from the engine to the executor. Callers queue while
/// still holding the engine lock, so devices see commands in decision order.
#[derive(Clone)]
struct ActionQueue {
    tx: mpsc::UnboundedSender<ActionBatch>,
}

impl ActionQueue {
    fn new() -> (Self, mpsc::UnboundedReceiver<ActionBatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn dispatch(&self, actions: Vec<EngineAction>) {
        if actions.is_empty() {
            return;
        }
        self.send(ActionBatch {
            actions,
            done: None,
        });
    }

    /// Queues `actions` and resolves once the executor has carried them out.
    fn dispatch_and_confirm(&self, actions: Vec<EngineAction>) -> oneshot::Receiver<()> {
        let (done, confirmed) = oneshot::channel();
        self.send(ActionBatch {
            actions,
            done: Some(done),
        });
        confirmed
    }

    fn send(&self, batch: ActionBatch) {
        if self.tx.send(batch).is_err() {
            warn!("action executor is gone, dropping engine actions");
        }
    }
}

#[derive(Clone)]
struct AppStore {
    config_path: Arc<PathBuf>,
    state_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct TimeStatus {
    #[serde(rename = "timeSynced")]
    time_synced: bool,
    timezone: String,
    #[serde(rename = "nowEpoch")]
    now_epoch: i64,
    #[serde(rename = "localTime")]
    local_time: String,
}

#[derive(Debug, Serialize)]
struct ScheduleView {
    windows: Vec<ScheduledWindow>,
    transitions: Vec<String>,
    warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
struct NotificationBody<'a> {
    level: NotificationLevel,
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct Announcement {
    room: u32,
    #[serde(default)]
    level: Option<f32>,
}

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut config = store.load_config().await.unwrap_or_else(|err| {
        warn!("failed to load heating config from store: {err:#}");
        HeatingConfig::default()
    });
    config.sanitize();

    let restored = store.load_state().await.unwrap_or_else(|err| {
        warn!("failed to load last house state from store: {err:#}");
        None
    });

    if config.timezone.parse::<Tz>().is_err() {
        warn!("unknown timezone {}, falling back to UTC", config.timezone);
    }
    let now = local_now(&config.timezone);
    let engine = HeatingEngine::new(&config);

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(config.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(config.network.mqtt_port);

    let mut mqtt_options = MqttOptions::new("heating-controller-rust", mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(config.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(config.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);
    let (actions, actions_rx) = ActionQueue::new();

    let app_state = AppState {
        engine: Arc::new(Mutex::new(engine)),
        cron: Arc::new(Mutex::new(CronTable::starting_at(now))),
        timezone: Arc::new(config.timezone.clone()),
        time_synced: Arc::new(AtomicBool::new(false)),
        mqtt,
        store,
        actions,
    };

    spawn_action_executor(app_state.clone(), actions_rx);
    subscribe_topics(&app_state.mqtt).await?;
    spawn_mqtt_loop(app_state.clone(), eventloop);

    {
        let mut engine = app_state.engine.lock().await;
        let actions = engine.start(restored.as_ref(), now);
        app_state.actions.dispatch(actions);
    }
    spawn_control_loop(app_state.clone());

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/command", post(handle_post_command))
        .route("/api/schedule", get(handle_get_schedule))
        .route("/api/time", get(handle_get_time))
        .with_state(app_state.clone());

    let port = std::env::var("HEATING_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let confirmed = {
        let mut engine = app_state.engine.lock().await;
        app_state.actions.dispatch_and_confirm(engine.stop())
    };
    if confirmed.await.is_err() {
        warn!("shutdown actions were not confirmed");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    let topics = [
        TOPIC_DEVICE_LEVEL,
        TOPIC_DEVICE_ANNOUNCE,
        TOPIC_DEVICE_REMOVED,
        TOPIC_CMD_MODE,
    ];

    for topic in topics {
        mqtt.subscribe(topic, QoS::AtLeastOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, message.topic, message.payload.to_vec())
                            .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
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

fn spawn_control_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));

        loop {
            interval.tick().await;

            let now_in_tz = now_in_timezone(&app_state.timezone);
            app_state
                .time_synced
                .store(now_in_tz.is_some(), Ordering::Relaxed);
            let now = now_in_tz.unwrap_or_else(utc_now);

            let due = { app_state.cron.lock().await.due(now) };
            for (key, fired_at) in due {
                let mut engine = app_state.engine.lock().await;
                let actions = engine.on_timer(&key, fired_at);
                app_state.actions.dispatch(actions);
            }
        }
    });
}

fn spawn_action_executor(
    app_state: AppState,
    mut batches: mpsc::UnboundedReceiver<ActionBatch>,
) {
    tokio::spawn(async move {
        while let Some(batch) = batches.recv().await {
            execute_engine_actions(&app_state, batch.actions).await;
            if let Some(done) = batch.done {
                let _ = done.send(());
            }
        }
    });
}

async fn execute_engine_actions(app_state: &AppState, actions: Vec<EngineAction>) {
    for action in actions {
        match action {
            EngineAction::SetPoint { device_id, level } => {
                info!("setting {device_id} to {level}");
                if let Err(err) = app_state
                    .mqtt
                    .publish(
                        device_setpoint_topic(&device_id),
                        QoS::AtLeastOnce,
                        false,
                        level.to_string(),
                    )
                    .await
                {
                    warn!("setpoint publish for {device_id} failed: {err}");
                }
            }
            EngineAction::Timer(change) => {
                app_state.cron.lock().await.apply(change);
            }
            EngineAction::Notify { level, message } => {
                publish_notification(app_state, level, &message).await;
            }
            EngineAction::Publish(house) => {
                publish_house_state(app_state, &house).await;
            }
        }
    }
}

async fn publish_notification(app_state: &AppState, level: NotificationLevel, message: &str) {
    match serde_json::to_vec(&NotificationBody { level, message }) {
        Ok(body) => {
            if let Err(err) = app_state
                .mqtt
                .publish(TOPIC_CONTROLLER_NOTIFICATION, QoS::AtLeastOnce, false, body)
                .await
            {
                warn!("notification publish failed: {err}");
            }
        }
        Err(err) => warn!("notification serialization failed: {err}"),
    }
}

async fn publish_house_state(app_state: &AppState, house: &HouseState) {
    match serde_json::to_vec(house) {
        Ok(body) => {
            if let Err(err) = app_state
                .mqtt
                .publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
                .await
            {
                warn!("controller state publish failed: {err}");
            }
        }
        Err(err) => warn!("controller state serialization failed: {err}"),
    }

    if let Err(err) = app_state.store.save_state(house).await {
        warn!("failed to persist house state: {err:#}");
    }
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;
    let now = local_now(&app_state.timezone);

    if topic == TOPIC_CMD_MODE {
        match parse_mqtt_command(&message) {
            Ok(command) => {
                let mut engine = app_state.engine.lock().await;
                let actions = engine
                    .handle_command(command, now)
                    .unwrap_or_else(|err| vec![error_notification(&err)]);
                app_state.actions.dispatch(actions);
            }
            Err(err) => warn!("ignoring mode command {message:?}: {err}"),
        }
        return Ok(());
    }

    let Some((device_id, leaf)) = parse_device_topic(&topic) else {
        return Ok(());
    };

    match leaf {
        "level" => {
            let level = message
                .trim()
                .parse::<f32>()
                .with_context(|| format!("invalid level {message:?} from {device_id}"))?;
            if level.is_finite() {
                let outcome = {
                    let mut engine = app_state.engine.lock().await;
                    engine.on_level_change(device_id, level, now)
                };
                debug!("{device_id} reported {level}: {outcome:?}");
            }
        }
        "announce" => {
            let announcement: Announcement = serde_json::from_str(&message)
                .with_context(|| format!("invalid announcement from {device_id}"))?;
            let mut engine = app_state.engine.lock().await;
            let actions =
                engine.register_thermostat(device_id, announcement.room, announcement.level, now);
            app_state.actions.dispatch(actions);
        }
        "removed" => {
            let mut engine = app_state.engine.lock().await;
            engine.remove_thermostat(device_id);
        }
        _ => {}
    }

    Ok(())
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.engine.lock().await.status();
    Json(status)
}

async fn handle_post_command(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let command = match parse_query_command(&params) {
        Ok(command) => command,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    let now = local_now(&state.timezone);
    let mut engine = state.engine.lock().await;
    match engine.handle_command(command, now) {
        Ok(actions) => {
            state.actions.dispatch(actions);
            Json(engine.status()).into_response()
        }
        Err(err @ HeatingError::UnknownRoom(_)) => {
            error_response(StatusCode::NOT_FOUND, &err.to_string())
        }
        Err(err) => error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

async fn handle_get_schedule(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.engine.lock().await;
    Json(ScheduleView {
        windows: engine.windows().to_vec(),
        transitions: engine.registry().keys().map(str::to_string).collect(),
        warnings: engine.warnings().iter().map(ToString::to_string).collect(),
    })
}

async fn handle_get_time(State(state): State<AppState>) -> impl IntoResponse {
    let now = local_now(&state.timezone);
    Json(TimeStatus {
        time_synced: state.time_synced.load(Ordering::Relaxed),
        timezone: state.timezone.as_ref().clone(),
        now_epoch: now.timestamp(),
        local_time: now.to_rfc3339(),
    })
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("HEATING_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.heating"));

        Self {
            config_path: Arc::new(data_dir.join("config.json")),
            state_path: Arc::new(data_dir.join("state.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_config(&self) -> anyhow::Result<HeatingConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.config_path.as_ref()).await {
            Ok(raw) => serde_json::from_slice::<HeatingConfig>(&raw)
                .with_context(|| format!("invalid config at {}", self.config_path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(
                    "no config at {}, starting without rooms",
                    self.config_path.display()
                );
                Ok(HeatingConfig::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn load_state(&self) -> anyhow::Result<Option<HouseState>> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.state_path.as_ref()).await {
            Ok(raw) => Ok(Some(serde_json::from_slice::<HouseState>(&raw)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_state(&self, house: &HouseState) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.state_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(house)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

fn error_notification(err: &HeatingError) -> EngineAction {
    warn!("command rejected: {err}");
    EngineAction::Notify {
        level: NotificationLevel::Error,
        message: err.to_string(),
    }
}

fn now_in_timezone(timezone: &str) -> Option<DateTime<FixedOffset>> {
    let tz: Tz = timezone.parse().ok()?;
    let local = Utc::now().with_timezone(&tz);
    Some(local.with_timezone(&local.offset().fix()))
}

fn utc_now() -> DateTime<FixedOffset> {
    Utc::now().fixed_offset()
}

fn local_now(timezone: &str) -> DateTime<FixedOffset> {
    now_in_timezone(timezone).unwrap_or_else(utc_now)
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
