use std::{
    future::Future,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use chrono::Utc;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, Incoming, MqttOptions, NetworkOptions, QoS,
};
use tokio::{
    sync::{mpsc, Notify},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use greenhouse_common::{
    config::ExportConfig, ConnectionAction, ExportError, ExportFormat, GreenhouseMonitor,
    MqttConfig, RuntimeConfig, TransportEvent,
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 4096;
const MQTT_REQUEST_CAPACITY: usize = 64;
const TRANSPORT_EVENT_CAPACITY: usize = 64;
const TIMER_TICK: Duration = Duration::from_millis(250);
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// The single broker connection. Only [`ConnectionAction`]s touch it.
struct MqttTransport {
    options: MqttOptions,
    connect_timeout_secs: u64,
    topic: String,
    qos: QoS,
    session: MqttSession,
}

/// One client/event-loop pair. The event loop runs in its own task so that
/// a handshake in flight is never dropped by the main loop's timers.
struct MqttSession {
    client: AsyncClient,
    dial: Arc<Notify>,
    events: mpsc::Receiver<TransportEvent>,
    pump: JoinHandle<()>,
}

struct ConfigStore {
    runtime_path: PathBuf,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = ConfigStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut runtime);
    runtime.sanitize();

    let mut monitor = GreenhouseMonitor::new(&runtime);
    let mut transport = MqttTransport::new(&runtime.mqtt);

    info!(
        client_id = %transport.options.client_id(),
        topic = %transport.topic,
        window = runtime.history.window_len,
        "greenhouse monitor starting"
    );

    let actions = monitor.start(monotonic_ms());
    transport.execute(actions).await;

    let mut reconnect_signal = ReconnectSignal::new()?;
    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for shutdown signal: {err}");
        }
        info!("shutting down");
    };
    pump(&mut monitor, &mut transport, &mut reconnect_signal, shutdown).await;

    write_export(&monitor, &runtime.export).await
}

/// Feeds transport events and timer ticks into the monitor and executes the
/// resulting actions until `shutdown` resolves.
async fn pump(
    monitor: &mut GreenhouseMonitor,
    transport: &mut MqttTransport,
    reconnect_signal: &mut ReconnectSignal,
    shutdown: impl Future<Output = ()>,
) {
    let mut timer = tokio::time::interval(TIMER_TICK);
    let mut status_log = tokio::time::interval(STATUS_LOG_INTERVAL);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(event) = transport.session.events.recv() => {
                let actions = monitor.handle(event, Utc::now(), monotonic_ms());
                transport.execute(actions).await;
            }
            _ = timer.tick() => {
                let actions = monitor.tick(monotonic_ms());
                transport.execute(actions).await;
            }
            _ = status_log.tick() => {
                info!("{}", monitor.summary());
            }
            _ = reconnect_signal.recv() => {
                info!("manual reconnect requested");
                let actions = monitor.reconnect(monotonic_ms());
                transport.execute(actions).await;
            }
            _ = &mut shutdown => break,
        }
    }
}

impl MqttTransport {
    fn new(config: &MqttConfig) -> Self {
        let options = build_mqtt_options(config);
        let session = MqttSession::open(&options, config.connect_timeout_secs, &config.topic);

        Self {
            options,
            connect_timeout_secs: config.connect_timeout_secs,
            topic: config.topic.clone(),
            qos: qos_from_level(config.qos),
            session,
        }
    }

    async fn execute(&mut self, actions: Vec<ConnectionAction>) {
        for action in actions {
            match action {
                ConnectionAction::Connect => {
                    info!(broker = %broker_label(&self.options), "connecting to broker");
                    self.session.dial.notify_one();
                }
                ConnectionAction::Subscribe => {
                    let subscribed = self
                        .session
                        .client
                        .subscribe(self.topic.clone(), self.qos)
                        .await;
                    if let Err(err) = subscribed {
                        warn!("subscribe to {} failed: {err}", self.topic);
                    } else {
                        info!(topic = %self.topic, "subscribed");
                    }
                }
                ConnectionAction::EndSession => {
                    // Dropping the old session aborts its event loop task.
                    self.session =
                        MqttSession::open(&self.options, self.connect_timeout_secs, &self.topic);
                    info!("transport session ended");
                }
            }
        }
    }
}

impl MqttSession {
    fn open(options: &MqttOptions, connect_timeout_secs: u64, topic: &str) -> Self {
        let (client, mut eventloop) = AsyncClient::new(options.clone(), MQTT_REQUEST_CAPACITY);
        let mut network = NetworkOptions::new();
        network.set_connection_timeout(connect_timeout_secs);
        eventloop.set_network_options(network);

        let dial = Arc::new(Notify::new());
        let (tx, events) = mpsc::channel(TRANSPORT_EVENT_CAPACITY);
        let pump = spawn_mqtt_loop(eventloop, topic.to_string(), dial.clone(), tx);

        Self {
            client,
            dial,
            events,
            pump,
        }
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Polls the event loop only after a dial permit and parks again after a
/// connection error, so redials happen when the tracker asks for them.
fn spawn_mqtt_loop(
    mut eventloop: EventLoop,
    topic: String,
    dial: Arc<Notify>,
    events: mpsc::Sender<TransportEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            dial.notified().await;
            loop {
                let polled = eventloop.poll().await;
                let failed = polled.is_err();
                if let Some(event) = transport_event(&topic, polled) {
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                if failed {
                    break;
                }
            }
        }
    })
}

fn build_mqtt_options(config: &MqttConfig) -> MqttOptions {
    let client_id = format!(
        "{}-{}",
        config.client_id_prefix,
        &uuid::Uuid::new_v4().simple().to_string()[..8]
    );

    let mut options = mqtt_options_for_endpoint(client_id, config);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    if !config.user.is_empty() {
        options.set_credentials(config.user.clone(), config.pass.clone());
    }
    options
}

#[cfg(feature = "websocket")]
fn mqtt_options_for_endpoint(client_id: String, config: &MqttConfig) -> MqttOptions {
    match &config.ws_url {
        Some(url) => {
            let mut options = MqttOptions::new(client_id, url.clone(), config.port);
            options.set_transport(rumqttc::Transport::wss_with_default_config());
            options
        }
        None => MqttOptions::new(client_id, config.host.clone(), config.port),
    }
}

#[cfg(not(feature = "websocket"))]
fn mqtt_options_for_endpoint(client_id: String, config: &MqttConfig) -> MqttOptions {
    if config.ws_url.is_some() {
        warn!("ws_url is set but websocket support is not compiled in; using tcp");
    }
    MqttOptions::new(client_id, config.host.clone(), config.port)
}

fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        _ => QoS::AtLeastOnce,
    }
}

fn broker_label(options: &MqttOptions) -> String {
    let (host, port) = options.broker_address();
    format!("{host}:{port}")
}

fn transport_event(
    topic_filter: &str,
    polled: Result<Event, ConnectionError>,
) -> Option<TransportEvent> {
    match polled {
        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
            info!("mqtt connected");
            Some(TransportEvent::Connected)
        }
        Ok(Event::Incoming(Incoming::Publish(message))) => {
            if !rumqttc::matches(&message.topic, topic_filter) {
                debug!(topic = %message.topic, "ignoring message outside subscription");
                return None;
            }
            if message.payload.len() > MAX_MQTT_PAYLOAD_BYTES {
                warn!(
                    "dropping oversized MQTT payload on topic {} ({} bytes)",
                    message.topic,
                    message.payload.len()
                );
                return None;
            }
            debug!(topic = %message.topic, bytes = message.payload.len(), "sensor message");
            Some(TransportEvent::MessageReceived(message.payload.to_vec()))
        }
        // rumqttc fails the next poll with the reason; that error is reported.
        Ok(Event::Incoming(Incoming::Disconnect)) => {
            warn!("mqtt disconnected by broker");
            None
        }
        Ok(_) => None,
        Err(err) => {
            warn!("mqtt poll error: {err}");
            Some(TransportEvent::Disconnected(Some(err.to_string())))
        }
    }
}

async fn write_export(monitor: &GreenhouseMonitor, export: &ExportConfig) -> anyhow::Result<()> {
    let Some(path) = export.path.as_deref() else {
        return Ok(());
    };

    let mut path = PathBuf::from(path);
    if path.extension().is_none() {
        path.set_extension(export.format.extension());
    }

    let payload = match monitor.export(export.format) {
        Ok(payload) => payload,
        Err(ExportError::EmptyExport) => {
            warn!("no sensor data received; skipping export to {}", path.display());
            return Ok(());
        }
        Err(err) => return Err(err).context("failed to export session log"),
    };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    tokio::fs::write(&path, payload)
        .await
        .with_context(|| format!("failed to write export to {}", path.display()))?;

    info!(
        path = %path.display(),
        records = monitor.store().log_len(),
        "session log exported"
    );
    Ok(())
}

impl ConfigStore {
    fn new() -> Self {
        let data_dir = std::env::var("GREENHOUSE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.greenhouse"));

        Self {
            runtime_path: data_dir.join("runtime.json"),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        read_runtime_config(&self.runtime_path).await
    }
}

async fn read_runtime_config(path: &Path) -> anyhow::Result<RuntimeConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
            .with_context(|| format!("invalid runtime config at {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
        Err(err) => Err(err.into()),
    }
}

fn apply_env_overrides(runtime: &mut RuntimeConfig) {
    if let Ok(host) = std::env::var("MQTT_HOST") {
        runtime.mqtt.host = host;
    }
    if let Some(port) = env_parse::<u16>("MQTT_PORT") {
        runtime.mqtt.port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        runtime.mqtt.user = user;
        runtime.mqtt.pass = std::env::var("MQTT_PASS").unwrap_or_default();
    }
    if let Ok(topic) = std::env::var("MQTT_TOPIC") {
        runtime.mqtt.topic = topic;
    }
    if let Some(qos) = env_parse::<u8>("MQTT_QOS") {
        runtime.mqtt.qos = qos;
    }
    if let Ok(url) = std::env::var("MQTT_WS_URL") {
        runtime.mqtt.ws_url = Some(url);
    }
    if let Some(window) = env_parse::<usize>("HISTORY_WINDOW") {
        runtime.history.window_len = window;
    }
    if let Ok(value) = std::env::var("AUTO_RECONNECT") {
        runtime.reconnect.auto_reconnect = value == "1" || value.eq_ignore_ascii_case("true");
    }
    if let Ok(path) = std::env::var("GREENHOUSE_EXPORT_PATH") {
        runtime.export.path = Some(path);
    }
    if let Ok(format) = std::env::var("GREENHOUSE_EXPORT_FORMAT") {
        match format.parse::<ExportFormat>() {
            Ok(format) => runtime.export.format = format,
            Err(err) => warn!("ignoring GREENHOUSE_EXPORT_FORMAT: {err}"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}

/// SIGHUP asks for a manual reconnect. Never fires off unix.
struct ReconnectSignal {
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl ReconnectSignal {
    #[cfg(unix)]
    fn new() -> anyhow::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        let hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
        Ok(Self { hangup })
    }

    #[cfg(not(unix))]
    fn new() -> anyhow::Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn recv(&mut self) {
        if self.hangup.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
