use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::{
    net::TcpListener,
    sync::{broadcast, Mutex},
};
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use chamber_common::{
    ChamberEngine, ControllerConfig, CycleScheduler, EngineAction, RerunSignal, RuntimeConfig,
    Thresholds, FRAME_LEN,
};

use crate::{
    relays::RelayBank,
    sim::{SimChamber, SimRelay},
};

const SCHEDULER_POLL_MS: u64 = 50;
const DEFAULT_HTTP_PORT: u16 = 8080;
const FRAME_CHANNEL_CAPACITY: usize = 16;
const SIM_AMBIENT_C: f32 = 22.0;

#[derive(Clone)]
struct AppState {
    engine: Arc<Mutex<ChamberEngine>>,
    hardware: Arc<Mutex<SimHardware>>,
    rerun: RerunSignal,
    frames: broadcast::Sender<[u8; FRAME_LEN]>,
}

struct SimHardware {
    chamber: SimChamber,
    relays: RelayBank<SimRelay>,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });

    let engine = ChamberEngine::new(Thresholds::default())
        .with_run_margin(runtime.controller.heater_run_margin_ms);

    let mut hardware = SimHardware {
        chamber: SimChamber::new(SIM_AMBIENT_C),
        relays: RelayBank::default(),
    };
    hardware
        .relays
        .execute(&engine.startup_actions())
        .context("failed to initialise outputs")?;

    let (frames, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
    let scheduler = CycleScheduler::new(runtime.controller.loop_interval_ms, RerunSignal::new());

    let app_state = AppState {
        engine: Arc::new(Mutex::new(engine)),
        hardware: Arc::new(Mutex::new(hardware)),
        rerun: scheduler.rerun_signal(),
        frames,
    };

    spawn_control_loop(app_state.clone(), scheduler);

    let web_root = format!("{}/web", env!("CARGO_MANIFEST_DIR"));
    let app = Router::new()
        .route("/ws", get(handle_ws))
        .route("/api/status", get(handle_get_status))
        .route("/api/request", post(handle_post_request))
        .route("/api/button", post(handle_button))
        .fallback_service(ServeDir::new(web_root))
        .with_state(app_state);

    let port = listen_port(
        std::env::var("CONTROLLER_HTTP_PORT").ok().as_deref(),
        &runtime.controller,
    );
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn spawn_control_loop(app_state: AppState, mut scheduler: CycleScheduler) {
    tokio::spawn(async move {
        loop {
            let now_ms = monotonic_ms();
            if scheduler.poll(now_ms) {
                run_cycle(&app_state, now_ms).await;
            }

            let wait_ms = scheduler.until_due_ms(monotonic_ms()).min(SCHEDULER_POLL_MS);
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        }
    });
}

async fn run_cycle(app_state: &AppState, now_ms: u64) {
    let mut hardware = app_state.hardware.lock().await;
    let SimHardware { chamber, relays } = &mut *hardware;
    chamber.advance(now_ms, &*relays);
    debug!(
        "simulated air {:.2} C, element {:.0} ohm",
        chamber.air_c(),
        chamber.element_ohms()
    );

    let frame = {
        let mut engine = app_state.engine.lock().await;
        let actions = engine.tick(now_ms, &mut chamber.thermometer, &mut chamber.adc);
        if let Err(err) = relays.apply(&mut *engine, &actions) {
            warn!("output switching failed: {err:#}");
        }
        info!("{}", engine.cycle_summary(now_ms));
        engine.frame(now_ms).encode()
    };
    drop(hardware);

    // No receivers just means no observer is connected.
    let _ = app_state.frames.send(frame);
}

/// Runs `decide` and writes its actions while holding the hardware lock and
/// then the engine lock, so outputs change in the order the engine decided.
async fn drive_outputs(
    app_state: &AppState,
    decide: impl FnOnce(&mut ChamberEngine) -> Vec<EngineAction>,
) {
    let mut hardware = app_state.hardware.lock().await;
    let mut engine = app_state.engine.lock().await;
    let actions = decide(&mut *engine);
    for action in &actions {
        debug!("engine action: {action:?}");
    }
    if let Err(err) = hardware.relays.apply(&mut *engine, &actions) {
        warn!("output switching failed: {err:#}");
    }
}

async fn handle_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| observe(socket, state))
}

/// Streams a frame after every cycle and accepts binary requests from the
/// observer. Connecting requests an immediate cycle so the observer gets a
/// frame without waiting for the period.
async fn observe(mut socket: WebSocket, state: AppState) {
    let mut frames = state.frames.subscribe();
    info!("websocket observer connected");
    state.rerun.request();

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    let message = Message::Binary(Bytes::copy_from_slice(&frame));
                    if socket.send(message).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("websocket observer skipped {skipped} frames");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            message = socket.recv() => match message {
                Some(Ok(Message::Binary(payload))) => {
                    // Malformed requests are logged by the engine and dropped.
                    let _ = apply_request(&state, &payload).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!("websocket receive failed: {err}");
                    break;
                }
            },
        }
    }

    info!("websocket observer disconnected");
}

async fn apply_request(state: &AppState, payload: &[u8]) -> Result<(), String> {
    let mut outcome = Ok(());
    drive_outputs(state, |engine| {
        engine
            .handle_request(payload, monotonic_ms())
            .unwrap_or_else(|err| {
                outcome = Err(err.to_string());
                Vec::new()
            })
    })
    .await;
    outcome?;
    state.rerun.request();
    Ok(())
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = {
        let engine = state.engine.lock().await;
        engine.status(monotonic_ms())
    };
    Json(status)
}

/// Same binary request format as the websocket, for clients that only speak
/// plain HTTP.
async fn handle_post_request(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    if let Err(message) = apply_request(&state, &body).await {
        return error_response(StatusCode::BAD_REQUEST, &message);
    }
    handle_get_status(State(state)).await.into_response()
}

/// Stands in for the physical light button.
async fn handle_button(State(state): State<AppState>) -> impl IntoResponse {
    drive_outputs(&state, ChamberEngine::toggle_light).await;
    state.rerun.request();
    handle_get_status(State(state)).await.into_response()
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("CHAMBER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.chamber"));

        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let path = self.runtime_path.as_ref();
        match tokio::fs::read(path).await {
            Ok(raw) => RuntimeConfig::from_json(&raw)
                .with_context(|| format!("invalid runtime config at {}", path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

/// `CONTROLLER_HTTP_PORT` wins, then the runtime config, then 8080.
fn listen_port(env_port: Option<&str>, controller: &ControllerConfig) -> u16 {
    env_port
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or_else(|| controller.http_port_or(DEFAULT_HTTP_PORT))
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

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
