//! HTTP API server: start and stop transmissions remotely, and stream the
//! frames to a browser that acts as the display.
//!
//! The server runs on the tokio async runtime while each flicker session
//! runs on its own `std::thread`. Sessions report back through a
//! [`FlickerSink`] that updates the shared status and fans events out to
//! WebSocket clients over a `tokio::sync::broadcast` channel.
//!
//! ## Rust concepts
//! - axum extractors: `State`, `Json`, `WebSocketUpgrade`
//! - `broadcast` channels for one-to-many event delivery
//! - `tokio::select!` to wait on two event sources at once

use crate::emitter::{Emitter, EmitterError, FlickerEvent, FlickerSink, SinkClosed};
use crate::encoder::{Frame, ZONE_COUNT, encode};
use crate::TransmitConfig;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Events buffered per WebSocket client before it starts lagging.
const EVENT_BUFFER: usize = 256;

// ── Status ───────────────────────────────────────────────────────────

/// What the transmitter is currently doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlickerState {
    Idle,
    Running,
    /// Stop requested, waiting for the current frame to finish.
    Stopping,
    Stopped,
}

/// Shared status, written by the session thread and read by handlers.
#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct FlickerStatus {
    pub state: FlickerState,
    /// Increments with every started session
    pub session: u64,
    /// Payload of the current or last session
    pub payload: Option<String>,
    /// Frequency of the current or last session, in Hz
    pub frequency_hz: Option<u32>,
    /// Frames in one pass over the payload
    pub frame_count: Option<usize>,
    /// Display phases emitted by the current session
    pub displays: u64,
    /// Zones currently shown, strobe first
    #[schema(value_type = Vec<bool>)]
    pub zones: [bool; ZONE_COUNT],
    /// Server version
    pub version: String,
}

impl FlickerStatus {
    pub fn new() -> Self {
        Self {
            state: FlickerState::Idle,
            session: 0,
            payload: None,
            frequency_hz: None,
            frame_count: None,
            displays: 0,
            zones: [false; ZONE_COUNT],
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    fn begin(&mut self, session: u64, payload: String, frequency_hz: u32, frame_count: usize) {
        self.state = FlickerState::Running;
        self.session = session;
        self.payload = Some(payload);
        self.frequency_hz = Some(frequency_hz);
        self.frame_count = Some(frame_count);
        self.displays = 0;
        self.zones = [false; ZONE_COUNT];
    }

    fn mark_stopping(&mut self, session: u64) {
        if self.session == session && self.state == FlickerState::Running {
            self.state = FlickerState::Stopping;
        }
    }
}

impl Default for FlickerStatus {
    fn default() -> Self {
        Self::new()
    }
}

// ── Session sink ─────────────────────────────────────────────────────

/// Feeds one session's frames into the shared status and the broadcast.
///
/// Updates are tagged with the session number so a session that is winding
/// down cannot overwrite the status of its successor.
struct StatusSink {
    session: u64,
    status: Arc<Mutex<FlickerStatus>>,
    events: broadcast::Sender<FlickerEvent>,
}

impl FlickerSink for StatusSink {
    fn display(&mut self, frame: Frame) -> Result<(), SinkClosed> {
        {
            let mut s = self.status.lock().unwrap();
            if s.session == self.session {
                s.zones = frame.zones();
                s.displays += 1;
            }
        }
        // No subscribers is fine; the status still tracks the frames.
        let _ = self.events.send(FlickerEvent::Display(frame));
        Ok(())
    }

    fn stopped(&mut self) {
        {
            let mut s = self.status.lock().unwrap();
            if s.session == self.session {
                s.state = FlickerState::Stopped;
                s.zones = [false; ZONE_COUNT];
            }
        }
        let _ = self.events.send(FlickerEvent::Stopped);
    }
}

// ── App State ────────────────────────────────────────────────────────

/// Shared application state, passed to every handler via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Owns the running session, if any
    pub emitter: Arc<Emitter>,
    /// Shared flicker status (session thread writes, handlers read)
    pub status: Arc<Mutex<FlickerStatus>>,
    /// Every session event, for WebSocket clients
    pub events: broadcast::Sender<FlickerEvent>,
    /// Defaults for frequency and auto-stop
    pub config: TransmitConfig,
}

impl AppState {
    pub fn new(config: TransmitConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            emitter: Arc::new(Emitter::new()),
            status: Arc::new(Mutex::new(FlickerStatus::new())),
            events,
            config,
        }
    }
}

// ── OpenAPI Documentation ────────────────────────────────────────────

#[derive(OpenApi)]
#[openapi(
    paths(get_status, post_flicker_start, post_flicker_stop),
    components(schemas(FlickerStatus, FlickerState, StartRequest)),
    tags(
        (name = "flicker", description = "Transmission control endpoints"),
        (name = "system", description = "System status endpoints"),
    ),
    info(
        title = "Flicker Link API",
        version = env!("CARGO_PKG_VERSION"),
        description = "HTTP API for transmitting hex payloads as light pulses"
    )
)]
pub struct ApiDoc;

// ── Request types ────────────────────────────────────────────────────

#[derive(Deserialize, utoipa::ToSchema)]
pub struct StartRequest {
    /// Hex payload, an even number of digits (case-insensitive)
    #[schema(example = "00FF28C7")]
    payload: String,
    /// Phases per second. Must match the receiver. Defaults to the server's --frequency.
    #[schema(example = 40, minimum = 1)]
    #[serde(default)]
    frequency: Option<u32>,
}

// ── Router ───────────────────────────────────────────────────────────

/// Build the axum router with all API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(
            SwaggerUi::new("/docs")
                .url("/api-docs/openapi.json", ApiDoc::openapi())
                .config(utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"]).validator_url("none")),
        )
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/flicker/start", post(post_flicker_start))
        .route("/api/v1/flicker/stop", post(post_flicker_stop))
        .route("/api/v1/flicker/stream", get(ws_flicker_stream))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Handlers ─────────────────────────────────────────────────────────

/// GET /api/v1/status: return current transmitter state
#[utoipa::path(
    get,
    path = "/api/v1/status",
    tag = "system",
    responses(
        (status = 200, description = "Current flicker status", body = FlickerStatus)
    )
)]
async fn get_status(State(state): State<AppState>) -> Json<FlickerStatus> {
    let status = state.status.lock().unwrap().clone();
    Json(status)
}

/// POST /api/v1/flicker/start: encode a payload and start transmitting it
#[utoipa::path(
    post,
    path = "/api/v1/flicker/start",
    tag = "flicker",
    request_body = StartRequest,
    responses(
        (status = 200, description = "Transmission started", body = FlickerStatus),
        (status = 400, description = "Invalid payload or frequency"),
        (status = 409, description = "A session is still running")
    )
)]
async fn post_flicker_start(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> Result<Json<FlickerStatus>, (StatusCode, String)> {
    let sequence = encode(&req.payload).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let frequency = req.frequency.unwrap_or(state.config.frequency_hz);
    let frame_count = sequence.len();

    // Hold the status lock across start so the new session's first frame
    // cannot land before `begin` resets the counters.
    let (session, handle, snapshot) = {
        let mut status = state.status.lock().unwrap();
        let session = status.session + 1;
        let sink = StatusSink {
            session,
            status: state.status.clone(),
            events: state.events.clone(),
        };
        let handle = state
            .emitter
            .start(sequence, frequency, sink)
            .map_err(start_error)?;
        status.begin(session, req.payload, frequency, frame_count);
        (session, handle, status.clone())
    };

    if let Some(after) = state.config.auto_stop() {
        let status = state.status.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if !handle.is_stopped() {
                tracing::info!("Auto-stopping session {} after {}s", session, after.as_secs());
                handle.stop();
                status.lock().unwrap().mark_stopping(session);
            }
        });
    }

    Ok(Json(snapshot))
}

/// POST /api/v1/flicker/stop: stop after the current frame
#[utoipa::path(
    post,
    path = "/api/v1/flicker/stop",
    tag = "flicker",
    responses(
        (status = 200, description = "Stop requested (no-op when idle)", body = FlickerStatus),
    )
)]
async fn post_flicker_stop(State(state): State<AppState>) -> Json<FlickerStatus> {
    let mut status = state.status.lock().unwrap();
    state.emitter.stop();
    let session = status.session;
    status.mark_stopping(session);
    Json(status.clone())
}

fn start_error(err: EmitterError) -> (StatusCode, String) {
    let code = match err {
        EmitterError::InvalidFrequency | EmitterError::EmptySequence => StatusCode::BAD_REQUEST,
        EmitterError::AlreadyRunning => StatusCode::CONFLICT,
        EmitterError::Spawn(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, err.to_string())
}

// ── WebSocket streaming ─────────────────────────────────────────────

/// GET /api/v1/flicker/stream: WebSocket endpoint that pushes every
/// session event as JSON text, e.g.
/// `{"event":"display","zones":[true,false,true,true,false]}` and
/// `{"event":"stopped"}`. Incoming messages other than Close are ignored.
async fn ws_flicker_stream(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream_socket(socket, state))
}

async fn handle_stream_socket(mut socket: WebSocket, state: AppState) {
    tracing::info!("WebSocket stream client connected");

    let mut events = state.events.subscribe();
    let mut sent: u64 = 0;

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("WebSocket client lagging, skipped {} events", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!("Failed to serialize event: {}", e);
                        continue;
                    }
                };

                if socket.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
                sent += 1;
            }
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::warn!("WebSocket receive error: {}", e);
                    break;
                }
                Some(Ok(_)) => {} // Ignore text, ping/pong handled by axum
            },
        }
    }

    tracing::info!("WebSocket stream client disconnected ({} events sent)", sent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn test_state() -> AppState {
        AppState::new(TransmitConfig::new(200, 0))
    }

    fn start_request(payload: &str, frequency: Option<u32>) -> Json<StartRequest> {
        Json(StartRequest {
            payload: payload.to_string(),
            frequency,
        })
    }

    /// Poll until the session thread has reported `Stopped`.
    async fn wait_until_finished(state: &AppState) {
        for _ in 0..200 {
            let stopped = state.status.lock().unwrap().state == FlickerState::Stopped;
            if stopped {
                state.emitter.join();
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session did not finish");
    }

    #[tokio::test]
    async fn status_starts_idle() {
        let Json(status) = get_status(State(test_state())).await;
        assert_eq!(status.state, FlickerState::Idle);
        assert_eq!(status.session, 0);
        assert_eq!(status.payload, None);
    }

    #[tokio::test]
    async fn start_then_stop_updates_status() {
        let state = test_state();

        let Json(started) = post_flicker_start(State(state.clone()), start_request("00FF", None))
            .await
            .unwrap();
        assert_eq!(started.state, FlickerState::Running);
        assert_eq!(started.session, 1);
        assert_eq!(started.frequency_hz, Some(200));
        assert_eq!(started.frame_count, Some(4));
        assert_eq!(started.payload.as_deref(), Some("00FF"));

        let Json(stopping) = post_flicker_stop(State(state.clone())).await;
        assert_eq!(stopping.state, FlickerState::Stopping);

        wait_until_finished(&state).await;
        let Json(stopped) = get_status(State(state.clone())).await;
        assert_eq!(stopped.state, FlickerState::Stopped);
        assert_eq!(stopped.zones, [false; ZONE_COUNT]);
    }

    #[tokio::test]
    async fn start_rejects_invalid_payload() {
        let err = post_flicker_start(State(test_state()), start_request("ABC", None))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert!(err.1.contains("even number"));
    }

    #[tokio::test]
    async fn start_rejects_zero_frequency() {
        let err = post_flicker_start(State(test_state()), start_request("AB", Some(0)))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn start_rejects_empty_payload() {
        let err = post_flicker_start(State(test_state()), start_request("", None))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn second_start_conflicts_while_running() {
        let state = test_state();
        post_flicker_start(State(state.clone()), start_request("AB", None))
            .await
            .unwrap();

        let err = post_flicker_start(State(state.clone()), start_request("CD", None))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::CONFLICT);

        post_flicker_stop(State(state.clone())).await;
        wait_until_finished(&state).await;
    }

    #[tokio::test]
    async fn stop_while_idle_is_noop() {
        let Json(status) = post_flicker_stop(State(test_state())).await;
        assert_eq!(status.state, FlickerState::Idle);
    }

    #[tokio::test]
    async fn events_reach_subscribers_in_order() {
        let state = test_state();
        let mut events = state.events.subscribe();
        post_flicker_start(State(state.clone()), start_request("AB", None))
            .await
            .unwrap();

        let b = Frame::from_nibble(0xB);
        assert_eq!(events.recv().await.unwrap(), FlickerEvent::Display(b.with_strobe(true)));
        assert_eq!(events.recv().await.unwrap(), FlickerEvent::Display(b));

        post_flicker_stop(State(state.clone())).await;
        loop {
            if events.recv().await.unwrap() == FlickerEvent::Stopped {
                break;
            }
        }
        wait_until_finished(&state).await;
    }

    #[tokio::test]
    async fn auto_stop_ends_session() {
        let state = AppState::new(TransmitConfig::new(500, 1));
        post_flicker_start(State(state.clone()), start_request("AB", None))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        wait_until_finished(&state).await;
        let Json(status) = get_status(State(state)).await;
        assert_eq!(status.state, FlickerState::Stopped);
        assert!(status.displays > 0);
    }

    #[test]
    fn start_error_status_codes() {
        assert_eq!(start_error(EmitterError::InvalidFrequency).0, StatusCode::BAD_REQUEST);
        assert_eq!(start_error(EmitterError::AlreadyRunning).0, StatusCode::CONFLICT);
    }
}
