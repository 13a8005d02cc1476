//! Flicker Link transmitter
//!
//! Sends a hex payload as five-zone light pulses. By default the frames are
//! drawn in the terminal; with `--port` an HTTP API starts instead, so a
//! browser or other client can start/stop transmissions and render the
//! frames it receives over a WebSocket.
//!
//! ## Architecture
//! - **Emitter thread** (std::thread): plays the frame sequence, one per session
//! - **Host**: the terminal loop or the HTTP server (tokio/axum) that starts,
//!   stops and draws sessions
//!
//! ## Usage
//! ```sh
//! flicker-link --payload 00FF28C7 --frequency 40
//! flicker-link --payload-file payload.hex --auto-stop 0
//! flicker-link --port 8080
//! ```

use clap::Parser;
use flicker_link::payload::load_payload;
use flicker_link::render::transmit;
use flicker_link::server::{self, AppState};
use flicker_link::{
    DEFAULT_AUTO_STOP_SECS, DEFAULT_FREQUENCY_HZ, DEMO_PAYLOAD, TransmitConfig, encode,
    setup_signal_handler,
};
use std::error::Error;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Flicker Link transmitter
#[derive(Parser)]
#[command(name = "flicker-link")]
#[command(about = "Transmit a hex payload as timed light-pulse frames")]
#[command(version)]
struct Args {
    /// Hex payload to transmit (even number of digits)
    #[arg(long, default_value = DEMO_PAYLOAD, conflicts_with = "payload_file")]
    payload: String,

    /// Read the payload from a file instead; whitespace is ignored
    #[arg(long)]
    payload_file: Option<PathBuf>,

    /// On/off phases per second, must match the receiver
    #[arg(long, default_value_t = DEFAULT_FREQUENCY_HZ)]
    frequency: u32,

    /// Stop a session after this many seconds (0 = run until stopped)
    #[arg(long, default_value_t = DEFAULT_AUTO_STOP_SECS)]
    auto_stop: u64,

    /// Serve the HTTP API on this port instead of drawing in the terminal
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<(), Box<dyn Error>> {
    // Logs go to stderr; stdout belongs to the terminal renderer.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .compact()
        .init();

    let args = Args::parse();
    let config = TransmitConfig::new(args.frequency, args.auto_stop);

    tracing::info!("Flicker Link v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Frequency: {} Hz ({}ms per phase)",
        config.frequency_hz,
        config.half_period().as_millis()
    );

    match args.port {
        Some(port) => serve(port, config),
        None => {
            let payload = match &args.payload_file {
                Some(path) => load_payload(path)
                    .map_err(|e| format!("could not read {}: {}", path.display(), e))?,
                None => args.payload,
            };
            run_terminal(&payload, config)
        }
    }
}

fn run_terminal(payload: &str, config: TransmitConfig) -> Result<(), Box<dyn Error>> {
    // Validate before anything starts running.
    let sequence = encode(payload)?;
    tracing::info!("Payload: {} bytes, {} frames", payload.len() / 2, sequence.len());

    let running = setup_signal_handler()?;
    transmit(sequence, config, &running, io::stdout().lock())?;
    Ok(())
}

#[tokio::main]
async fn serve(port: u16, config: TransmitConfig) -> Result<(), Box<dyn Error>> {
    let app = server::create_router(AppState::new(config));

    let addr = format!("0.0.0.0:{port}");
    tracing::info!("Listening on http://{}", addr);
    tracing::info!("API Documentation: http://localhost:{}/docs", port);
    tracing::info!("Try: curl http://localhost:{}/api/v1/status", port);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    // Runs until the process is killed
    axum::serve(listener, app).await?;
    Ok(())
}
