use anyhow::Result;
use facewatch_core::{ModelPaths, ModelSet};
use facewatch_hw::Camera;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod events;
mod loader;
mod overlay;
mod state;
mod status;

use config::Config;
use engine::LoopOptions;
use events::MatchEvent;
use overlay::DisplaySurface;
use state::PipelineEvent;
use status::StatusHandle;

fn secs(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facewatchd starting");

    let config = Config::from_env()?;
    tracing::info!(
        camera = %config.camera_device,
        model_dir = %config.model_dir.display(),
        references = config.references.len(),
        threshold = config.match_threshold,
        "configuration loaded"
    );

    let status = StatusHandle::new();
    let dbus = if config.dbus_enabled {
        match dbus_interface::serve(status.clone()).await {
            Ok(conn) => Some(conn),
            Err(err) => {
                tracing::warn!(error = %err, "D-Bus unavailable; match events will only be logged");
                None
            }
        }
    } else {
        None
    };

    let paths = ModelPaths::in_dir(&config.model_dir);
    let ready = match loader::prepare(
        move || ModelSet::load(&paths),
        config.references.clone(),
        config.reference_policy,
        secs(config.load_timeout_secs),
        &status,
    )
    .await
    {
        Ok(ready) => ready,
        Err(err) => return idle_in_error(&status, &err.user_message()).await,
    };
    if let Some(notice) = status.notice() {
        eprintln!("{notice}");
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<MatchEvent>();
    let options = LoopOptions {
        threshold: config.match_threshold,
        surface: DisplaySurface::new(config.display_width, config.display_height),
        warmup_frames: config.warmup_frames,
        camera_timeout: secs(config.camera_timeout_secs),
        snapshot_path: config.snapshot_path.clone(),
        snapshot_every: config.snapshot_every,
    };
    let (device, width, height) = (
        config.camera_device.clone(),
        config.capture_width,
        config.capture_height,
    );
    let handle = match engine::start_streaming(
        ready,
        move || Camera::open(&device, width, height)?.into_stream(),
        &options,
        event_tx,
        &status,
    )
    .await
    {
        Ok(handle) => handle,
        Err(err) => return idle_in_error(&status, &err.user_message()).await,
    };

    let forwarder = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            tracing::info!(label = %event.label, time = %event.time_string(), "face matched");
            if let Some(conn) = &dbus {
                if let Err(err) = dbus_interface::emit_face_matched(conn, &event).await {
                    tracing::warn!(error = %err, "FaceMatched signal failed");
                }
            }
        }
    });

    tracing::info!("facewatchd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facewatchd shutting down");

    tokio::task::spawn_blocking(move || handle.shutdown()).await?;
    status.apply(PipelineEvent::TearDown);
    tracing::info!(
        processed = status.frames_processed(),
        dropped = status.frames_dropped(),
        "frame totals"
    );
    // The engine dropped its sender; the forwarder drains and ends.
    forwarder.await?;

    Ok(())
}

/// Report a startup failure and stay up so the host can read the error
/// state, until signaled.
async fn idle_in_error(status: &StatusHandle, message: &str) -> Result<()> {
    eprintln!("{message}");
    tracing::info!(state = status.state().name(), "waiting for shutdown");
    tokio::signal::ctrl_c().await?;
    tracing::info!("facewatchd shutting down");
    Ok(())
}
