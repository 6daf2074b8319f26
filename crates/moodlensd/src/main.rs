use anyhow::{Context, Result};
use moodlens_core::ModelBundle;
use moodlens_hw::{CameraError, CaptureSession};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod loader;
mod scheduler;
mod sink;
mod store;
#[cfg(test)]
mod testing;

use config::Config;
use dbus_interface::{MoodLensService, BUS_NAME, OBJECT_PATH};
use loader::ModelLoader;
use scheduler::{CycleRunner, DetectionScheduler, SchedulerStats};
use sink::{Notice, ResultSink};
use store::MoodStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("moodlensd starting");

    let config = Config::load()?;
    tracing::info!(
        model_dir = %config.model_dir.display(),
        db = %config.db_path.display(),
        tick_ms = config.tick_interval_ms,
        "configuration loaded"
    );

    let store = MoodStore::open(&config.db_path)
        .await
        .context("failed to open mood store")?;
    let sink = Arc::new(ResultSink::new(store));
    // A history failure is surfaced as a notice; detection still runs.
    let _ = sink.refresh_history().await;

    let loader = ModelLoader::new(config.model_load_timeout());
    let stats = Arc::new(SchedulerStats::default());
    let capture = CaptureSession::new();
    let (restart_tx, mut restart_rx) = mpsc::channel(1);

    let service = MoodLensService::new(
        sink.clone(),
        capture.subscribe(),
        loader.subscribe(),
        stats.clone(),
        restart_tx,
    );
    let connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on the session bus")?;
    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "D-Bus interface registered");

    let signals = tokio::spawn({
        let connection = connection.clone();
        let sink = sink.clone();
        async move {
            if let Err(e) = dbus_interface::forward_signals(connection, sink).await {
                tracing::error!(error = %e, "signal relay stopped");
            }
        }
    });

    let Some(loaded) = unless_interrupted(
        loader.load(config.face_model_path(), config.hand_model_path()),
        tokio::signal::ctrl_c(),
    )
    .await
    else {
        tracing::info!("interrupted during model load; shutting down");
        signals.abort();
        return Ok(());
    };
    let models = match loaded {
        Ok(models) => models,
        Err(e) => {
            sink.notify(Notice::ModelLoad(format!(
                "{e}; showing simulated moods instead"
            )));
            ModelBundle::unavailable()
        }
    };

    let capture_state = capture.subscribe();
    let runner = Arc::new(Mutex::new(CycleRunner::new(capture, models)));
    let constraints = config.capture_constraints();

    tracing::info!("moodlensd ready");

    loop {
        let opened = tokio::task::spawn_blocking({
            let runner = runner.clone();
            let constraints = constraints.clone();
            move || {
                runner
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .capture_mut()
                    .open(&constraints)
            }
        })
        .await?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let session = match opened {
            Ok(()) => {
                let scheduler = DetectionScheduler::new(
                    config.tick_interval(),
                    runner.clone(),
                    capture_state.clone(),
                    sink.clone(),
                    stats.clone(),
                );
                Some(tokio::spawn(scheduler.run(stop_rx)))
            }
            Err(CameraError::PermissionDenied(device)) => {
                sink.notify(Notice::PermissionDenied(format!(
                    "camera access to {device} was denied; grant access and restart capture"
                )));
                None
            }
            Err(e) => {
                sink.notify(Notice::Fatal(format!("camera unavailable: {e}")));
                None
            }
        };

        let restart = tokio::select! {
            _ = tokio::signal::ctrl_c() => false,
            request = restart_rx.recv() => request.is_some(),
        };

        let _ = stop_tx.send(true);
        if let Some(session) = session {
            if let Err(e) = session.await {
                tracing::error!(error = %e, "detection session ended abnormally");
            }
        }
        if !restart {
            break;
        }
        tracing::info!("restarting capture session");
    }

    signals.abort();
    tracing::info!("moodlensd shutting down");

    Ok(())
}

/// Drive `work` to completion unless `interrupt` resolves first.
async fn unless_interrupted<T>(
    work: impl Future<Output = T>,
    interrupt: impl Future,
) -> Option<T> {
    tokio::select! {
        done = work => Some(done),
        _ = interrupt => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubFace, StubHand};
    use crate::loader::LoadState;
    use moodlens_core::{DetectorError, FaceDetector, HandDetector};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_abandons_slow_load() {
        let loader = ModelLoader::new(Duration::from_secs(10));
        let state = loader.subscribe();
        let load = loader.load_with(
            || async {
                tokio::time::sleep(Duration::from_secs(8)).await;
                Ok::<_, DetectorError>(Box::new(StubFace::smiling()) as Box<dyn FaceDetector>)
            },
            || async { Ok::<_, DetectorError>(Box::new(StubHand::default()) as Box<dyn HandDetector>) },
        );

        let started = tokio::time::Instant::now();
        let outcome = unless_interrupted(load, tokio::time::sleep(Duration::from_secs(1))).await;
        assert!(outcome.is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_ne!(*state.borrow(), LoadState::Loaded);
    }

    #[tokio::test]
    async fn test_finished_load_is_returned() {
        let outcome = unless_interrupted(async { 7 }, std::future::pending::<()>()).await;
        assert_eq!(outcome, Some(7));
    }
}
