use crate::loader::LoadState;
use crate::scheduler::SchedulerStats;
use crate::sink::{Notice, PersistenceError, ResultSink};
use moodlens_core::DetectionResult;
use moodlens_hw::CaptureState;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.moodlens.MoodLens1";
pub const OBJECT_PATH: &str = "/org/moodlens/MoodLens1";

/// D-Bus interface for the mood detection daemon.
///
/// Bus name: org.moodlens.MoodLens1
/// Object path: /org/moodlens/MoodLens1
pub struct MoodLensService {
    sink: Arc<ResultSink>,
    capture_state: watch::Receiver<CaptureState>,
    load_state: watch::Receiver<LoadState>,
    stats: Arc<SchedulerStats>,
    restart: mpsc::Sender<()>,
}

impl MoodLensService {
    pub fn new(
        sink: Arc<ResultSink>,
        capture_state: watch::Receiver<CaptureState>,
        load_state: watch::Receiver<LoadState>,
        stats: Arc<SchedulerStats>,
        restart: mpsc::Sender<()>,
    ) -> Self {
        Self {
            sink,
            capture_state,
            load_state,
            stats,
            restart,
        }
    }
}

#[interface(name = "org.moodlens.MoodLens1")]
impl MoodLensService {
    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let capture = *self.capture_state.borrow();
        let models = *self.load_state.borrow();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "capture": capture,
            "models": models,
            "degraded": models == LoadState::Failed,
            "scheduler": self.stats.snapshot(),
            "lastNotice": self.sink.last_notice(),
        })
        .to_string())
    }

    /// Latest detection result as JSON, or `null` before the first cycle.
    async fn current_mood(&self) -> zbus::fdo::Result<String> {
        serde_json::to_string(&self.sink.latest())
            .map_err(|e| zbus::fdo::Error::Failed(format!("encoding failed: {e}")))
    }

    /// Save the current mood with optional notes. Returns the stored record.
    async fn save(&self, notes: &str) -> zbus::fdo::Result<String> {
        tracing::info!(notes_len = notes.len(), "save requested");
        let record = self.sink.save(notes).await.map_err(|e| match e {
            PersistenceError::NothingToSave => zbus::fdo::Error::Failed(e.to_string()),
            PersistenceError::Store(_) => zbus::fdo::Error::IOError(e.to_string()),
        })?;
        serde_json::to_string(&record)
            .map_err(|e| zbus::fdo::Error::Failed(format!("encoding failed: {e}")))
    }

    /// Saved moods, newest first. Serves the cached buffer if the store
    /// cannot be read.
    async fn history(&self) -> zbus::fdo::Result<String> {
        let records = match self.sink.refresh_history().await {
            Ok(records) => records,
            Err(_) => self.sink.history(),
        };
        serde_json::to_string(&records)
            .map_err(|e| zbus::fdo::Error::Failed(format!("encoding failed: {e}")))
    }

    /// Tear down the capture session and open a fresh one.
    async fn restart_capture(&self) -> zbus::fdo::Result<()> {
        tracing::info!("capture restart requested");
        self.restart
            .try_send(())
            .or_else(|e| match e {
                // A restart is already queued.
                mpsc::error::TrySendError::Full(()) => Ok(()),
                mpsc::error::TrySendError::Closed(()) => Err(zbus::fdo::Error::Failed(
                    "daemon is shutting down".into(),
                )),
            })
    }

    /// Emitted after every completed detection cycle.
    #[zbus(signal)]
    async fn mood_changed(emitter: &SignalEmitter<'_>, result: &str) -> zbus::Result<()>;

    /// Emitted for conditions the user should see.
    #[zbus(signal)]
    async fn notice(emitter: &SignalEmitter<'_>, kind: &str, message: &str) -> zbus::Result<()>;
}

/// Relay sink output onto the bus as signals until the sink's channels
/// close. A failed emission is logged and the relay keeps going.
pub async fn forward_signals(connection: zbus::Connection, sink: Arc<ResultSink>) -> zbus::Result<()> {
    let iface = connection
        .object_server()
        .interface::<_, MoodLensService>(OBJECT_PATH)
        .await?;
    let results = sink.subscribe();
    let notices = sink.notices();
    drop(sink);

    relay(results, notices, |signal| {
        let iface = iface.clone();
        async move {
            let emitter = iface.signal_emitter();
            match signal {
                Signal::MoodChanged(json) => MoodLensService::mood_changed(emitter, &json).await,
                Signal::Notice(notice) => {
                    MoodLensService::notice(emitter, notice.kind(), notice.message()).await
                }
            }
        }
    })
    .await;
    Ok(())
}

/// One outgoing bus signal.
#[derive(Debug, Clone, PartialEq)]
enum Signal {
    MoodChanged(String),
    Notice(Notice),
}

async fn relay<F, Fut>(
    mut results: watch::Receiver<Option<DetectionResult>>,
    mut notices: broadcast::Receiver<Notice>,
    mut emit: F,
) where
    F: FnMut(Signal) -> Fut,
    Fut: Future<Output = zbus::Result<()>>,
{
    loop {
        let signal = tokio::select! {
            changed = results.changed() => {
                if changed.is_err() {
                    break;
                }
                match serde_json::to_string(&*results.borrow_and_update()) {
                    Ok(json) => Signal::MoodChanged(json),
                    Err(e) => {
                        tracing::warn!(error = %e, "could not encode detection result");
                        continue;
                    }
                }
            }
            notice = notices.recv() => match notice {
                Ok(notice) => Signal::Notice(notice),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "notice signals dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };
        if let Err(e) = emit(signal).await {
            tracing::warn!(error = %e, "signal emission failed");
        }
    }
    tracing::debug!("signal relay finished");
}
