//! Where detection results and user-facing notices go.
//!
//! The latest result is published on a `watch` channel (observers only ever
//! need the newest one). Notices fan out on a `broadcast` channel. Saving
//! snapshots the latest result into the mood store and keeps a bounded,
//! newest-first history buffer for clients.

use crate::store::{MoodEntry, MoodRecord, MoodStore, StoreError, HISTORY_LIMIT};
use moodlens_core::DetectionResult;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::{broadcast, watch};

const NOTICE_CAPACITY: usize = 16;

/// A condition surfaced to the user rather than only logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "camelCase")]
pub enum Notice {
    /// Camera access was refused.
    PermissionDenied(String),
    /// Models failed to load; detection continues on a simulated signal.
    ModelLoad(String),
    Persistence(String),
    /// An unrecoverable fault in the detection loop.
    Fatal(String),
}

impl Notice {
    pub fn kind(&self) -> &'static str {
        match self {
            Notice::PermissionDenied(_) => "permissionDenied",
            Notice::ModelLoad(_) => "modelLoad",
            Notice::Persistence(_) => "persistence",
            Notice::Fatal(_) => "fatal",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Notice::PermissionDenied(m)
            | Notice::ModelLoad(m)
            | Notice::Persistence(m)
            | Notice::Fatal(m) => m,
        }
    }
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("no mood has been detected yet")]
    NothingToSave,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ResultSink {
    latest: watch::Sender<Option<DetectionResult>>,
    notices: broadcast::Sender<Notice>,
    /// Most recent notice, for clients that poll instead of listening.
    last_notice: Mutex<Option<Notice>>,
    store: MoodStore,
    history: Mutex<VecDeque<MoodRecord>>,
}

impl ResultSink {
    pub fn new(store: MoodStore) -> Self {
        let (latest, _) = watch::channel(None);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            latest,
            notices,
            last_notice: Mutex::new(None),
            store,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
        }
    }

    /// Replace the current result.
    pub fn publish(&self, result: DetectionResult) {
        tracing::debug!(
            mood = %result.dominant_mood,
            mode = ?result.mode,
            cycle_ms = result.diagnostics.cycle_ms,
            "detection result"
        );
        self.latest.send_replace(Some(result));
    }

    pub fn latest(&self) -> Option<DetectionResult> {
        self.latest.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<DetectionResult>> {
        self.latest.subscribe()
    }

    pub fn notify(&self, notice: Notice) {
        tracing::warn!(kind = notice.kind(), message = notice.message(), "user notice");
        *self
            .last_notice
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(notice.clone());
        // No subscribers is fine; the notice is still logged.
        let _ = self.notices.send(notice);
    }

    pub fn last_notice(&self) -> Option<Notice> {
        self.last_notice
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// The entry that [`save`](Self::save) would submit right now.
    pub fn snapshot(&self, notes: &str) -> Option<MoodEntry> {
        let latest = self.latest.borrow();
        let result = latest.as_ref()?;
        Some(MoodEntry {
            mood: result.dominant_mood,
            notes: notes.to_string(),
            emotion_scores: result.distribution,
            face_details: result
                .face
                .as_ref()
                .and_then(|f| serde_json::to_value(f).ok()),
            hand_details: result
                .hand
                .as_ref()
                .and_then(|h| serde_json::to_value(h).ok()),
            timestamp: result.timestamp,
        })
    }

    /// Persist the current result and put the stored record at the front of
    /// the history buffer.
    pub async fn save(&self, notes: &str) -> Result<MoodRecord, PersistenceError> {
        let entry = self.snapshot(notes).ok_or(PersistenceError::NothingToSave)?;
        match self.store.log(entry).await {
            Ok(record) => {
                let mut history = self.lock_history();
                history.push_front(record.clone());
                history.truncate(HISTORY_LIMIT);
                Ok(record)
            }
            Err(e) => {
                self.notify(Notice::Persistence(format!("could not save mood: {e}")));
                Err(e.into())
            }
        }
    }

    /// Reload the history buffer from the store.
    pub async fn refresh_history(&self) -> Result<Vec<MoodRecord>, PersistenceError> {
        match self.store.history().await {
            Ok(records) => {
                let mut history = self.lock_history();
                *history = records.iter().cloned().collect();
                Ok(records)
            }
            Err(e) => {
                self.notify(Notice::Persistence(format!("could not load history: {e}")));
                Err(e.into())
            }
        }
    }

    /// Newest-first copy of the history buffer.
    pub fn history(&self) -> Vec<MoodRecord> {
        self.lock_history().iter().cloned().collect()
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, VecDeque<MoodRecord>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use moodlens_core::{DetectionMode, EmotionDistribution, EmotionLabel, FaceMeta};

    async fn sink() -> ResultSink {
        ResultSink::new(MoodStore::open_in_memory().await.unwrap())
    }

    fn happy_result() -> DetectionResult {
        let mut result = DetectionResult::new(
            EmotionDistribution::from_values([0.1, 0.6, 0.1, 0.1, 0.1]),
            DetectionMode::Ai,
            Utc::now(),
        );
        result.face = Some(FaceMeta {
            confidence: 0.9,
            bounding_box: None,
            landmark_count: 468,
        });
        result
    }

    #[tokio::test]
    async fn test_save_without_result() {
        let sink = sink().await;
        assert!(matches!(
            sink.save("nothing yet").await,
            Err(PersistenceError::NothingToSave)
        ));
        assert!(sink.history().is_empty());
    }

    #[tokio::test]
    async fn test_save_prepends_history() {
        let sink = sink().await;
        sink.publish(happy_result());

        let first = sink.save("morning").await.unwrap();
        let second = sink.save("after lunch").await.unwrap();
        assert_eq!(second.entry.mood, EmotionLabel::Happy);
        assert_eq!(second.entry.face_details.as_ref().unwrap()["landmarkCount"], 468);
        assert!(second.entry.hand_details.is_none());

        let history = sink.history();
        assert_eq!(history[0].id, second.id);
        assert_eq!(history[1].id, first.id);

        // The store agrees with the buffer.
        let stored = sink.refresh_history().await.unwrap();
        assert_eq!(stored[0].id, second.id);
    }

    #[tokio::test]
    async fn test_history_buffer_capped() {
        let sink = sink().await;
        sink.publish(happy_result());
        for i in 0..(HISTORY_LIMIT + 3) {
            sink.save(&format!("note {i}")).await.unwrap();
        }
        let history = sink.history();
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history[0].entry.notes, format!("note {}", HISTORY_LIMIT + 2));
    }

    #[tokio::test]
    async fn test_publish_replaces_latest() {
        let sink = sink().await;
        let mut rx = sink.subscribe();
        assert!(sink.latest().is_none());

        sink.publish(happy_result());
        assert!(rx.has_changed().unwrap());
        let sad = DetectionResult::new(
            EmotionDistribution::from_values([0.1, 0.1, 0.6, 0.1, 0.1]),
            DetectionMode::Fallback,
            Utc::now(),
        );
        sink.publish(sad);
        assert_eq!(rx.borrow_and_update().as_ref().unwrap().dominant_mood, EmotionLabel::Sad);
    }

    #[tokio::test]
    async fn test_notices_fan_out() {
        let sink = sink().await;
        let mut a = sink.notices();
        let mut b = sink.notices();
        sink.notify(Notice::PermissionDenied("/dev/video0".into()));

        let got = a.recv().await.unwrap();
        assert_eq!(got.kind(), "permissionDenied");
        assert_eq!(got.message(), "/dev/video0");
        assert_eq!(b.recv().await.unwrap(), got);
    }

    #[test]
    fn test_notice_wire_shape() {
        let json = serde_json::to_value(Notice::ModelLoad("hand model timed out".into())).unwrap();
        assert_eq!(json["kind"], "modelLoad");
        assert_eq!(json["message"], "hand model timed out");
    }

    #[tokio::test]
    async fn test_last_notice_kept_without_listeners() {
        let sink = sink().await;
        assert!(sink.last_notice().is_none());

        sink.notify(Notice::ModelLoad("face model missing".into()));
        sink.notify(Notice::PermissionDenied("/dev/video0".into()));
        assert_eq!(
            sink.last_notice(),
            Some(Notice::PermissionDenied("/dev/video0".into()))
        );
    }
}
