//! SQLite-backed mood log.
//!
//! Stores saved snapshots and serves them back newest-first. Records carry a
//! store-assigned id and creation time.

use chrono::{DateTime, Utc};
use moodlens_core::{EmotionDistribution, EmotionLabel};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

/// Most records returned by [`MoodStore::history`].
pub const HISTORY_LIMIT: usize = 20;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS moods (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    id         TEXT NOT NULL UNIQUE,
    mood       TEXT NOT NULL,
    created_at TEXT NOT NULL,
    record     TEXT NOT NULL
);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("failed to create store directory: {0}")]
    Io(#[from] std::io::Error),
}

/// A mood snapshot submitted for saving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoodEntry {
    pub mood: EmotionLabel,
    pub notes: String,
    pub emotion_scores: EmotionDistribution,
    pub face_details: Option<serde_json::Value>,
    pub hand_details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// A stored entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoodRecord {
    pub id: String,
    #[serde(flatten)]
    pub entry: MoodEntry,
    pub created_at: DateTime<Utc>,
}

/// Handle to the mood database. Cheap to clone.
#[derive(Clone)]
pub struct MoodStore {
    conn: Connection,
}

impl MoodStore {
    /// Open (creating if needed) the database at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).await?;
        tracing::info!(path = %path.display(), "mood store opened");
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Persist `entry` and return the stored record.
    pub async fn log(&self, entry: MoodEntry) -> Result<MoodRecord, StoreError> {
        let record = MoodRecord {
            id: uuid::Uuid::new_v4().to_string(),
            entry,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&record)?;
        let id = record.id.clone();
        let mood = record.entry.mood.as_str();
        let created_at = record.created_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO moods (id, mood, created_at, record) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![id, mood, created_at, json],
                )?;
                Ok(())
            })
            .await?;

        tracing::info!(id = %record.id, mood = %record.entry.mood, "mood saved");
        Ok(record)
    }

    /// Most recent records, newest first, at most [`HISTORY_LIMIT`].
    pub async fn history(&self) -> Result<Vec<MoodRecord>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT record FROM moods ORDER BY seq DESC LIMIT ?1")?;
                let rows = stmt
                    .query_map([HISTORY_LIMIT as i64], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(StoreError::from))
            .collect()
    }
}
