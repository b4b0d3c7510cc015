//! Durable call-intent handoff store.
//!
//! The wake path can deliver call intent while the application process is
//! not running. The native layer parks the intent in this store; after a
//! cold start the poller reads it back so the coordinator can resume the
//! attempt at ringing/answering instead of losing the call. Records are
//! cleared by the coordinator once the attempt finalizes.
//!
//! Everything read back from here is treated as possibly stale and is
//! re-validated against the fencing ledger before being trusted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{
    Builder, Database, ReadableTable, TableDefinition, TableError,
    backends::InMemoryBackend,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::types::call::{CallMediaType, PeerId};

const HANDOFF: TableDefinition<&str, &[u8]> = TableDefinition::new("call_handoff");

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HandoffError>;

/// What the parked record asks the coordinator to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandoffIntent {
    /// An incoming call is (or was) ringing for this peer.
    PendingCall,
    /// The user already declined on the wake-path UI; make sure the
    /// cancel goes out.
    PendingCancel,
}

/// One namespaced record per peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub peer_id: PeerId,
    pub peer_name: String,
    pub media_kind: CallMediaType,
    pub intent: HandoffIntent,
    pub created_at: DateTime<Utc>,
}

impl HandoffRecord {
    pub fn pending_call(peer_id: PeerId, peer_name: String, media_kind: CallMediaType) -> Self {
        Self {
            peer_id,
            peer_name,
            media_kind,
            intent: HandoffIntent::PendingCall,
            created_at: Utc::now(),
        }
    }

    pub fn pending_cancel(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            peer_name: String::new(),
            media_kind: CallMediaType::Audio,
            intent: HandoffIntent::PendingCancel,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait HandoffStore: Send + Sync {
    async fn put(&self, record: HandoffRecord) -> Result<()>;
    async fn get(&self, peer: &PeerId) -> Result<Option<HandoffRecord>>;
    async fn clear(&self, peer: &PeerId) -> Result<()>;
    async fn all(&self) -> Result<Vec<HandoffRecord>>;
}

macro_rules! open_table_or_default {
    ($txn:expr, $table:expr, $default:expr) => {
        match $txn.open_table($table) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok($default),
            Err(e) => return Err(HandoffError::Database(e.to_string())),
        }
    };
}

/// redb-backed store; file-backed in production, in-memory for tests.
#[derive(Clone)]
pub struct RedbHandoffStore {
    db: Arc<Database>,
}

impl RedbHandoffStore {
    pub async fn new<P: AsRef<Path> + Send + 'static>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let db = tokio::task::spawn_blocking(move || -> Result<Database> {
            Database::create(&path).map_err(|e| HandoffError::Database(e.to_string()))
        })
        .await
        .map_err(|e| HandoffError::Database(e.to_string()))??;

        Ok(Self { db: Arc::new(db) })
    }

    pub fn in_memory() -> Result<Self> {
        let db = Builder::new()
            .create_with_backend(InMemoryBackend::new())
            .map_err(|e| HandoffError::Database(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl HandoffStore for RedbHandoffStore {
    async fn put(&self, record: HandoffRecord) -> Result<()> {
        let db = self.db.clone();
        let key = record.peer_id.as_str().to_string();
        let value = serde_json::to_vec(&record)?;

        tokio::task::spawn_blocking(move || -> Result<()> {
            let write_txn = db
                .begin_write()
                .map_err(|e| HandoffError::Database(e.to_string()))?;
            {
                let mut table = write_txn
                    .open_table(HANDOFF)
                    .map_err(|e| HandoffError::Database(e.to_string()))?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(|e| HandoffError::Database(e.to_string()))?;
            }
            write_txn
                .commit()
                .map_err(|e| HandoffError::Database(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| HandoffError::Database(e.to_string()))?
    }

    async fn get(&self, peer: &PeerId) -> Result<Option<HandoffRecord>> {
        let db = self.db.clone();
        let key = peer.as_str().to_string();

        tokio::task::spawn_blocking(move || -> Result<Option<HandoffRecord>> {
            let read_txn = db
                .begin_read()
                .map_err(|e| HandoffError::Database(e.to_string()))?;
            let table = open_table_or_default!(read_txn, HANDOFF, None);

            match table.get(key.as_str()) {
                Ok(Some(guard)) => Ok(Some(serde_json::from_slice(guard.value())?)),
                Ok(None) => Ok(None),
                Err(e) => Err(HandoffError::Database(e.to_string())),
            }
        })
        .await
        .map_err(|e| HandoffError::Database(e.to_string()))?
    }

    async fn clear(&self, peer: &PeerId) -> Result<()> {
        let db = self.db.clone();
        let key = peer.as_str().to_string();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let write_txn = db
                .begin_write()
                .map_err(|e| HandoffError::Database(e.to_string()))?;
            {
                let mut table = write_txn
                    .open_table(HANDOFF)
                    .map_err(|e| HandoffError::Database(e.to_string()))?;
                table
                    .remove(key.as_str())
                    .map_err(|e| HandoffError::Database(e.to_string()))?;
            }
            write_txn
                .commit()
                .map_err(|e| HandoffError::Database(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| HandoffError::Database(e.to_string()))?
    }

    async fn all(&self) -> Result<Vec<HandoffRecord>> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<HandoffRecord>> {
            let read_txn = db
                .begin_read()
                .map_err(|e| HandoffError::Database(e.to_string()))?;
            let table = open_table_or_default!(read_txn, HANDOFF, Vec::new());

            let mut records = Vec::new();
            let iter = table
                .iter()
                .map_err(|e| HandoffError::Database(e.to_string()))?;
            for entry in iter {
                let (_, value) = entry.map_err(|e| HandoffError::Database(e.to_string()))?;
                records.push(serde_json::from_slice(value.value())?);
            }
            Ok(records)
        })
        .await
        .map_err(|e| HandoffError::Database(e.to_string()))?
    }
}
