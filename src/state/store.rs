//! Versioned conversation-state store.
//!
//! The store enforces optimistic concurrency: every record carries a version,
//! `load` hands that version back alongside the state, and `save` is rejected
//! with [`StateError::VersionConflict`] when the stored version has advanced
//! past the one the caller loaded. Two interleaved turns that both load and
//! then both save therefore cannot silently overwrite each other: whoever
//! saves second does so against a stale version and gets the conflict.
//! Classification is structural — consumers match on the error variant, never
//! on message text.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StateError;
use crate::state::ConversationState;

/// Version of a conversation with no record yet. Saving against it creates
/// the record.
pub const NO_RECORD: u64 = 0;

/// Durable conversation-state store with optimistic-concurrency saves.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Load the state and its current version. A conversation with no record
    /// yields a default state at version [`NO_RECORD`]. `force` bypasses any
    /// per-process snapshot layer and re-reads the authoritative record.
    async fn load(
        &self,
        conversation_id: &str,
        force: bool,
    ) -> Result<(ConversationState, u64), StateError>;

    /// Persist the state against the version the caller loaded. Fails with
    /// [`StateError::VersionConflict`] when the stored version has advanced
    /// past `version`. `force_write` writes through any snapshot layer; it
    /// does not bypass the version check.
    async fn save(
        &self,
        conversation_id: &str,
        state: &ConversationState,
        version: u64,
        force_write: bool,
    ) -> Result<(), StateError>;

    /// Remove the record entirely. Used by explicit reset.
    async fn delete(&self, conversation_id: &str) -> Result<(), StateError>;
}

#[derive(Debug, Clone)]
struct Record {
    state: ConversationState,
    version: u64,
}

/// In-memory versioned store.
///
/// Backs local runs and tests. There is no snapshot layer, so `force` on
/// load and `force_write` on save are accepted but change nothing here; the
/// version check always applies, which is what makes interleaved turns on
/// the same conversation conflict.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stored version, for tests and diagnostics. [`NO_RECORD`]
    /// means the conversation has no record.
    pub async fn version(&self, conversation_id: &str) -> u64 {
        let records = self.records.lock().await;
        records
            .get(conversation_id)
            .map(|r| r.version)
            .unwrap_or(NO_RECORD)
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn load(
        &self,
        conversation_id: &str,
        _force: bool,
    ) -> Result<(ConversationState, u64), StateError> {
        let records = self.records.lock().await;
        Ok(records
            .get(conversation_id)
            .map(|r| (r.state.clone(), r.version))
            .unwrap_or((ConversationState::default(), NO_RECORD)))
    }

    async fn save(
        &self,
        conversation_id: &str,
        state: &ConversationState,
        version: u64,
        _force_write: bool,
    ) -> Result<(), StateError> {
        let mut records = self.records.lock().await;

        let stored_version = records
            .get(conversation_id)
            .map(|r| r.version)
            .unwrap_or(NO_RECORD);
        if stored_version != version {
            return Err(StateError::VersionConflict {
                conversation_id: conversation_id.to_string(),
            });
        }

        records.insert(
            conversation_id.to_string(),
            Record {
                state: state.clone(),
                version: stored_version + 1,
            },
        );
        Ok(())
    }

    async fn delete(&self, conversation_id: &str) -> Result<(), StateError> {
        let mut records = self.records.lock().await;
        records.remove(conversation_id);
        Ok(())
    }
}
