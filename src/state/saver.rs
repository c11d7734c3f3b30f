//! Critical-state persistence with conflict retry.
//!
//! Applies a set of typed field updates to the conversation state and saves
//! it through the versioned store. Version conflicts from interleaved turns
//! are retried with exponential backoff plus jitter, force-reloading the
//! authoritative state before each retry and re-applying the full update set
//! on top of it. The set is atomic from the caller's view: whichever attempt
//! succeeds commits every update together.
//!
//! Persistence failures never escape as errors. Callers get `false` and must
//! treat it as "state may not have persisted" without failing the turn.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::error::StateError;
use crate::state::store::ConversationStore;
use crate::state::{ConversationState, FieldUpdate, apply_updates};

/// Exponential backoff delay for a 0-based attempt index, with uniform
/// jitter in `[0, max_jitter]` added on top.
fn backoff_delay(policy: &RetryConfig, attempt: u32) -> Duration {
    let base_ms = policy.base_delay.as_millis() as u64;
    let exp_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    let jitter_ms = policy.max_jitter.as_millis() as u64;
    let jitter = if jitter_ms > 0 {
        rand::thread_rng().gen_range(0..=jitter_ms)
    } else {
        0
    };
    Duration::from_millis(exp_ms.saturating_add(jitter))
}

/// Persist `updates` for a conversation, retrying version conflicts.
///
/// `initial` and `version` are the turn's current view of the state and the
/// version it was loaded at; retries discard both in favor of a forced
/// reload. Returns `true` once a save attempt succeeds, `false` when a
/// non-conflict error occurs or `policy.max_attempts` saves have all
/// conflicted.
pub async fn save_critical(
    store: &dyn ConversationStore,
    conversation_id: &str,
    initial: &ConversationState,
    version: u64,
    updates: &[FieldUpdate],
    policy: &RetryConfig,
) -> bool {
    let mut base = initial.clone();
    let mut version = version;

    for attempt in 0..policy.max_attempts {
        let mut state = base.clone();
        apply_updates(&mut state, updates);

        match store.save(conversation_id, &state, version, true).await {
            Ok(()) => {
                if attempt > 0 {
                    tracing::debug!(
                        conversation_id,
                        attempt = attempt + 1,
                        "Critical save succeeded after conflict retries"
                    );
                }
                return true;
            }
            Err(StateError::VersionConflict { .. }) if attempt + 1 < policy.max_attempts => {
                let delay = backoff_delay(policy, attempt);
                tracing::warn!(
                    conversation_id,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Version conflict saving critical state, retrying"
                );
                tokio::time::sleep(delay).await;

                (base, version) = match store.load(conversation_id, true).await {
                    Ok(fresh) => fresh,
                    Err(err) => {
                        tracing::error!(
                            conversation_id,
                            error = %err,
                            "Failed to reload state after version conflict"
                        );
                        return false;
                    }
                };
            }
            Err(err) => {
                let fields: Vec<&str> = updates.iter().map(FieldUpdate::field).collect();
                tracing::error!(
                    conversation_id,
                    attempt = attempt + 1,
                    error = %err,
                    fields = ?fields,
                    "Failed to save critical state"
                );
                return false;
            }
        }
    }

    // max_attempts >= 1 is enforced by config, so the loop always returns.
    false
}
