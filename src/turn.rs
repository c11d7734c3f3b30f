//! Turn context and terminal error recovery.
//!
//! A turn is one inbound activity processed end to end. [`TurnContext`] is
//! the seam to the chat transport: it names the conversation and emits
//! outbound messages. [`recover_turn`] is the last line of defense — it runs
//! when a handler fails, classifies the error structurally, and always
//! completes without propagating anything.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ChannelError, Error};
use crate::state::cache::ConversationCache;

/// One inbound activity: free text and/or a structured card submission.
#[derive(Debug, Clone)]
pub struct IncomingActivity {
    pub conversation_id: String,
    pub text: Option<String>,
    pub value: Option<Value>,
}

/// Outbound side of the chat transport for the current turn.
#[async_trait]
pub trait TurnContext: Send + Sync {
    fn conversation_id(&self) -> &str;

    /// Emit a message into the conversation.
    async fn send(&self, text: &str) -> Result<(), ChannelError>;
}

/// Terminal handler for a failed turn.
///
/// Version conflicts that escaped a handler mean the working data may be
/// inconsistent with the durable state, so the conversation's cache bag is
/// discarded and the user is told to restart the flow. Anything else gets a
/// generic retry/reset message. The triggering turn is failed either way; no
/// retries happen at this layer, and a failure while sending the recovery
/// message is logged and swallowed.
pub async fn recover_turn(ctx: &dyn TurnContext, cache: &ConversationCache, error: &Error) {
    let conversation_id = ctx.conversation_id();
    tracing::error!(conversation_id, error = %error, "Unhandled turn error");

    let message = if error.is_version_conflict() {
        cache.clear(conversation_id);
        tracing::warn!(
            conversation_id,
            "Version conflict escaped a handler, cleared working data"
        );
        "I hit a temporary data consistency issue. Please restart the current flow."
    } else {
        "Sorry, I ran into an unexpected error. Please try again, or use /reset to clear this conversation."
    };

    if let Err(send_err) = ctx.send(message).await {
        tracing::error!(
            conversation_id,
            error = %send_err,
            "Failed to send recovery message"
        );
    }
}
