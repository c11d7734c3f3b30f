//! HTTP ingress for bot activities.
//!
//! A thin request/response transport: `POST /api/messages` carries one
//! inbound activity, the turn runs to completion, and every message the bot
//! emitted during the turn comes back in the response body. The Teams-side
//! connector that feeds this endpoint is out of scope here.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use crate::bot::Bot;
use crate::error::ChannelError;
use crate::turn::{IncomingActivity, TurnContext};

/// One inbound activity from the connector.
#[derive(Debug, Deserialize)]
pub struct ActivityRequest {
    pub conversation_id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

/// Everything the bot said during the turn, in emit order.
#[derive(Debug, Serialize)]
pub struct ActivityResponse {
    pub replies: Vec<String>,
}

/// Turn context that buffers outbound messages for the HTTP response.
///
/// Once the response body is drained the buffer closes: later sends (from a
/// detached task that outlives the turn) fail so the sender's own error
/// handling sees that the message cannot reach the user on this transport.
struct BufferingContext {
    conversation_id: String,
    buffer: Mutex<ReplyBuffer>,
}

#[derive(Default)]
struct ReplyBuffer {
    replies: Vec<String>,
    closed: bool,
}

impl BufferingContext {
    fn new(conversation_id: String) -> Self {
        Self {
            conversation_id,
            buffer: Mutex::new(ReplyBuffer::default()),
        }
    }

    fn drain(&self) -> Vec<String> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.closed = true;
        std::mem::take(&mut buffer.replies)
    }
}

#[async_trait]
impl TurnContext for BufferingContext {
    fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    async fn send(&self, text: &str) -> Result<(), ChannelError> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        if buffer.closed {
            return Err(ChannelError::SendFailed {
                conversation_id: self.conversation_id.clone(),
                reason: "response already sent; no delivery path for late messages".to_string(),
            });
        }
        buffer.replies.push(text.to_string());
        Ok(())
    }
}

async fn messages_handler(
    State(bot): State<Bot>,
    Json(request): Json<ActivityRequest>,
) -> Json<ActivityResponse> {
    let ctx = Arc::new(BufferingContext::new(request.conversation_id.clone()));
    let activity = IncomingActivity {
        conversation_id: request.conversation_id,
        text: request.text,
        value: request.value,
    };
    let span = tracing::info_span!(
        "turn",
        turn_id = %Uuid::new_v4(),
        conversation_id = %ctx.conversation_id
    );
    bot.handle_turn(Arc::clone(&ctx) as Arc<dyn TurnContext>, activity)
        .instrument(span)
        .await;
    Json(ActivityResponse {
        replies: ctx.drain(),
    })
}

async fn health_handler() -> &'static str {
    "ok"
}

pub fn router(bot: Bot) -> Router {
    Router::new()
        .route("/api/messages", post(messages_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(bot)
}

/// Bind and serve until the process is stopped.
pub async fn serve(bot: Bot, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "HTTP ingress listening");
    axum::serve(listener, router(bot)).await
}
