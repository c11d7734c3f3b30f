//! teamsrelay: a resilient conversational-bot core.
//!
//! The bot is a thin front-end over a primary/fallback pair of HTTP pipeline
//! services. Three mechanisms carry the failure-handling weight:
//!
//! - [`backend::DualEndpointClient`] — every pipeline call tries the primary
//!   base URL and replays against the fallback on any failure.
//! - [`state::saver::save_critical`] — durable field updates are persisted
//!   through a versioned store with bounded exponential-backoff retries on
//!   version conflicts.
//! - [`turn::recover_turn`] — the terminal handler that turns any escaped
//!   error into a user-visible recovery message.
//!
//! Working data that does not need durability stays in
//! [`state::cache::ConversationCache`], off the versioned store entirely.

pub mod backend;
pub mod bot;
pub mod channels;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod state;
pub mod turn;
