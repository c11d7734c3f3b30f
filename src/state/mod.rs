//! Durable conversation state and the typed updates applied to it.
//!
//! The durable record is a versioned document owned by the store; everything
//! that mutates it goes through [`saver::save_critical`] as a set of
//! [`FieldUpdate`]s applied atomically per save attempt. Working data that
//! does not need durability lives in [`cache::ConversationCache`] instead.

pub mod cache;
pub mod saver;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable, versioned per-conversation record.
///
/// Created on first access, updated only through the critical-state saver,
/// deleted on explicit reset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    /// Messages handled in this conversation, incremented per counted turn.
    #[serde(default)]
    pub message_count: u64,

    /// Active PR-review collection flow, if one is in progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<ReviewFlow>,

    /// Last critical save, set by the caller via [`FieldUpdate::Touch`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Step-by-step PR-review input collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewFlow {
    pub stage: FlowStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

/// Where the review flow is waiting for input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStage {
    #[default]
    WaitingForPr,
    WaitingForProject,
    WaitingForToken,
    Completed,
}

/// One typed field update.
///
/// Replaces the dotted-path string updates of the original protocol: each
/// variant names a known field and carries a typed value, and applying one
/// creates intermediate structure (the flow record) as needed, with the leaf
/// overwritten.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    MessageCount(u64),
    FlowStage(FlowStage),
    PrLink(String),
    Project(String),
    /// Drop the whole flow record, e.g. after completion or reset.
    ClearFlow,
    Touch(DateTime<Utc>),
}

impl FieldUpdate {
    /// Apply this update to `state`, creating the flow record if the update
    /// targets a flow field and none exists.
    pub fn apply(&self, state: &mut ConversationState) {
        match self {
            FieldUpdate::MessageCount(count) => state.message_count = *count,
            FieldUpdate::FlowStage(stage) => {
                state.flow.get_or_insert_with(ReviewFlow::default).stage = *stage;
            }
            FieldUpdate::PrLink(link) => {
                state.flow.get_or_insert_with(ReviewFlow::default).pr_link = Some(link.clone());
            }
            FieldUpdate::Project(project) => {
                state.flow.get_or_insert_with(ReviewFlow::default).project = Some(project.clone());
            }
            FieldUpdate::ClearFlow => state.flow = None,
            FieldUpdate::Touch(at) => state.updated_at = Some(*at),
        }
    }

    /// Field name, for logging.
    pub fn field(&self) -> &'static str {
        match self {
            FieldUpdate::MessageCount(_) => "message_count",
            FieldUpdate::FlowStage(_) => "flow.stage",
            FieldUpdate::PrLink(_) => "flow.pr_link",
            FieldUpdate::Project(_) => "flow.project",
            FieldUpdate::ClearFlow => "flow",
            FieldUpdate::Touch(_) => "updated_at",
        }
    }
}

/// Apply every update in order. The whole slice is applied before any save
/// attempt, so the set commits or fails as a unit from the caller's view.
pub fn apply_updates(state: &mut ConversationState, updates: &[FieldUpdate]) {
    for update in updates {
        update.apply(state);
    }
}
