//! The bot: per-turn dispatch and the pipeline-facing handlers.
//!
//! Every inbound turn flows through [`Bot::handle_turn`]: the dispatch
//! surface picks a handler, handlers read/write the ephemeral cache for
//! working data and reach the pipeline through the dual-endpoint caller,
//! durable field updates go through the critical-state saver before the turn
//! ends, and any error that escapes lands in [`recover_turn`].

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use serde_json::{Value, json};

use crate::backend::{CallSpec, DualEndpointClient};
use crate::config::RetryConfig;
use crate::dispatch::{Command, Submission};
use crate::error::{ChannelError, Result};
use crate::state::cache::ConversationCache;
use crate::state::saver::save_critical;
use crate::state::store::ConversationStore;
use crate::state::{ConversationState, FieldUpdate, FlowStage};
use crate::turn::{IncomingActivity, TurnContext, recover_turn};

static PR_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://github\.com/[^/\s]+/[^/\s]+/pull/\d+/?$").expect("valid regex")
});

const USAGE: &str = "Here's what I can do:\n\
    • `/search <query>` — search resumes\n\
    • `/view <name>` — view a stored resume\n\
    • `/delete <name>` — delete a stored resume\n\
    • `/review` — start a GitHub PR review\n\
    • `/count` — show this conversation's message count\n\
    • `/reset` — clear this conversation\n\
    Anything else is answered from the knowledge base.";

/// Cache key holding the user's GitHub token during a review flow. The token
/// is re-askable and deliberately never written to the durable store.
const CACHE_GITHUB_TOKEN: &str = "github_token";

/// Conversational front-end over the primary/fallback pipeline pair.
#[derive(Clone)]
pub struct Bot {
    store: Arc<dyn ConversationStore>,
    cache: Arc<ConversationCache>,
    backend: Arc<DualEndpointClient>,
    retry: RetryConfig,
}

impl Bot {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        cache: Arc<ConversationCache>,
        backend: Arc<DualEndpointClient>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            cache,
            backend,
            retry,
        }
    }

    pub fn cache(&self) -> &ConversationCache {
        &self.cache
    }

    /// Process one inbound turn. Never returns an error: failures run
    /// through terminal recovery, which emits a user-visible message.
    pub async fn handle_turn(&self, ctx: Arc<dyn TurnContext>, activity: IncomingActivity) {
        if let Err(err) = self.run_turn(&ctx, &activity).await {
            recover_turn(ctx.as_ref(), &self.cache, &err).await;
        }
    }

    async fn run_turn(&self, ctx: &Arc<dyn TurnContext>, activity: &IncomingActivity) -> Result<()> {
        let conversation_id = activity.conversation_id.as_str();

        if let Some(value) = &activity.value {
            if let Some(submission) = Submission::from_value(value) {
                return self.handle_submission(ctx, conversation_id, submission).await;
            }
        }

        let text = activity
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ChannelError::InvalidActivity(
                    "activity carries neither text nor a submission".to_string(),
                )
            })?;

        let (state, version) = self.store.load(conversation_id, false).await?;

        match Command::parse(text) {
            Command::Help => self.send(ctx, USAGE).await,
            Command::Search { query } => self.on_search(ctx, &query).await,
            Command::View { name } => self.on_view(ctx, name.as_deref()).await,
            Command::Delete { name } => self.on_delete(ctx, name.as_deref()).await,
            Command::Count => self.on_count(ctx, conversation_id, &state, version).await,
            Command::Reset => self.on_reset(ctx, conversation_id).await,
            Command::Review => {
                self.on_review_start(ctx, conversation_id, &state, version)
                    .await
            }
            Command::Query { text } => {
                // An active review flow claims free text as its next input.
                if let Some(flow_stage) = state.flow.as_ref().map(|f| f.stage) {
                    if flow_stage != FlowStage::Completed {
                        return self
                            .on_flow_input(ctx, conversation_id, &state, version, flow_stage, &text)
                            .await;
                    }
                }
                self.on_query(ctx, &text).await
            }
        }
    }

    /// The counter is critical data: persist the increment through the saver
    /// before reporting it. A false return means "may not have persisted" and
    /// the turn reports the new count regardless.
    async fn on_count(
        &self,
        ctx: &Arc<dyn TurnContext>,
        conversation_id: &str,
        state: &ConversationState,
        version: u64,
    ) -> Result<()> {
        let count = state.message_count + 1;
        let updates = [
            FieldUpdate::MessageCount(count),
            FieldUpdate::Touch(Utc::now()),
        ];
        let persisted = save_critical(
            self.store.as_ref(),
            conversation_id,
            state,
            version,
            &updates,
            &self.retry,
        )
        .await;
        if !persisted {
            tracing::warn!(conversation_id, "Message count may not have persisted");
        }
        self.send(
            ctx,
            &format!("This conversation has handled {count} messages."),
        )
        .await
    }

    async fn send(&self, ctx: &Arc<dyn TurnContext>, text: &str) -> Result<()> {
        ctx.send(text).await?;
        Ok(())
    }

    // --- pipeline handlers ---

    async fn on_search(&self, ctx: &Arc<dyn TurnContext>, query: &str) -> Result<()> {
        let spec = CallSpec::post("/search")
            .json(json!({ "query": query }))
            .timeout(Duration::from_secs(60));
        match self.backend.call(spec).await {
            Ok(response) => {
                let text = response
                    .json()
                    .map(render_hits)
                    .unwrap_or_else(|| "The search service returned no readable results.".to_string());
                self.send(ctx, &text).await
            }
            Err(err) => {
                tracing::warn!(error = %err, "Search pipeline unavailable");
                self.send(
                    ctx,
                    "I couldn't reach the resume search service. Please try again later.",
                )
                .await
            }
        }
    }

    async fn on_view(&self, ctx: &Arc<dyn TurnContext>, name: Option<&str>) -> Result<()> {
        let Some(name) = name else {
            return self
                .send(ctx, "Which resume? Use `/view <name>`.")
                .await;
        };
        let spec = CallSpec::post("/fetch-resume")
            .json(json!({ "name": name }))
            .timeout(Duration::from_secs(30));
        match self.backend.call(spec).await {
            Ok(response) => {
                let text = response
                    .json()
                    .map(render_profile)
                    .unwrap_or_else(|| format!("No readable resume data for {name}."));
                self.send(ctx, &text).await
            }
            Err(err) => {
                tracing::warn!(error = %err, name, "Resume fetch unavailable");
                self.send(ctx, "I couldn't reach the resume store. Please try again later.")
                    .await
            }
        }
    }

    async fn on_delete(&self, ctx: &Arc<dyn TurnContext>, name: Option<&str>) -> Result<()> {
        let Some(name) = name else {
            return self
                .send(ctx, "Which resume? Use `/delete <name>`.")
                .await;
        };
        let spec = CallSpec::post("/delete-resume")
            .json(json!({ "name": name }))
            .timeout(Duration::from_secs(30));
        match self.backend.call(spec).await {
            Ok(_) => {
                self.send(ctx, &format!("Deleted resume for {name}."))
                    .await
            }
            Err(err) => {
                tracing::warn!(error = %err, name, "Resume delete unavailable");
                self.send(
                    ctx,
                    &format!("I couldn't delete {name}: the resume store is unreachable."),
                )
                .await
            }
        }
    }

    async fn on_query(&self, ctx: &Arc<dyn TurnContext>, question: &str) -> Result<()> {
        // Generation calls are the slow end of the timeout spread.
        let spec = CallSpec::post("/query")
            .json(json!({ "question": question }))
            .timeout(Duration::from_secs(300));
        match self.backend.call(spec).await {
            Ok(response) => {
                let text = response
                    .json()
                    .and_then(|v| v.get("answer").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_else(|| "I didn't get a readable answer back.".to_string());
                self.send(ctx, &text).await
            }
            Err(err) => {
                tracing::warn!(error = %err, "QA pipeline unavailable");
                self.send(
                    ctx,
                    "I couldn't reach the answering service. Please try again later.",
                )
                .await
            }
        }
    }

    async fn on_reset(&self, ctx: &Arc<dyn TurnContext>, conversation_id: &str) -> Result<()> {
        self.store.delete(conversation_id).await?;
        self.cache.clear(conversation_id);
        self.send(ctx, "All set — this conversation has been reset.")
            .await
    }

    // --- PR review flow ---

    async fn on_review_start(
        &self,
        ctx: &Arc<dyn TurnContext>,
        conversation_id: &str,
        state: &ConversationState,
        version: u64,
    ) -> Result<()> {
        save_critical(
            self.store.as_ref(),
            conversation_id,
            state,
            version,
            &[
                FieldUpdate::ClearFlow,
                FieldUpdate::FlowStage(FlowStage::WaitingForPr),
            ],
            &self.retry,
        )
        .await;
        self.send(
            ctx,
            "Let's review a pull request. Paste the PR link (https://github.com/owner/repo/pull/123).",
        )
        .await
    }

    async fn on_flow_input(
        &self,
        ctx: &Arc<dyn TurnContext>,
        conversation_id: &str,
        state: &ConversationState,
        version: u64,
        stage: FlowStage,
        text: &str,
    ) -> Result<()> {
        match stage {
            FlowStage::WaitingForPr => {
                if !PR_URL_RE.is_match(text) {
                    return self
                        .send(
                            ctx,
                            "That doesn't look like a PR link. Expected https://github.com/owner/repo/pull/123.",
                        )
                        .await;
                }
                save_critical(
                    self.store.as_ref(),
                    conversation_id,
                    state,
                    version,
                    &[
                        FieldUpdate::PrLink(text.to_string()),
                        FieldUpdate::FlowStage(FlowStage::WaitingForProject),
                    ],
                    &self.retry,
                )
                .await;
                self.send(ctx, "Got it. Which project is this PR for?").await
            }
            FlowStage::WaitingForProject => {
                save_critical(
                    self.store.as_ref(),
                    conversation_id,
                    state,
                    version,
                    &[
                        FieldUpdate::Project(text.to_string()),
                        FieldUpdate::FlowStage(FlowStage::WaitingForToken),
                    ],
                    &self.retry,
                )
                .await;
                self.send(
                    ctx,
                    "Almost there. Paste your GitHub personal access token (kept only for this review).",
                )
                .await
            }
            FlowStage::WaitingForToken => {
                // The token is working data: cache only, never persisted.
                self.cache
                    .set(conversation_id, CACHE_GITHUB_TOKEN, json!(text));
                self.submit_review(ctx, conversation_id, state, version).await
            }
            FlowStage::Completed => self.on_query(ctx, text).await,
        }
    }

    async fn submit_review(
        &self,
        ctx: &Arc<dyn TurnContext>,
        conversation_id: &str,
        state: &ConversationState,
        version: u64,
    ) -> Result<()> {
        let flow = state.flow.clone().unwrap_or_default();
        let token = self
            .cache
            .get(conversation_id, CACHE_GITHUB_TOKEN)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        let spec = CallSpec::post("/review")
            .json(json!({
                "pr_link": flow.pr_link,
                "project": flow.project,
                "token": format!("token {token}"),
            }))
            .timeout(Duration::from_secs(300));

        let outcome = self.backend.call(spec).await;
        self.cache.clear(conversation_id);
        save_critical(
            self.store.as_ref(),
            conversation_id,
            state,
            version,
            &[FieldUpdate::ClearFlow, FieldUpdate::Touch(Utc::now())],
            &self.retry,
        )
        .await;

        match outcome {
            Ok(_) => {
                self.send(
                    ctx,
                    "Review submitted. I'll post the comments on the PR when the pipeline finishes.",
                )
                .await
            }
            Err(err) => {
                tracing::warn!(error = %err, "Review pipeline unavailable");
                self.send(
                    ctx,
                    "I couldn't reach the review pipeline, so nothing was submitted. Start again with /review.",
                )
                .await
            }
        }
    }

    // --- card submissions ---

    async fn handle_submission(
        &self,
        ctx: &Arc<dyn TurnContext>,
        conversation_id: &str,
        submission: Submission,
    ) -> Result<()> {
        match submission.action.as_str() {
            "selectProject" => {
                let project = submission
                    .data
                    .get("projectChoice")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                if project.is_empty() {
                    return self.send(ctx, "Please pick a project from the list.").await;
                }

                // Acknowledge now; the save and the next prompt run in a
                // detached task. The task cannot report through this ack, so
                // it owns its error handling end to end.
                self.send(ctx, &format!("Project **{project}** selected."))
                    .await?;

                let bot = self.clone();
                let ctx = Arc::clone(ctx);
                let conversation_id = conversation_id.to_string();
                tokio::spawn(async move {
                    bot.continue_after_project(ctx, &conversation_id, project)
                        .await;
                });
                Ok(())
            }
            other => {
                tracing::debug!(action = other, "Unrecognized submission action");
                self.send(ctx, "I didn't understand that submission.").await
            }
        }
    }

    /// Deferred follow-up for the `selectProject` submission.
    async fn continue_after_project(
        &self,
        ctx: Arc<dyn TurnContext>,
        conversation_id: &str,
        project: String,
    ) {
        let (state, version) = match self.store.load(conversation_id, true).await {
            Ok(loaded) => loaded,
            Err(err) => {
                tracing::error!(conversation_id, error = %err, "Deferred project selection failed to load state");
                return;
            }
        };

        save_critical(
            self.store.as_ref(),
            conversation_id,
            &state,
            version,
            &[
                FieldUpdate::Project(project),
                FieldUpdate::FlowStage(FlowStage::WaitingForToken),
            ],
            &self.retry,
        )
        .await;

        if let Err(err) = ctx
            .send("Almost there. Paste your GitHub personal access token (kept only for this review).")
            .await
        {
            tracing::error!(conversation_id, error = %err, "Failed to send deferred flow prompt");
        }
    }
}

fn render_hits(value: &Value) -> String {
    let hits = value
        .as_array()
        .or_else(|| value.get("results").and_then(Value::as_array));
    let Some(hits) = hits else {
        return "The search service returned no readable results.".to_string();
    };
    if hits.is_empty() {
        return "No matching resumes found.".to_string();
    }

    let mut lines = vec![format!("Found {} match(es):", hits.len())];
    for hit in hits {
        let name = hit.get("name").and_then(Value::as_str).unwrap_or("(unnamed)");
        match hit.get("title").and_then(Value::as_str) {
            Some(title) => lines.push(format!("• {name} — {title}")),
            None => lines.push(format!("• {name}")),
        }
    }
    lines.join("\n")
}

fn render_profile(value: &Value) -> String {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("Resume");
    let mut lines = vec![format!("**{name}**")];
    if let Some(title) = value.get("title").and_then(Value::as_str) {
        lines.push(title.to_string());
    }
    if let Some(email) = value.get("email").and_then(Value::as_str) {
        lines.push(format!("📧 {email}"));
    }
    if let Some(phone) = value.get("phone").and_then(Value::as_str) {
        lines.push(format!("📞 {phone}"));
    }
    if let Some(location) = value.get("location").and_then(Value::as_str) {
        lines.push(format!("📍 {location}"));
    }
    if let Some(skills) = value.get("skills").and_then(Value::as_array) {
        let skills: Vec<&str> = skills.iter().filter_map(Value::as_str).collect();
        if !skills.is_empty() {
            lines.push(format!("Skills: {}", skills.join(" • ")));
        }
    }
    lines.join("\n")
}
