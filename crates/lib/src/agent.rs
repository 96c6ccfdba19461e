//! Agent dispatch: one user message plus history in, one renderable reply out.
//!
//! [`Agent::dispatch`] asks the backend for a reply, runs a requested `query_sales` tool call when
//! the backend left it to us, and folds every transport/HTTP/decode failure into a
//! connection-error reply. [`ChatSession`] owns a conversation: it rejects empty and overlapping
//! submissions and appends the user turn and exactly one agent turn per exchange.

use crate::backend::{ChatBackend, ChatReply, HistoryEntry, QueryFilters, StructuredSummary};
use crate::health::HealthStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// Tool name the backend uses for structured sales queries.
pub const QUERY_TOOL: &str = "query_sales";

/// Who authored a turn. Persisted turns with any other role parse as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Agent,
    #[serde(other)]
    Unknown,
}

impl TurnRole {
    /// Role name the backend expects in history, or None when the turn must not be sent.
    fn wire_role(self) -> Option<&'static str> {
        match self {
            Self::User => Some("user"),
            Self::Agent => Some("model"),
            Self::Unknown => None,
        }
    }
}

/// One message in a conversation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<StructuredSummary>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
            timestamp: Utc::now(),
            data: None,
        }
    }

    pub fn agent(text: impl Into<String>, data: Option<StructuredSummary>) -> Self {
        Self {
            role: TurnRole::Agent,
            text: text.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Ordered, append-only dialogue history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

impl From<Vec<ConversationTurn>> for Conversation {
    fn from(turns: Vec<ConversationTurn>) -> Self {
        Self { turns }
    }
}

/// Reply of one dispatch: text, plus the structured payload of whichever tool branch fired.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    pub text: String,
    pub data: Option<StructuredSummary>,
}

impl DispatchResult {
    fn connection_error(detail: impl std::fmt::Display) -> Self {
        Self {
            text: format!(
                "Sorry, I could not reach the sales backend. Connection error: {}",
                detail
            ),
            data: None,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("a message is already being processed for this conversation")]
    Busy,
}

/// Format history for the backend, dropping turns in unrecognized roles.
pub fn format_history(history: &[ConversationTurn]) -> Vec<HistoryEntry> {
    history
        .iter()
        .filter_map(|t| t.role.wire_role().map(|role| HistoryEntry::new(role, t.text.clone())))
        .collect()
}

/// Stateless dispatcher over a [`ChatBackend`].
#[derive(Clone)]
pub struct Agent {
    backend: Arc<dyn ChatBackend>,
}

impl Agent {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    /// Run one exchange. Does not touch `history`.
    ///
    /// Only empty input is an error; backend failures come back as a connection-error reply
    /// without data.
    pub async fn dispatch(
        &self,
        text: &str,
        history: &[ConversationTurn],
    ) -> Result<DispatchResult, DispatchError> {
        let message = text.trim();
        if message.is_empty() {
            return Err(DispatchError::EmptyMessage);
        }
        let history = format_history(history);
        log::debug!("agent: dispatching message with {} history turns", history.len());

        let reply = match self.backend.chat(message, history).await {
            Ok(r) => r,
            Err(e) => {
                log::warn!("agent: chat failed: {}", e);
                return Ok(DispatchResult::connection_error(e));
            }
        };
        Ok(self.resolve_tool(reply).await)
    }

    async fn resolve_tool(&self, reply: ChatReply) -> DispatchResult {
        let ChatReply {
            text,
            data,
            tool_call,
        } = reply;
        let call = match (data, tool_call) {
            (Some(data), _) => return DispatchResult { text, data: Some(data) },
            (None, Some(call)) if call.name == QUERY_TOOL => call,
            (None, Some(call)) => {
                log::debug!("agent: ignoring unknown tool call {}", call.name);
                return DispatchResult { text, data: None };
            }
            (None, None) => return DispatchResult { text, data: None },
        };

        let filters: QueryFilters = if call.arguments.is_null() {
            QueryFilters::default()
        } else {
            serde_json::from_value(call.arguments).unwrap_or_else(|e| {
                log::warn!("agent: bad {} arguments, querying unfiltered: {}", QUERY_TOOL, e);
                QueryFilters::default()
            })
        };
        log::info!("agent: running {} tool", QUERY_TOOL);
        match self.backend.query(&filters).await {
            Ok(summary) => DispatchResult {
                text,
                data: Some(summary),
            },
            Err(e) => {
                log::warn!("agent: {} failed: {}", QUERY_TOOL, e);
                DispatchResult::connection_error(e)
            }
        }
    }
}

#[derive(Default)]
struct ChatState {
    conversation: Conversation,
    current_view: Option<StructuredSummary>,
}

/// Clears the in-flight flag when the exchange ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One conversation and its current structured view, with at most one dispatch in flight.
pub struct ChatSession {
    id: String,
    agent: Agent,
    state: Mutex<ChatState>,
    in_flight: AtomicBool,
    health: Option<watch::Receiver<HealthStatus>>,
}

impl ChatSession {
    pub fn new(agent: Agent) -> Self {
        Self {
            id: format!("chat-{}", uuid::Uuid::new_v4()),
            agent,
            state: Mutex::new(ChatState::default()),
            in_flight: AtomicBool::new(false),
            health: None,
        }
    }

    /// Continue an existing conversation.
    pub fn with_history(self, conversation: Conversation) -> Self {
        Self {
            state: Mutex::new(ChatState {
                conversation,
                current_view: None,
            }),
            ..self
        }
    }

    /// Warn when dispatching while the last known health says the backend is offline.
    pub fn with_health(mut self, health: watch::Receiver<HealthStatus>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Submit a user message. Empty input and overlapping submissions are rejected before any
    /// network call; otherwise the user turn and one agent turn are appended.
    pub async fn submit(&self, text: &str) -> Result<DispatchResult, DispatchError> {
        let message = text.trim();
        if message.is_empty() {
            return Err(DispatchError::EmptyMessage);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DispatchError::Busy);
        }
        let _in_flight = InFlight(&self.in_flight);

        if let Some(health) = &self.health {
            let online = health.borrow().is_online();
            if !online {
                log::warn!("chat {}: backend health is not online, dispatching anyway", self.id);
            }
        }

        let history = {
            let mut state = self.state.lock().await;
            let history = state.conversation.turns().to_vec();
            state.conversation.push(ConversationTurn::user(message));
            history
        };

        let result = self.agent.dispatch(message, &history).await?;

        let mut state = self.state.lock().await;
        if let Some(data) = &result.data {
            state.current_view = Some(data.clone());
        }
        state
            .conversation
            .push(ConversationTurn::agent(result.text.clone(), result.data.clone()));
        Ok(result)
    }

    pub async fn conversation(&self) -> Conversation {
        self.state.lock().await.conversation.clone()
    }

    /// The structured view from the latest reply that carried data.
    pub async fn current_view(&self) -> Option<StructuredSummary> {
        self.state.lock().await.current_view.clone()
    }
}
