//! Sales backend: chat (language model + data tools), structured queries, and health.
//!
//! The backend owns the sales store and the model credentials; this crate only talks to it over
//! HTTP through the [`ChatBackend`] trait.

mod http;
mod types;

pub use http::{BackendError, ChatBackend, HttpBackend};
pub use types::{
    CategoryAggregate, ChatReply, ChatRequest, HistoryEntry, HistoryPart, Opportunity, QueryDebug,
    QueryFilters, StructuredSummary, SummaryView, ToolCall, Transaction, Visit,
};
