//! Sales backend wire types (camelCase JSON).

use serde::{Deserialize, Deserializer, Serialize};

/// Reads JSON `null` the same as a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One entry of the history sent with a chat request (`{role, parts:[{text}]}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub parts: Vec<HistoryPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPart {
    pub text: String,
}

impl HistoryEntry {
    pub fn new(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            parts: vec![HistoryPart { text: text.into() }],
        }
    }
}

/// Body for `POST /api/v1/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub history: Vec<HistoryEntry>,
}

/// Response of `POST /api/v1/chat`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(default)]
    pub data: Option<StructuredSummary>,
    /// Data-query the model asked for but the backend did not run.
    #[serde(default)]
    pub tool_call: Option<ToolCall>,
}

/// Tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Filter parameters for `POST /api/v1/query`. Unset filters are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Aggregated sales view produced by the backend.
///
/// Every field defaults, so a partial body (e.g. only `totalRevenue` and `totalOrders`) still
/// parses. Explicit `null`s read as the default too.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredSummary {
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_revenue: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_orders: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub top_product: String,
    #[serde(default, deserialize_with = "null_as_default", alias = "salesByCategory")]
    pub categories: Vec<CategoryAggregate>,
    #[serde(default, deserialize_with = "null_as_default", alias = "recentSales")]
    pub recent_transactions: Vec<Transaction>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "routes")]
    pub visits: Option<Vec<Visit>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opportunities: Option<Vec<Opportunity>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<QueryDebug>,
}

/// Which list a summary is meant to be rendered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryView {
    Transactions,
    Visits,
    Opportunities,
}

impl StructuredSummary {
    /// The active view: opportunities, then visits, then the transaction table.
    pub fn active_view(&self) -> SummaryView {
        if self.opportunities.is_some() {
            SummaryView::Opportunities
        } else if self.visits.is_some() {
            SummaryView::Visits
        } else {
            SummaryView::Transactions
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryAggregate {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(default)]
    pub id: serde_json::Value,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub seller: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default, deserialize_with = "null_as_default", alias = "value", alias = "total")]
    pub amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visit {
    #[serde(default, deserialize_with = "null_as_default")]
    pub client: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    #[serde(default, deserialize_with = "null_as_default")]
    pub client: String,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub estimated_value: f64,
}

/// How the backend answered the query, for operators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDebug {
    #[serde(default)]
    pub sql_logic: Option<String>,
    #[serde(default)]
    pub date_range: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub filters: Vec<String>,
}
