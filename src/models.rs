use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Access/refresh token pair authorizing mail provider calls on a user's
/// behalf. Produced by the authentication layer, passed explicitly into
/// `execute` — never held as ambient state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: None,
        }
    }
}

/// The operations a batch job can run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum BatchOperation {
    FetchEmails,
    AnalyzeEmails,
    CreateLabels,
    AssignLabels,
    OrganizeLabels,
    FullProcess,
}

impl BatchOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchOperation::FetchEmails => "fetchEmails",
            BatchOperation::AnalyzeEmails => "analyzeEmails",
            BatchOperation::CreateLabels => "createLabels",
            BatchOperation::AssignLabels => "assignLabels",
            BatchOperation::OrganizeLabels => "organizeLabels",
            BatchOperation::FullProcess => "fullProcess",
        }
    }

    /// Upper bound on `options.batch_size` accepted at job creation
    pub fn max_batch_size(&self) -> usize {
        match self {
            BatchOperation::FetchEmails => 500,
            BatchOperation::CreateLabels => 100,
            BatchOperation::AnalyzeEmails
            | BatchOperation::AssignLabels
            | BatchOperation::OrganizeLabels
            | BatchOperation::FullProcess => 200,
        }
    }
}

/// Batch job lifecycle states; `Completed` and `Failed` are final
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Created,
    Running,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Created => "created",
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

/// Free-form per-request configuration, validated against per-operation
/// ceilings at creation time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOptions {
    /// Provider-side search filter for fetch operations
    #[serde(default)]
    pub query: Option<String>,
    /// Requested total for the operation (messages to fetch/assign)
    #[serde(default, alias = "batchSize")]
    pub batch_size: Option<usize>,
    /// Cap on records selected by analyze operations
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Progress counters; monotonically non-decreasing within a run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchCounters {
    pub emails_processed: usize,
    pub emails_total: usize,
    pub labels_created: usize,
    pub labels_used: usize,
}

impl BatchCounters {
    /// Fold another counter set into this one (field-wise sum)
    pub fn merge(&mut self, other: &BatchCounters) {
        self.emails_processed += other.emails_processed;
        self.emails_total += other.emails_total;
        self.labels_created += other.labels_created;
        self.labels_used += other.labels_used;
    }
}

/// One tracked orchestration request. Single-writer: only the orchestrator
/// executing this batch_id mutates the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub batch_id: String,
    pub user_id: String,
    pub operation: BatchOperation,
    pub options: BatchOptions,
    pub status: BatchStatus,
    pub counters: BatchCounters,
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl BatchJob {
    pub fn new(user_id: &str, operation: BatchOperation, options: BatchOptions) -> Self {
        Self {
            batch_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            operation,
            options,
            status: BatchStatus::Created,
            counters: BatchCounters::default(),
            errors: Vec::new(),
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
        }
    }
}

/// One provider message known to the system, keyed `(provider_id, user_id)`.
/// `synced` implies `processed`; a record that is processed but not synced is
/// the recovery point for the assign operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub provider_id: String,
    pub user_id: String,
    pub subject: String,
    pub sender: String,
    pub recipient: String,
    pub snippet: String,
    pub timestamp: DateTime<Utc>,
    /// Classification has been attempted and recorded
    pub processed: bool,
    /// The resolved label has been applied on the provider side
    pub synced: bool,
    pub analysis: Option<ClassificationResult>,
}

/// Category-to-label mapping, one per `(user_id, name)`. The provider label
/// id is set once and immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelRecord {
    pub user_id: String,
    pub name: String,
    pub provider_label_id: String,
    /// System-created, as opposed to discovered on the provider
    pub is_auto: bool,
}

/// The closed category taxonomy. Classification output outside this set is
/// never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Category {
    Newsletter,
    Receipt,
    Notification,
    Marketing,
    Shipping,
    Financial,
    Personal,
    Other,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Newsletter,
        Category::Receipt,
        Category::Notification,
        Category::Marketing,
        Category::Shipping,
        Category::Financial,
        Category::Personal,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Newsletter => "Newsletter",
            Category::Receipt => "Receipt",
            Category::Notification => "Notification",
            Category::Marketing => "Marketing",
            Category::Shipping => "Shipping",
            Category::Financial => "Financial",
            Category::Personal => "Personal",
            Category::Other => "Other",
        }
    }

    /// Leaf label segment used when no better suggestion is available
    pub fn label_segment(&self) -> &'static str {
        match self {
            Category::Newsletter => "Newsletters",
            Category::Receipt => "Receipts",
            Category::Notification => "Notifications",
            Category::Marketing => "Marketing",
            Category::Shipping => "Shipping",
            Category::Financial => "Financial",
            Category::Personal => "Personal",
            Category::Other => "Other",
        }
    }

    /// Parse a category name, tolerating case and plural forms. Returns None
    /// for anything outside the closed set.
    pub fn parse(value: &str) -> Option<Category> {
        match value.trim().to_lowercase().as_str() {
            "newsletter" | "newsletters" => Some(Category::Newsletter),
            "receipt" | "receipts" => Some(Category::Receipt),
            "notification" | "notifications" => Some(Category::Notification),
            "marketing" => Some(Category::Marketing),
            "shipping" => Some(Category::Shipping),
            "financial" => Some(Category::Financial),
            "personal" => Some(Category::Personal),
            "other" => Some(Category::Other),
            _ => None,
        }
    }
}

/// Message sentiment as reported by classification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn parse(value: &str) -> Option<Sentiment> {
        match value.trim().to_lowercase().as_str() {
            "positive" => Some(Sentiment::Positive),
            "negative" => Some(Sentiment::Negative),
            "neutral" => Some(Sentiment::Neutral),
            _ => None,
        }
    }
}

/// Validated classification output. Field-level constraints are enforced at
/// the boundary where the classification call returns, on both the AI path
/// and the rule path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassificationResult {
    pub category: Category,
    pub summary: String,
    pub sentiment: Sentiment,
    pub suggested_label: String,
}
