use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lifecycle of a remediation request. Every edge allowed by
/// [`RequestStatus::can_transition_to`] is applied as a conditional update
/// keyed on the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Created,
    Configuring,
    ReadyForReview,
    UnderReview,
    ReviewCompleted,
    ApprovalRequested,
    Approved,
    Executing,
    Completed,
    CompletedNoAction,
    Rejected,
    ExecutionFailed,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 12] = [
        RequestStatus::Created,
        RequestStatus::Configuring,
        RequestStatus::ReadyForReview,
        RequestStatus::UnderReview,
        RequestStatus::ReviewCompleted,
        RequestStatus::ApprovalRequested,
        RequestStatus::Approved,
        RequestStatus::Executing,
        RequestStatus::Completed,
        RequestStatus::CompletedNoAction,
        RequestStatus::Rejected,
        RequestStatus::ExecutionFailed,
    ];

    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (RequestStatus::Created, RequestStatus::Configuring)
                | (RequestStatus::Configuring, RequestStatus::Created)
                | (RequestStatus::Configuring, RequestStatus::ReadyForReview)
                | (RequestStatus::ReadyForReview, RequestStatus::UnderReview)
                | (RequestStatus::UnderReview, RequestStatus::ReviewCompleted)
                | (RequestStatus::ReviewCompleted, RequestStatus::ApprovalRequested)
                | (RequestStatus::ApprovalRequested, RequestStatus::Approved)
                | (RequestStatus::ApprovalRequested, RequestStatus::Rejected)
                | (RequestStatus::Approved, RequestStatus::Executing)
                | (RequestStatus::Approved, RequestStatus::CompletedNoAction)
                | (RequestStatus::Executing, RequestStatus::Approved)
                | (RequestStatus::Executing, RequestStatus::Completed)
                | (RequestStatus::Executing, RequestStatus::ExecutionFailed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Completed
                | RequestStatus::CompletedNoAction
                | RequestStatus::Rejected
                | RequestStatus::ExecutionFailed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Created => "created",
            RequestStatus::Configuring => "configuring",
            RequestStatus::ReadyForReview => "ready_for_review",
            RequestStatus::UnderReview => "under_review",
            RequestStatus::ReviewCompleted => "review_completed",
            RequestStatus::ApprovalRequested => "approval_requested",
            RequestStatus::Approved => "approved",
            RequestStatus::Executing => "executing",
            RequestStatus::Completed => "completed",
            RequestStatus::CompletedNoAction => "completed_no_action",
            RequestStatus::Rejected => "rejected",
            RequestStatus::ExecutionFailed => "execution_failed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == raw)
            .ok_or_else(|| format!("unknown request status `{raw}`"))
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Delete,
    Export,
    Redact,
    Move,
    Archive,
    Tag,
    IgnoreRisks,
    SetRetention,
}

impl ActionType {
    pub const ALL: [ActionType; 8] = [
        ActionType::Delete,
        ActionType::Export,
        ActionType::Redact,
        ActionType::Move,
        ActionType::Archive,
        ActionType::Tag,
        ActionType::IgnoreRisks,
        ActionType::SetRetention,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Delete => "delete",
            ActionType::Export => "export",
            ActionType::Redact => "redact",
            ActionType::Move => "move",
            ActionType::Archive => "archive",
            ActionType::Tag => "tag",
            ActionType::IgnoreRisks => "ignore_risks",
            ActionType::SetRetention => "set_retention",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "action must be one of: {}",
                    Self::ALL.map(ActionType::as_str).join(", ")
                )
            })
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Requester,
    Reviewer,
    Approver,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Requester => write!(f, "requester"),
            Role::Reviewer => write!(f, "reviewer"),
            Role::Approver => write!(f, "approver"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    NotReviewed,
    Accepted,
    Declined,
}

impl ReviewStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStatus::NotReviewed => "not_reviewed",
            ReviewStatus::Accepted => "accepted",
            ReviewStatus::Declined => "declined",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "not_reviewed" => Ok(ReviewStatus::NotReviewed),
            "accepted" => Ok(ReviewStatus::Accepted),
            "declined" => Ok(ReviewStatus::Declined),
            other => Err(format!(
                "review status must be one of: not_reviewed, accepted, declined (got `{other}`)"
            )),
        }
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reviewer's verdict on one item. There is no way to express
/// "undecided", which keeps decided items from returning to `NotReviewed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Decline,
}

impl Decision {
    pub fn review_status(self) -> ReviewStatus {
        match self {
            Decision::Accept => ReviewStatus::Accepted,
            Decision::Decline => ReviewStatus::Declined,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "accept" | "accepted" => Ok(Decision::Accept),
            "decline" | "declined" => Ok(Decision::Decline),
            other => Err(format!("decision must be `accept` or `decline`, got `{other}`")),
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Accept => write!(f, "accept"),
            Decision::Decline => write!(f, "decline"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status `{other}`")),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: String,
    pub name: String,
    pub requester: String,
    pub entity_type: String,
    pub target_value: String,
    pub action_type: ActionType,
    pub status: RequestStatus,
    pub version: u64,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub terminal_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRequest {
    pub name: String,
    pub requester: String,
    pub entity_type: String,
    pub target_value: String,
    pub action_type: ActionType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    pub request_id: String,
    pub reviewers: BTreeSet<String>,
    pub approvers: BTreeSet<String>,
    pub scope: String,
}

/// Per-item attributes copied from the catalog at load time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemAttributes {
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub modified_at: Option<i64>,
    #[serde(default)]
    pub accessed_at: Option<i64>,
    #[serde(default)]
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewItem {
    pub request_id: String,
    pub item_key: String,
    pub review_status: ReviewStatus,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub reviewer: Option<String>,
    #[serde(default)]
    pub decided_at: Option<i64>,
    pub version: u64,
    #[serde(default)]
    pub attributes: ItemAttributes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionJob {
    pub request_id: String,
    pub submitted_item_keys: Vec<String>,
    pub external_job_id: String,
    pub status: JobStatus,
    pub submitted_at: i64,
    #[serde(default)]
    pub completed_at: Option<i64>,
    #[serde(default)]
    pub poll_count: u32,
    #[serde(default)]
    pub failure_reason: Option<String>,
}
