use crate::governance::model::{RequestStatus, Role};

#[derive(Debug, thiserror::Error)]
pub enum GovernanceError {
    #[error("request `{request_id}` not found")]
    RequestNotFound { request_id: String },
    #[error("item `{item_key}` not found in request `{request_id}`")]
    ItemNotFound { request_id: String, item_key: String },
    #[error("execution job for request `{request_id}` not found")]
    JobNotFound { request_id: String },
    #[error("request name `{name}` is already used by active request `{existing_id}`")]
    DuplicateRequestName { name: String, existing_id: String },
    #[error("request `{request_id}` is `{current}`; `{attempted}` requires one of: {allowed}")]
    InvalidState {
        request_id: String,
        current: RequestStatus,
        attempted: String,
        allowed: String,
    },
    #[error("actor `{actor}` is not a {role} of request `{request_id}`")]
    Forbidden {
        request_id: String,
        actor: String,
        role: Role,
    },
    #[error("review of request `{request_id}` is incomplete: {not_reviewed} items remain undecided")]
    ReviewIncomplete { request_id: String, not_reviewed: u64 },
    #[error("item catalog unavailable for request `{request_id}`: {reason}")]
    CatalogUnavailable { request_id: String, reason: String },
    #[error("item catalog returned no candidate items for request `{request_id}`")]
    NoCandidateItems { request_id: String },
    #[error("request `{request_id}` has no accepted items; completed without action")]
    EmptyAcceptedSet { request_id: String },
    #[error("execution job `{external_job_id}` did not finish after {polls} polls")]
    PollTimeout { external_job_id: String, polls: u32 },
    #[error("execution engine error for request `{request_id}`: {source}")]
    ExecutionEngine {
        request_id: String,
        #[source]
        source: EngineError,
    },
    #[error(
        "execution job `{external_job_id}` for request `{request_id}` was accepted but not recorded: {source}"
    )]
    JobNotRecorded {
        request_id: String,
        external_job_id: String,
        #[source]
        source: Box<GovernanceError>,
    },
    #[error("concurrent update conflict on request `{request_id}`: {detail}")]
    Conflict { request_id: String, detail: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("stored value `{value}` is not a valid {kind}")]
    CorruptRecord { kind: &'static str, value: String },
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create state directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite statement failed: {source}")]
    Sql {
        #[source]
        source: rusqlite::Error,
    },
    #[error("json error for {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl GovernanceError {
    /// Errors where re-reading status and trying again can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            GovernanceError::InvalidState { .. } | GovernanceError::Conflict { .. } => true,
            GovernanceError::ExecutionEngine { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// SQLite lock contention that outlasted the busy timeout.
    pub fn is_busy(&self) -> bool {
        match self {
            GovernanceError::Sql {
                source: rusqlite::Error::SqliteFailure(failure, _),
            } => matches!(
                failure.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GovernanceError::RequestNotFound { .. }
                | GovernanceError::ItemNotFound { .. }
                | GovernanceError::JobNotFound { .. }
        )
    }
}

impl From<rusqlite::Error> for GovernanceError {
    fn from(source: rusqlite::Error) -> Self {
        GovernanceError::Sql { source }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog backend unavailable: {0}")]
    Unavailable(String),
    #[error("catalog stream interrupted after {yielded} items: {reason}")]
    Interrupted { yielded: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("transient engine failure: {0}")]
    Transient(String),
    #[error("engine rejected the request: {0}")]
    Rejected(String),
    #[error("engine does not know job `{0}`")]
    UnknownJob(String),
}

impl EngineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }
}
