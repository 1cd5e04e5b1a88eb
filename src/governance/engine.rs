//! Entry point wiring the store, review session, approval gate, facet
//! counter, execution trigger and audit log over one SQLite database.

use crate::config::Settings;
use crate::governance::audit::{AuditEntry, AuditLog, ChainVerification};
use crate::governance::catalog::ItemCatalog;
use crate::governance::error::{EngineError, GovernanceError};
use crate::governance::execution::{ExecutionEngine, ExecutionTrigger, PollPolicy};
use crate::governance::facets::{CountCheck, FacetCounter, FacetCounts, FacetDimension};
use crate::governance::filter::ItemFilter;
use crate::governance::gate::ApprovalGate;
use crate::governance::model::{
    Decision, ExecutionJob, JobStatus, NewRequest, Request, RequestStatus, ReviewItem,
    ReviewStatus, RoleAssignment,
};
use crate::governance::review::{BulkDecision, ReviewSession};
use crate::governance::roles::{AssignmentRoles, RoleProvider};
use crate::governance::store::{ConfigureRequest, RequestStore};
use crate::shared::logging::EventLog;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct GovernanceEngine {
    store: RequestStore,
    catalog: Option<Arc<dyn ItemCatalog + Send + Sync>>,
    execution_engine: Option<Arc<dyn ExecutionEngine + Send + Sync>>,
    roles: Arc<dyn RoleProvider + Send + Sync>,
    poll_policy: PollPolicy,
    auto_submit: bool,
    require_decline_comment: bool,
    log: EventLog,
}

impl std::fmt::Debug for GovernanceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernanceEngine")
            .field("store", &self.store)
            .field("has_catalog", &self.catalog.is_some())
            .field("has_execution_engine", &self.execution_engine.is_some())
            .field("poll_policy", &self.poll_policy)
            .field("auto_submit", &self.auto_submit)
            .field("require_decline_comment", &self.require_decline_comment)
            .finish()
    }
}

impl GovernanceEngine {
    /// Engine over an existing store with assignment-based roles, default
    /// polling, auto-submit enabled and no adapters attached.
    pub fn new(store: RequestStore) -> Self {
        Self {
            store,
            catalog: None,
            execution_engine: None,
            roles: Arc::new(AssignmentRoles),
            poll_policy: PollPolicy::default(),
            auto_submit: true,
            require_decline_comment: false,
            log: EventLog::disabled(),
        }
    }

    /// Opens the database and event log under `settings.state_root`.
    pub fn open(settings: &Settings) -> Result<Self, GovernanceError> {
        let store = RequestStore::open(settings.database_path())?;
        store.ensure_schema()?;
        Ok(Self::new(store)
            .with_poll_policy(settings.execution.poll)
            .with_auto_submit(settings.execution.auto_submit)
            .with_decline_comment_required(settings.review.require_decline_comment)
            .with_event_log(EventLog::to_file(settings.log_path())))
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn ItemCatalog + Send + Sync>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_execution_engine(
        mut self,
        execution_engine: Arc<dyn ExecutionEngine + Send + Sync>,
    ) -> Self {
        self.execution_engine = Some(execution_engine);
        self
    }

    pub fn with_roles(mut self, roles: Arc<dyn RoleProvider + Send + Sync>) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_poll_policy(mut self, poll_policy: PollPolicy) -> Self {
        self.poll_policy = poll_policy;
        self
    }

    pub fn with_auto_submit(mut self, auto_submit: bool) -> Self {
        self.auto_submit = auto_submit;
        self
    }

    pub fn with_decline_comment_required(mut self, required: bool) -> Self {
        self.require_decline_comment = required;
        self
    }

    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    pub fn store(&self) -> &RequestStore {
        &self.store
    }

    pub fn create_request(
        &self,
        new_request: &NewRequest,
        now: i64,
    ) -> Result<Request, GovernanceError> {
        let request = self.store.create_request(new_request, now)?;
        self.log.info(
            "request.created",
            &[
                ("request_id", Value::from(request.id.as_str())),
                ("name", Value::from(request.name.as_str())),
                ("requester", Value::from(request.requester.as_str())),
                ("action_type", Value::from(request.action_type.as_str())),
            ],
        );
        Ok(request)
    }

    pub fn configure(
        &self,
        request_id: &str,
        actor: &str,
        config: &ConfigureRequest,
        now: i64,
    ) -> Result<Request, GovernanceError> {
        let catalog = self
            .catalog
            .as_ref()
            .ok_or_else(|| GovernanceError::CatalogUnavailable {
                request_id: request_id.to_string(),
                reason: "no item catalog attached".to_string(),
            })?;
        match self
            .store
            .configure(request_id, actor, config, catalog.as_ref(), self.roles.as_ref(), now)
        {
            Ok(request) => {
                self.log.info(
                    "request.configured",
                    &[
                        ("request_id", Value::from(request_id)),
                        ("reviewers", Value::from(config.reviewers.len())),
                        ("approvers", Value::from(config.approvers.len())),
                    ],
                );
                Ok(request)
            }
            Err(err) => {
                self.log.warn(
                    "request.configure_failed",
                    &[
                        ("request_id", Value::from(request_id)),
                        ("error", Value::from(err.to_string())),
                    ],
                );
                Err(err)
            }
        }
    }

    pub fn decide(
        &self,
        request_id: &str,
        reviewer: &str,
        item_key: &str,
        decision: Decision,
        comment: Option<&str>,
        now: i64,
    ) -> Result<ReviewItem, GovernanceError> {
        self.review()
            .decide(request_id, reviewer, item_key, decision, comment, now)
    }

    pub fn bulk_decide(
        &self,
        request_id: &str,
        reviewer: &str,
        item_keys: &[String],
        decision: Decision,
        comment: Option<&str>,
        now: i64,
    ) -> Result<BulkDecision, GovernanceError> {
        self.review()
            .bulk_decide(request_id, reviewer, item_keys, decision, comment, now)
    }

    pub fn decide_matching(
        &self,
        request_id: &str,
        reviewer: &str,
        filter: &ItemFilter,
        decision: Decision,
        comment: Option<&str>,
        now: i64,
    ) -> Result<BulkDecision, GovernanceError> {
        self.review()
            .decide_matching(request_id, reviewer, filter, decision, comment, now)
    }

    pub fn filter_items(
        &self,
        request_id: &str,
        filter: &ItemFilter,
    ) -> Result<Vec<ReviewItem>, GovernanceError> {
        self.review().filter_items(request_id, filter)
    }

    pub fn complete_review(
        &self,
        request_id: &str,
        actor: &str,
        now: i64,
    ) -> Result<Request, GovernanceError> {
        self.gate().complete_review(request_id, actor, now)
    }

    pub fn request_approval(
        &self,
        request_id: &str,
        requester: &str,
        now: i64,
    ) -> Result<Request, GovernanceError> {
        self.gate().request_approval(request_id, requester, now)
    }

    /// Approves the request and, with auto-submit on and an execution
    /// engine attached, hands the accepted items to that engine.
    ///
    /// The approval is committed before submission. An empty accepted set
    /// is not an error here: the returned request is `completed_no_action`.
    /// An engine failure is returned while the request stays `approved`.
    /// Without an attached engine the approved request is returned and
    /// submission is left to a later `submit`.
    pub fn approve(
        &self,
        request_id: &str,
        approver: &str,
        note: Option<&str>,
        now: i64,
    ) -> Result<Request, GovernanceError> {
        let approved = self.gate().approve(request_id, approver, note, now)?;
        if !self.auto_submit {
            return Ok(approved);
        }
        if self.execution_engine.is_none() {
            self.log.info(
                "approve.submit_deferred",
                &[
                    ("request_id", Value::from(request_id)),
                    ("reason", Value::from("no execution engine attached")),
                ],
            );
            return Ok(approved);
        }
        match self.submit(request_id, approver, now) {
            Ok(_) | Err(GovernanceError::EmptyAcceptedSet { .. }) => {
                self.store.get_request(request_id)
            }
            Err(err) => Err(err),
        }
    }

    pub fn reject(
        &self,
        request_id: &str,
        approver: &str,
        reason: &str,
        now: i64,
    ) -> Result<Request, GovernanceError> {
        self.gate().reject(request_id, approver, reason, now)
    }

    pub fn submit(
        &self,
        request_id: &str,
        actor: &str,
        now: i64,
    ) -> Result<ExecutionJob, GovernanceError> {
        self.execution(request_id)?.submit(request_id, actor, now)
    }

    pub fn poll(&self, request_id: &str, now: i64) -> Result<JobStatus, GovernanceError> {
        self.execution(request_id)?.poll(request_id, now)
    }

    pub fn wait_for_completion(&self, request_id: &str) -> Result<JobStatus, GovernanceError> {
        self.execution(request_id)?.wait_for_completion(request_id)
    }

    pub fn status(&self, request_id: &str) -> Result<RequestStatus, GovernanceError> {
        self.store.get_status(request_id)
    }

    pub fn request(&self, request_id: &str) -> Result<Request, GovernanceError> {
        self.store.get_request(request_id)
    }

    pub fn requests(&self) -> Result<Vec<Request>, GovernanceError> {
        self.store.list_requests()
    }

    pub fn role_assignment(
        &self,
        request_id: &str,
    ) -> Result<Option<RoleAssignment>, GovernanceError> {
        self.store.role_assignment(request_id)
    }

    /// Items of a request, optionally narrowed to one review status.
    pub fn items(
        &self,
        request_id: &str,
        status: Option<ReviewStatus>,
    ) -> Result<Vec<ReviewItem>, GovernanceError> {
        let items = self.store.items(request_id)?;
        Ok(match status {
            Some(status) => items
                .into_iter()
                .filter(|item| item.review_status == status)
                .collect(),
            None => items,
        })
    }

    pub fn job(&self, request_id: &str) -> Result<Option<ExecutionJob>, GovernanceError> {
        self.store.get_request(request_id)?;
        self.store.job_for_request(request_id)
    }

    pub fn counts(&self, request_id: &str) -> Result<FacetCounts, GovernanceError> {
        self.facet_counter().counts(request_id)
    }

    pub fn counts_by_predicate(
        &self,
        request_id: &str,
        filter: &ItemFilter,
    ) -> Result<FacetCounts, GovernanceError> {
        self.facet_counter().counts_by_predicate(request_id, filter)
    }

    pub fn verify_accepted_count(
        &self,
        request_id: &str,
        filter: &ItemFilter,
        expected: u64,
    ) -> Result<CountCheck, GovernanceError> {
        let check = self
            .facet_counter()
            .verify_accepted_count(request_id, filter, expected)?;
        if !check.matches() {
            self.log.warn(
                "facets.count_mismatch",
                &[
                    ("request_id", Value::from(request_id)),
                    ("expected", Value::from(check.expected)),
                    ("actual", Value::from(check.actual)),
                ],
            );
        }
        Ok(check)
    }

    pub fn facets(
        &self,
        request_id: &str,
        dimension: FacetDimension,
        now: i64,
    ) -> Result<BTreeMap<String, FacetCounts>, GovernanceError> {
        self.facet_counter().facets(request_id, dimension, now)
    }

    pub fn history(&self, request_id: &str) -> Result<Vec<AuditEntry>, GovernanceError> {
        self.audit().history(request_id)
    }

    pub fn verify_audit(&self, request_id: &str) -> Result<ChainVerification, GovernanceError> {
        self.audit().verify_chain(request_id)
    }

    pub fn audit(&self) -> AuditLog {
        AuditLog::new(self.store.clone())
    }

    fn review(&self) -> ReviewSession {
        ReviewSession::new(self.store.clone(), Arc::clone(&self.roles))
            .with_decline_comment_required(self.require_decline_comment)
            .with_event_log(self.log.clone())
    }

    fn gate(&self) -> ApprovalGate {
        ApprovalGate::new(self.store.clone(), Arc::clone(&self.roles))
            .with_event_log(self.log.clone())
    }

    fn facet_counter(&self) -> FacetCounter {
        FacetCounter::new(self.store.clone())
    }

    fn execution(&self, request_id: &str) -> Result<ExecutionTrigger, GovernanceError> {
        let engine =
            self.execution_engine
                .as_ref()
                .ok_or_else(|| GovernanceError::ExecutionEngine {
                    request_id: request_id.to_string(),
                    source: EngineError::Rejected("no execution engine attached".to_string()),
                })?;
        Ok(ExecutionTrigger::new(self.store.clone(), Arc::clone(engine))
            .with_policy(self.poll_policy)
            .with_event_log(self.log.clone()))
    }
}
