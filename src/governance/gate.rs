use crate::governance::audit::AuditAction;
use crate::governance::error::GovernanceError;
use crate::governance::facets::counts_in;
use crate::governance::model::{Request, RequestStatus, Role};
use crate::governance::roles::RoleProvider;
use crate::governance::store::{load_request, load_role_assignment, RequestStore, Transition};
use crate::shared::logging::EventLog;
use serde_json::Value;
use std::sync::Arc;

/// Role-ordered transitions from review through approval.
#[derive(Clone)]
pub struct ApprovalGate {
    store: RequestStore,
    roles: Arc<dyn RoleProvider + Send + Sync>,
    log: EventLog,
}

impl std::fmt::Debug for ApprovalGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalGate")
            .field("store", &self.store)
            .finish()
    }
}

impl ApprovalGate {
    pub fn new(store: RequestStore, roles: Arc<dyn RoleProvider + Send + Sync>) -> Self {
        Self {
            store,
            roles,
            log: EventLog::disabled(),
        }
    }

    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    /// `under_review -> review_completed`, only once every item is decided.
    pub fn complete_review(
        &self,
        request_id: &str,
        actor: &str,
        now: i64,
    ) -> Result<Request, GovernanceError> {
        self.authorize(
            request_id,
            actor,
            &[Role::Reviewer, Role::Requester],
            "complete_review",
            now,
        )?;
        let request = self.store.write(|tx| {
            let current = load_request(tx, request_id)?;
            let mut detail = String::new();
            if current.status == RequestStatus::UnderReview {
                let counts = counts_in(tx, request_id)?;
                if counts.not_reviewed > 0 {
                    return Err(GovernanceError::ReviewIncomplete {
                        request_id: request_id.to_string(),
                        not_reviewed: counts.not_reviewed,
                    });
                }
                detail = format!(
                    "accepted={} declined={} total={}",
                    counts.accepted, counts.declined, counts.total
                );
            }
            self.store.transition_in(
                tx,
                request_id,
                Transition {
                    attempted: "complete_review",
                    from: &[RequestStatus::UnderReview],
                    to: RequestStatus::ReviewCompleted,
                    actor,
                    action: AuditAction::Transition,
                    detail,
                    terminal_reason: None,
                },
                now,
            )
        })?;
        self.log_transition(&request, actor);
        Ok(request)
    }

    pub fn request_approval(
        &self,
        request_id: &str,
        requester: &str,
        now: i64,
    ) -> Result<Request, GovernanceError> {
        self.authorize(request_id, requester, &[Role::Requester], "request_approval", now)?;
        let request = self.store.write(|tx| {
            self.store.transition_in(
                tx,
                request_id,
                Transition {
                    attempted: "request_approval",
                    from: &[RequestStatus::ReviewCompleted],
                    to: RequestStatus::ApprovalRequested,
                    actor: requester,
                    action: AuditAction::Transition,
                    detail: "approval requested".to_string(),
                    terminal_reason: None,
                },
                now,
            )
        })?;
        self.log_transition(&request, requester);
        Ok(request)
    }

    pub fn approve(
        &self,
        request_id: &str,
        approver: &str,
        note: Option<&str>,
        now: i64,
    ) -> Result<Request, GovernanceError> {
        self.authorize(request_id, approver, &[Role::Approver], "approve", now)?;
        let request = self.store.write(|tx| {
            self.store.transition_in(
                tx,
                request_id,
                Transition {
                    attempted: "approve",
                    from: &[RequestStatus::ApprovalRequested],
                    to: RequestStatus::Approved,
                    actor: approver,
                    action: AuditAction::Approved,
                    detail: note.unwrap_or("approved").to_string(),
                    terminal_reason: None,
                },
                now,
            )
        })?;
        self.log_transition(&request, approver);
        Ok(request)
    }

    pub fn reject(
        &self,
        request_id: &str,
        approver: &str,
        reason: &str,
        now: i64,
    ) -> Result<Request, GovernanceError> {
        if reason.trim().is_empty() {
            return Err(GovernanceError::InvalidInput(
                "rejecting a request requires a reason".to_string(),
            ));
        }
        self.authorize(request_id, approver, &[Role::Approver], "reject", now)?;
        let request = self.store.write(|tx| {
            self.store.transition_in(
                tx,
                request_id,
                Transition {
                    attempted: "reject",
                    from: &[RequestStatus::ApprovalRequested],
                    to: RequestStatus::Rejected,
                    actor: approver,
                    action: AuditAction::Rejected,
                    detail: reason.to_string(),
                    terminal_reason: Some(reason.to_string()),
                },
                now,
            )
        })?;
        self.log_transition(&request, approver);
        Ok(request)
    }

    /// Passes when the actor holds any of `accepted`. A request without a
    /// role assignment only recognises its requester.
    fn authorize(
        &self,
        request_id: &str,
        actor: &str,
        accepted: &[Role],
        attempted: &str,
        now: i64,
    ) -> Result<(), GovernanceError> {
        let connection = self.store.connect()?;
        let request = load_request(&connection, request_id)?;
        let assignment = load_role_assignment(&connection, request_id)?;
        let allowed = accepted
            .iter()
            .any(|role| self.roles.has_role(&request, assignment.as_ref(), actor, *role));
        if allowed {
            return Ok(());
        }
        self.log.warn(
            "gate.denied",
            &[
                ("request_id", Value::from(request_id)),
                ("actor", Value::from(actor)),
                ("attempted", Value::from(attempted)),
            ],
        );
        Err(self.store.deny(request_id, actor, accepted[0], attempted, now))
    }

    fn log_transition(&self, request: &Request, actor: &str) {
        self.log.info(
            "gate.transition",
            &[
                ("request_id", Value::from(request.id.as_str())),
                ("actor", Value::from(actor)),
                ("status", Value::from(request.status.as_str())),
            ],
        );
    }
}
