use crate::governance::audit::{append_in, AuditAction, AuditRecord};
use crate::governance::error::GovernanceError;
use crate::governance::filter::ItemFilter;
use crate::governance::model::{Decision, RequestStatus, ReviewItem, Role};
use crate::governance::roles::RoleProvider;
use crate::governance::store::{load_item, load_request, load_role_assignment, RequestStore};
use crate::shared::logging::EventLog;
use rusqlite::params;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug)]
pub struct ItemFailure {
    pub item_key: String,
    pub error: GovernanceError,
}

/// Outcome of a multi-item decision. Items are applied independently, so
/// `applied` and `failed` can both be non-empty.
#[derive(Debug, Default)]
pub struct BulkDecision {
    pub applied: Vec<ReviewItem>,
    pub failed: Vec<ItemFailure>,
}

impl BulkDecision {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn applied_keys(&self) -> Vec<&str> {
        self.applied.iter().map(|item| item.item_key.as_str()).collect()
    }
}

#[derive(Clone)]
pub struct ReviewSession {
    store: RequestStore,
    roles: Arc<dyn RoleProvider + Send + Sync>,
    require_decline_comment: bool,
    log: EventLog,
}

impl std::fmt::Debug for ReviewSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewSession")
            .field("store", &self.store)
            .field("require_decline_comment", &self.require_decline_comment)
            .finish()
    }
}

impl ReviewSession {
    pub fn new(store: RequestStore, roles: Arc<dyn RoleProvider + Send + Sync>) -> Self {
        Self {
            store,
            roles,
            require_decline_comment: false,
            log: EventLog::disabled(),
        }
    }

    pub fn with_decline_comment_required(mut self, required: bool) -> Self {
        self.require_decline_comment = required;
        self
    }

    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
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
        self.validate_comment(decision, comment)?;
        self.authorize(request_id, reviewer, now)?;
        self.apply(request_id, reviewer, item_key, decision, comment, now)
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
        self.validate_comment(decision, comment)?;
        self.authorize(request_id, reviewer, now)?;
        let status = self.store.get_status(request_id)?;
        if status != RequestStatus::UnderReview {
            return Err(GovernanceError::InvalidState {
                request_id: request_id.to_string(),
                current: status,
                attempted: "bulk_decide".to_string(),
                allowed: RequestStatus::UnderReview.to_string(),
            });
        }

        let mut outcome = BulkDecision::default();
        for item_key in item_keys {
            match self.apply(request_id, reviewer, item_key, decision, comment, now) {
                Ok(item) => outcome.applied.push(item),
                Err(error) => outcome.failed.push(ItemFailure {
                    item_key: item_key.clone(),
                    error,
                }),
            }
        }
        self.log.info(
            "review.bulk_decide",
            &[
                ("request_id", Value::from(request_id)),
                ("reviewer", Value::from(reviewer)),
                ("decision", Value::from(decision.to_string())),
                ("applied", Value::from(outcome.applied.len())),
                ("failed", Value::from(outcome.failed.len())),
            ],
        );
        Ok(outcome)
    }

    /// Narrows the request's items first, then decides every match.
    pub fn decide_matching(
        &self,
        request_id: &str,
        reviewer: &str,
        filter: &ItemFilter,
        decision: Decision,
        comment: Option<&str>,
        now: i64,
    ) -> Result<BulkDecision, GovernanceError> {
        let keys: Vec<String> = self
            .filter_items(request_id, filter)?
            .into_iter()
            .map(|item| item.item_key)
            .collect();
        self.bulk_decide(request_id, reviewer, &keys, decision, comment, now)
    }

    pub fn filter_items(
        &self,
        request_id: &str,
        filter: &ItemFilter,
    ) -> Result<Vec<ReviewItem>, GovernanceError> {
        Ok(self
            .store
            .items(request_id)?
            .into_iter()
            .filter(|item| filter.matches(item))
            .collect())
    }

    fn validate_comment(
        &self,
        decision: Decision,
        comment: Option<&str>,
    ) -> Result<(), GovernanceError> {
        let blank = comment.map(|value| value.trim().is_empty()).unwrap_or(true);
        if self.require_decline_comment && decision == Decision::Decline && blank {
            return Err(GovernanceError::InvalidInput(
                "declining an item requires a comment".to_string(),
            ));
        }
        Ok(())
    }

    /// Role sets only exist once the request is configured; before that
    /// the state check in [`Self::apply`] reports the problem instead.
    fn authorize(&self, request_id: &str, reviewer: &str, now: i64) -> Result<(), GovernanceError> {
        let connection = self.store.connect()?;
        let request = load_request(&connection, request_id)?;
        let Some(assignment) = load_role_assignment(&connection, request_id)? else {
            return Ok(());
        };
        if self
            .roles
            .has_role(&request, Some(&assignment), reviewer, Role::Reviewer)
        {
            return Ok(());
        }
        self.log.warn(
            "review.denied",
            &[
                ("request_id", Value::from(request_id)),
                ("actor", Value::from(reviewer)),
            ],
        );
        Err(self
            .store
            .deny(request_id, reviewer, Role::Reviewer, "decide", now))
    }

    fn apply(
        &self,
        request_id: &str,
        reviewer: &str,
        item_key: &str,
        decision: Decision,
        comment: Option<&str>,
        now: i64,
    ) -> Result<ReviewItem, GovernanceError> {
        let next = decision.review_status();
        self.store.write(|tx| {
            let request = load_request(tx, request_id)?;
            if request.status != RequestStatus::UnderReview {
                return Err(GovernanceError::InvalidState {
                    request_id: request_id.to_string(),
                    current: request.status,
                    attempted: "decide".to_string(),
                    allowed: RequestStatus::UnderReview.to_string(),
                });
            }
            let mut item = load_item(tx, request_id, item_key)?.ok_or_else(|| {
                GovernanceError::ItemNotFound {
                    request_id: request_id.to_string(),
                    item_key: item_key.to_string(),
                }
            })?;

            let previous = item.review_status;
            let decided_at = item.decided_at.map(|prev| prev.max(now)).unwrap_or(now);
            let comment = comment.map(str::to_string);
            let changed = tx.execute(
                "
                UPDATE review_items
                SET review_status = ?1, comment = ?2, reviewer = ?3, decided_at = ?4,
                    version = version + 1
                WHERE request_id = ?5 AND item_key = ?6 AND version = ?7
                ",
                params![
                    next.as_str(),
                    comment,
                    reviewer,
                    decided_at,
                    request_id,
                    item_key,
                    item.version as i64,
                ],
            )?;
            if changed != 1 {
                return Err(GovernanceError::Conflict {
                    request_id: request_id.to_string(),
                    detail: format!("item `{item_key}` changed during decide"),
                });
            }

            append_in(
                tx,
                &AuditRecord {
                    request_id,
                    actor: reviewer,
                    action: AuditAction::Decision,
                    from_state: Some(RequestStatus::UnderReview),
                    to_state: Some(RequestStatus::UnderReview),
                    item_key: Some(item_key),
                    detail: match comment.as_deref() {
                        Some(text) => format!("{previous} -> {next}; comment: {text}"),
                        None => format!("{previous} -> {next}"),
                    },
                },
                now,
            )?;

            item.review_status = next;
            item.comment = comment;
            item.reviewer = Some(reviewer.to_string());
            item.decided_at = Some(decided_at);
            item.version += 1;
            Ok(item)
        })
    }
}
