use crate::governance::audit::{append_in, AuditAction, AuditRecord};
use crate::governance::error::{EngineError, GovernanceError};
use crate::governance::model::{ActionType, ExecutionJob, JobStatus, RequestStatus};
use crate::governance::store::{
    insert_job, load_accepted_keys, load_job, load_request, update_job_status, RequestStore,
    Transition,
};
use crate::shared::logging::EventLog;
use crate::shared::time::now_secs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const POLL_TIMEOUT_REASON: &str = "PollTimeout";
pub const UNKNOWN_JOB_REASON: &str = "UnknownJob";
pub const JOB_NOT_RECORDED_REASON: &str = "JobNotRecorded";
const ENGINE_FAILURE_REASON: &str = "execution engine reported failure";
const SYSTEM_ACTOR: &str = "system";

/// Submit/poll contract of the engine that physically performs the
/// remediation. How it batches, retries or rolls back is its own concern.
pub trait ExecutionEngine {
    fn submit_job(&self, action: ActionType, item_keys: &[String]) -> Result<String, EngineError>;
    fn get_job_status(&self, external_job_id: &str) -> Result<JobStatus, EngineError>;
}

fn default_max_polls() -> u32 {
    30
}

fn default_transient_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollPolicy {
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_polls: default_max_polls(),
            transient_retries: default_transient_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl PollPolicy {
    /// Exponential delay before retry `attempt` (zero-based), capped at
    /// `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_polls == 0 {
            return Err("`max_polls` must be at least 1".to_string());
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err("`initial_backoff_ms` must not exceed `max_backoff_ms`".to_string());
        }
        Ok(())
    }
}

enum SubmitClaim {
    NoAction,
    Claimed { action: ActionType, keys: Vec<String> },
}

/// Hands the accepted item set to the execution engine and tracks the job.
#[derive(Clone)]
pub struct ExecutionTrigger {
    store: RequestStore,
    engine: Arc<dyn ExecutionEngine + Send + Sync>,
    policy: PollPolicy,
    log: EventLog,
}

impl std::fmt::Debug for ExecutionTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionTrigger")
            .field("store", &self.store)
            .field("policy", &self.policy)
            .finish()
    }
}

impl ExecutionTrigger {
    pub fn new(store: RequestStore, engine: Arc<dyn ExecutionEngine + Send + Sync>) -> Self {
        Self {
            store,
            engine,
            policy: PollPolicy::default(),
            log: EventLog::disabled(),
        }
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Submits the accepted items of an approved request.
    ///
    /// With nothing accepted the request ends in `completed_no_action`, the
    /// engine is never called and `EmptyAcceptedSet` is returned. If the
    /// engine refuses the submission the request goes back to `approved`
    /// and no job row is written.
    ///
    /// Once the engine has accepted a job, writing the job row is retried
    /// while SQLite reports lock contention. If it still cannot be written
    /// the request moves to `execution_failed` with the external job id in
    /// its terminal reason and `JobNotRecorded` is returned.
    pub fn submit(
        &self,
        request_id: &str,
        actor: &str,
        now: i64,
    ) -> Result<ExecutionJob, GovernanceError> {
        let claim = self.store.write(|tx| {
            let request = load_request(tx, request_id)?;
            let keys = if request.status == RequestStatus::Approved {
                load_accepted_keys(tx, request_id)?
            } else {
                Vec::new()
            };
            if request.status == RequestStatus::Approved && keys.is_empty() {
                self.store.transition_in(
                    tx,
                    request_id,
                    Transition {
                        attempted: "submit",
                        from: &[RequestStatus::Approved],
                        to: RequestStatus::CompletedNoAction,
                        actor,
                        action: AuditAction::Transition,
                        detail: "no accepted items; nothing submitted".to_string(),
                        terminal_reason: None,
                    },
                    now,
                )?;
                return Ok(SubmitClaim::NoAction);
            }
            self.store.transition_in(
                tx,
                request_id,
                Transition {
                    attempted: "submit",
                    from: &[RequestStatus::Approved],
                    to: RequestStatus::Executing,
                    actor,
                    action: AuditAction::Transition,
                    detail: format!("submitting {} accepted items", keys.len()),
                    terminal_reason: None,
                },
                now,
            )?;
            Ok(SubmitClaim::Claimed {
                action: request.action_type,
                keys,
            })
        })?;

        let (action, keys) = match claim {
            SubmitClaim::NoAction => {
                self.log.info(
                    "execution.no_action",
                    &[("request_id", Value::from(request_id))],
                );
                return Err(GovernanceError::EmptyAcceptedSet {
                    request_id: request_id.to_string(),
                });
            }
            SubmitClaim::Claimed { action, keys } => (action, keys),
        };

        let submitted = self.with_transient_retry(|| self.engine.submit_job(action, &keys));
        let external_job_id = match submitted {
            Ok(job_id) => job_id,
            Err(source) => {
                self.store.write(|tx| {
                    self.store.transition_in(
                        tx,
                        request_id,
                        Transition {
                            attempted: "submit",
                            from: &[RequestStatus::Executing],
                            to: RequestStatus::Approved,
                            actor,
                            action: AuditAction::Transition,
                            detail: format!("engine refused submission: {source}"),
                            terminal_reason: None,
                        },
                        now,
                    )
                })?;
                self.log.warn(
                    "execution.submit_failed",
                    &[
                        ("request_id", Value::from(request_id)),
                        ("error", Value::from(source.to_string())),
                    ],
                );
                return Err(GovernanceError::ExecutionEngine {
                    request_id: request_id.to_string(),
                    source,
                });
            }
        };

        let job = ExecutionJob {
            request_id: request_id.to_string(),
            submitted_item_keys: keys,
            external_job_id,
            status: JobStatus::Queued,
            submitted_at: now,
            completed_at: None,
            poll_count: 0,
            failure_reason: None,
        };
        let recorded = self.retry_when_busy(|| {
            self.store.write(|tx| {
                insert_job(tx, &job)?;
                append_in(
                    tx,
                    &AuditRecord {
                        request_id,
                        actor,
                        action: AuditAction::JobSubmitted,
                        from_state: Some(RequestStatus::Executing),
                        to_state: Some(RequestStatus::Executing),
                        item_key: None,
                        detail: format!(
                            "external_job_id={} action={} items={}",
                            job.external_job_id,
                            action,
                            job.submitted_item_keys.len()
                        ),
                    },
                    now,
                )?;
                Ok(())
            })
        });
        if let Err(cause) = recorded {
            return Err(self.abandon_submission(job, actor, now, cause));
        }
        self.log.info(
            "execution.submitted",
            &[
                ("request_id", Value::from(request_id)),
                ("external_job_id", Value::from(job.external_job_id.as_str())),
                ("items", Value::from(job.submitted_item_keys.len())),
            ],
        );
        Ok(job)
    }

    /// Polls the engine once and folds the answer into the job and request.
    ///
    /// A job already recorded as finished is returned as-is without asking
    /// the engine. When transient errors outlast the retry budget the error
    /// is returned and nothing is written.
    pub fn poll(&self, request_id: &str, now: i64) -> Result<JobStatus, GovernanceError> {
        let job = self.job(request_id)?;
        if job.status.is_terminal() {
            return Ok(job.status);
        }

        let external_job_id = job.external_job_id.as_str();
        let reply = self.with_transient_retry(|| self.engine.get_job_status(external_job_id));
        let (reported, failure_reason) = match reply {
            Ok(status) => (status, ENGINE_FAILURE_REASON),
            // The engine lost track of the job; it will never finish.
            Err(EngineError::UnknownJob(_)) => (JobStatus::Failed, UNKNOWN_JOB_REASON),
            Err(source) => {
                return Err(GovernanceError::ExecutionEngine {
                    request_id: request_id.to_string(),
                    source,
                })
            }
        };

        let status = self.store.write(|tx| {
            let Some(mut job) = load_job(tx, request_id)? else {
                return Err(GovernanceError::JobNotFound {
                    request_id: request_id.to_string(),
                });
            };
            if job.status.is_terminal() {
                return Ok(job.status);
            }
            let previous = job.status;
            job.status = reported;
            job.poll_count = job.poll_count.saturating_add(1);
            match reported {
                JobStatus::Completed => {
                    job.completed_at = Some(now);
                }
                JobStatus::Failed => {
                    job.completed_at = Some(now);
                    job.failure_reason = Some(failure_reason.to_string());
                }
                JobStatus::Queued | JobStatus::Running => {}
            }
            update_job_status(tx, &job)?;

            if previous != reported {
                append_in(
                    tx,
                    &AuditRecord {
                        request_id,
                        actor: SYSTEM_ACTOR,
                        action: AuditAction::JobStatus,
                        from_state: Some(RequestStatus::Executing),
                        to_state: Some(RequestStatus::Executing),
                        item_key: None,
                        detail: format!(
                            "external_job_id={} {previous} -> {reported}",
                            job.external_job_id
                        ),
                    },
                    now,
                )?;
            }

            match reported {
                JobStatus::Completed => {
                    for item_key in &job.submitted_item_keys {
                        append_in(
                            tx,
                            &AuditRecord {
                                request_id,
                                actor: SYSTEM_ACTOR,
                                action: AuditAction::Remediated,
                                from_state: Some(RequestStatus::Executing),
                                to_state: Some(RequestStatus::Executing),
                                item_key: Some(item_key.as_str()),
                                detail: format!("external_job_id={}", job.external_job_id),
                            },
                            now,
                        )?;
                    }
                    self.store.transition_in(
                        tx,
                        request_id,
                        Transition {
                            attempted: "poll",
                            from: &[RequestStatus::Executing],
                            to: RequestStatus::Completed,
                            actor: SYSTEM_ACTOR,
                            action: AuditAction::Transition,
                            detail: format!("{} items remediated", job.submitted_item_keys.len()),
                            terminal_reason: None,
                        },
                        now,
                    )?;
                }
                JobStatus::Failed => {
                    self.store.transition_in(
                        tx,
                        request_id,
                        Transition {
                            attempted: "poll",
                            from: &[RequestStatus::Executing],
                            to: RequestStatus::ExecutionFailed,
                            actor: SYSTEM_ACTOR,
                            action: AuditAction::Transition,
                            detail: format!(
                                "external_job_id={} failed: {failure_reason}",
                                job.external_job_id
                            ),
                            terminal_reason: job.failure_reason.clone(),
                        },
                        now,
                    )?;
                }
                JobStatus::Queued | JobStatus::Running => {}
            }
            Ok(reported)
        })?;

        if status.is_terminal() {
            self.log.info(
                "execution.finished",
                &[
                    ("request_id", Value::from(request_id)),
                    ("status", Value::from(status.as_str())),
                ],
            );
        }
        Ok(status)
    }

    /// Polls until the job finishes or `max_polls` is spent.
    ///
    /// Polls that fail with transient engine errors still count against the
    /// budget. On exhaustion the job is marked failed and the request ends
    /// in `execution_failed` with reason `PollTimeout`.
    pub fn wait_for_completion(&self, request_id: &str) -> Result<JobStatus, GovernanceError> {
        for attempt in 0..self.policy.max_polls {
            match self.poll(request_id, now_secs()) {
                Ok(status) if status.is_terminal() => return Ok(status),
                Ok(_) => {}
                Err(err) if err.is_retryable() => {
                    self.log.warn(
                        "execution.poll_retry",
                        &[
                            ("request_id", Value::from(request_id)),
                            ("attempt", Value::from(attempt + 1)),
                            ("error", Value::from(err.to_string())),
                        ],
                    );
                }
                Err(err) => return Err(err),
            }
            if attempt + 1 < self.policy.max_polls {
                thread::sleep(self.policy.backoff(attempt));
            }
        }
        self.mark_poll_timeout(request_id, now_secs())
    }

    pub fn job(&self, request_id: &str) -> Result<ExecutionJob, GovernanceError> {
        self.store
            .job_for_request(request_id)?
            .ok_or_else(|| GovernanceError::JobNotFound {
                request_id: request_id.to_string(),
            })
    }

    fn mark_poll_timeout(&self, request_id: &str, now: i64) -> Result<JobStatus, GovernanceError> {
        let external_job_id = self.store.write(|tx| {
            let Some(mut job) = load_job(tx, request_id)? else {
                return Err(GovernanceError::JobNotFound {
                    request_id: request_id.to_string(),
                });
            };
            if job.status.is_terminal() {
                return Ok(None);
            }
            job.status = JobStatus::Failed;
            job.completed_at = Some(now);
            job.failure_reason = Some(POLL_TIMEOUT_REASON.to_string());
            update_job_status(tx, &job)?;
            self.store.transition_in(
                tx,
                request_id,
                Transition {
                    attempted: "poll",
                    from: &[RequestStatus::Executing],
                    to: RequestStatus::ExecutionFailed,
                    actor: SYSTEM_ACTOR,
                    action: AuditAction::Transition,
                    detail: format!(
                        "external_job_id={} did not finish after {} polls",
                        job.external_job_id, self.policy.max_polls
                    ),
                    terminal_reason: Some(POLL_TIMEOUT_REASON.to_string()),
                },
                now,
            )?;
            Ok(Some(job.external_job_id))
        })?;

        match external_job_id {
            Some(external_job_id) => {
                self.log.warn(
                    "execution.poll_timeout",
                    &[
                        ("request_id", Value::from(request_id)),
                        ("external_job_id", Value::from(external_job_id.as_str())),
                        ("polls", Value::from(self.policy.max_polls)),
                    ],
                );
                Err(GovernanceError::PollTimeout {
                    external_job_id,
                    polls: self.policy.max_polls,
                })
            }
            // Another poller recorded a final status in the meantime.
            None => Ok(self.job(request_id)?.status),
        }
    }

    /// Compensates for a job the engine accepted but the store could not
    /// record: the request leaves `executing` so it is not stranded there.
    fn abandon_submission(
        &self,
        job: ExecutionJob,
        actor: &str,
        now: i64,
        cause: GovernanceError,
    ) -> GovernanceError {
        let request_id = job.request_id.as_str();
        let reason = format!(
            "{JOB_NOT_RECORDED_REASON}: external_job_id={}",
            job.external_job_id
        );
        let compensated = self.retry_when_busy(|| {
            self.store.write(|tx| {
                self.store.transition_in(
                    tx,
                    request_id,
                    Transition {
                        attempted: "submit",
                        from: &[RequestStatus::Executing],
                        to: RequestStatus::ExecutionFailed,
                        actor,
                        action: AuditAction::Transition,
                        detail: format!(
                            "external_job_id={} accepted by engine but not recorded: {cause}",
                            job.external_job_id
                        ),
                        terminal_reason: Some(reason.clone()),
                    },
                    now,
                )?;
                Ok(())
            })
        });

        let mut fields = vec![
            ("request_id", Value::from(request_id)),
            ("external_job_id", Value::from(job.external_job_id.as_str())),
            ("error", Value::from(cause.to_string())),
        ];
        if let Err(err) = &compensated {
            fields.push(("compensation_error", Value::from(err.to_string())));
        }
        self.log.warn("execution.job_not_recorded", &fields);

        GovernanceError::JobNotRecorded {
            request_id: job.request_id.clone(),
            external_job_id: job.external_job_id,
            source: Box::new(cause),
        }
    }

    fn retry_when_busy<T>(
        &self,
        mut write: impl FnMut() -> Result<T, GovernanceError>,
    ) -> Result<T, GovernanceError> {
        let mut attempt = 0;
        loop {
            match write() {
                Err(err) if err.is_busy() && attempt < self.policy.transient_retries => {
                    thread::sleep(self.policy.backoff(attempt));
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn with_transient_retry<T>(
        &self,
        mut call: impl FnMut() -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut attempt = 0;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.policy.transient_retries => {
                    thread::sleep(self.policy.backoff(attempt));
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = PollPolicy {
            max_polls: 5,
            transient_retries: 2,
            initial_backoff_ms: 100,
            max_backoff_ms: 350,
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(350));
        assert_eq!(policy.backoff(80), Duration::from_millis(350));
    }

    #[test]
    fn poll_policy_validation_rejects_zero_polls() {
        let policy = PollPolicy {
            max_polls: 0,
            ..PollPolicy::default()
        };
        assert!(policy.validate().is_err());
        assert!(PollPolicy::default().validate().is_ok());
    }
}
