use reviewgate::governance::{
    ActionType, ApprovalGate, AssignmentRoles, AuditAction, AuditLog, CandidateItem,
    ConfigureRequest, Decision, EngineError, ExecutionEngine, ExecutionTrigger, GovernanceError,
    JobStatus, NewRequest, PollPolicy, RequestStatus, RequestStore, ReviewSession, StaticCatalog,
};
use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

#[derive(Default)]
struct ScriptedEngine {
    submit_errors: Mutex<VecDeque<EngineError>>,
    statuses: Mutex<VecDeque<Result<JobStatus, EngineError>>>,
    fallback: Option<JobStatus>,
    submits: AtomicUsize,
    polls: AtomicUsize,
    submitted: Mutex<Vec<(ActionType, Vec<String>)>>,
}

impl ScriptedEngine {
    fn with_statuses(statuses: Vec<Result<JobStatus, EngineError>>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            ..Self::default()
        }
    }

    fn stuck_at(status: JobStatus) -> Self {
        Self {
            fallback: Some(status),
            ..Self::default()
        }
    }

    fn failing_submit(errors: Vec<EngineError>) -> Self {
        Self {
            submit_errors: Mutex::new(errors.into()),
            ..Self::default()
        }
    }
}

impl ExecutionEngine for ScriptedEngine {
    fn submit_job(&self, action: ActionType, item_keys: &[String]) -> Result<String, EngineError> {
        let attempt = self.submits.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.submit_errors.lock().expect("lock").pop_front() {
            return Err(err);
        }
        self.submitted
            .lock()
            .expect("lock")
            .push((action, item_keys.to_vec()));
        Ok(format!("job-{attempt}"))
    }

    fn get_job_status(&self, external_job_id: &str) -> Result<JobStatus, EngineError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self.statuses.lock().expect("lock").pop_front() {
            return next;
        }
        self.fallback
            .ok_or_else(|| EngineError::UnknownJob(external_job_id.to_string()))
    }
}

fn fast_policy(max_polls: u32) -> PollPolicy {
    PollPolicy {
        max_polls,
        transient_retries: 2,
        initial_backoff_ms: 0,
        max_backoff_ms: 0,
    }
}

struct Fixture {
    _temp: tempfile::TempDir,
    store: RequestStore,
    request_id: String,
}

/// Drives a request to `approved` with `accepted` of `total` items accepted.
fn approved_request(total: usize, accepted: usize) -> Fixture {
    let temp = tempdir().expect("tempdir");
    let store = RequestStore::open(temp.path().join("governance.db")).expect("open store");
    store.ensure_schema().expect("schema");
    let request = store
        .create_request(
            &NewRequest {
                name: "remediate".to_string(),
                requester: "alice".to_string(),
                entity_type: "EMAIL".to_string(),
                target_value: "user@example.com".to_string(),
                action_type: ActionType::Redact,
            },
            100,
        )
        .expect("create");
    let keys: Vec<String> = (0..total).map(|idx| format!("item-{idx:02}")).collect();
    let mut catalog = StaticCatalog::new();
    catalog.insert(
        "EMAIL",
        "user@example.com",
        keys.iter().map(CandidateItem::new).collect(),
    );
    store
        .configure(
            &request.id,
            "alice",
            &ConfigureRequest {
                reviewers: BTreeSet::from(["bob".to_string()]),
                approvers: BTreeSet::from(["dave".to_string()]),
                scope: String::new(),
            },
            &catalog,
            &AssignmentRoles,
            110,
        )
        .expect("configure");

    let review = ReviewSession::new(store.clone(), Arc::new(AssignmentRoles));
    review
        .bulk_decide(&request.id, "bob", &keys[..accepted], Decision::Accept, None, 200)
        .expect("accept");
    review
        .bulk_decide(&request.id, "bob", &keys[accepted..], Decision::Decline, None, 200)
        .expect("decline");

    let gate = ApprovalGate::new(store.clone(), Arc::new(AssignmentRoles));
    gate.complete_review(&request.id, "bob", 300)
        .expect("complete");
    gate.request_approval(&request.id, "alice", 310)
        .expect("request approval");
    gate.approve(&request.id, "dave", None, 320)
        .expect("approve");

    Fixture {
        _temp: temp,
        store,
        request_id: request.id,
    }
}

fn trigger(fx: &Fixture, engine: &Arc<ScriptedEngine>, max_polls: u32) -> ExecutionTrigger {
    let engine: Arc<dyn ExecutionEngine + Send + Sync> = engine.clone();
    ExecutionTrigger::new(fx.store.clone(), engine).with_policy(fast_policy(max_polls))
}

fn audit_count(fx: &Fixture, action: AuditAction) -> usize {
    AuditLog::new(fx.store.clone())
        .history(&fx.request_id)
        .expect("history")
        .iter()
        .filter(|entry| entry.action == action)
        .count()
}

#[test]
fn execution_module_submit_sends_accepted_items_and_records_job() {
    let fx = approved_request(5, 3);
    let engine = Arc::new(ScriptedEngine::default());
    let job = trigger(&fx, &engine, 3)
        .submit(&fx.request_id, "dave", 400)
        .expect("submit");

    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.external_job_id, "job-0");
    assert_eq!(job.submitted_item_keys, vec!["item-00", "item-01", "item-02"]);
    assert_eq!(
        fx.store.get_status(&fx.request_id).expect("status"),
        RequestStatus::Executing
    );
    let submitted = engine.submitted.lock().expect("lock").clone();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].0, ActionType::Redact);

    let stored = fx
        .store
        .job_for_request(&fx.request_id)
        .expect("job lookup")
        .expect("job");
    assert_eq!(stored, job);
    assert_eq!(audit_count(&fx, AuditAction::JobSubmitted), 1);
}

#[test]
fn execution_module_empty_accepted_set_completes_without_engine() {
    let fx = approved_request(10, 0);
    let engine = Arc::new(ScriptedEngine::default());
    let err = trigger(&fx, &engine, 3)
        .submit(&fx.request_id, "dave", 400)
        .expect_err("empty accepted set");

    assert!(matches!(err, GovernanceError::EmptyAcceptedSet { .. }));
    assert_eq!(engine.submits.load(Ordering::SeqCst), 0);
    assert_eq!(
        fx.store.get_status(&fx.request_id).expect("status"),
        RequestStatus::CompletedNoAction
    );
    assert!(fx
        .store
        .job_for_request(&fx.request_id)
        .expect("job lookup")
        .is_none());
}

#[test]
fn execution_module_rejected_submit_returns_request_to_approved() {
    let fx = approved_request(2, 2);
    let engine = Arc::new(ScriptedEngine::failing_submit(vec![EngineError::Rejected(
        "action not allowed".to_string(),
    )]));
    let trigger = trigger(&fx, &engine, 3);

    let err = trigger
        .submit(&fx.request_id, "dave", 400)
        .expect_err("engine rejects");
    match &err {
        GovernanceError::ExecutionEngine { source, .. } => {
            assert_eq!(source, &EngineError::Rejected("action not allowed".to_string()));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!err.is_retryable());
    assert_eq!(
        fx.store.get_status(&fx.request_id).expect("status"),
        RequestStatus::Approved
    );
    assert!(fx
        .store
        .job_for_request(&fx.request_id)
        .expect("job lookup")
        .is_none());

    trigger
        .submit(&fx.request_id, "dave", 410)
        .expect("resubmit succeeds");
}

#[test]
fn execution_module_transient_submit_errors_are_retried() {
    let fx = approved_request(2, 1);
    let engine = Arc::new(ScriptedEngine::failing_submit(vec![
        EngineError::Transient("timeout".to_string()),
        EngineError::Transient("timeout".to_string()),
    ]));
    let job = trigger(&fx, &engine, 3)
        .submit(&fx.request_id, "dave", 400)
        .expect("submit after retries");
    assert_eq!(engine.submits.load(Ordering::SeqCst), 3);
    assert_eq!(job.external_job_id, "job-2");
}

#[test]
fn execution_module_completed_job_marks_items_remediated() {
    let fx = approved_request(4, 3);
    let engine = Arc::new(ScriptedEngine::with_statuses(vec![
        Ok(JobStatus::Running),
        Ok(JobStatus::Completed),
    ]));
    let trigger = trigger(&fx, &engine, 3);
    trigger
        .submit(&fx.request_id, "dave", 400)
        .expect("submit");

    assert_eq!(
        trigger.poll(&fx.request_id, 410).expect("poll running"),
        JobStatus::Running
    );
    assert_eq!(
        fx.store.get_status(&fx.request_id).expect("status"),
        RequestStatus::Executing
    );
    assert_eq!(
        trigger.poll(&fx.request_id, 420).expect("poll completed"),
        JobStatus::Completed
    );
    assert_eq!(
        fx.store.get_status(&fx.request_id).expect("status"),
        RequestStatus::Completed
    );
    assert_eq!(audit_count(&fx, AuditAction::Remediated), 3);

    let job = trigger.job(&fx.request_id).expect("job");
    assert_eq!(job.poll_count, 2);
    assert_eq!(job.completed_at, Some(420));

    // Terminal jobs are not polled again.
    assert_eq!(
        trigger.poll(&fx.request_id, 430).expect("poll again"),
        JobStatus::Completed
    );
    assert_eq!(engine.polls.load(Ordering::SeqCst), 2);
    assert_eq!(audit_count(&fx, AuditAction::Remediated), 3);
}

#[test]
fn execution_module_failed_job_ends_in_execution_failed() {
    let fx = approved_request(2, 2);
    let engine = Arc::new(ScriptedEngine::with_statuses(vec![Ok(JobStatus::Failed)]));
    let trigger = trigger(&fx, &engine, 3);
    trigger
        .submit(&fx.request_id, "dave", 400)
        .expect("submit");

    assert_eq!(
        trigger.wait_for_completion(&fx.request_id).expect("wait"),
        JobStatus::Failed
    );
    let request = fx.store.get_request(&fx.request_id).expect("request");
    assert_eq!(request.status, RequestStatus::ExecutionFailed);
    assert!(request.terminal_reason.is_some());
    assert_eq!(audit_count(&fx, AuditAction::Remediated), 0);
}

#[test]
fn execution_module_exhausted_transient_poll_errors_leave_request_unchanged() {
    let fx = approved_request(1, 1);
    let engine = Arc::new(ScriptedEngine::with_statuses(vec![
        Err(EngineError::Transient("503".to_string())),
        Err(EngineError::Transient("503".to_string())),
        Err(EngineError::Transient("503".to_string())),
        Ok(JobStatus::Completed),
    ]));
    let trigger = trigger(&fx, &engine, 3);
    trigger
        .submit(&fx.request_id, "dave", 400)
        .expect("submit");

    let err = trigger
        .poll(&fx.request_id, 410)
        .expect_err("retries exhausted");
    assert!(err.is_retryable());
    assert_eq!(engine.polls.load(Ordering::SeqCst), 3);
    assert_eq!(
        fx.store.get_status(&fx.request_id).expect("status"),
        RequestStatus::Executing
    );
    assert_eq!(trigger.job(&fx.request_id).expect("job").poll_count, 0);

    assert_eq!(
        trigger.poll(&fx.request_id, 420).expect("recovered"),
        JobStatus::Completed
    );
}

#[test]
fn execution_module_poll_timeout_fails_request_and_blocks_resubmit() {
    let fx = approved_request(10, 4);
    let engine = Arc::new(ScriptedEngine::stuck_at(JobStatus::Running));
    let trigger = trigger(&fx, &engine, 3);
    trigger
        .submit(&fx.request_id, "dave", 400)
        .expect("submit");

    let err = trigger
        .wait_for_completion(&fx.request_id)
        .expect_err("poll timeout");
    match err {
        GovernanceError::PollTimeout {
            external_job_id,
            polls,
        } => {
            assert_eq!(external_job_id, "job-0");
            assert_eq!(polls, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let request = fx.store.get_request(&fx.request_id).expect("request");
    assert_eq!(request.status, RequestStatus::ExecutionFailed);
    assert_eq!(request.terminal_reason.as_deref(), Some("PollTimeout"));
    let job = trigger.job(&fx.request_id).expect("job");
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failure_reason.as_deref(), Some("PollTimeout"));

    let err = trigger
        .submit(&fx.request_id, "dave", 500)
        .expect_err("terminal request");
    assert!(matches!(
        err,
        GovernanceError::InvalidState {
            current: RequestStatus::ExecutionFailed,
            ..
        }
    ));
    assert_eq!(engine.submits.load(Ordering::SeqCst), 1);
}

#[test]
fn execution_module_poll_without_job_is_not_found() {
    let fx = approved_request(1, 1);
    let engine = Arc::new(ScriptedEngine::default());
    let err = trigger(&fx, &engine, 3)
        .poll(&fx.request_id, 400)
        .expect_err("no job");
    assert!(matches!(err, GovernanceError::JobNotFound { .. }));
}

/// Accepts every submission, then makes the next job-row insert fail by
/// installing an aborting trigger on the jobs table.
struct RecordRefusingEngine {
    db_path: PathBuf,
}

impl ExecutionEngine for RecordRefusingEngine {
    fn submit_job(&self, _action: ActionType, _item_keys: &[String]) -> Result<String, EngineError> {
        let connection = rusqlite::Connection::open(&self.db_path).expect("open db");
        connection
            .execute_batch(
                "
                CREATE TRIGGER refuse_job_rows BEFORE INSERT ON execution_jobs
                BEGIN
                    SELECT RAISE(ABORT, 'disk quota exceeded');
                END;
                ",
            )
            .expect("install trigger");
        Ok("ext-77".to_string())
    }

    fn get_job_status(&self, _external_job_id: &str) -> Result<JobStatus, EngineError> {
        Ok(JobStatus::Running)
    }
}

/// Accepts every submission while another connection holds the write lock
/// for `hold`.
struct LockHoldingEngine {
    db_path: PathBuf,
    hold: Duration,
    holder: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ExecutionEngine for LockHoldingEngine {
    fn submit_job(&self, _action: ActionType, _item_keys: &[String]) -> Result<String, EngineError> {
        let (locked_tx, locked_rx) = mpsc::channel();
        let db_path = self.db_path.clone();
        let hold = self.hold;
        let handle = thread::spawn(move || {
            let mut connection = rusqlite::Connection::open(db_path).expect("open db");
            let tx = connection
                .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
                .expect("take write lock");
            locked_tx.send(()).expect("signal lock");
            thread::sleep(hold);
            tx.commit().expect("release write lock");
        });
        locked_rx.recv().expect("lock taken");
        *self.holder.lock().expect("lock") = Some(handle);
        Ok("ext-busy".to_string())
    }

    fn get_job_status(&self, _external_job_id: &str) -> Result<JobStatus, EngineError> {
        Ok(JobStatus::Running)
    }
}

#[test]
fn execution_module_unrecorded_job_fails_request_with_external_id() {
    let fx = approved_request(3, 2);
    let engine: Arc<dyn ExecutionEngine + Send + Sync> = Arc::new(RecordRefusingEngine {
        db_path: fx.store.db_path().to_path_buf(),
    });
    let trigger = ExecutionTrigger::new(fx.store.clone(), engine).with_policy(fast_policy(3));

    let err = trigger
        .submit(&fx.request_id, "dave", 400)
        .expect_err("job row cannot be written");
    match &err {
        GovernanceError::JobNotRecorded {
            external_job_id, ..
        } => assert_eq!(external_job_id, "ext-77"),
        other => panic!("unexpected error: {other:?}"),
    }

    let request = fx.store.get_request(&fx.request_id).expect("request");
    assert_eq!(request.status, RequestStatus::ExecutionFailed);
    let reason = request.terminal_reason.expect("terminal reason");
    assert!(reason.starts_with("JobNotRecorded"));
    assert!(reason.contains("ext-77"));

    let history = AuditLog::new(fx.store.clone())
        .history(&fx.request_id)
        .expect("history");
    let last = history.last().expect("audit entry");
    assert_eq!(last.to_state, Some(RequestStatus::ExecutionFailed));
    assert!(last.detail.contains("ext-77"));
    assert!(AuditLog::new(fx.store.clone())
        .verify_chain(&fx.request_id)
        .expect("verify")
        .is_intact());

    let err = trigger
        .submit(&fx.request_id, "dave", 410)
        .expect_err("terminal request");
    assert!(matches!(
        err,
        GovernanceError::InvalidState {
            current: RequestStatus::ExecutionFailed,
            ..
        }
    ));
}

#[test]
fn execution_module_job_row_write_waits_out_lock_contention() {
    let fx = approved_request(2, 2);
    let store = fx.store.clone().with_busy_timeout(Duration::from_millis(20));
    let engine = Arc::new(LockHoldingEngine {
        db_path: fx.store.db_path().to_path_buf(),
        hold: Duration::from_millis(150),
        holder: Mutex::new(None),
    });
    let shared: Arc<dyn ExecutionEngine + Send + Sync> = engine.clone();
    let trigger = ExecutionTrigger::new(store, shared).with_policy(PollPolicy {
        max_polls: 3,
        transient_retries: 8,
        initial_backoff_ms: 25,
        max_backoff_ms: 200,
    });

    let job = trigger
        .submit(&fx.request_id, "dave", 400)
        .expect("submit once the lock is released");
    if let Some(handle) = engine.holder.lock().expect("lock").take() {
        handle.join().expect("lock holder");
    }

    assert_eq!(job.external_job_id, "ext-busy");
    assert_eq!(
        fx.store.get_status(&fx.request_id).expect("status"),
        RequestStatus::Executing
    );
    assert_eq!(trigger.job(&fx.request_id).expect("job"), job);
    assert_eq!(audit_count(&fx, AuditAction::JobSubmitted), 1);
}

#[test]
fn execution_module_job_unknown_to_engine_fails_request() {
    let fx = approved_request(2, 1);
    let engine = Arc::new(ScriptedEngine::default());
    let trigger = trigger(&fx, &engine, 3);
    trigger
        .submit(&fx.request_id, "dave", 400)
        .expect("submit");

    assert_eq!(
        trigger.poll(&fx.request_id, 410).expect("poll"),
        JobStatus::Failed
    );
    let job = trigger.job(&fx.request_id).expect("job");
    assert_eq!(job.failure_reason.as_deref(), Some("UnknownJob"));
    let request = fx.store.get_request(&fx.request_id).expect("request");
    assert_eq!(request.status, RequestStatus::ExecutionFailed);
    assert_eq!(request.terminal_reason.as_deref(), Some("UnknownJob"));
    assert_eq!(audit_count(&fx, AuditAction::Remediated), 0);
}
