use reviewgate::governance::{
    ActionType, AssignmentRoles, AuditAction, AuditLog, CandidateItem, ConfigureRequest, Decision,
    ExtensionClass, GovernanceError, ItemAttributes, ItemFilter, NewRequest, RequestStatus,
    RequestStore, ReviewSession, ReviewStatus, Role, SizeRange, StaticCatalog,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

const MIB: u64 = 1024 * 1024;

struct Fixture {
    _temp: tempfile::TempDir,
    store: RequestStore,
    request_id: String,
}

fn fixture_with(items: Vec<CandidateItem>, configure: bool) -> Fixture {
    let temp = tempdir().expect("tempdir");
    let store = RequestStore::open(temp.path().join("governance.db")).expect("open store");
    store.ensure_schema().expect("schema");
    let request = store
        .create_request(
            &NewRequest {
                name: "purge".to_string(),
                requester: "alice".to_string(),
                entity_type: "EMAIL".to_string(),
                target_value: "user@example.com".to_string(),
                action_type: ActionType::Delete,
            },
            100,
        )
        .expect("create");
    if configure {
        let mut catalog = StaticCatalog::new();
        catalog.insert("EMAIL", "user@example.com", items);
        store
            .configure(
                &request.id,
                "alice",
                &ConfigureRequest {
                    reviewers: ["bob", "carol"].iter().map(|s| s.to_string()).collect(),
                    approvers: BTreeSet::from(["dave".to_string()]),
                    scope: "mailbox".to_string(),
                },
                &catalog,
                &AssignmentRoles,
                110,
            )
            .expect("configure");
    }
    Fixture {
        _temp: temp,
        store,
        request_id: request.id,
    }
}

fn fixture(count: usize) -> Fixture {
    fixture_with(
        (0..count)
            .map(|idx| CandidateItem::new(format!("item-{idx:02}")))
            .collect(),
        true,
    )
}

fn session(fx: &Fixture) -> ReviewSession {
    ReviewSession::new(fx.store.clone(), Arc::new(AssignmentRoles))
}

fn decision_entries(fx: &Fixture, item_key: &str) -> usize {
    AuditLog::new(fx.store.clone())
        .history(&fx.request_id)
        .expect("history")
        .iter()
        .filter(|entry| {
            entry.action == AuditAction::Decision && entry.item_key.as_deref() == Some(item_key)
        })
        .count()
}

#[test]
fn review_module_decide_updates_item_and_records_reviewer() {
    let fx = fixture(3);
    let item = session(&fx)
        .decide(
            &fx.request_id,
            "bob",
            "item-01",
            Decision::Accept,
            Some("contains PII"),
            200,
        )
        .expect("decide");

    assert_eq!(item.review_status, ReviewStatus::Accepted);
    assert_eq!(item.reviewer.as_deref(), Some("bob"));
    assert_eq!(item.comment.as_deref(), Some("contains PII"));
    assert_eq!(item.decided_at, Some(200));

    let stored = fx.store.item(&fx.request_id, "item-01").expect("item");
    assert_eq!(stored, item);
}

#[test]
fn review_module_repeated_decision_is_idempotent_but_audited_each_time() {
    let fx = fixture(2);
    let session = session(&fx);
    let first = session
        .decide(&fx.request_id, "bob", "item-00", Decision::Decline, None, 200)
        .expect("first decide");
    let second = session
        .decide(&fx.request_id, "bob", "item-00", Decision::Decline, None, 201)
        .expect("second decide");

    assert_eq!(first.review_status, second.review_status);
    assert_eq!(second.review_status, ReviewStatus::Declined);
    assert_eq!(decision_entries(&fx, "item-00"), 2);
}

#[test]
fn review_module_decision_can_switch_but_never_returns_to_not_reviewed() {
    let fx = fixture(1);
    let session = session(&fx);
    session
        .decide(&fx.request_id, "bob", "item-00", Decision::Accept, None, 200)
        .expect("accept");
    let item = session
        .decide(&fx.request_id, "carol", "item-00", Decision::Decline, None, 150)
        .expect("decline");

    assert_eq!(item.review_status, ReviewStatus::Declined);
    assert_eq!(item.reviewer.as_deref(), Some("carol"));
    // decided_at never moves backwards even with a skewed clock.
    assert_eq!(item.decided_at, Some(200));
    assert_eq!(item.version, 2);
}

#[test]
fn review_module_non_reviewer_is_forbidden_and_only_denial_is_logged() {
    let fx = fixture(2);
    let err = session(&fx)
        .decide(&fx.request_id, "mallory", "item-00", Decision::Accept, None, 200)
        .expect_err("non-reviewer");
    match err {
        GovernanceError::Forbidden { actor, role, .. } => {
            assert_eq!(actor, "mallory");
            assert_eq!(role, Role::Reviewer);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let item = fx.store.item(&fx.request_id, "item-00").expect("item");
    assert_eq!(item.review_status, ReviewStatus::NotReviewed);
    assert_eq!(decision_entries(&fx, "item-00"), 0);
    let history = AuditLog::new(fx.store.clone())
        .history(&fx.request_id)
        .expect("history");
    let denial = history.last().expect("denial entry");
    assert_eq!(denial.action, AuditAction::Denied);
    assert_eq!(denial.actor, "mallory");
}

#[test]
fn review_module_decide_before_configure_is_invalid_state() {
    let fx = fixture_with(Vec::new(), false);
    let err = session(&fx)
        .decide(&fx.request_id, "bob", "item-00", Decision::Accept, None, 200)
        .expect_err("not under review");
    assert!(matches!(
        err,
        GovernanceError::InvalidState {
            current: RequestStatus::Created,
            ..
        }
    ));
}

#[test]
fn review_module_unknown_item_is_not_found() {
    let fx = fixture(1);
    let err = session(&fx)
        .decide(&fx.request_id, "bob", "missing", Decision::Accept, None, 200)
        .expect_err("missing item");
    assert!(matches!(err, GovernanceError::ItemNotFound { .. }));
    assert!(err.is_not_found());
}

#[test]
fn review_module_bulk_decide_applies_independently() {
    let fx = fixture(4);
    let keys = vec![
        "item-00".to_string(),
        "item-02".to_string(),
        "missing".to_string(),
    ];
    let outcome = session(&fx)
        .bulk_decide(&fx.request_id, "bob", &keys, Decision::Accept, None, 200)
        .expect("bulk decide");

    assert!(!outcome.is_complete());
    assert_eq!(outcome.applied_keys(), vec!["item-00", "item-02"]);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].item_key, "missing");
    assert!(matches!(
        outcome.failed[0].error,
        GovernanceError::ItemNotFound { .. }
    ));

    let accepted = fx
        .store
        .items(&fx.request_id)
        .expect("items")
        .into_iter()
        .filter(|item| item.review_status == ReviewStatus::Accepted)
        .count();
    assert_eq!(accepted, 2);
}

#[test]
fn review_module_bulk_decide_checks_role_once_for_the_whole_batch() {
    let fx = fixture(2);
    let keys = vec!["item-00".to_string(), "item-01".to_string()];
    let err = session(&fx)
        .bulk_decide(&fx.request_id, "mallory", &keys, Decision::Accept, None, 200)
        .expect_err("forbidden");
    assert!(matches!(err, GovernanceError::Forbidden { .. }));
    let denials = AuditLog::new(fx.store.clone())
        .history(&fx.request_id)
        .expect("history")
        .iter()
        .filter(|entry| entry.action == AuditAction::Denied)
        .count();
    assert_eq!(denials, 1);
}

#[test]
fn review_module_decide_matching_uses_item_filter() {
    let items = vec![
        CandidateItem::with_attributes(
            "a/report.pdf",
            ItemAttributes {
                size_bytes: Some(MIB / 2),
                extension: Some("pdf".to_string()),
                ..ItemAttributes::default()
            },
        ),
        CandidateItem::with_attributes(
            "a/movie.mp4",
            ItemAttributes {
                size_bytes: Some(200 * MIB),
                extension: Some("mp4".to_string()),
                ..ItemAttributes::default()
            },
        ),
        CandidateItem::with_attributes(
            "b/notes.docx",
            ItemAttributes {
                size_bytes: Some(2 * MIB),
                extension: Some("DOCX".to_string()),
                ..ItemAttributes::default()
            },
        ),
    ];
    let fx = fixture_with(items, true);
    let session = session(&fx);

    let documents = ItemFilter::all().extension(ExtensionClass::Documents);
    let matched = session
        .filter_items(&fx.request_id, &documents)
        .expect("filter");
    assert_eq!(matched.len(), 2);

    let outcome = session
        .decide_matching(
            &fx.request_id,
            "carol",
            &documents.size(SizeRange::UpTo1Mb),
            Decision::Decline,
            Some("not sensitive"),
            200,
        )
        .expect("decide matching");
    assert_eq!(outcome.applied_keys(), vec!["a/report.pdf"]);

    let undecided = session
        .filter_items(
            &fx.request_id,
            &ItemFilter::all().status(ReviewStatus::NotReviewed),
        )
        .expect("filter");
    let keys: Vec<_> = undecided.iter().map(|item| item.item_key.as_str()).collect();
    assert_eq!(keys, vec!["a/movie.mp4", "b/notes.docx"]);
}

#[test]
fn review_module_can_require_decline_comment() {
    let fx = fixture(1);
    let session = session(&fx).with_decline_comment_required(true);

    let err = session
        .decide(&fx.request_id, "bob", "item-00", Decision::Decline, Some("  "), 200)
        .expect_err("blank comment");
    assert!(matches!(err, GovernanceError::InvalidInput(_)));

    session
        .decide(&fx.request_id, "bob", "item-00", Decision::Accept, None, 200)
        .expect("accept needs no comment");
    session
        .decide(
            &fx.request_id,
            "bob",
            "item-00",
            Decision::Decline,
            Some("false positive"),
            201,
        )
        .expect("decline with comment");
}

#[test]
fn review_module_racing_decisions_keep_one_state_and_both_audit_entries() {
    let fx = fixture(1);
    let mut handles = Vec::new();
    for (reviewer, decision) in [("bob", Decision::Accept), ("carol", Decision::Decline)] {
        let session = session(&fx);
        let request_id = fx.request_id.clone();
        handles.push(thread::spawn(move || {
            session.decide(&request_id, reviewer, "item-00", decision, None, 200)
        }));
    }
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.join().expect("join").expect("decide"));
    }

    let stored = fx.store.item(&fx.request_id, "item-00").expect("item");
    assert_eq!(stored.version, 2);
    let last = results
        .iter()
        .max_by_key(|item| item.version)
        .expect("results");
    assert_eq!(stored.review_status, last.review_status);
    assert_eq!(stored.reviewer, last.reviewer);
    assert_eq!(decision_entries(&fx, "item-00"), 2);
}
