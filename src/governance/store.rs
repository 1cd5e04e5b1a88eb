//! Durable request, review item and execution job records.
//!
//! Every mutation runs inside a `BEGIN IMMEDIATE` transaction on a fresh
//! connection, so a read-check-write sequence cannot interleave with
//! another writer. Status changes are additionally guarded by
//! `WHERE status = ?` and item decisions by `WHERE version = ?`.

use crate::governance::audit::{append_in, AuditAction, AuditRecord};
use crate::governance::catalog::{CandidateItem, CatalogQuery, ItemCatalog};
use crate::governance::error::GovernanceError;
use crate::governance::model::{
    ActionType, ExecutionJob, ItemAttributes, JobStatus, NewRequest, Request, RequestStatus,
    ReviewItem, ReviewStatus, Role, RoleAssignment,
};
use crate::governance::roles::RoleProvider;
use crate::shared::ids::{generate_request_id, ActorId, RequestId};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const REQUEST_ID_MAX_GENERATION_ATTEMPTS: usize = 16;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

const REQUEST_COLUMNS: &str = "id, name, requester, entity_type, target_value, action_type, \
     status, version, created_at, updated_at, terminal_reason";
const ITEM_COLUMNS: &str = "request_id, item_key, review_status, comment, reviewer, decided_at, \
     version, size_bytes, extension, modified_at, accessed_at, created_at";
const JOB_COLUMNS: &str = "request_id, external_job_id, item_keys, status, submitted_at, \
     completed_at, poll_count, failure_reason";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigureRequest {
    pub reviewers: BTreeSet<String>,
    pub approvers: BTreeSet<String>,
    pub scope: String,
}

/// A guarded status change applied by [`RequestStore::transition_in`].
#[derive(Debug, Clone)]
pub(crate) struct Transition<'a> {
    pub attempted: &'a str,
    pub from: &'a [RequestStatus],
    pub to: RequestStatus,
    pub actor: &'a str,
    pub action: AuditAction,
    pub detail: String,
    pub terminal_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RequestStore {
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl RequestStore {
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, GovernanceError> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| GovernanceError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let store = Self {
            db_path,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn ensure_schema(&self) -> Result<(), GovernanceError> {
        let connection = self.connect()?;
        connection.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS requests (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                requester TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                target_value TEXT NOT NULL,
                action_type TEXT NOT NULL,
                status TEXT NOT NULL,
                version INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                terminal_reason TEXT
            );

            CREATE TABLE IF NOT EXISTS role_assignments (
                request_id TEXT PRIMARY KEY REFERENCES requests(id),
                reviewers TEXT NOT NULL,
                approvers TEXT NOT NULL,
                scope TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS review_items (
                request_id TEXT NOT NULL REFERENCES requests(id),
                item_key TEXT NOT NULL,
                review_status TEXT NOT NULL,
                comment TEXT,
                reviewer TEXT,
                decided_at INTEGER,
                version INTEGER NOT NULL,
                size_bytes INTEGER,
                extension TEXT,
                modified_at INTEGER,
                accessed_at INTEGER,
                created_at INTEGER,
                PRIMARY KEY (request_id, item_key)
            );

            CREATE TABLE IF NOT EXISTS execution_jobs (
                request_id TEXT PRIMARY KEY REFERENCES requests(id),
                external_job_id TEXT NOT NULL,
                item_keys TEXT NOT NULL,
                status TEXT NOT NULL,
                submitted_at INTEGER NOT NULL,
                completed_at INTEGER,
                poll_count INTEGER NOT NULL DEFAULT 0,
                failure_reason TEXT
            );

            CREATE TABLE IF NOT EXISTS audit_log (
                request_id TEXT NOT NULL REFERENCES requests(id),
                seq INTEGER NOT NULL,
                actor TEXT NOT NULL,
                action TEXT NOT NULL,
                from_state TEXT,
                to_state TEXT,
                item_key TEXT,
                detail TEXT NOT NULL,
                recorded_at INTEGER NOT NULL,
                prev_digest TEXT NOT NULL,
                digest TEXT NOT NULL,
                PRIMARY KEY (request_id, seq)
            );

            CREATE INDEX IF NOT EXISTS idx_requests_name_status
                ON requests(name, status);
            CREATE INDEX IF NOT EXISTS idx_review_items_request_status
                ON review_items(request_id, review_status);
            ",
        )?;
        Ok(())
    }

    pub fn create_request(
        &self,
        new_request: &NewRequest,
        now: i64,
    ) -> Result<Request, GovernanceError> {
        validate_non_empty("name", &new_request.name)?;
        validate_non_empty("entity_type", &new_request.entity_type)?;
        validate_non_empty("target_value", &new_request.target_value)?;
        ActorId::parse(&new_request.requester).map_err(GovernanceError::InvalidInput)?;

        self.write(|tx| {
            let terminal = terminal_status_list();
            let existing: Option<String> = tx
                .query_row(
                    &format!(
                        "SELECT id FROM requests WHERE name = ?1 AND status NOT IN ({terminal}) LIMIT 1"
                    ),
                    params![new_request.name],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(existing_id) = existing {
                return Err(GovernanceError::DuplicateRequestName {
                    name: new_request.name.clone(),
                    existing_id,
                });
            }

            let id = allocate_request_id(tx, now)?;
            let request = Request {
                id: id.to_string(),
                name: new_request.name.clone(),
                requester: new_request.requester.clone(),
                entity_type: new_request.entity_type.clone(),
                target_value: new_request.target_value.clone(),
                action_type: new_request.action_type,
                status: RequestStatus::Created,
                version: 1,
                created_at: now,
                updated_at: now,
                terminal_reason: None,
            };
            tx.execute(
                "
                INSERT INTO requests (
                    id, name, requester, entity_type, target_value, action_type,
                    status, version, created_at, updated_at, terminal_reason
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL)
                ",
                params![
                    request.id,
                    request.name,
                    request.requester,
                    request.entity_type,
                    request.target_value,
                    request.action_type.as_str(),
                    request.status.as_str(),
                    request.version as i64,
                    request.created_at,
                    request.updated_at,
                ],
            )?;
            append_in(
                tx,
                &AuditRecord {
                    request_id: &request.id,
                    actor: &request.requester,
                    action: AuditAction::Created,
                    from_state: None,
                    to_state: Some(RequestStatus::Created),
                    item_key: None,
                    detail: format!(
                        "name={} action={} entity_type={} target={}",
                        request.name, request.action_type, request.entity_type, request.target_value
                    ),
                },
                now,
            )?;
            Ok(request)
        })
    }

    /// Assigns roles and loads the candidate items for review.
    ///
    /// The request is first claimed (`created -> configuring`) so concurrent
    /// attempts fail fast, the catalog is enumerated without holding a write
    /// lock, and then roles, items and the move to `under_review` commit in a
    /// single transaction. Any failure after the claim returns the request to
    /// `created` with no items.
    pub fn configure(
        &self,
        request_id: &str,
        actor: &str,
        config: &ConfigureRequest,
        catalog: &dyn ItemCatalog,
        roles: &dyn RoleProvider,
        now: i64,
    ) -> Result<Request, GovernanceError> {
        validate_role_set("reviewers", &config.reviewers)?;
        validate_role_set("approvers", &config.approvers)?;

        let request = self.get_request(request_id)?;
        if !roles.has_role(&request, None, actor, Role::Requester) {
            return Err(self.deny(&request.id, actor, Role::Requester, "configure", now));
        }

        let claimed = self.write(|tx| {
            self.transition_in(
                tx,
                request_id,
                Transition {
                    attempted: "configure",
                    from: &[RequestStatus::Created],
                    to: RequestStatus::Configuring,
                    actor,
                    action: AuditAction::Transition,
                    detail: format!(
                        "reviewers={} approvers={} scope={}",
                        join_set(&config.reviewers),
                        join_set(&config.approvers),
                        config.scope
                    ),
                    terminal_reason: None,
                },
                now,
            )
        })?;

        let query = CatalogQuery {
            entity_type: claimed.entity_type.clone(),
            target_value: claimed.target_value.clone(),
            scope: config.scope.clone(),
        };
        let candidates = match collect_candidates(catalog, &query) {
            Ok(candidates) if candidates.is_empty() => {
                self.release_claim(request_id, actor, "catalog returned no candidate items", now)?;
                return Err(GovernanceError::NoCandidateItems {
                    request_id: request_id.to_string(),
                });
            }
            Ok(candidates) => candidates,
            Err(reason) => {
                let detail = format!("catalog unavailable: {reason}");
                self.release_claim(request_id, actor, &detail, now)?;
                return Err(GovernanceError::CatalogUnavailable {
                    request_id: request_id.to_string(),
                    reason,
                });
            }
        };

        let committed = self.write(|tx| {
            self.transition_in(
                tx,
                request_id,
                Transition {
                    attempted: "configure",
                    from: &[RequestStatus::Configuring],
                    to: RequestStatus::ReadyForReview,
                    actor,
                    action: AuditAction::Transition,
                    detail: format!("loaded {} candidate items", candidates.len()),
                    terminal_reason: None,
                },
                now,
            )?;
            tx.execute(
                "
                INSERT OR REPLACE INTO role_assignments (request_id, reviewers, approvers, scope)
                VALUES (?1, ?2, ?3, ?4)
                ",
                params![
                    request_id,
                    encode_json("reviewers", &config.reviewers)?,
                    encode_json("approvers", &config.approvers)?,
                    config.scope,
                ],
            )?;
            {
                let mut insert = tx.prepare(
                    "
                    INSERT OR IGNORE INTO review_items (
                        request_id, item_key, review_status, comment, reviewer, decided_at,
                        version, size_bytes, extension, modified_at, accessed_at, created_at
                    ) VALUES (?1, ?2, ?3, NULL, NULL, NULL, 0, ?4, ?5, ?6, ?7, ?8)
                    ",
                )?;
                for candidate in &candidates {
                    let attrs = &candidate.attributes;
                    insert.execute(params![
                        request_id,
                        candidate.item_key,
                        ReviewStatus::NotReviewed.as_str(),
                        attrs.size_bytes.map(|size| size as i64),
                        attrs.extension,
                        attrs.modified_at,
                        attrs.accessed_at,
                        attrs.created_at,
                    ])?;
                }
            }
            self.transition_in(
                tx,
                request_id,
                Transition {
                    attempted: "configure",
                    from: &[RequestStatus::ReadyForReview],
                    to: RequestStatus::UnderReview,
                    actor,
                    action: AuditAction::Transition,
                    detail: "review items loaded".to_string(),
                    terminal_reason: None,
                },
                now,
            )
        });

        match committed {
            Ok(request) => Ok(request),
            Err(err) => {
                self.release_claim(request_id, actor, &format!("configure failed: {err}"), now)?;
                Err(err)
            }
        }
    }

    pub fn get_status(&self, request_id: &str) -> Result<RequestStatus, GovernanceError> {
        Ok(self.get_request(request_id)?.status)
    }

    pub fn get_request(&self, request_id: &str) -> Result<Request, GovernanceError> {
        let connection = self.connect()?;
        load_request(&connection, request_id)
    }

    pub fn list_requests(&self) -> Result<Vec<Request>, GovernanceError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {REQUEST_COLUMNS} FROM requests ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = statement.query_map([], request_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(request_from_raw(row?)?);
        }
        Ok(out)
    }

    pub fn role_assignment(
        &self,
        request_id: &str,
    ) -> Result<Option<RoleAssignment>, GovernanceError> {
        let connection = self.connect()?;
        load_role_assignment(&connection, request_id)
    }

    pub fn items(&self, request_id: &str) -> Result<Vec<ReviewItem>, GovernanceError> {
        let connection = self.connect()?;
        load_request(&connection, request_id)?;
        load_items(&connection, request_id)
    }

    pub fn item(&self, request_id: &str, item_key: &str) -> Result<ReviewItem, GovernanceError> {
        let connection = self.connect()?;
        load_item(&connection, request_id, item_key)?.ok_or_else(|| {
            GovernanceError::ItemNotFound {
                request_id: request_id.to_string(),
                item_key: item_key.to_string(),
            }
        })
    }

    pub fn job_for_request(
        &self,
        request_id: &str,
    ) -> Result<Option<ExecutionJob>, GovernanceError> {
        let connection = self.connect()?;
        load_request(&connection, request_id)?;
        load_job(&connection, request_id)
    }

    /// Records a role denial in its own transaction and returns the
    /// `Forbidden` error for the caller to propagate.
    pub(crate) fn deny(
        &self,
        request_id: &str,
        actor: &str,
        role: Role,
        attempted: &str,
        now: i64,
    ) -> GovernanceError {
        let recorded = self.write(|tx| {
            let request = load_request(tx, request_id)?;
            append_in(
                tx,
                &AuditRecord {
                    request_id,
                    actor,
                    action: AuditAction::Denied,
                    from_state: Some(request.status),
                    to_state: Some(request.status),
                    item_key: None,
                    detail: format!("{attempted} requires role {role}"),
                },
                now,
            )
        });
        match recorded {
            Ok(_) => GovernanceError::Forbidden {
                request_id: request_id.to_string(),
                actor: actor.to_string(),
                role,
            },
            Err(err) => err,
        }
    }

    fn release_claim(
        &self,
        request_id: &str,
        actor: &str,
        reason: &str,
        now: i64,
    ) -> Result<Request, GovernanceError> {
        self.write(|tx| {
            self.transition_in(
                tx,
                request_id,
                Transition {
                    attempted: "configure",
                    from: &[RequestStatus::Configuring],
                    to: RequestStatus::Created,
                    actor,
                    action: AuditAction::Transition,
                    detail: reason.to_string(),
                    terminal_reason: None,
                },
                now,
            )
        })
    }

    /// Applies a guarded status change and its audit entry inside `tx`.
    ///
    /// The check happens before any write, so a rejected attempt leaves no
    /// trace and can be retried safely.
    pub(crate) fn transition_in(
        &self,
        tx: &Transaction<'_>,
        request_id: &str,
        transition: Transition<'_>,
        now: i64,
    ) -> Result<Request, GovernanceError> {
        let mut request = load_request(tx, request_id)?;
        let current = request.status;
        if !transition.from.contains(&current) || !current.can_transition_to(transition.to) {
            return Err(GovernanceError::InvalidState {
                request_id: request_id.to_string(),
                current,
                attempted: transition.attempted.to_string(),
                allowed: transition
                    .from
                    .iter()
                    .map(|status| status.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        let terminal_reason = if transition.to.is_terminal() {
            transition
                .terminal_reason
                .clone()
                .or_else(|| Some(transition.detail.clone()))
        } else {
            None
        };
        let changed = tx.execute(
            "
            UPDATE requests
            SET status = ?1, version = version + 1, updated_at = ?2, terminal_reason = ?3
            WHERE id = ?4 AND status = ?5
            ",
            params![
                transition.to.as_str(),
                now,
                terminal_reason,
                request_id,
                current.as_str()
            ],
        )?;
        if changed != 1 {
            return Err(GovernanceError::Conflict {
                request_id: request_id.to_string(),
                detail: format!(
                    "status moved away from `{current}` during {}",
                    transition.attempted
                ),
            });
        }

        append_in(
            tx,
            &AuditRecord {
                request_id,
                actor: transition.actor,
                action: transition.action,
                from_state: Some(current),
                to_state: Some(transition.to),
                item_key: None,
                detail: transition.detail,
            },
            now,
        )?;

        request.status = transition.to;
        request.version += 1;
        request.updated_at = now;
        request.terminal_reason = terminal_reason;
        Ok(request)
    }

    pub(crate) fn write<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, GovernanceError>,
    ) -> Result<T, GovernanceError> {
        let mut connection = self.connect()?;
        let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    pub(crate) fn connect(&self) -> Result<Connection, GovernanceError> {
        let connection =
            Connection::open(&self.db_path).map_err(|source| GovernanceError::Open {
                path: self.db_path.display().to_string(),
                source,
            })?;
        connection.busy_timeout(self.busy_timeout)?;
        connection.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(connection)
    }
}

fn collect_candidates(
    catalog: &dyn ItemCatalog,
    query: &CatalogQuery,
) -> Result<Vec<CandidateItem>, String> {
    let stream = catalog
        .list_candidate_items(query)
        .map_err(|err| err.to_string())?;
    let mut candidates = Vec::new();
    let mut seen = BTreeSet::new();
    for candidate in stream {
        let candidate = candidate.map_err(|err| err.to_string())?;
        if candidate.item_key.is_empty() {
            return Err("catalog yielded an empty item key".to_string());
        }
        if seen.insert(candidate.item_key.clone()) {
            candidates.push(candidate);
        }
    }
    Ok(candidates)
}

fn allocate_request_id(tx: &Transaction<'_>, now: i64) -> Result<RequestId, GovernanceError> {
    for _ in 0..REQUEST_ID_MAX_GENERATION_ATTEMPTS {
        let id = generate_request_id(now).map_err(GovernanceError::InvalidInput)?;
        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM requests WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Ok(id);
        }
    }
    Err(GovernanceError::Conflict {
        request_id: String::new(),
        detail: format!(
            "could not allocate a unique request id after {REQUEST_ID_MAX_GENERATION_ATTEMPTS} attempts"
        ),
    })
}

fn validate_non_empty(field: &str, value: &str) -> Result<(), GovernanceError> {
    if value.trim().is_empty() {
        return Err(GovernanceError::InvalidInput(format!(
            "`{field}` must be non-empty"
        )));
    }
    Ok(())
}

fn validate_role_set(field: &str, actors: &BTreeSet<String>) -> Result<(), GovernanceError> {
    if actors.is_empty() {
        return Err(GovernanceError::InvalidInput(format!(
            "`{field}` must name at least one actor"
        )));
    }
    for actor in actors {
        ActorId::parse(actor)
            .map_err(|err| GovernanceError::InvalidInput(format!("`{field}`: {err}")))?;
    }
    Ok(())
}

fn join_set(values: &BTreeSet<String>) -> String {
    values.iter().cloned().collect::<Vec<_>>().join(",")
}

fn terminal_status_list() -> String {
    RequestStatus::ALL
        .into_iter()
        .filter(|status| status.is_terminal())
        .map(|status| format!("'{}'", status.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn encode_json<T: serde::Serialize>(context: &str, value: &T) -> Result<String, GovernanceError> {
    serde_json::to_string(value).map_err(|source| GovernanceError::Json {
        context: context.to_string(),
        source,
    })
}

fn decode_json<T: serde::de::DeserializeOwned>(
    context: &str,
    raw: &str,
) -> Result<T, GovernanceError> {
    serde_json::from_str(raw).map_err(|source| GovernanceError::Json {
        context: context.to_string(),
        source,
    })
}

type RawRequest = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    i64,
    i64,
    i64,
    Option<String>,
);

fn request_row(row: &Row<'_>) -> rusqlite::Result<RawRequest> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

fn request_from_raw(raw: RawRequest) -> Result<Request, GovernanceError> {
    let (
        id,
        name,
        requester,
        entity_type,
        target_value,
        action_raw,
        status_raw,
        version,
        created_at,
        updated_at,
        terminal_reason,
    ) = raw;
    Ok(Request {
        id,
        name,
        requester,
        entity_type,
        target_value,
        action_type: ActionType::parse(&action_raw).map_err(|_| GovernanceError::CorruptRecord {
            kind: "action type",
            value: action_raw,
        })?,
        status: parse_status(status_raw)?,
        version: version as u64,
        created_at,
        updated_at,
        terminal_reason,
    })
}

pub(crate) fn parse_status(raw: String) -> Result<RequestStatus, GovernanceError> {
    RequestStatus::parse(&raw).map_err(|_| GovernanceError::CorruptRecord {
        kind: "request status",
        value: raw,
    })
}

pub(crate) fn load_request(
    connection: &Connection,
    request_id: &str,
) -> Result<Request, GovernanceError> {
    let raw = connection
        .query_row(
            &format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?1"),
            params![request_id],
            request_row,
        )
        .optional()?
        .ok_or_else(|| GovernanceError::RequestNotFound {
            request_id: request_id.to_string(),
        })?;
    request_from_raw(raw)
}

pub(crate) fn load_role_assignment(
    connection: &Connection,
    request_id: &str,
) -> Result<Option<RoleAssignment>, GovernanceError> {
    let raw: Option<(String, String, String)> = connection
        .query_row(
            "SELECT reviewers, approvers, scope FROM role_assignments WHERE request_id = ?1",
            params![request_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    let Some((reviewers, approvers, scope)) = raw else {
        return Ok(None);
    };
    Ok(Some(RoleAssignment {
        request_id: request_id.to_string(),
        reviewers: decode_json("reviewers", &reviewers)?,
        approvers: decode_json("approvers", &approvers)?,
        scope,
    }))
}

type RawItem = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<i64>,
    i64,
    Option<i64>,
    Option<String>,
    Option<i64>,
    Option<i64>,
    Option<i64>,
);

fn item_row(row: &Row<'_>) -> rusqlite::Result<RawItem> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
    ))
}

fn item_from_raw(raw: RawItem) -> Result<ReviewItem, GovernanceError> {
    let (
        request_id,
        item_key,
        status_raw,
        comment,
        reviewer,
        decided_at,
        version,
        size_bytes,
        extension,
        modified_at,
        accessed_at,
        created_at,
    ) = raw;
    Ok(ReviewItem {
        request_id,
        item_key,
        review_status: ReviewStatus::parse(&status_raw).map_err(|_| {
            GovernanceError::CorruptRecord {
                kind: "review status",
                value: status_raw,
            }
        })?,
        comment,
        reviewer,
        decided_at,
        version: version as u64,
        attributes: ItemAttributes {
            size_bytes: size_bytes.map(|size| size as u64),
            extension,
            modified_at,
            accessed_at,
            created_at,
        },
    })
}

pub(crate) fn load_items(
    connection: &Connection,
    request_id: &str,
) -> Result<Vec<ReviewItem>, GovernanceError> {
    let mut statement = connection.prepare(&format!(
        "SELECT {ITEM_COLUMNS} FROM review_items WHERE request_id = ?1 ORDER BY item_key ASC"
    ))?;
    let rows = statement.query_map(params![request_id], item_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(item_from_raw(row?)?);
    }
    Ok(out)
}

pub(crate) fn load_item(
    connection: &Connection,
    request_id: &str,
    item_key: &str,
) -> Result<Option<ReviewItem>, GovernanceError> {
    let raw = connection
        .query_row(
            &format!(
                "SELECT {ITEM_COLUMNS} FROM review_items WHERE request_id = ?1 AND item_key = ?2"
            ),
            params![request_id, item_key],
            item_row,
        )
        .optional()?;
    raw.map(item_from_raw).transpose()
}

pub(crate) fn load_accepted_keys(
    connection: &Connection,
    request_id: &str,
) -> Result<Vec<String>, GovernanceError> {
    let mut statement = connection.prepare(
        "
        SELECT item_key FROM review_items
        WHERE request_id = ?1 AND review_status = ?2
        ORDER BY item_key ASC
        ",
    )?;
    let rows = statement.query_map(
        params![request_id, ReviewStatus::Accepted.as_str()],
        |row| row.get::<_, String>(0),
    )?;
    let mut keys = Vec::new();
    for row in rows {
        keys.push(row?);
    }
    Ok(keys)
}

pub(crate) fn load_job(
    connection: &Connection,
    request_id: &str,
) -> Result<Option<ExecutionJob>, GovernanceError> {
    let raw: Option<(String, String, String, String, i64, Option<i64>, i64, Option<String>)> =
        connection
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM execution_jobs WHERE request_id = ?1"),
                params![request_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                },
            )
            .optional()?;
    let Some((
        request_id,
        external_job_id,
        item_keys,
        status_raw,
        submitted_at,
        completed_at,
        poll_count,
        failure_reason,
    )) = raw
    else {
        return Ok(None);
    };
    Ok(Some(ExecutionJob {
        submitted_item_keys: decode_json("submitted item keys", &item_keys)?,
        status: JobStatus::parse(&status_raw).map_err(|_| GovernanceError::CorruptRecord {
            kind: "job status",
            value: status_raw,
        })?,
        request_id,
        external_job_id,
        submitted_at,
        completed_at,
        poll_count: poll_count as u32,
        failure_reason,
    }))
}

pub(crate) fn insert_job(
    connection: &Connection,
    job: &ExecutionJob,
) -> Result<(), GovernanceError> {
    connection.execute(
        "
        INSERT INTO execution_jobs (
            request_id, external_job_id, item_keys, status, submitted_at,
            completed_at, poll_count, failure_reason
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ",
        params![
            job.request_id,
            job.external_job_id,
            encode_json("submitted item keys", &job.submitted_item_keys)?,
            job.status.as_str(),
            job.submitted_at,
            job.completed_at,
            i64::from(job.poll_count),
            job.failure_reason,
        ],
    )?;
    Ok(())
}

pub(crate) fn update_job_status(
    connection: &Connection,
    job: &ExecutionJob,
) -> Result<(), GovernanceError> {
    connection.execute(
        "
        UPDATE execution_jobs
        SET status = ?1, completed_at = ?2, poll_count = ?3, failure_reason = ?4
        WHERE request_id = ?5
        ",
        params![
            job.status.as_str(),
            job.completed_at,
            i64::from(job.poll_count),
            job.failure_reason,
            job.request_id,
        ],
    )?;
    Ok(())
}
