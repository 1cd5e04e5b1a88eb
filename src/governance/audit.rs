//! Append-only audit history.
//!
//! Entries are numbered per request with a gapless `seq` allocated inside
//! the same transaction as the change they describe. Each entry carries a
//! SHA-256 digest over its fields and the previous entry's digest, so an
//! edited or removed row breaks the chain from that point on.

use crate::governance::error::GovernanceError;
use crate::governance::model::RequestStatus;
use crate::governance::store::{load_request, parse_status, RequestStore};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const AUDIT_CHAIN_GENESIS: &str = "genesis";
const AUDIT_DIGEST_DOMAIN: &[u8] = b"reviewgate-audit-entry-v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Transition,
    Decision,
    Denied,
    Rejected,
    Approved,
    JobSubmitted,
    JobStatus,
    Remediated,
    Note,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::Transition => "transition",
            AuditAction::Decision => "decision",
            AuditAction::Denied => "denied",
            AuditAction::Rejected => "rejected",
            AuditAction::Approved => "approved",
            AuditAction::JobSubmitted => "job_submitted",
            AuditAction::JobStatus => "job_status",
            AuditAction::Remediated => "remediated",
            AuditAction::Note => "note",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        [
            AuditAction::Created,
            AuditAction::Transition,
            AuditAction::Decision,
            AuditAction::Denied,
            AuditAction::Rejected,
            AuditAction::Approved,
            AuditAction::JobSubmitted,
            AuditAction::JobStatus,
            AuditAction::Remediated,
            AuditAction::Note,
        ]
        .into_iter()
        .find(|action| action.as_str() == raw)
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct AuditRecord<'a> {
    pub request_id: &'a str,
    pub actor: &'a str,
    pub action: AuditAction,
    pub from_state: Option<RequestStatus>,
    pub to_state: Option<RequestStatus>,
    pub item_key: Option<&'a str>,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub request_id: String,
    pub seq: u64,
    pub actor: String,
    pub action: AuditAction,
    #[serde(default)]
    pub from_state: Option<RequestStatus>,
    #[serde(default)]
    pub to_state: Option<RequestStatus>,
    #[serde(default)]
    pub item_key: Option<String>,
    pub detail: String,
    pub recorded_at: i64,
    pub prev_digest: String,
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
    pub entries: u64,
    #[serde(default)]
    pub first_broken_seq: Option<u64>,
}

impl ChainVerification {
    pub fn is_intact(&self) -> bool {
        self.first_broken_seq.is_none()
    }
}

/// Read and append access to the audit table.
#[derive(Debug, Clone)]
pub struct AuditLog {
    store: RequestStore,
}

impl AuditLog {
    pub fn new(store: RequestStore) -> Self {
        Self { store }
    }

    /// Appends a free-standing entry, e.g. an operator note. Workflow
    /// components append inside their own transactions instead.
    pub fn append(
        &self,
        request_id: &str,
        actor: &str,
        from_state: Option<RequestStatus>,
        to_state: Option<RequestStatus>,
        detail: impl Into<String>,
        now: i64,
    ) -> Result<AuditEntry, GovernanceError> {
        let detail = detail.into();
        self.store.write(|tx| {
            load_request(tx, request_id)?;
            append_in(
                tx,
                &AuditRecord {
                    request_id,
                    actor,
                    action: AuditAction::Note,
                    from_state,
                    to_state,
                    item_key: None,
                    detail,
                },
                now,
            )
        })
    }

    pub fn history(&self, request_id: &str) -> Result<Vec<AuditEntry>, GovernanceError> {
        let connection = self.store.connect()?;
        load_request(&connection, request_id)?;
        load_history(&connection, request_id)
    }

    pub fn verify_chain(&self, request_id: &str) -> Result<ChainVerification, GovernanceError> {
        let entries = self.history(request_id)?;
        let mut prev = AUDIT_CHAIN_GENESIS.to_string();
        let mut expected_seq = 1;
        for entry in &entries {
            let recomputed = entry_digest(&prev, entry);
            if entry.seq != expected_seq || entry.prev_digest != prev || entry.digest != recomputed
            {
                return Ok(ChainVerification {
                    entries: entries.len() as u64,
                    first_broken_seq: Some(entry.seq),
                });
            }
            prev = entry.digest.clone();
            expected_seq += 1;
        }
        Ok(ChainVerification {
            entries: entries.len() as u64,
            first_broken_seq: None,
        })
    }
}

/// Appends one entry using the caller's transaction.
pub(crate) fn append_in(
    connection: &Connection,
    record: &AuditRecord<'_>,
    now: i64,
) -> Result<AuditEntry, GovernanceError> {
    let tip: Option<(i64, String)> = connection
        .query_row(
            "
            SELECT seq, digest FROM audit_log
            WHERE request_id = ?1
            ORDER BY seq DESC
            LIMIT 1
            ",
            params![record.request_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (seq, prev_digest) = match tip {
        Some((seq, digest)) => (seq as u64 + 1, digest),
        None => (1, AUDIT_CHAIN_GENESIS.to_string()),
    };

    let mut entry = AuditEntry {
        request_id: record.request_id.to_string(),
        seq,
        actor: record.actor.to_string(),
        action: record.action,
        from_state: record.from_state,
        to_state: record.to_state,
        item_key: record.item_key.map(str::to_string),
        detail: record.detail.clone(),
        recorded_at: now,
        prev_digest,
        digest: String::new(),
    };
    entry.digest = entry_digest(&entry.prev_digest, &entry);

    connection.execute(
        "
        INSERT INTO audit_log (
            request_id, seq, actor, action, from_state, to_state, item_key,
            detail, recorded_at, prev_digest, digest
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        ",
        params![
            entry.request_id,
            entry.seq as i64,
            entry.actor,
            entry.action.as_str(),
            entry.from_state.map(RequestStatus::as_str),
            entry.to_state.map(RequestStatus::as_str),
            entry.item_key,
            entry.detail,
            entry.recorded_at,
            entry.prev_digest,
            entry.digest,
        ],
    )?;
    Ok(entry)
}

pub(crate) fn load_history(
    connection: &Connection,
    request_id: &str,
) -> Result<Vec<AuditEntry>, GovernanceError> {
    let mut statement = connection.prepare(
        "
        SELECT request_id, seq, actor, action, from_state, to_state, item_key,
               detail, recorded_at, prev_digest, digest
        FROM audit_log
        WHERE request_id = ?1
        ORDER BY seq ASC
        ",
    )?;
    let rows = statement.query_map(params![request_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, Option<String>>(6)?,
            row.get::<_, String>(7)?,
            row.get::<_, i64>(8)?,
            row.get::<_, String>(9)?,
            row.get::<_, String>(10)?,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (
            request_id,
            seq,
            actor,
            action_raw,
            from_raw,
            to_raw,
            item_key,
            detail,
            recorded_at,
            prev_digest,
            digest,
        ) = row?;
        let action = AuditAction::parse(&action_raw).ok_or(GovernanceError::CorruptRecord {
            kind: "audit action",
            value: action_raw,
        })?;
        out.push(AuditEntry {
            request_id,
            seq: seq as u64,
            actor,
            action,
            from_state: from_raw.map(parse_status).transpose()?,
            to_state: to_raw.map(parse_status).transpose()?,
            item_key,
            detail,
            recorded_at,
            prev_digest,
            digest,
        });
    }
    Ok(out)
}

fn entry_digest(prev_digest: &str, entry: &AuditEntry) -> String {
    let mut hasher = Sha256::new();
    hasher.update(AUDIT_DIGEST_DOMAIN);
    for field in [
        prev_digest,
        entry.request_id.as_str(),
        entry.actor.as_str(),
        entry.action.as_str(),
        entry.from_state.map(RequestStatus::as_str).unwrap_or(""),
        entry.to_state.map(RequestStatus::as_str).unwrap_or(""),
        entry.item_key.as_deref().unwrap_or(""),
        entry.detail.as_str(),
    ] {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hasher.update(entry.seq.to_le_bytes());
    hasher.update(entry.recorded_at.to_le_bytes());
    to_hex(&hasher.finalize())
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    const HEX: &[u8; 16] = b"0123456789abcdef";
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::model::{ActionType, NewRequest};
    use tempfile::tempdir;

    fn store_with_request() -> (tempfile::TempDir, RequestStore, String) {
        let dir = tempdir().expect("tempdir");
        let store = RequestStore::open(dir.path().join("governance.db")).expect("open");
        let request = store
            .create_request(
                &NewRequest {
                    name: "purge".to_string(),
                    requester: "owner".to_string(),
                    entity_type: "SSN".to_string(),
                    target_value: "123-45-6789".to_string(),
                    action_type: ActionType::Redact,
                },
                100,
            )
            .expect("create");
        (dir, store, request.id)
    }

    #[test]
    fn sequence_numbers_are_gapless_per_request() {
        let (_dir, store, request_id) = store_with_request();
        let log = AuditLog::new(store);
        log.append(&request_id, "auditor", None, None, "first note", 101)
            .expect("append");
        let entry = log
            .append(&request_id, "auditor", None, None, "second note", 102)
            .expect("append");
        assert_eq!(entry.seq, 3);

        let history = log.history(&request_id).expect("history");
        let seqs: Vec<u64> = history.iter().map(|entry| entry.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(history[0].action, AuditAction::Created);
        assert_eq!(history[1].prev_digest, history[0].digest);
    }

    #[test]
    fn tampered_detail_breaks_chain() {
        let (_dir, store, request_id) = store_with_request();
        let log = AuditLog::new(store.clone());
        log.append(&request_id, "auditor", None, None, "note", 101)
            .expect("append");
        assert!(log.verify_chain(&request_id).expect("verify").is_intact());

        let connection = store.connect().expect("connect");
        connection
            .execute(
                "UPDATE audit_log SET detail = 'edited' WHERE request_id = ?1 AND seq = 2",
                params![request_id],
            )
            .expect("tamper");
        let verification = log.verify_chain(&request_id).expect("verify");
        assert_eq!(verification.first_broken_seq, Some(2));
    }

    #[test]
    fn append_to_unknown_request_is_not_found() {
        let (_dir, store, _request_id) = store_with_request();
        let log = AuditLog::new(store);
        let err = log
            .append("req-missing", "auditor", None, None, "note", 1)
            .expect_err("missing");
        assert!(err.is_not_found());
    }
}
