use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{de::DeserializeOwned, Serialize};
use tokio::time;
use tracing::{info, warn};

use super::audit::{AuditEvent, AuditQuery};

const AUDIT_LOG: TableDefinition<u64, &[u8]> = TableDefinition::new("audit_log");
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");
const AUDIT_SEQ_KEY: &str = "audit_seq";

/// Thread-safe handle to the redb store.
///
/// Every mutating operation runs in a single write transaction. redb
/// serializes writers, so each read-modify-write is atomic with respect to
/// concurrent requests.
#[derive(Clone)]
pub struct Store {
    pub(crate) db: Arc<Database>,
}

impl Store {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).context("open redb database")?;

        // Ensure all tables exist.
        let write_txn = db.begin_write()?;
        write_txn.open_table(super::accounts::ACCOUNTS)?;
        write_txn.open_table(super::accounts::ACCOUNT_EMAILS)?;
        write_txn.open_table(super::accounts::APPROVAL_TOKENS)?;
        write_txn.open_table(super::complaints::COMPLAINTS)?;
        write_txn.open_table(super::system::SYSTEM)?;
        write_txn.open_table(AUDIT_LOG)?;
        write_txn.open_table(COUNTERS)?;
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    // ── Audit log ─────────────────────────────────────────────────────────

    /// Record an audit event. Allocates a monotonic ID via the counters table.
    pub fn record_audit(&self, mut event: AuditEvent) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut counters = write_txn.open_table(COUNTERS)?;
            let seq = counters.get(AUDIT_SEQ_KEY)?.map(|g| g.value()).unwrap_or(0) + 1;
            counters.insert(AUDIT_SEQ_KEY, seq)?;
            event.id = seq;

            let bytes = encode(&event).context("encode audit event")?;
            let mut audit = write_txn.open_table(AUDIT_LOG)?;
            audit.insert(event.id, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// List audit events matching the query, most recent first.
    pub fn list_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_LOG)?;

        let mut events = Vec::new();
        for item in table.iter()?.rev() {
            if events.len() >= query.limit {
                break;
            }
            let (_k, v) = item?;
            let event: AuditEvent = decode(v.value()).context("decode audit event")?;

            if let Some(since) = query.since {
                if event.timestamp < since {
                    break; // IDs are monotonic, older events follow.
                }
            }
            if let Some(until) = query.until {
                if event.timestamp > until {
                    continue;
                }
            }
            if let Some(ref action) = query.action {
                if event.action != *action {
                    continue;
                }
            }
            events.push(event);
        }
        Ok(events)
    }

    /// Remove audit events older than `retention_seconds`. Returns count removed.
    pub fn prune_audit(&self, retention_seconds: i64) -> Result<usize> {
        let cutoff = now() - retention_seconds;

        let ids_to_remove: Vec<u64> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(AUDIT_LOG)?;
            let mut ids = Vec::new();
            for item in table.iter()? {
                let (k, v) = item?;
                let event: AuditEvent = decode(v.value()).context("decode audit for prune")?;
                if event.timestamp < cutoff {
                    ids.push(k.value());
                } else {
                    break;
                }
            }
            ids
        };

        if ids_to_remove.is_empty() {
            return Ok(0);
        }

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(AUDIT_LOG)?;
            for id in &ids_to_remove {
                table.remove(*id)?;
            }
        }
        write_txn.commit()?;

        let removed = ids_to_remove.len();
        info!(removed, "pruned old audit events");
        Ok(removed)
    }

    /// Spawn a background task that prunes old audit events periodically.
    pub fn spawn_audit_sweep(self, interval: Duration, retention_seconds: i64) {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await; // skip first immediate tick
            loop {
                ticker.tick().await;
                if let Err(e) = self.prune_audit(retention_seconds) {
                    warn!(error = %e, "audit sweep error");
                }
            }
        });
    }

    /// Spawn a background task that clears expired approval tokens every `interval`.
    pub fn spawn_approval_sweep(self, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.prune_expired_approvals(now()) {
                    warn!(error = %e, "approval sweep error");
                }
            }
        });
    }
}

/// Current Unix time in seconds.
pub(crate) fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard()).context("bincode encode")
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .context("bincode decode")?;
    Ok(value)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::tempdir;

    pub(crate) fn make_store() -> (Store, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = Store::open(&path).unwrap();
        (store, dir)
    }

    fn all_events(s: &Store) -> Vec<AuditEvent> {
        s.list_audit(&AuditQuery {
            since: None,
            until: None,
            action: None,
            limit: 100,
        })
        .unwrap()
    }

    #[test]
    fn reopen_keeps_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reopen.db");
        {
            let s = Store::open(&path).unwrap();
            s.record_audit(AuditEvent::new(
                "account.login",
                None,
                "127.0.0.1".into(),
                true,
                None,
            ))
            .unwrap();
        }
        let s = Store::open(&path).unwrap();
        assert_eq!(all_events(&s).len(), 1);
    }

    #[test]
    fn record_and_list_audit() {
        let (s, _dir) = make_store();

        s.record_audit(AuditEvent::new(
            "account.register",
            Some("ann@x.com".into()),
            "127.0.0.1".into(),
            true,
            None,
        ))
        .unwrap();
        s.record_audit(AuditEvent::new(
            "account.login",
            Some("ann@x.com".into()),
            "10.0.0.1".into(),
            false,
            Some("invalid credentials".into()),
        ))
        .unwrap();

        let events = all_events(&s);
        assert_eq!(events.len(), 2);
        // Most recent first.
        assert_eq!(events[0].action, "account.login");
        assert_eq!(events[0].id, 2);
        assert!(!events[0].success);
        assert_eq!(events[1].action, "account.register");
        assert_eq!(events[1].id, 1);
    }

    #[test]
    fn audit_query_filters() {
        let (s, _dir) = make_store();

        for i in 0..5 {
            let action = if i % 2 == 0 {
                "complaint.create"
            } else {
                "complaint.edit"
            };
            s.record_audit(AuditEvent::new(
                action,
                Some(format!("c{i}")),
                "127.0.0.1".into(),
                true,
                None,
            ))
            .unwrap();
        }

        let events = s
            .list_audit(&AuditQuery {
                since: None,
                until: None,
                action: Some("complaint.create".into()),
                limit: 100,
            })
            .unwrap();
        assert_eq!(events.len(), 3);

        let events = s
            .list_audit(&AuditQuery {
                since: None,
                until: None,
                action: None,
                limit: 2,
            })
            .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn audit_limit_zero_returns_nothing() {
        let (s, _dir) = make_store();
        s.record_audit(AuditEvent::new(
            "account.login",
            None,
            "127.0.0.1".into(),
            true,
            None,
        ))
        .unwrap();

        let events = s
            .list_audit(&AuditQuery {
                since: None,
                until: None,
                action: None,
                limit: 0,
            })
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn audit_prune_removes_old_entries() {
        let (s, _dir) = make_store();

        let mut old_event = AuditEvent::new(
            "system.toggle",
            None,
            "127.0.0.1".into(),
            true,
            None,
        );
        old_event.timestamp = 1000;

        s.record_audit(old_event).unwrap();
        s.record_audit(AuditEvent::new(
            "account.login",
            None,
            "127.0.0.1".into(),
            true,
            None,
        ))
        .unwrap();

        let removed = s.prune_audit(86400).unwrap();
        assert_eq!(removed, 1);

        let events = all_events(&s);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, "account.login");
    }
}
