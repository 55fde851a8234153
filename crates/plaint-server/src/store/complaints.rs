use std::collections::BTreeMap;

use anyhow::{Context, Result};
use redb::{ReadableTable, TableDefinition};
use serde::Serialize;
use tracing::debug;

use super::db::{decode, encode, Store};
use super::model::{Category, ComplaintRecord, ComplaintStatus, Priority};

pub(crate) const COMPLAINTS: TableDefinition<&str, &[u8]> = TableDefinition::new("complaints");

/// Which complaints a listing may see.
#[derive(Debug, Clone, Copy)]
pub enum ComplaintScope<'a> {
    All,
    OwnedBy(&'a str),
}

/// Result of a guarded read-modify-write or delete.
#[derive(Debug, PartialEq)]
pub enum Guarded<T> {
    /// The guard accepted; carries the written (or removed) record.
    Applied(T),
    /// The guard refused; nothing was written. Carries the current record.
    Refused(T),
    Missing,
}

/// Counts grouped independently by status, priority and category.
/// Every enum value is present, zero counts included.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplaintStats {
    pub total: u64,
    pub status: BTreeMap<String, u64>,
    pub priority: BTreeMap<String, u64>,
    pub category: BTreeMap<String, u64>,
}

impl ComplaintStats {
    fn empty() -> Self {
        Self {
            total: 0,
            status: ComplaintStatus::ALL
                .iter()
                .map(|s| (s.as_str().to_owned(), 0))
                .collect(),
            priority: Priority::ALL
                .iter()
                .map(|p| (p.as_str().to_owned(), 0))
                .collect(),
            category: Category::ALL
                .iter()
                .map(|c| (c.as_str().to_owned(), 0))
                .collect(),
        }
    }

    fn count(&mut self, c: &ComplaintRecord) {
        self.total += 1;
        *self.status.entry(c.status.as_str().to_owned()).or_default() += 1;
        *self.priority.entry(c.priority.as_str().to_owned()).or_default() += 1;
        *self.category.entry(c.category.as_str().to_owned()).or_default() += 1;
    }
}

impl Store {
    pub fn create_complaint(&self, record: &ComplaintRecord) -> Result<()> {
        let bytes = encode(record).context("encode complaint")?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(COMPLAINTS)?;
            table.insert(record.id.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;

        debug!(complaint_id = %record.id, owner_id = %record.owner_id, "stored complaint");
        Ok(())
    }

    pub fn find_complaint(&self, id: &str) -> Result<Option<ComplaintRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(COMPLAINTS)?;
        let raw_bytes: Option<Vec<u8>> = table.get(id)?.map(|guard| guard.value().to_vec());
        raw_bytes
            .map(|bytes| decode(&bytes).context("decode complaint"))
            .transpose()
    }

    /// List complaints in scope, newest first.
    pub fn list_complaints(&self, scope: ComplaintScope<'_>) -> Result<Vec<ComplaintRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(COMPLAINTS)?;

        let mut records = Vec::new();
        for item in table.iter()? {
            let (_k, v) = item?;
            let record: ComplaintRecord = decode(v.value()).context("decode complaint")?;
            let visible = match scope {
                ComplaintScope::All => true,
                ComplaintScope::OwnedBy(owner) => record.owner_id == owner,
            };
            if visible {
                records.push(record);
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(records)
    }

    /// Atomically read a complaint, let `mutate` decide whether to change it,
    /// and write it back if `mutate` returned true. The owner and id are
    /// restored after `mutate` runs.
    pub fn update_complaint(
        &self,
        id: &str,
        mutate: impl FnOnce(&mut ComplaintRecord) -> bool,
    ) -> Result<Guarded<ComplaintRecord>> {
        let write_txn = self.db.begin_write()?;
        let result = {
            let mut table = write_txn.open_table(COMPLAINTS)?;
            let raw_bytes: Option<Vec<u8>> = table.get(id)?.map(|guard| guard.value().to_vec());

            match raw_bytes {
                None => Guarded::Missing,
                Some(bytes) => {
                    let before: ComplaintRecord = decode(&bytes).context("decode complaint")?;
                    let mut record = before.clone();
                    if mutate(&mut record) {
                        record.id = before.id;
                        record.owner_id = before.owner_id;
                        record.created_at = before.created_at;
                        record.updated_at = super::db::now();
                        let encoded = encode(&record).context("encode complaint")?;
                        table.insert(id, encoded.as_slice())?;
                        Guarded::Applied(record)
                    } else {
                        Guarded::Refused(before)
                    }
                }
            }
        };
        write_txn.commit()?;
        Ok(result)
    }

    /// Remove a complaint if `allow` accepts it, in one write transaction.
    pub fn delete_complaint(
        &self,
        id: &str,
        allow: impl FnOnce(&ComplaintRecord) -> bool,
    ) -> Result<Guarded<ComplaintRecord>> {
        let write_txn = self.db.begin_write()?;
        let result = {
            let mut table = write_txn.open_table(COMPLAINTS)?;
            let raw_bytes: Option<Vec<u8>> = table.get(id)?.map(|guard| guard.value().to_vec());

            match raw_bytes {
                None => Guarded::Missing,
                Some(bytes) => {
                    let record: ComplaintRecord = decode(&bytes).context("decode complaint")?;
                    if allow(&record) {
                        table.remove(id)?;
                        Guarded::Applied(record)
                    } else {
                        Guarded::Refused(record)
                    }
                }
            }
        };
        write_txn.commit()?;
        Ok(result)
    }

    pub fn complaint_stats(&self) -> Result<ComplaintStats> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(COMPLAINTS)?;

        let mut stats = ComplaintStats::empty();
        for item in table.iter()? {
            let (_k, v) = item?;
            let record: ComplaintRecord = decode(v.value()).context("decode complaint")?;
            stats.count(&record);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::db::tests::make_store;

    fn complaint(id: &str, owner: &str, created_at: i64) -> ComplaintRecord {
        ComplaintRecord {
            id: id.into(),
            title: format!("complaint {id}"),
            description: "the wifi is down".into(),
            category: Category::Technical,
            priority: Priority::Medium,
            status: ComplaintStatus::Pending,
            owner_id: owner.into(),
            resolution: None,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn list_is_scoped_and_newest_first() {
        let (s, _dir) = make_store();
        s.create_complaint(&complaint("c1", "ann", 10)).unwrap();
        s.create_complaint(&complaint("c2", "bob", 20)).unwrap();
        s.create_complaint(&complaint("c3", "ann", 30)).unwrap();

        let all: Vec<_> = s
            .list_complaints(ComplaintScope::All)
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(all, vec!["c3", "c2", "c1"]);

        let anns: Vec<_> = s
            .list_complaints(ComplaintScope::OwnedBy("ann"))
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(anns, vec!["c3", "c1"]);
    }

    #[test]
    fn update_refused_writes_nothing() {
        let (s, _dir) = make_store();
        s.create_complaint(&complaint("c1", "ann", 10)).unwrap();

        let outcome = s
            .update_complaint("c1", |c| {
                c.title = "changed".into();
                false
            })
            .unwrap();
        assert!(matches!(outcome, Guarded::Refused(ref c) if c.title == "complaint c1"));
        assert_eq!(s.find_complaint("c1").unwrap().unwrap().title, "complaint c1");
    }

    #[test]
    fn update_cannot_reassign_owner() {
        let (s, _dir) = make_store();
        s.create_complaint(&complaint("c1", "ann", 10)).unwrap();

        let outcome = s
            .update_complaint("c1", |c| {
                c.owner_id = "mallory".into();
                c.status = ComplaintStatus::Resolved;
                true
            })
            .unwrap();
        let Guarded::Applied(updated) = outcome else {
            panic!("update should apply");
        };
        assert_eq!(updated.owner_id, "ann");
        assert_eq!(updated.status, ComplaintStatus::Resolved);
        assert_eq!(
            s.update_complaint("nope", |_| true).unwrap(),
            Guarded::Missing
        );
    }

    #[test]
    fn delete_respects_guard() {
        let (s, _dir) = make_store();
        s.create_complaint(&complaint("c1", "ann", 10)).unwrap();

        assert!(matches!(
            s.delete_complaint("c1", |c| c.owner_id == "bob").unwrap(),
            Guarded::Refused(_)
        ));
        assert!(s.find_complaint("c1").unwrap().is_some());
        assert!(matches!(
            s.delete_complaint("c1", |c| c.owner_id == "ann").unwrap(),
            Guarded::Applied(_)
        ));
        assert!(s.find_complaint("c1").unwrap().is_none());
        assert_eq!(s.delete_complaint("c1", |_| true).unwrap(), Guarded::Missing);
    }

    #[test]
    fn stats_include_zero_buckets() {
        let (s, _dir) = make_store();
        s.create_complaint(&complaint("c1", "ann", 10)).unwrap();
        let mut high = complaint("c2", "bob", 20);
        high.priority = Priority::High;
        high.category = Category::Hostel;
        high.status = ComplaintStatus::InProgress;
        s.create_complaint(&high).unwrap();

        let stats = s.complaint_stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.status["Pending"], 1);
        assert_eq!(stats.status["In Progress"], 1);
        assert_eq!(stats.status["Rejected"], 0);
        assert_eq!(stats.priority["High"], 1);
        assert_eq!(stats.priority["Low"], 0);
        assert_eq!(stats.category["Technical"], 1);
        assert_eq!(stats.category["Hostel"], 1);
        assert_eq!(stats.category.len(), 5);
    }
}
