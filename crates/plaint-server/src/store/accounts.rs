use anyhow::{Context, Result};
use redb::{ReadableTable, TableDefinition, WriteTransaction};
use tracing::{debug, info};

use super::db::{decode, encode, Store};
use super::model::AccountRecord;

pub(crate) const ACCOUNTS: TableDefinition<&str, &[u8]> = TableDefinition::new("accounts");
/// Uniqueness index: exact email -> account id.
pub(crate) const ACCOUNT_EMAILS: TableDefinition<&str, &str> =
    TableDefinition::new("account_emails");
/// Approval token SHA-256 digest -> account id.
pub(crate) const APPROVAL_TOKENS: TableDefinition<&str, &str> =
    TableDefinition::new("approval_tokens");

/// Outcome of inserting a new account.
#[derive(Debug, PartialEq)]
pub enum AccountInsert {
    Inserted,
    /// An account with the same email already exists; nothing was written.
    DuplicateEmail,
}

/// Outcome of claiming an approval token.
#[derive(Debug)]
pub enum ApprovalClaim {
    /// The account was approved and the token consumed.
    Approved(AccountRecord),
    /// No live token matched: unknown, already used, or expired.
    InvalidOrExpired,
}

impl Store {
    /// Insert a new account, enforcing email uniqueness in the same transaction.
    pub fn create_account(&self, record: &AccountRecord) -> Result<AccountInsert> {
        let write_txn = self.db.begin_write()?;
        {
            let mut emails = write_txn.open_table(ACCOUNT_EMAILS)?;
            if emails.get(record.email.as_str())?.is_some() {
                return Ok(AccountInsert::DuplicateEmail);
            }
            emails.insert(record.email.as_str(), record.id.as_str())?;

            let bytes = encode(record).context("encode account")?;
            let mut accounts = write_txn.open_table(ACCOUNTS)?;
            accounts.insert(record.id.as_str(), bytes.as_slice())?;

            if let Some(ref digest) = record.approval_token_hash {
                let mut tokens = write_txn.open_table(APPROVAL_TOKENS)?;
                tokens.insert(digest.as_str(), record.id.as_str())?;
            }
        }
        write_txn.commit()?;

        debug!(account_id = %record.id, role = %record.role, "stored account");
        Ok(AccountInsert::Inserted)
    }

    pub fn find_account(&self, id: &str) -> Result<Option<AccountRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACCOUNTS)?;
        let raw_bytes: Option<Vec<u8>> = table.get(id)?.map(|guard| guard.value().to_vec());
        raw_bytes
            .map(|bytes| decode(&bytes).context("decode account"))
            .transpose()
    }

    /// Exact, case-sensitive email lookup.
    pub fn find_account_by_email(&self, email: &str) -> Result<Option<AccountRecord>> {
        let id: Option<String> = {
            let read_txn = self.db.begin_read()?;
            let emails = read_txn.open_table(ACCOUNT_EMAILS)?;
            let id = emails.get(email)?.map(|guard| guard.value().to_owned());
            id
        };
        match id {
            Some(id) => self.find_account(&id),
            None => Ok(None),
        }
    }

    /// Atomically read, mutate and write back one account.
    /// Returns `Ok(None)` if the account does not exist.
    ///
    /// The approval-token index follows whatever `mutate` does to
    /// `approval_token_hash`. Email and id changes are ignored.
    pub fn update_account(
        &self,
        id: &str,
        mutate: impl FnOnce(&mut AccountRecord),
    ) -> Result<Option<AccountRecord>> {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut accounts = write_txn.open_table(ACCOUNTS)?;
            let raw_bytes: Option<Vec<u8>> =
                accounts.get(id)?.map(|guard| guard.value().to_vec());

            match raw_bytes {
                None => None,
                Some(bytes) => {
                    let before: AccountRecord = decode(&bytes).context("decode account")?;
                    let mut record = before.clone();
                    mutate(&mut record);
                    record.id = before.id.clone();
                    record.email = before.email.clone();
                    record.updated_at = super::db::now();

                    let encoded = encode(&record).context("encode account")?;
                    accounts.insert(id, encoded.as_slice())?;
                    drop(accounts);

                    reindex_approval_token(&write_txn, &before, &record)?;
                    Some(record)
                }
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    /// Consume an approval token: find the account by token digest, check the
    /// expiry, approve, and drop the token, all in one write transaction.
    /// A second claim of the same token finds no index entry.
    pub fn claim_approval(&self, token_digest: &str, now: i64) -> Result<ApprovalClaim> {
        let write_txn = self.db.begin_write()?;
        let claim = {
            let mut tokens = write_txn.open_table(APPROVAL_TOKENS)?;
            let account_id: Option<String> =
                tokens.get(token_digest)?.map(|guard| guard.value().to_owned());

            match account_id {
                None => ApprovalClaim::InvalidOrExpired,
                Some(account_id) => {
                    tokens.remove(token_digest)?;

                    let mut accounts = write_txn.open_table(ACCOUNTS)?;
                    let raw_bytes: Option<Vec<u8>> = accounts
                        .get(account_id.as_str())?
                        .map(|guard| guard.value().to_vec());

                    match raw_bytes {
                        None => ApprovalClaim::InvalidOrExpired,
                        Some(bytes) => {
                            let mut record: AccountRecord =
                                decode(&bytes).context("decode account")?;
                            let matches =
                                record.approval_token_hash.as_deref() == Some(token_digest);
                            let live = matches
                                && record.approval_expires_at.is_some_and(|exp| exp > now);

                            if live {
                                record.approve();
                            } else if matches {
                                // Expired: evict lazily, status untouched.
                                record.clear_approval_token();
                            }
                            record.updated_at = now;
                            let encoded = encode(&record).context("encode account")?;
                            accounts.insert(account_id.as_str(), encoded.as_slice())?;

                            if live {
                                ApprovalClaim::Approved(record)
                            } else {
                                debug!(account_id = %account_id, "evicted expired approval token");
                                ApprovalClaim::InvalidOrExpired
                            }
                        }
                    }
                }
            }
        };
        write_txn.commit()?;
        Ok(claim)
    }

    /// List all accounts, oldest first.
    pub fn list_accounts(&self) -> Result<Vec<AccountRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACCOUNTS)?;

        let mut records = Vec::new();
        for item in table.iter()? {
            let (_k, v) = item?;
            let record: AccountRecord = decode(v.value()).context("decode account")?;
            records.push(record);
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    /// Clear approval tokens whose expiry is at or before `now`.
    /// Returns the number of tokens removed.
    pub fn prune_expired_approvals(&self, now: i64) -> Result<usize> {
        let expired: Vec<(String, String)> = {
            let read_txn = self.db.begin_read()?;
            let tokens = read_txn.open_table(APPROVAL_TOKENS)?;
            let accounts = read_txn.open_table(ACCOUNTS)?;
            let mut out = Vec::new();
            for item in tokens.iter()? {
                let (digest, account_id) = item?;
                let dead = match accounts.get(account_id.value())? {
                    None => true,
                    Some(guard) => {
                        let record: AccountRecord =
                            decode(guard.value()).context("decode account")?;
                        !record.approval_expires_at.is_some_and(|exp| exp > now)
                    }
                };
                if dead {
                    out.push((digest.value().to_owned(), account_id.value().to_owned()));
                }
            }
            out
        };

        if expired.is_empty() {
            return Ok(0);
        }

        let write_txn = self.db.begin_write()?;
        {
            let mut tokens = write_txn.open_table(APPROVAL_TOKENS)?;
            let mut accounts = write_txn.open_table(ACCOUNTS)?;
            for (digest, account_id) in &expired {
                tokens.remove(digest.as_str())?;
                let raw_bytes: Option<Vec<u8>> = accounts
                    .get(account_id.as_str())?
                    .map(|guard| guard.value().to_vec());
                if let Some(bytes) = raw_bytes {
                    let mut record: AccountRecord = decode(&bytes).context("decode account")?;
                    if record.approval_token_hash.as_deref() == Some(digest.as_str()) {
                        record.clear_approval_token();
                        let encoded = encode(&record).context("encode account")?;
                        accounts.insert(account_id.as_str(), encoded.as_slice())?;
                    }
                }
            }
        }
        write_txn.commit()?;

        let removed = expired.len();
        info!(removed, "pruned expired approval tokens");
        Ok(removed)
    }
}

fn reindex_approval_token(
    write_txn: &WriteTransaction,
    before: &AccountRecord,
    after: &AccountRecord,
) -> Result<()> {
    if before.approval_token_hash == after.approval_token_hash {
        return Ok(());
    }
    let mut tokens = write_txn.open_table(APPROVAL_TOKENS)?;
    if let Some(ref old) = before.approval_token_hash {
        tokens.remove(old.as_str())?;
    }
    if let Some(ref new) = after.approval_token_hash {
        tokens.insert(new.as_str(), after.id.as_str())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::crypto::digest_token;
    use crate::store::db::tests::make_store;
    use crate::store::model::{AccountStatus, Role};

    fn account(id: &str, email: &str, role: Role) -> AccountRecord {
        AccountRecord {
            id: id.into(),
            name: "Test".into(),
            email: email.into(),
            password_hash: "$argon2id$fake".into(),
            role,
            status: AccountStatus::Approved,
            approval_token_hash: None,
            approval_expires_at: None,
            created_at: 100,
            updated_at: 100,
        }
    }

    fn pending_admin(id: &str, email: &str, token: &str, expires_at: i64) -> AccountRecord {
        AccountRecord {
            status: AccountStatus::Pending,
            approval_token_hash: Some(digest_token(token)),
            approval_expires_at: Some(expires_at),
            ..account(id, email, Role::Administrator)
        }
    }

    #[test]
    fn create_and_find() {
        let (s, _dir) = make_store();
        let a = account("a1", "ann@x.com", Role::Submitter);
        assert_eq!(s.create_account(&a).unwrap(), AccountInsert::Inserted);

        let by_id = s.find_account("a1").unwrap().unwrap();
        assert_eq!(by_id.email, "ann@x.com");
        let by_email = s.find_account_by_email("ann@x.com").unwrap().unwrap();
        assert_eq!(by_email.id, "a1");
        assert!(s.find_account("nope").unwrap().is_none());
    }

    #[test]
    fn duplicate_email_is_typed_and_writes_nothing() {
        let (s, _dir) = make_store();
        s.create_account(&account("a1", "ann@x.com", Role::Submitter))
            .unwrap();
        let outcome = s
            .create_account(&account("a2", "ann@x.com", Role::Administrator))
            .unwrap();
        assert_eq!(outcome, AccountInsert::DuplicateEmail);
        assert!(s.find_account("a2").unwrap().is_none());
        assert_eq!(s.list_accounts().unwrap().len(), 1);
    }

    #[test]
    fn email_lookup_is_case_sensitive() {
        let (s, _dir) = make_store();
        s.create_account(&account("a1", "Ann@x.com", Role::Submitter))
            .unwrap();
        assert!(s.find_account_by_email("ann@x.com").unwrap().is_none());
        assert_eq!(
            s.create_account(&account("a2", "ann@x.com", Role::Submitter))
                .unwrap(),
            AccountInsert::Inserted
        );
    }

    #[test]
    fn update_account_mutates_in_place() {
        let (s, _dir) = make_store();
        s.create_account(&account("a1", "ann@x.com", Role::Submitter))
            .unwrap();
        let updated = s
            .update_account("a1", |a| {
                a.name = "Annie".into();
                a.email = "hijack@x.com".into();
            })
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "Annie");
        assert_eq!(updated.email, "ann@x.com");
        assert!(s.update_account("missing", |_| {}).unwrap().is_none());
    }

    #[test]
    fn claim_approval_is_single_use() {
        let (s, _dir) = make_store();
        s.create_account(&pending_admin("b1", "bob@x.com", "tok", 2000))
            .unwrap();

        let first = s.claim_approval(&digest_token("tok"), 1000).unwrap();
        match first {
            ApprovalClaim::Approved(record) => {
                assert!(record.is_approved());
                assert!(record.approval_token_hash.is_none());
            }
            ApprovalClaim::InvalidOrExpired => panic!("first claim should succeed"),
        }
        assert!(matches!(
            s.claim_approval(&digest_token("tok"), 1000).unwrap(),
            ApprovalClaim::InvalidOrExpired
        ));
        assert!(s.find_account("b1").unwrap().unwrap().is_approved());
    }

    #[test]
    fn concurrent_claims_approve_exactly_once() {
        let (s, _dir) = make_store();
        s.create_account(&pending_admin("b1", "bob@x.com", "tok", 2000))
            .unwrap();

        let barrier = std::sync::Arc::new(std::sync::Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = s.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    store.claim_approval(&digest_token("tok"), 1000).unwrap()
                })
            })
            .collect();

        let approved = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|claim| matches!(claim, ApprovalClaim::Approved(_)))
            .count();
        assert_eq!(approved, 1);
        assert!(s.find_account("b1").unwrap().unwrap().is_approved());
    }

    #[test]
    fn claim_approval_after_expiry_fails_and_evicts() {
        let (s, _dir) = make_store();
        s.create_account(&pending_admin("b1", "bob@x.com", "tok", 2000))
            .unwrap();

        assert!(matches!(
            s.claim_approval(&digest_token("tok"), 2000).unwrap(),
            ApprovalClaim::InvalidOrExpired
        ));
        let record = s.find_account("b1").unwrap().unwrap();
        assert_eq!(record.status, AccountStatus::Pending);
        assert!(record.approval_token_hash.is_none());
    }

    #[test]
    fn clearing_token_through_update_drops_index() {
        let (s, _dir) = make_store();
        s.create_account(&pending_admin("b1", "bob@x.com", "tok", 2000))
            .unwrap();
        s.update_account("b1", |a| a.clear_approval_token())
            .unwrap();
        assert!(matches!(
            s.claim_approval(&digest_token("tok"), 1000).unwrap(),
            ApprovalClaim::InvalidOrExpired
        ));
        assert_eq!(
            s.find_account("b1").unwrap().unwrap().status,
            AccountStatus::Pending
        );
    }

    #[test]
    fn prune_expired_approvals_keeps_live_tokens() {
        let (s, _dir) = make_store();
        s.create_account(&pending_admin("b1", "old@x.com", "old", 500))
            .unwrap();
        s.create_account(&pending_admin("b2", "new@x.com", "new", 5000))
            .unwrap();

        assert_eq!(s.prune_expired_approvals(1000).unwrap(), 1);
        assert!(s
            .find_account("b1")
            .unwrap()
            .unwrap()
            .approval_token_hash
            .is_none());
        assert!(matches!(
            s.claim_approval(&digest_token("new"), 1000).unwrap(),
            ApprovalClaim::Approved(_)
        ));
        assert_eq!(s.prune_expired_approvals(1000).unwrap(), 0);
    }

    #[test]
    fn list_accounts_oldest_first() {
        let (s, _dir) = make_store();
        let mut later = account("z", "later@x.com", Role::Submitter);
        later.created_at = 300;
        s.create_account(&later).unwrap();
        s.create_account(&account("y", "earlier@x.com", Role::Submitter))
            .unwrap();
        let ids: Vec<_> = s.list_accounts().unwrap().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["y", "z"]);
    }
}
