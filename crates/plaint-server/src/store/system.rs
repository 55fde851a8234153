use anyhow::{Context, Result};
use redb::{ReadableTable, TableDefinition};
use tracing::info;

use super::db::{decode, encode, now, Store};
use super::model::SystemModeRecord;

pub(crate) const SYSTEM: TableDefinition<&str, &[u8]> = TableDefinition::new("system");
const MODE_KEY: &str = "mode";

impl SystemModeRecord {
    fn initial() -> Self {
        Self {
            online: true,
            last_updated_by: None,
            updated_at: now(),
        }
    }
}

impl Store {
    /// Read the singleton mode record, creating it (online) if absent.
    pub fn system_mode(&self) -> Result<SystemModeRecord> {
        {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(SYSTEM)?;
            if let Some(guard) = table.get(MODE_KEY)? {
                return decode(guard.value()).context("decode system mode");
            }
        }

        let write_txn = self.db.begin_write()?;
        let record = {
            let mut table = write_txn.open_table(SYSTEM)?;
            // Another writer may have created it since the read above.
            let existing: Option<Vec<u8>> =
                table.get(MODE_KEY)?.map(|guard| guard.value().to_vec());
            match existing {
                Some(bytes) => decode(&bytes).context("decode system mode")?,
                None => {
                    let record = SystemModeRecord::initial();
                    let bytes = encode(&record).context("encode system mode")?;
                    table.insert(MODE_KEY, bytes.as_slice())?;
                    info!("initialized system mode (online)");
                    record
                }
            }
        };
        write_txn.commit()?;
        Ok(record)
    }

    /// Flip the online flag and record `admin_id` as the last updater.
    /// Read, flip and write happen in one write transaction.
    pub fn toggle_system_mode(&self, admin_id: &str) -> Result<SystemModeRecord> {
        let write_txn = self.db.begin_write()?;
        let record = {
            let mut table = write_txn.open_table(SYSTEM)?;
            let existing: Option<Vec<u8>> =
                table.get(MODE_KEY)?.map(|guard| guard.value().to_vec());
            let mut record = match existing {
                Some(bytes) => decode(&bytes).context("decode system mode")?,
                None => SystemModeRecord::initial(),
            };
            record.online = !record.online;
            record.last_updated_by = Some(admin_id.to_owned());
            record.updated_at = now();

            let bytes = encode(&record).context("encode system mode")?;
            table.insert(MODE_KEY, bytes.as_slice())?;
            record
        };
        write_txn.commit()?;
        Ok(record)
    }
}
