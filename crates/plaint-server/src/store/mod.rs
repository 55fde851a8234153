pub mod accounts;
pub mod audit;
pub mod complaints;
pub mod crypto;
pub mod db;
pub mod model;
pub mod system;

pub use accounts::{AccountInsert, ApprovalClaim};
pub use audit::{AuditEvent, AuditQuery};
pub use complaints::{ComplaintScope, ComplaintStats, Guarded};
pub use db::Store;
pub use model::{
    AccountProfile, AccountRecord, AccountStatus, Category, ComplaintRecord, ComplaintStatus,
    Priority, Role, SystemModeRecord,
};
