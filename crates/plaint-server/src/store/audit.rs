use serde::{Deserialize, Serialize};

// ── Action constants ─────────────────────────────────────────────────────────

pub const ACTION_ACCOUNT_REGISTER: &str = "account.register";
pub const ACTION_ACCOUNT_LOGIN: &str = "account.login";
pub const ACTION_ACCOUNT_APPROVE: &str = "account.approve";
pub const ACTION_ACCOUNT_UPDATE: &str = "account.update";
pub const ACTION_ACCOUNT_LIST: &str = "account.list";
pub const ACTION_COMPLAINT_CREATE: &str = "complaint.create";
pub const ACTION_COMPLAINT_TRANSITION: &str = "complaint.transition";
pub const ACTION_COMPLAINT_EDIT: &str = "complaint.edit";
pub const ACTION_COMPLAINT_DELETE: &str = "complaint.delete";
pub const ACTION_SYSTEM_TOGGLE: &str = "system.toggle";

// ── AuditEvent ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: u64,
    pub timestamp: i64,
    pub action: String,
    /// Account or complaint id the action targeted, or the email for
    /// registration and login attempts.
    pub subject: Option<String>,
    pub source_ip: String,
    pub success: bool,
    pub detail: Option<String>,
}

impl AuditEvent {
    pub fn new(
        action: &str,
        subject: Option<String>,
        source_ip: String,
        success: bool,
        detail: Option<String>,
    ) -> Self {
        Self {
            id: 0, // allocated by store
            timestamp: super::db::now(),
            action: action.to_owned(),
            subject,
            source_ip,
            success,
            detail,
        }
    }
}

// ── AuditQuery ───────────────────────────────────────────────────────────────

pub struct AuditQuery {
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub action: Option<String>,
    pub limit: usize,
}
