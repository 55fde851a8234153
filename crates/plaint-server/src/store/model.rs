use serde::{Deserialize, Serialize};

// ── Accounts ─────────────────────────────────────────────────────────────────

/// Account tier. Serialized with the wire spellings clients already use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    Submitter,
    #[serde(rename = "admin")]
    Administrator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitter => "user",
            Self::Administrator => "admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        match self {
            Self::Submitter => false,
            Self::Administrator => true,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Pending,
    Approved,
}

/// Stored in redb as bincode-encoded bytes.
/// The approval token itself is never persisted, only its SHA-256 digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    /// Argon2id hash in PHC string format.
    pub password_hash: String,
    pub role: Role,
    pub status: AccountStatus,
    pub approval_token_hash: Option<String>,
    /// Unix timestamp (seconds) after which the approval token is dead.
    pub approval_expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl AccountRecord {
    pub fn is_approved(&self) -> bool {
        self.status == AccountStatus::Approved
    }

    /// Mark approved and drop any outstanding approval token.
    pub fn approve(&mut self) {
        self.status = AccountStatus::Approved;
        self.clear_approval_token();
    }

    pub fn clear_approval_token(&mut self) {
        self.approval_token_hash = None;
        self.approval_expires_at = None;
    }

    pub fn profile(&self) -> AccountProfile {
        AccountProfile {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
            status: self.status,
            created_at: self.created_at,
        }
    }
}

/// Public view of an account: never includes the password hash or token digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub status: AccountStatus,
    pub created_at: i64,
}

// ── Complaints ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    General,
    Technical,
    Hostel,
    Academic,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Self::General,
        Self::Technical,
        Self::Hostel,
        Self::Academic,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "General",
            Self::Technical => "Technical",
            Self::Hostel => "Hostel",
            Self::Academic => "Academic",
            Self::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Self::Low, Self::Medium, Self::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplaintStatus {
    #[default]
    Pending,
    #[serde(rename = "In Progress")]
    InProgress,
    Resolved,
    Rejected,
}

impl ComplaintStatus {
    pub const ALL: [ComplaintStatus; 4] = [
        Self::Pending,
        Self::InProgress,
        Self::Resolved,
        Self::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::InProgress => "In Progress",
            Self::Resolved => "Resolved",
            Self::Rejected => "Rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplaintRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub priority: Priority,
    pub status: ComplaintStatus,
    /// Account id of the submitter. Written once at creation.
    pub owner_id: String,
    pub resolution: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

// ── System mode ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemModeRecord {
    pub online: bool,
    /// Account id of the administrator who last toggled the mode.
    pub last_updated_by: Option<String>,
    pub updated_at: i64,
}
