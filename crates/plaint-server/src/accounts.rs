use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    auth::Caller,
    error::{Error, Result},
    mailer::{Mailer, OutgoingMail},
    store::{
        crypto, db::now, AccountInsert, AccountProfile, AccountRecord, AccountStatus,
        ApprovalClaim, Role, Store,
    },
    tokens::{ApprovalToken, TokenService},
};

/// Recipient of approval requests when no super-administrator is configured.
pub const FALLBACK_APPROVER: &str = "postmaster@localhost";

#[derive(Debug, Deserialize)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug)]
pub enum RegisterOutcome {
    /// Approved at creation; the session token is ready to use.
    Active {
        token: String,
        account: AccountProfile,
    },
    /// Waiting on the approval link that was mailed out.
    PendingApproval { account: AccountProfile },
}

#[derive(Debug)]
pub struct Session {
    pub token: String,
    pub account: AccountProfile,
}

/// Registration, login, approval and profile operations.
#[derive(Clone)]
pub struct AccountService {
    store: Store,
    tokens: TokenService,
    mailer: Arc<dyn Mailer>,
    super_admin_email: Option<String>,
}

impl AccountService {
    pub fn new(
        store: Store,
        tokens: TokenService,
        mailer: Arc<dyn Mailer>,
        super_admin_email: Option<String>,
    ) -> Self {
        Self {
            store,
            tokens,
            mailer,
            super_admin_email,
        }
    }

    fn is_super_admin(&self, email: &str) -> bool {
        self.super_admin_email.as_deref() == Some(email)
    }

    /// Create an account. Submitters (and the super-administrator) are
    /// approved immediately; other administrators wait for the approval
    /// link mailed to the super-administrator, built on `approval_base_url`.
    pub async fn register(
        &self,
        registration: Registration,
        approval_base_url: &str,
    ) -> Result<RegisterOutcome> {
        let name = registration.name.trim().to_owned();
        let email = registration.email.trim().to_owned();
        if name.is_empty() {
            return Err(Error::Validation("name is required".into()));
        }
        if email.is_empty() || !email.contains('@') {
            return Err(Error::Validation("a valid email is required".into()));
        }
        if registration.password.is_empty() {
            return Err(Error::Validation("password is required".into()));
        }

        let approved_now = match registration.role {
            Role::Submitter => true,
            Role::Administrator => self.is_super_admin(&email),
        };
        let approval = (!approved_now).then(|| self.tokens.issue_approval());

        let ts = now();
        let record = AccountRecord {
            id: crypto::generate_id(),
            name,
            email,
            password_hash: crypto::hash_password(&registration.password)?,
            role: registration.role,
            status: if approved_now {
                AccountStatus::Approved
            } else {
                AccountStatus::Pending
            },
            approval_token_hash: approval.as_ref().map(|a| a.digest.clone()),
            approval_expires_at: approval.as_ref().map(|a| a.expires_at),
            created_at: ts,
            updated_at: ts,
        };

        if self.store.create_account(&record)? == AccountInsert::DuplicateEmail {
            return Err(Error::DuplicateIdentity);
        }
        info!(account_id = %record.id, role = %record.role, "account registered");

        let Some(approval) = approval else {
            let token = self.tokens.issue_session(&record.id)?;
            return Ok(RegisterOutcome::Active {
                token,
                account: record.profile(),
            });
        };

        let mail = self.approval_mail(&record, &approval, approval_base_url);
        if let Err(e) = self.mailer.send(&mail).await {
            warn!(account_id = %record.id, error = %e, "approval mail failed; revoking token");
            self.store
                .update_account(&record.id, AccountRecord::clear_approval_token)?;
            return Err(Error::DependencyFailure(
                "approval email could not be sent".into(),
            ));
        }

        Ok(RegisterOutcome::PendingApproval {
            account: record.profile(),
        })
    }

    fn approval_mail(
        &self,
        account: &AccountRecord,
        approval: &ApprovalToken,
        base_url: &str,
    ) -> OutgoingMail {
        let link = format!(
            "{}/auth/approve/{}",
            base_url.trim_end_matches('/'),
            approval.token
        );
        let to = self
            .super_admin_email
            .clone()
            .unwrap_or_else(|| FALLBACK_APPROVER.to_owned());

        OutgoingMail {
            to,
            subject: "Admin Approval Required - Plaint".into(),
            text: format!(
                "New account registration request:\n\
                 Name: {}\nEmail: {}\nRole: {}\n\n\
                 Approve this account by opening the link below (valid for 24 hours):\n{link}\n",
                account.name, account.email, account.role
            ),
            html: format!(
                "<h2>New Registration Request</h2>\
                 <p><strong>Name:</strong> {}<br><strong>Email:</strong> {}<br>\
                 <strong>Role:</strong> {}</p>\
                 <p><a href=\"{link}\">Approve User</a></p>\
                 <p>This link will expire in 24 hours.</p>",
                html_escape(&account.name),
                html_escape(&account.email),
                account.role
            ),
        }
    }

    /// Authenticate by email and password.
    ///
    /// Pending submitters and a pending super-administrator are approved
    /// here, before the password is checked.
    pub fn login(&self, credentials: &Credentials) -> Result<Session> {
        // Stored emails are trimmed at registration.
        let email = credentials.email.trim();
        if email.is_empty() || credentials.password.is_empty() {
            return Err(Error::Validation(
                "please provide an email and password".into(),
            ));
        }
        let mut account = self
            .store
            .find_account_by_email(email)?
            .ok_or(Error::InvalidCredentials)?;

        if !account.is_approved() {
            let auto_approve = match account.role {
                Role::Submitter => true,
                Role::Administrator => self.is_super_admin(&account.email),
            };
            if auto_approve {
                info!(account_id = %account.id, role = %account.role, "auto-approving account at login");
                account = self
                    .store
                    .update_account(&account.id, AccountRecord::approve)?
                    .ok_or(Error::InvalidCredentials)?;
            }
        }

        if !account.is_approved() {
            return Err(Error::PendingApproval);
        }
        if !crypto::verify_password(&credentials.password, &account.password_hash)? {
            return Err(Error::InvalidCredentials);
        }

        Ok(Session {
            token: self.tokens.issue_session(&account.id)?,
            account: account.profile(),
        })
    }

    /// Consume a mailed approval token.
    pub fn approve_by_token(&self, token: &str) -> Result<AccountProfile> {
        let digest = crypto::digest_token(token);
        match self.store.claim_approval(&digest, now())? {
            ApprovalClaim::Approved(account) => {
                info!(account_id = %account.id, "account approved");
                Ok(account.profile())
            }
            ApprovalClaim::InvalidOrExpired => Err(Error::InvalidOrExpiredToken),
        }
    }

    /// Change the caller's display name. Nothing else on the account moves.
    pub fn update_profile(&self, caller: &Caller, name: &str) -> Result<AccountProfile> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("name is required".into()));
        }
        let updated = self
            .store
            .update_account(caller.id(), |account| account.name = name.to_owned())?
            .ok_or(Error::NotFound("account"))?;
        Ok(updated.profile())
    }

    pub fn me(&self, caller: &Caller) -> AccountProfile {
        caller.account.profile()
    }

    pub fn list_accounts(&self, caller: &Caller) -> Result<Vec<AccountProfile>> {
        caller.require_admin()?;
        Ok(self
            .store
            .list_accounts()?
            .iter()
            .map(AccountRecord::profile)
            .collect())
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
