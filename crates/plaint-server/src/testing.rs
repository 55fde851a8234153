//! Test doubles shared by the service and router tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    auth::Caller,
    broadcast::ModeBroadcaster,
    mailer::{Mailer, OutgoingMail},
    store::{AccountRecord, AccountStatus, Role},
};

pub fn caller(id: &str, role: Role) -> Caller {
    Caller {
        account: AccountRecord {
            id: id.into(),
            name: id.into(),
            email: format!("{id}@x.com"),
            password_hash: String::new(),
            role,
            status: AccountStatus::Approved,
            approval_token_hash: None,
            approval_expires_at: None,
            created_at: 0,
            updated_at: 0,
        },
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingMail>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap().clone()
    }

    /// Pull the approval token out of the most recent approval link.
    pub fn last_approval_token(&self) -> Option<String> {
        let sent = self.sent.lock().unwrap();
        let text = &sent.last()?.text;
        let start = text.find("/auth/approve/")? + "/auth/approve/".len();
        Some(
            text[start..]
                .chars()
                .take_while(|c| c.is_ascii_hexdigit())
                .collect(),
        )
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: &OutgoingMail) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

pub struct FailingMailer;

#[async_trait]
impl Mailer for FailingMailer {
    async fn send(&self, _mail: &OutgoingMail) -> anyhow::Result<()> {
        anyhow::bail!("relay unreachable")
    }
}

#[derive(Default)]
pub struct RecordingBroadcaster {
    published: Mutex<Vec<bool>>,
}

impl RecordingBroadcaster {
    pub fn published(&self) -> Vec<bool> {
        self.published.lock().unwrap().clone()
    }
}

impl ModeBroadcaster for RecordingBroadcaster {
    fn publish(&self, online: bool) {
        self.published.lock().unwrap().push(online);
    }
}
