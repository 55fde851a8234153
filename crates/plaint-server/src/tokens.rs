//! Session and approval tokens.
//!
//! Session tokens are HS256 JWTs carrying the account id. Approval tokens are
//! random hex strings; only their SHA-256 digest is ever persisted.

use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::store::crypto::{self, SigningKey};
use crate::store::db::now;

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 86400);
pub const DEFAULT_APPROVAL_TTL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// A freshly issued approval token. `token` goes out by mail; `digest` and
/// `expires_at` go into the account record.
#[derive(Debug, Clone)]
pub struct ApprovalToken {
    pub token: String,
    pub digest: String,
    pub expires_at: i64,
}

#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    session_ttl: Duration,
    approval_ttl: Duration,
}

impl TokenService {
    pub fn new(key: &SigningKey, session_ttl: Duration, approval_ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(key.as_bytes()),
            decoding: DecodingKey::from_secret(key.as_bytes()),
            validation,
            session_ttl,
            approval_ttl,
        }
    }

    pub fn issue_session(&self, account_id: &str) -> Result<String> {
        self.issue_session_at(account_id, now())
    }

    fn issue_session_at(&self, account_id: &str, issued_at: i64) -> Result<String> {
        let claims = SessionClaims {
            sub: account_id.to_owned(),
            iat: issued_at,
            exp: issued_at + self.session_ttl.as_secs() as i64,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Internal(anyhow::anyhow!("sign session token: {e}")))
    }

    /// Verify signature and expiry, returning the account id.
    pub fn verify_session(&self, token: &str) -> Result<String> {
        match jsonwebtoken::decode::<SessionClaims>(token, &self.decoding, &self.validation) {
            Ok(data) => Ok(data.claims.sub),
            Err(e) => {
                debug!(error = %e, "rejected session token");
                Err(Error::Unauthenticated)
            }
        }
    }

    pub fn issue_approval(&self) -> ApprovalToken {
        let token = crypto::generate_approval_token();
        ApprovalToken {
            digest: crypto::digest_token(&token),
            token,
            expires_at: now() + self.approval_ttl.as_secs() as i64,
        }
    }
}
