use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    error::{Error, Result},
    store::{AccountRecord, ComplaintRecord, Role},
    AppState,
};

/// The authenticated account behind a request, attached by [`require_session`].
#[derive(Debug, Clone)]
pub struct Caller {
    pub account: AccountRecord,
}

impl Caller {
    pub fn id(&self) -> &str {
        &self.account.id
    }

    pub fn role(&self) -> Role {
        self.account.role
    }

    pub fn require_role(&self, allowed: &[Role]) -> Result<()> {
        if allowed.contains(&self.account.role) {
            Ok(())
        } else {
            Err(Error::Forbidden)
        }
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.account.role.is_admin() {
            Ok(())
        } else {
            Err(Error::Forbidden)
        }
    }

    pub fn owns(&self, complaint: &ComplaintRecord) -> bool {
        complaint.owner_id == self.account.id
    }

    pub fn can_view(&self, complaint: &ComplaintRecord) -> bool {
        match self.account.role {
            Role::Administrator => true,
            Role::Submitter => self.owns(complaint),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve the bearer session token to a live account.
pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Caller> {
    let token = bearer_token(headers).ok_or(Error::Unauthenticated)?;
    let account_id = state.tokens.verify_session(token)?;
    let account = state
        .store
        .find_account(&account_id)?
        .ok_or(Error::Unauthenticated)?;
    Ok(Caller { account })
}

/// Axum middleware that validates `Authorization: Bearer <session token>`
/// and exposes the account to handlers as `Extension<Caller>`.
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticate(&state, request.headers()) {
        Ok(caller) => {
            request.extensions_mut().insert(caller);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}
