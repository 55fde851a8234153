pub mod accounts;
pub mod auth;
pub mod broadcast;
pub mod complaints;
pub mod error;
pub mod handlers;
pub mod mailer;
pub mod server;
pub mod store;
pub mod system;
pub mod tokens;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: store::Store,
    pub tokens: tokens::TokenService,
    pub accounts: accounts::AccountService,
    pub complaints: complaints::ComplaintService,
    pub mode: system::ModeRegister,
    /// Live feed behind `GET /system/events`.
    pub events: broadcast::ChannelBroadcaster,
    /// Base for approval links; falls back to the request's Host header.
    pub public_url: Option<String>,
}

impl AppState {
    pub fn new(
        store: store::Store,
        tokens: tokens::TokenService,
        mailer: Arc<dyn mailer::Mailer>,
        super_admin_email: Option<String>,
        public_url: Option<String>,
    ) -> Self {
        let events = broadcast::ChannelBroadcaster::new(64);
        let mode = system::ModeRegister::new(store.clone(), Arc::new(events.clone()));
        let accounts =
            accounts::AccountService::new(store.clone(), tokens.clone(), mailer, super_admin_email);
        let complaints = complaints::ComplaintService::new(store.clone(), mode.clone());

        Self {
            store,
            tokens,
            accounts,
            complaints,
            mode,
            events,
            public_url,
        }
    }
}

pub use error::{Error, Result};
pub use server::{build_router, read_key_file, resolve_data_dir, run, ServerConfig};
