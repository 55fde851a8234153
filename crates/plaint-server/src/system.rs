use std::sync::Arc;

use tracing::info;

use crate::{
    auth::Caller,
    broadcast::ModeBroadcaster,
    error::{Error, Result},
    store::{Store, SystemModeRecord},
};

/// Global online/offline flag. Persisted in the store, announced through the
/// injected broadcaster after every change.
#[derive(Clone)]
pub struct ModeRegister {
    store: Store,
    broadcaster: Arc<dyn ModeBroadcaster>,
}

impl ModeRegister {
    pub fn new(store: Store, broadcaster: Arc<dyn ModeBroadcaster>) -> Self {
        Self { store, broadcaster }
    }

    pub fn get_mode(&self) -> Result<SystemModeRecord> {
        Ok(self.store.system_mode()?)
    }

    pub fn is_online(&self) -> Result<bool> {
        Ok(self.get_mode()?.online)
    }

    /// Fails with [`Error::SystemOffline`] while the system is offline.
    pub fn ensure_online(&self) -> Result<()> {
        if self.is_online()? {
            Ok(())
        } else {
            Err(Error::SystemOffline)
        }
    }

    pub fn toggle(&self, caller: &Caller) -> Result<SystemModeRecord> {
        caller.require_admin()?;
        let mode = self.store.toggle_system_mode(caller.id())?;
        info!(online = mode.online, admin_id = %caller.id(), "system mode toggled");
        self.broadcaster.publish(mode.online);
        Ok(mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::db::tests::make_store;
    use crate::store::Role;
    use crate::testing::{caller, RecordingBroadcaster};

    #[test]
    fn toggle_persists_then_publishes() {
        let (store, _dir) = make_store();
        let events = Arc::new(RecordingBroadcaster::default());
        let mode = ModeRegister::new(store, events.clone());

        assert!(mode.is_online().unwrap());
        let admin = caller("root", Role::Administrator);
        assert!(!mode.toggle(&admin).unwrap().online);
        assert!(!mode.get_mode().unwrap().online);
        assert!(matches!(mode.ensure_online(), Err(Error::SystemOffline)));

        mode.toggle(&admin).unwrap();
        assert!(mode.ensure_online().is_ok());
        assert_eq!(events.published(), vec![false, true]);
    }

    #[test]
    fn submitters_cannot_toggle() {
        let (store, _dir) = make_store();
        let events = Arc::new(RecordingBroadcaster::default());
        let mode = ModeRegister::new(store, events.clone());

        let user = caller("ann", Role::Submitter);
        assert!(matches!(mode.toggle(&user), Err(Error::Forbidden)));
        assert!(mode.is_online().unwrap());
        assert!(events.published().is_empty());
    }
}
