use serde::Deserialize;
use tracing::info;

use crate::{
    auth::Caller,
    error::{Error, Result},
    store::{
        crypto, db::now, Category, ComplaintRecord, ComplaintScope, ComplaintStats,
        ComplaintStatus, Guarded, Priority, Role, Store,
    },
    system::ModeRegister,
};

const MAX_TITLE_CHARS: usize = 100;

#[derive(Debug, Deserialize)]
pub struct NewComplaint {
    pub title: String,
    pub description: String,
    pub category: Category,
    #[serde(default)]
    pub priority: Priority,
}

/// Administrator changes. At least one field must be present.
#[derive(Debug, Default, Deserialize)]
pub struct AdminUpdate {
    pub status: Option<ComplaintStatus>,
    pub resolution: Option<String>,
    pub priority: Option<Priority>,
}

/// Owner changes to content fields, allowed while the complaint is Pending.
#[derive(Debug, Default, Deserialize)]
pub struct OwnerUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<Category>,
    pub priority: Option<Priority>,
}

fn clean_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::Validation("please add a title".into()));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(Error::Validation(format!(
            "title cannot be more than {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(title.to_owned())
}

fn clean_description(description: &str) -> Result<String> {
    let description = description.trim();
    if description.is_empty() {
        return Err(Error::Validation("please add a description".into()));
    }
    Ok(description.to_owned())
}

#[derive(Clone)]
pub struct ComplaintService {
    store: Store,
    mode: ModeRegister,
}

impl ComplaintService {
    pub fn new(store: Store, mode: ModeRegister) -> Self {
        Self { store, mode }
    }

    pub fn create(&self, caller: &Caller, fields: NewComplaint) -> Result<ComplaintRecord> {
        self.mode.ensure_online()?;
        let ts = now();
        let record = ComplaintRecord {
            id: crypto::generate_id(),
            title: clean_title(&fields.title)?,
            description: clean_description(&fields.description)?,
            category: fields.category,
            priority: fields.priority,
            status: ComplaintStatus::Pending,
            owner_id: caller.id().to_owned(),
            resolution: None,
            created_at: ts,
            updated_at: ts,
        };
        self.store.create_complaint(&record)?;
        info!(complaint_id = %record.id, owner_id = %record.owner_id, "complaint filed");
        Ok(record)
    }

    /// Administrators see everything; submitters see their own. Newest first.
    pub fn list(&self, caller: &Caller) -> Result<Vec<ComplaintRecord>> {
        let scope = match caller.role() {
            Role::Administrator => ComplaintScope::All,
            Role::Submitter => ComplaintScope::OwnedBy(caller.id()),
        };
        Ok(self.store.list_complaints(scope)?)
    }

    pub fn get(&self, caller: &Caller, id: &str) -> Result<ComplaintRecord> {
        let complaint = self
            .store
            .find_complaint(id)?
            .ok_or(Error::NotFound("complaint"))?;
        if !caller.can_view(&complaint) {
            return Err(Error::Forbidden);
        }
        Ok(complaint)
    }

    /// Set status, resolution and/or priority. Any status may move to any
    /// other status.
    pub fn admin_transition(
        &self,
        caller: &Caller,
        id: &str,
        update: AdminUpdate,
    ) -> Result<ComplaintRecord> {
        caller.require_admin()?;
        if update.status.is_none() && update.resolution.is_none() && update.priority.is_none() {
            return Err(Error::Validation(
                "provide a status, resolution or priority".into(),
            ));
        }

        let outcome = self.store.update_complaint(id, |complaint| {
            if let Some(status) = update.status {
                complaint.status = status;
            }
            if let Some(resolution) = update.resolution {
                complaint.resolution = Some(resolution);
            }
            if let Some(priority) = update.priority {
                complaint.priority = priority;
            }
            true
        })?;

        match outcome {
            Guarded::Applied(complaint) => {
                info!(
                    complaint_id = %complaint.id,
                    status = %complaint.status.as_str(),
                    admin_id = %caller.id(),
                    "complaint transitioned"
                );
                Ok(complaint)
            }
            Guarded::Refused(_) | Guarded::Missing => Err(Error::NotFound("complaint")),
        }
    }

    /// Owner edit of title, description, category or priority. Only while
    /// the complaint is still Pending.
    pub fn owner_edit(
        &self,
        caller: &Caller,
        id: &str,
        update: OwnerUpdate,
    ) -> Result<ComplaintRecord> {
        self.mode.ensure_online()?;
        if update.title.is_none()
            && update.description.is_none()
            && update.category.is_none()
            && update.priority.is_none()
        {
            return Err(Error::Validation(
                "provide a title, description, category or priority".into(),
            ));
        }
        let title = update.title.as_deref().map(clean_title).transpose()?;
        let description = update
            .description
            .as_deref()
            .map(clean_description)
            .transpose()?;

        let owner_id = caller.id();
        let outcome = self.store.update_complaint(id, |complaint| {
            if complaint.owner_id != owner_id || complaint.status != ComplaintStatus::Pending {
                return false;
            }
            if let Some(title) = title {
                complaint.title = title;
            }
            if let Some(description) = description {
                complaint.description = description;
            }
            if let Some(category) = update.category {
                complaint.category = category;
            }
            if let Some(priority) = update.priority {
                complaint.priority = priority;
            }
            true
        })?;

        match outcome {
            Guarded::Applied(complaint) => Ok(complaint),
            Guarded::Refused(current) if !caller.owns(&current) => Err(Error::Forbidden),
            Guarded::Refused(current) => Err(Error::InvalidState(format!(
                "cannot edit a complaint that is {}",
                current.status.as_str()
            ))),
            Guarded::Missing => Err(Error::NotFound("complaint")),
        }
    }

    /// Owners may delete their own complaints while online; administrators
    /// may delete any complaint at any time.
    pub fn delete(&self, caller: &Caller, id: &str) -> Result<ComplaintRecord> {
        let outcome = match caller.role() {
            Role::Administrator => self.store.delete_complaint(id, |_| true)?,
            Role::Submitter => {
                self.mode.ensure_online()?;
                self.store.delete_complaint(id, |c| caller.owns(c))?
            }
        };
        match outcome {
            Guarded::Applied(complaint) => {
                info!(complaint_id = %complaint.id, by = %caller.id(), "complaint deleted");
                Ok(complaint)
            }
            Guarded::Refused(_) => Err(Error::Forbidden),
            Guarded::Missing => Err(Error::NotFound("complaint")),
        }
    }

    pub fn stats(&self, caller: &Caller) -> Result<ComplaintStats> {
        caller.require_admin()?;
        Ok(self.store.complaint_stats()?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::db::tests::make_store;
    use crate::testing::{caller, RecordingBroadcaster};

    fn service(store: &Store) -> ComplaintService {
        let mode = ModeRegister::new(store.clone(), Arc::new(RecordingBroadcaster::default()));
        ComplaintService::new(store.clone(), mode)
    }

    fn wifi() -> NewComplaint {
        NewComplaint {
            title: "  Wifi down  ".into(),
            description: "No signal in block C".into(),
            category: Category::Technical,
            priority: Priority::default(),
        }
    }

    #[test]
    fn create_sets_owner_and_defaults() {
        let (store, _dir) = make_store();
        let complaints = service(&store);
        let ann = caller("ann", Role::Submitter);

        let c = complaints.create(&ann, wifi()).unwrap();
        assert_eq!(c.title, "Wifi down");
        assert_eq!(c.owner_id, "ann");
        assert_eq!(c.status, ComplaintStatus::Pending);
        assert_eq!(c.priority, Priority::Medium);
        assert_eq!(c.id.len(), 24);
    }

    #[test]
    fn create_validates_title() {
        let (store, _dir) = make_store();
        let complaints = service(&store);
        let ann = caller("ann", Role::Submitter);

        let mut long = wifi();
        long.title = "x".repeat(101);
        assert!(matches!(
            complaints.create(&ann, long),
            Err(Error::Validation(_))
        ));

        let mut exact = wifi();
        exact.title = "x".repeat(100);
        assert!(complaints.create(&ann, exact).is_ok());

        let mut blank = wifi();
        blank.description = "   ".into();
        assert!(matches!(
            complaints.create(&ann, blank),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn other_submitters_cannot_see_or_touch() {
        let (store, _dir) = make_store();
        let complaints = service(&store);
        let ann = caller("ann", Role::Submitter);
        let bob = caller("bob", Role::Submitter);

        let c = complaints.create(&ann, wifi()).unwrap();
        assert!(complaints.list(&bob).unwrap().is_empty());
        assert_eq!(complaints.list(&ann).unwrap().len(), 1);
        assert!(matches!(complaints.get(&bob, &c.id), Err(Error::Forbidden)));
        assert!(matches!(
            complaints.owner_edit(
                &bob,
                &c.id,
                OwnerUpdate {
                    priority: Some(Priority::High),
                    ..Default::default()
                }
            ),
            Err(Error::Forbidden)
        ));
        assert!(matches!(complaints.delete(&bob, &c.id), Err(Error::Forbidden)));
        assert!(matches!(
            complaints.get(&ann, "missing"),
            Err(Error::NotFound("complaint"))
        ));
    }

    #[test]
    fn admin_transition_is_permissive() {
        let (store, _dir) = make_store();
        let complaints = service(&store);
        let ann = caller("ann", Role::Submitter);
        let root = caller("root", Role::Administrator);
        let c = complaints.create(&ann, wifi()).unwrap();

        let resolved = complaints
            .admin_transition(
                &root,
                &c.id,
                AdminUpdate {
                    status: Some(ComplaintStatus::Resolved),
                    resolution: Some("router replaced".into()),
                    priority: Some(Priority::High),
                },
            )
            .unwrap();
        assert_eq!(resolved.status, ComplaintStatus::Resolved);
        assert_eq!(resolved.resolution.as_deref(), Some("router replaced"));
        assert_eq!(resolved.priority, Priority::High);
        assert_eq!(resolved.owner_id, "ann");

        let reopened = complaints
            .admin_transition(
                &root,
                &c.id,
                AdminUpdate {
                    status: Some(ComplaintStatus::Pending),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(reopened.status, ComplaintStatus::Pending);
        assert_eq!(reopened.resolution.as_deref(), Some("router replaced"));

        assert!(matches!(
            complaints.admin_transition(&root, &c.id, AdminUpdate::default()),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            complaints.admin_transition(
                &ann,
                &c.id,
                AdminUpdate {
                    status: Some(ComplaintStatus::Resolved),
                    ..Default::default()
                }
            ),
            Err(Error::Forbidden)
        ));
    }

    #[test]
    fn owner_edit_only_while_pending() {
        let (store, _dir) = make_store();
        let complaints = service(&store);
        let ann = caller("ann", Role::Submitter);
        let root = caller("root", Role::Administrator);
        let c = complaints.create(&ann, wifi()).unwrap();

        let edited = complaints
            .owner_edit(
                &ann,
                &c.id,
                OwnerUpdate {
                    title: Some("Wifi flaky".into()),
                    category: Some(Category::Hostel),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(edited.title, "Wifi flaky");
        assert_eq!(edited.category, Category::Hostel);
        assert_eq!(edited.status, ComplaintStatus::Pending);

        complaints
            .admin_transition(
                &root,
                &c.id,
                AdminUpdate {
                    status: Some(ComplaintStatus::InProgress),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(matches!(
            complaints.owner_edit(
                &ann,
                &c.id,
                OwnerUpdate {
                    title: Some("again".into()),
                    ..Default::default()
                }
            ),
            Err(Error::InvalidState(_))
        ));
        assert_eq!(complaints.get(&ann, &c.id).unwrap().title, "Wifi flaky");
    }

    #[test]
    fn empty_owner_edit_is_rejected_without_touching() {
        let (store, _dir) = make_store();
        let complaints = service(&store);
        let ann = caller("ann", Role::Submitter);
        let c = complaints.create(&ann, wifi()).unwrap();

        assert!(matches!(
            complaints.owner_edit(&ann, &c.id, OwnerUpdate::default()),
            Err(Error::Validation(_))
        ));
        let unchanged = complaints.get(&ann, &c.id).unwrap();
        assert_eq!(unchanged.updated_at, c.updated_at);
        assert_eq!(unchanged.title, c.title);
    }

    #[test]
    fn delete_by_owner_or_admin_in_any_status() {
        let (store, _dir) = make_store();
        let complaints = service(&store);
        let ann = caller("ann", Role::Submitter);
        let root = caller("root", Role::Administrator);

        let first = complaints.create(&ann, wifi()).unwrap();
        complaints
            .admin_transition(
                &root,
                &first.id,
                AdminUpdate {
                    status: Some(ComplaintStatus::Rejected),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(complaints.delete(&ann, &first.id).is_ok());

        let second = complaints.create(&ann, wifi()).unwrap();
        assert!(complaints.delete(&root, &second.id).is_ok());
        assert!(matches!(
            complaints.delete(&root, &second.id),
            Err(Error::NotFound("complaint"))
        ));
    }

    #[test]
    fn offline_gates_submitter_writes_only() {
        let (store, _dir) = make_store();
        let complaints = service(&store);
        let ann = caller("ann", Role::Submitter);
        let root = caller("root", Role::Administrator);
        let c = complaints.create(&ann, wifi()).unwrap();

        store.toggle_system_mode("root").unwrap();

        assert!(matches!(
            complaints.create(&ann, wifi()),
            Err(Error::SystemOffline)
        ));
        assert!(matches!(
            complaints.owner_edit(&ann, &c.id, OwnerUpdate::default()),
            Err(Error::SystemOffline)
        ));
        assert!(matches!(
            complaints.delete(&ann, &c.id),
            Err(Error::SystemOffline)
        ));
        assert!(complaints
            .admin_transition(
                &root,
                &c.id,
                AdminUpdate {
                    status: Some(ComplaintStatus::InProgress),
                    ..Default::default()
                },
            )
            .is_ok());
        assert_eq!(complaints.list(&ann).unwrap().len(), 1);
    }

    #[test]
    fn stats_are_admin_only() {
        let (store, _dir) = make_store();
        let complaints = service(&store);
        let ann = caller("ann", Role::Submitter);
        complaints.create(&ann, wifi()).unwrap();

        assert!(matches!(complaints.stats(&ann), Err(Error::Forbidden)));
        let stats = complaints
            .stats(&caller("root", Role::Administrator))
            .unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.category["Technical"], 1);
    }
}
