//! Session, tab and process lifecycle for Nexus.

mod coordinator;
mod generating;
mod notification;
mod restoration;
mod session_catalog;
mod snapshot_store;
mod subscription;

pub use coordinator::{
    ChangeKind, Coordinator, CoordinatorSnapshot, OpenedSession, Phase, StateChange, Tab, TabId,
};
pub use notification::{Notification, NotificationLevel};
pub use restoration::RestoreReport;
pub use session_catalog::{
    default_title, ProjectId, Session, SessionCatalog, SessionId, SessionUpdate,
};
pub use snapshot_store::{PersistedTab, SnapshotTracker, WorkspaceSnapshot, WorkspaceStore};
pub use subscription::Subscription;
