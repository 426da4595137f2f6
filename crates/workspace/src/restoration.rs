//! Reopening the previous workspace at startup.

use crate::coordinator::{Coordinator, Phase};
use crate::snapshot_store::WorkspaceStore;

/// Outcome of [`Coordinator::restore_workspace`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    /// Entries whose session is gone or already open.
    pub skipped: usize,
    pub failed: usize,
}

impl Coordinator {
    /// Reopen the tabs saved in `store`.
    ///
    /// Runs at most once per coordinator; later calls return `None`. Entries
    /// whose session no longer exists are skipped, spawn failures are
    /// reported and skipped, and the saved focus is clamped to the tabs that
    /// actually opened. The coordinator is live afterwards whatever happened.
    pub async fn restore_workspace(&self, store: &WorkspaceStore) -> Option<RestoreReport> {
        let _op = self.lock_operations().await;

        if !self.transition(Phase::Idle, Phase::Restoring) {
            tracing::debug!("Workspace restoration already ran");
            return None;
        }

        let snapshot = store.load().await;
        let catalog = self.catalog().clone();
        catalog.load().await;

        let mut report = RestoreReport::default();
        for entry in &snapshot.tabs {
            let Some(session) = catalog.get(entry.session_id) else {
                tracing::debug!("Skipping saved tab for missing session {}", entry.session_id);
                report.skipped += 1;
                continue;
            };
            if self.tab_for_session(session.id).is_some() {
                tracing::debug!("Skipping saved tab for open session {}", session.id);
                report.skipped += 1;
                continue;
            }

            let title = if entry.title.is_empty() {
                session.title.clone()
            } else {
                entry.title.clone()
            };
            match self.spawn_tab(&session, title, false).await {
                Ok(_) => report.restored += 1,
                Err(e) => {
                    self.report_spawn_failure(&session, &e);
                    report.failed += 1;
                }
            }
        }

        if let Some(index) = snapshot.focused_index {
            self.focus_index(index);
        }

        self.transition(Phase::Restoring, Phase::Live);
        tracing::info!(
            "Restored {} tab(s), skipped {}, failed {}",
            report.restored,
            report.skipped,
            report.failed
        );
        Some(report)
    }

    /// Go live without restoring anything. Returns false if restoration
    /// already started.
    pub fn skip_restoration(&self) -> bool {
        self.transition(Phase::Idle, Phase::Live)
    }
}
