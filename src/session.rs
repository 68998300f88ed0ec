//! Per-session filter state over one shared fact table.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::controller::{Controller, Dashboard, DashboardEvent};
use crate::fact_table::FactTable;
use crate::filter::FilterState;

/// Sessions hold only their `FilterState`; the table is shared read-only.
/// Events for one session run under that session's entry lock, so they apply
/// one at a time, while other sessions proceed independently.
pub struct SessionManager {
    controller: Controller,
    sessions: DashMap<Uuid, FilterState>,
}

impl SessionManager {
    pub fn new(table: Arc<FactTable>) -> Self {
        Self {
            controller: Controller::new(table),
            sessions: DashMap::new(),
        }
    }

    /// Starts a session with every filter cleared.
    pub fn open(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions.insert(id, FilterState::default());
        tracing::debug!(session = %id, "session opened");
        id
    }

    /// Applies `event` to the session and returns its recomputed dashboard.
    pub fn dispatch(&self, session_id: Uuid, event: DashboardEvent) -> Option<Dashboard> {
        let mut state = self.sessions.get_mut(&session_id)?;
        Some(self.controller.dispatch(state.value_mut(), event))
    }

    pub fn snapshot(&self, session_id: Uuid) -> Option<Dashboard> {
        let state = self.sessions.get(&session_id)?;
        Some(self.controller.render(state.value()))
    }

    pub fn close(&self, session_id: Uuid) -> Option<FilterState> {
        self.sessions.remove(&session_id).map(|(_, state)| state)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }
}
