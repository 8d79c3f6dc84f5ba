use std::{fmt, sync::Arc};

use autoapply_core::scheduler::{JobStore, SchedulerController};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub scheduler: Arc<SchedulerController>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(store: Arc<dyn JobStore>, scheduler: Arc<SchedulerController>) -> Self {
        Self { store, scheduler }
    }

    pub fn store(&self) -> &dyn JobStore {
        self.store.as_ref()
    }

    pub fn scheduler(&self) -> &SchedulerController {
        &self.scheduler
    }
}
