//! Shared handler state.

use cgn_lifecycle::LifecycleService;

#[derive(Clone)]
pub struct AppState {
    pub service: LifecycleService,
}

impl AppState {
    pub const fn new(service: LifecycleService) -> Self {
        Self { service }
    }
}
