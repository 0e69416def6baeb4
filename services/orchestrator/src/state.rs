//! Application state shared across request handlers.

use std::sync::Arc;

use crate::provision::Provisioner;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    provisioner: Provisioner,
}

impl AppState {
    /// Create a new application state.
    pub fn new(provisioner: Provisioner) -> Self {
        Self {
            inner: Arc::new(AppStateInner { provisioner }),
        }
    }

    /// The provisioning workflow.
    pub fn provisioner(&self) -> &Provisioner {
        &self.inner.provisioner
    }
}
