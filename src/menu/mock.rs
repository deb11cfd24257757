//! Mock control surface for testing.
//!
//! Records what the daemon shows and lets a test press "quit".

use std::sync::{Arc, Mutex, MutexGuard};

use super::ControlSurface;
use crate::daemon::DaemonHandle;

#[derive(Debug, Default)]
struct MockState {
    handle: Option<DaemonHandle>,
    title: Option<String>,
    closed: bool,
}

/// A control surface driven by tests. Clones share state, so a test can
/// keep one clone while the daemon owns another.
#[derive(Debug, Default, Clone)]
pub struct MockSurface {
    state: Arc<Mutex<MockState>>,
}

impl MockSurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Simulate the operator choosing "quit".
    ///
    /// Returns `false` if the surface was never attached, is closed, or the
    /// daemon had already been asked to shut down.
    pub fn click_quit(&self) -> bool {
        let handle = {
            let state = self.lock();
            if state.closed {
                return false;
            }
            state.handle.clone()
        };
        handle.map(|h| h.request_shutdown()).unwrap_or(false)
    }

    /// The title passed to `show`, if shown
    pub fn title(&self) -> Option<String> {
        self.lock().title.clone()
    }

    pub fn is_attached(&self) -> bool {
        self.lock().handle.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl ControlSurface for MockSurface {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn attach(&mut self, handle: DaemonHandle) {
        self.lock().handle = Some(handle);
    }

    fn show(&mut self, title: &str) {
        self.lock().title = Some(title.to_string());
    }

    fn close(&mut self) {
        self.lock().closed = true;
    }
}
