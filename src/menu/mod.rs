//! Operator control surface
//!
//! A control surface shows the daemon's title and lets an operator ask it
//! to quit. The daemon only talks to it through [`ControlSurface`]; which
//! implementation is used is decided by configuration.

pub mod mock;

use std::io::{BufRead, IsTerminal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::APP_NAME;
use crate::daemon::DaemonHandle;

/// Something that can display the daemon and raise a quit request
pub trait ControlSurface: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &'static str;

    /// Give the surface the handle it uses to request shutdown.
    fn attach(&mut self, handle: DaemonHandle);

    /// Display the surface with the given title.
    fn show(&mut self, title: &str);

    /// Tear the surface down. Further quit input is ignored.
    fn close(&mut self);
}

/// Pick the surface for a daemon.
pub fn for_config(enable_menu: bool) -> Box<dyn ControlSurface> {
    if enable_menu {
        Box::new(ConsoleMenu::new())
    } else {
        Box::new(HeadlessMenu)
    }
}

/// No surface at all
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessMenu;

impl ControlSurface for HeadlessMenu {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn attach(&mut self, _handle: DaemonHandle) {}

    fn show(&mut self, _title: &str) {}

    fn close(&mut self) {}
}

/// Terminal menu: prints the title and a quit item, then reads commands
/// from stdin on a background thread.
///
/// Only active when stdin is a terminal.
#[derive(Debug, Default)]
pub struct ConsoleMenu {
    handle: Option<DaemonHandle>,
    closed: Arc<AtomicBool>,
}

impl ConsoleMenu {
    pub fn new() -> Self {
        Self::default()
    }
}

/// True for the input lines that mean "quit".
pub fn is_quit_command(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "q" | "quit")
}

impl ControlSurface for ConsoleMenu {
    fn name(&self) -> &'static str {
        "console"
    }

    fn attach(&mut self, handle: DaemonHandle) {
        self.handle = Some(handle);
    }

    fn show(&mut self, title: &str) {
        let Some(handle) = self.handle.clone() else {
            warn!("Console menu shown before being attached; ignoring");
            return;
        };
        if !std::io::stdin().is_terminal() {
            debug!("stdin is not a terminal; console menu disabled");
            return;
        }

        println!("{}", title);
        println!("  q) Quit {}", APP_NAME);

        let closed = self.closed.clone();
        let spawned = std::thread::Builder::new()
            .name("console-menu".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    if closed.load(Ordering::SeqCst) {
                        break;
                    }
                    if is_quit_command(&line) {
                        handle.request_shutdown();
                        break;
                    }
                }
            });
        if let Err(e) = spawned {
            warn!("Failed to start console menu: {}", e);
        }
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quit_commands() {
        assert!(is_quit_command("q"));
        assert!(is_quit_command("quit\n"));
        assert!(is_quit_command("  QUIT "));
        assert!(!is_quit_command("quiet"));
        assert!(!is_quit_command(""));
    }

    #[test]
    fn test_for_config_selects_surface() {
        assert_eq!(for_config(false).name(), "headless");
        assert_eq!(for_config(true).name(), "console");
    }
}
