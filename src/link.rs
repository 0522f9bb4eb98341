//! USB link lifecycle
//!
//! The device controller (UDC) publishes its state in sysfs. The watcher polls
//! that file and turns state changes into [`LinkEvent`]s for the driver.
//!
//! ```text
//!  detached ──► configured        Connected
//!  configured ──► detached        Disconnected
//!  any ──► suspended              Suspended
//!  suspended ──► configured       Resumed, or Connected if the suspend
//!                                 was not entered from configured
//!  suspended ──► detached         Disconnected
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const UDC_CLASS_DIR: &str = "/sys/class/udc";

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("No USB device controller found in {0}")]
    NoController(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Link event receiver dropped")]
    ChannelClosed,
}

/// Coarse controller state as far as the indicator cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdcState {
    Detached,
    Configured,
    Suspended,
}

impl UdcState {
    /// Maps the kernel's state string (`usb_state_string`)
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "configured" => UdcState::Configured,
            "suspended" => UdcState::Suspended,
            _ => UdcState::Detached,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
    Suspended,
    Resumed,
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEvent::Connected => write!(f, "connected"),
            LinkEvent::Disconnected => write!(f, "disconnected"),
            LinkEvent::Suspended => write!(f, "suspended"),
            LinkEvent::Resumed => write!(f, "resumed"),
        }
    }
}

/// Event for a state change, if any
pub fn transition(from: UdcState, to: UdcState) -> Option<LinkEvent> {
    use UdcState::*;

    match (from, to) {
        (a, b) if a == b => None,
        (_, Suspended) => Some(LinkEvent::Suspended),
        (Detached, Configured) => Some(LinkEvent::Connected),
        (Suspended, Configured) => Some(LinkEvent::Resumed),
        (_, Detached) => Some(LinkEvent::Disconnected),
        _ => None,
    }
}

/// State file of `udc`, or of the first controller found when none is named
pub fn resolve_state_path(class_dir: &Path, udc: Option<&str>) -> Result<PathBuf, LinkError> {
    if let Some(name) = udc {
        return Ok(class_dir.join(name).join("state"));
    }

    let entries = std::fs::read_dir(class_dir).map_err(|e| LinkError::Io {
        path: class_dir.display().to_string(),
        source: e,
    })?;
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    let first = names
        .into_iter()
        .next()
        .ok_or_else(|| LinkError::NoController(class_dir.display().to_string()))?;
    info!("Using USB device controller {}", first);
    Ok(class_dir.join(first).join("state"))
}

pub struct LinkWatcher {
    state_path: PathBuf,
    last: UdcState,
    // state the current suspend was entered from
    suspended_from: UdcState,
    missing_reported: bool,
}

impl LinkWatcher {
    pub fn new(state_path: PathBuf) -> Self {
        Self {
            state_path,
            last: UdcState::Detached,
            suspended_from: UdcState::Detached,
            missing_reported: false,
        }
    }

    pub fn last_state(&self) -> UdcState {
        self.last
    }

    async fn read_state(&mut self) -> UdcState {
        match tokio::fs::read_to_string(&self.state_path).await {
            Ok(raw) => {
                self.missing_reported = false;
                UdcState::parse(&raw)
            }
            Err(e) => {
                if !self.missing_reported {
                    warn!(
                        "Cannot read UDC state from {}: {}",
                        self.state_path.display(),
                        e
                    );
                    self.missing_reported = true;
                }
                UdcState::Detached
            }
        }
    }

    /// Reads the state once; returns the event for a change
    pub async fn poll_once(&mut self) -> Option<LinkEvent> {
        let state = self.read_state().await;
        let mut event = transition(self.last, state);
        if state == UdcState::Suspended && self.last != UdcState::Suspended {
            self.suspended_from = self.last;
        }
        // the host never configured us before suspending, so this is the first connect
        if event == Some(LinkEvent::Resumed) && self.suspended_from != UdcState::Configured {
            event = Some(LinkEvent::Connected);
        }
        if event.is_some() {
            debug!("UDC state {:?} -> {:?}", self.last, state);
        }
        self.last = state;
        event
    }

    /// Polls until cancelled or the receiver is gone
    pub async fn run(
        mut self,
        poll: Duration,
        events: mpsc::Sender<LinkEvent>,
        cancel: CancellationToken,
    ) -> Result<(), LinkError> {
        info!(
            "Watching {} every {}ms",
            self.state_path.display(),
            poll.as_millis()
        );
        let mut interval = tokio::time::interval(poll);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Link watcher cancelled");
                    return Ok(());
                }
                _ = interval.tick() => {
                    if let Some(event) = self.poll_once().await {
                        info!("USB link {}", event);
                        events.send(event).await.map_err(|_| LinkError::ChannelClosed)?;
                    }
                }
            }
        }
    }
}

/// Spawns the watcher as its own task
pub fn spawn_watcher(
    state_path: PathBuf,
    poll: Duration,
    events: mpsc::Sender<LinkEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let watcher = LinkWatcher::new(state_path);
    tokio::spawn(async move {
        if let Err(e) = watcher.run(poll, events, cancel).await {
            warn!("Link watcher stopped: {}", e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dualjoy-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn parses_kernel_state_strings() {
        assert_eq!(UdcState::parse("configured\n"), UdcState::Configured);
        assert_eq!(UdcState::parse("suspended\n"), UdcState::Suspended);
        assert_eq!(UdcState::parse("not attached\n"), UdcState::Detached);
        assert_eq!(UdcState::parse("default"), UdcState::Detached);
        assert_eq!(UdcState::parse("addressed"), UdcState::Detached);
    }

    #[test]
    fn transition_table() {
        use UdcState::*;

        assert_eq!(transition(Detached, Configured), Some(LinkEvent::Connected));
        assert_eq!(transition(Configured, Detached), Some(LinkEvent::Disconnected));
        assert_eq!(transition(Configured, Suspended), Some(LinkEvent::Suspended));
        assert_eq!(transition(Detached, Suspended), Some(LinkEvent::Suspended));
        assert_eq!(transition(Suspended, Configured), Some(LinkEvent::Resumed));
        assert_eq!(transition(Suspended, Detached), Some(LinkEvent::Disconnected));
        for state in [Detached, Configured, Suspended] {
            assert_eq!(transition(state, state), None);
        }
    }

    #[test]
    fn resolves_named_and_first_controller() {
        let dir = scratch_dir("udc-class");
        fs::create_dir_all(dir.join("fe980000.usb")).unwrap();
        fs::create_dir_all(dir.join("3f980000.usb")).unwrap();

        assert_eq!(
            resolve_state_path(&dir, Some("fe980000.usb")).unwrap(),
            dir.join("fe980000.usb").join("state")
        );
        assert_eq!(
            resolve_state_path(&dir, None).unwrap(),
            dir.join("3f980000.usb").join("state")
        );

        let empty = dir.join("3f980000.usb");
        assert!(matches!(
            resolve_state_path(&empty, None),
            Err(LinkError::NoController(_))
        ));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn poll_follows_state_file() {
        let dir = scratch_dir("udc-poll");
        let state = dir.join("state");
        let mut watcher = LinkWatcher::new(state.clone());

        // missing file reads as detached
        assert_eq!(watcher.poll_once().await, None);

        let steps = [
            ("not attached\n", None),
            ("configured\n", Some(LinkEvent::Connected)),
            ("configured\n", None),
            ("suspended\n", Some(LinkEvent::Suspended)),
            ("configured\n", Some(LinkEvent::Resumed)),
            ("not attached\n", Some(LinkEvent::Disconnected)),
        ];
        for (raw, expected) in steps {
            fs::write(&state, raw).unwrap();
            assert_eq!(watcher.poll_once().await, expected, "state {:?}", raw);
        }

        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn wake_from_suspend_at_startup_is_a_connect() {
        let dir = scratch_dir("udc-suspended-start");
        let state = dir.join("state");
        let mut watcher = LinkWatcher::new(state.clone());

        let steps = [
            ("suspended\n", Some(LinkEvent::Suspended)),
            ("configured\n", Some(LinkEvent::Connected)),
            ("suspended\n", Some(LinkEvent::Suspended)),
            ("configured\n", Some(LinkEvent::Resumed)),
            ("not attached\n", Some(LinkEvent::Disconnected)),
            ("suspended\n", Some(LinkEvent::Suspended)),
            ("configured\n", Some(LinkEvent::Connected)),
        ];
        for (raw, expected) in steps {
            fs::write(&state, raw).unwrap();
            assert_eq!(watcher.poll_once().await, expected, "state {:?}", raw);
        }

        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn watcher_task_reports_and_stops_on_cancel() {
        let dir = scratch_dir("udc-task");
        let state = dir.join("state");
        fs::write(&state, "configured\n").unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = spawn_watcher(state, Duration::from_millis(5), tx, cancel.clone());

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(LinkEvent::Connected));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        fs::remove_dir_all(&dir).unwrap();
    }
}
