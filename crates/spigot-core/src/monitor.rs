use crate::scrollback::{Scrollback, ScrollbackError, DEFAULT_SCROLLBACK_CAPACITY};
use crate::state::{Diagnostics, ServerSnapshot, ServerState};
use chrono::Local;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub const INFO_TAG: &str = "SPIGOT-MONITOR";
pub const DEFAULT_QUIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Formats an informational scrollback line, e.g. `[12:00:00 SPIGOT-MONITOR] hi`.
pub fn info_message(message: &str) -> String {
    format!("[{} {INFO_TAG}] {message}", Local::now().format("%H:%M:%S"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Quit,
}

/// One item on the outbound command queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Newline-terminated text for the child's stdin.
    Child(String),
    /// Addressed to the supervisor itself; never reaches the child.
    Monitor(Directive),
}

pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub scrollback_capacity: usize,
    /// Upper bound on how long `quit-all` waits for the server to stop.
    pub quit_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            scrollback_capacity: DEFAULT_SCROLLBACK_CAPACITY,
            quit_timeout: DEFAULT_QUIT_TIMEOUT,
        }
    }
}

/// State shared between the supervisor and whoever serves operators.
///
/// The supervisor is the only writer of [`ServerSnapshot`]; everyone may
/// append to the scrollback and enqueue commands. Reads never wait on the
/// child process.
pub struct Monitor {
    pub(crate) config: MonitorConfig,
    scrollback: Scrollback,
    outbound: mpsc::UnboundedSender<Outbound>,
    state: RwLock<ServerSnapshot>,
    session_exits: watch::Sender<u64>,
    shutdown: watch::Sender<bool>,
    quitting: AtomicBool,
}

impl Monitor {
    /// Builds the shared handle and the queue receiver the supervisor drains.
    pub fn new(config: MonitorConfig) -> (Arc<Self>, OutboundReceiver) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (session_exits, _) = watch::channel(0);
        let (shutdown, _) = watch::channel(false);
        let monitor = Self {
            scrollback: Scrollback::new(config.scrollback_capacity),
            config,
            outbound,
            state: RwLock::new(ServerSnapshot::default()),
            session_exits,
            shutdown,
            quitting: AtomicBool::new(false),
        };
        (Arc::new(monitor), outbound_rx)
    }

    pub fn scrollback(&self) -> &Scrollback {
        &self.scrollback
    }

    pub fn scrollback_since(&self, last_seen: u64) -> Result<Option<Vec<String>>, ScrollbackError> {
        self.scrollback.since(last_seen)
    }

    pub fn add_message(&self, line: impl Into<String>) -> u64 {
        self.scrollback.append(line)
    }

    pub fn add_info(&self, message: &str) -> u64 {
        self.scrollback.append(info_message(message))
    }

    pub fn snapshot(&self) -> ServerSnapshot {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn status(&self) -> ServerState {
        self.snapshot().status
    }

    pub fn roster(&self) -> Vec<String> {
        self.snapshot().roster.players().to_vec()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.snapshot().diagnostics
    }

    pub(crate) fn update_state<R>(&self, apply: impl FnOnce(&mut ServerSnapshot) -> R) -> R {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        apply(&mut state)
    }

    /// Returns false once the supervisor has gone away.
    pub(crate) fn enqueue(&self, item: Outbound) -> bool {
        self.outbound.send(item).is_ok()
    }

    pub(crate) fn notify_session_exit(&self) {
        self.session_exits.send_modify(|count| *count += 1);
    }

    /// Counter bumped each time a worker session ends.
    pub fn session_exits(&self) -> watch::Receiver<u64> {
        self.session_exits.subscribe()
    }

    pub(crate) fn begin_quit(&self) {
        self.quitting.store(true, Ordering::SeqCst);
    }

    pub fn is_quitting(&self) -> bool {
        self.quitting.load(Ordering::SeqCst)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Resolves once the monitor as a whole should exit.
    pub async fn wait_for_shutdown(&self) {
        wait_until_set(self.shutdown_signal()).await;
    }
}

pub(crate) async fn wait_until_set(mut flag: watch::Receiver<bool>) {
    loop {
        let set = *flag.borrow_and_update();
        if set || flag.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_message_carries_tag() {
        let line = info_message("hello");
        assert!(line.starts_with('['));
        assert!(line.ends_with(" SPIGOT-MONITOR] hello"));
    }

    #[test]
    fn snapshot_reflects_updates() {
        let (monitor, _rx) = Monitor::new(MonitorConfig::default());
        assert_eq!(monitor.status(), ServerState::Stopped);
        monitor.update_state(|state| {
            state.status = ServerState::Running;
            state.roster.join("Steve");
            state.diagnostics.startup_time = Some(3.5);
        });
        assert_eq!(monitor.status(), ServerState::Running);
        assert_eq!(monitor.roster(), vec!["Steve".to_string()]);
        assert_eq!(monitor.diagnostics().startup_time, Some(3.5));
    }

    #[tokio::test]
    async fn shutdown_wakes_waiters() {
        let (monitor, _rx) = Monitor::new(MonitorConfig::default());
        let waiter = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.wait_for_shutdown().await })
        };
        monitor.request_shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter finished")
            .expect("join");
        assert!(monitor.is_shutting_down());
    }

    #[test]
    fn enqueue_reports_closed_queue() {
        let (monitor, rx) = Monitor::new(MonitorConfig::default());
        assert!(monitor.enqueue(Outbound::Child("say hi\n".to_string())));
        drop(rx);
        assert!(!monitor.enqueue(Outbound::Child("say bye\n".to_string())));
    }
}
