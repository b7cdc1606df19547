use crate::monitor::{info_message, wait_until_set, Directive, Monitor, Outbound};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("command text is empty")]
    Empty,
}

/// What the router does with an operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Clear,
    QuitAll,
    List,
    Forward,
}

impl CommandKind {
    pub fn parse(command: &str) -> Self {
        let keyword = command.trim().to_lowercase();
        match keyword.as_str() {
            "clear" => CommandKind::Clear,
            "quit-all" => CommandKind::QuitAll,
            "list" | "who" => CommandKind::List,
            _ => CommandKind::Forward,
        }
    }
}

/// Scrollback lines answering `list`/`who`.
pub fn roster_report(players: &[String]) -> Vec<String> {
    match players.len() {
        0 => vec![info_message("There are no players online. :-(")],
        1 => vec![
            info_message("There is 1 player online:"),
            players[0].clone(),
            "End of players list.".to_string(),
        ],
        count => vec![
            info_message(&format!("There are {count} players online:")),
            players.join(", "),
            "End of players list.".to_string(),
        ],
    }
}

impl Monitor {
    /// Routes one operator command.
    ///
    /// The command is always echoed to the scrollback first. `quit-all` only
    /// returns after the server stopped (or the quit timeout elapsed) and the
    /// monitor shutdown was requested. The quit sequence runs on its own task,
    /// so it completes even if the caller stops waiting.
    pub async fn submit_command(self: &Arc<Self>, raw: &str) -> Result<CommandKind, CommandError> {
        let command = raw.trim();
        if command.is_empty() {
            return Err(CommandError::Empty);
        }
        self.add_message(format!("> {command}"));

        let kind = CommandKind::parse(command);
        match kind {
            CommandKind::Clear => self.scrollback().clear(),
            CommandKind::QuitAll => {
                let monitor = Arc::clone(self);
                if let Err(err) = tokio::spawn(async move { monitor.quit_all().await }).await {
                    warn!(event = "quit_all_task_failed", error = %err);
                }
            }
            CommandKind::List => {
                self.scrollback().append_all(roster_report(&self.roster()));
            }
            CommandKind::Forward => {
                if !self.enqueue(Outbound::Child(format!("{command}\n"))) {
                    warn!(event = "command_dropped", command = %command);
                    self.add_info("The monitor is shutting down; command not sent.");
                } else {
                    debug!(event = "command_queued", command = %command);
                }
            }
        }
        Ok(kind)
    }

    async fn quit_all(&self) {
        info!(event = "quit_all");
        self.begin_quit();

        let mut exits = self.session_exits();
        exits.borrow_and_update();

        if !self.status().is_stopped() {
            self.enqueue(Outbound::Child("stop\n".to_string()));
            let shutdown = wait_until_set(self.shutdown_signal());
            let stopped = tokio::time::timeout(self.config.quit_timeout, async {
                tokio::select! {
                    _ = exits.changed() => {}
                    _ = shutdown => {}
                }
            })
            .await;
            if stopped.is_err() {
                warn!(event = "quit_all_timeout", timeout_secs = self.config.quit_timeout.as_secs());
                self.add_info("The server did not stop in time; shutting down anyway.");
            }
        }

        self.enqueue(Outbound::Monitor(Directive::Quit));
        self.request_shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::MonitorConfig;
    use crate::state::ServerState;
    use std::sync::Mutex;
    use std::time::Duration;

    fn lines_since_start(monitor: &Monitor) -> Vec<String> {
        monitor
            .scrollback_since(0)
            .expect("valid id")
            .unwrap_or_default()
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(CommandKind::parse("LIST"), CommandKind::List);
        assert_eq!(CommandKind::parse("Who"), CommandKind::List);
        assert_eq!(CommandKind::parse("Quit-All"), CommandKind::QuitAll);
        assert_eq!(CommandKind::parse("clear"), CommandKind::Clear);
        assert_eq!(CommandKind::parse("say list"), CommandKind::Forward);
    }

    #[tokio::test]
    async fn forwarded_commands_keep_casing_and_get_newline() {
        let (monitor, mut rx) = Monitor::new(MonitorConfig::default());
        let kind = monitor.submit_command("Say Hello World").await.expect("routed");
        assert_eq!(kind, CommandKind::Forward);
        assert_eq!(
            rx.try_recv().expect("queued"),
            Outbound::Child("Say Hello World\n".to_string())
        );
        assert_eq!(lines_since_start(&monitor), vec!["> Say Hello World"]);
    }

    #[tokio::test]
    async fn blank_commands_are_rejected() {
        let (monitor, mut rx) = Monitor::new(MonitorConfig::default());
        assert_eq!(monitor.submit_command("   ").await, Err(CommandError::Empty));
        assert!(rx.try_recv().is_err());
        assert_eq!(monitor.scrollback().total(), 0);
    }

    #[tokio::test]
    async fn list_enumerates_roster_without_forwarding() {
        let (monitor, mut rx) = Monitor::new(MonitorConfig::default());
        monitor.update_state(|state| {
            state.roster.join("Steve");
            state.roster.join("Alex");
        });
        monitor.submit_command("list").await.expect("routed");
        let lines = lines_since_start(&monitor);
        assert_eq!(lines[0], "> list");
        assert!(lines[1].ends_with("There are 2 players online:"));
        assert_eq!(lines[2], "Steve, Alex");
        assert_eq!(lines[3], "End of players list.");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn who_with_empty_roster_says_so() {
        let (monitor, _rx) = Monitor::new(MonitorConfig::default());
        monitor.submit_command("WHO").await.expect("routed");
        let lines = lines_since_start(&monitor);
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("There are no players online."));
    }

    #[test]
    fn single_player_uses_singular_phrasing() {
        let lines = roster_report(&["Steve".to_string()]);
        assert!(lines[0].ends_with("There is 1 player online:"));
        assert_eq!(lines[1], "Steve");
    }

    #[tokio::test]
    async fn clear_empties_history_and_resets_ids() {
        let (monitor, _rx) = Monitor::new(MonitorConfig::default());
        monitor.add_message("old line");
        monitor.submit_command("clear").await.expect("routed");
        assert_eq!(monitor.scrollback().total(), 0);
        assert_eq!(monitor.add_message("new line"), 1);
    }

    #[tokio::test]
    async fn quit_all_waits_for_session_exit_before_quit() {
        let (monitor, mut rx) = Monitor::new(MonitorConfig::default());
        monitor.update_state(|state| state.status = ServerState::Running);
        let order = Arc::new(Mutex::new(Vec::new()));

        let fake_supervisor = {
            let monitor = monitor.clone();
            let order = order.clone();
            tokio::spawn(async move {
                while let Some(item) = rx.recv().await {
                    match item {
                        Outbound::Child(command) => {
                            assert_eq!(command, "stop\n");
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            monitor.update_state(|state| state.status = ServerState::Stopped);
                            order.lock().unwrap().push("exited");
                            monitor.notify_session_exit();
                        }
                        Outbound::Monitor(Directive::Quit) => {
                            order.lock().unwrap().push("quit");
                            break;
                        }
                    }
                }
            })
        };

        monitor.submit_command("quit-all").await.expect("routed");
        fake_supervisor.await.expect("fake supervisor");
        assert_eq!(*order.lock().unwrap(), vec!["exited", "quit"]);
        assert!(monitor.is_shutting_down());
        assert!(monitor.is_quitting());
    }

    #[tokio::test]
    async fn quit_all_finishes_after_caller_gives_up() {
        let (monitor, mut rx) = Monitor::new(MonitorConfig::default());
        monitor.update_state(|state| state.status = ServerState::Running);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), monitor.submit_command("quit-all")).await;
        assert!(abandoned.is_err());
        assert_eq!(rx.recv().await, Some(Outbound::Child("stop\n".to_string())));
        assert!(monitor.is_quitting());
        assert!(!monitor.is_shutting_down());

        monitor.update_state(|state| state.status = ServerState::Stopped);
        monitor.notify_session_exit();
        let quit = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("quit directive");
        assert_eq!(quit, Some(Outbound::Monitor(Directive::Quit)));
        tokio::time::timeout(Duration::from_secs(1), monitor.wait_for_shutdown())
            .await
            .expect("shutdown requested");
    }

    #[tokio::test]
    async fn quit_all_skips_stop_when_server_is_down() {
        let (monitor, mut rx) = Monitor::new(MonitorConfig::default());
        monitor.submit_command("quit-all").await.expect("routed");
        assert_eq!(
            rx.try_recv().expect("directive"),
            Outbound::Monitor(Directive::Quit)
        );
        assert!(monitor.is_shutting_down());
    }

    #[tokio::test]
    async fn quit_all_wait_is_bounded() {
        let (monitor, mut rx) = Monitor::new(MonitorConfig {
            quit_timeout: Duration::from_millis(50),
            ..MonitorConfig::default()
        });
        monitor.update_state(|state| state.status = ServerState::Running);
        monitor.submit_command("quit-all").await.expect("routed");
        assert_eq!(
            rx.try_recv().expect("stop"),
            Outbound::Child("stop\n".to_string())
        );
        assert_eq!(
            rx.try_recv().expect("quit"),
            Outbound::Monitor(Directive::Quit)
        );
        let lines = lines_since_start(&monitor);
        assert!(lines.iter().any(|line| line.contains("did not stop in time")));
    }
}
