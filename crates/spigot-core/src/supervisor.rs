use crate::events::{self, LineEvent};
use crate::monitor::{Directive, Monitor, Outbound, OutboundReceiver};
use crate::state::{Diagnostics, ServerState};
use crate::worker::{self, SpawnError, StreamKind, WorkerEvent, WorkerExit, WorkerHandle};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const STOPPED_NOTICE: &str =
    "The server has stopped. Type 'start' to start. Type 'quit' to close Spigot Monitor";
const RESTARTING_NOTICE: &str = "The server has stopped. Restarting.";
const CLOSING_NOTICE: &str = "The server has stopped. Closing Spigot Monitor.";
const HELD_NOTICE: &str = "The server is stopped; the command will be sent once it starts.";

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub command: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub auto_restart: bool,
    /// Report `Running` right after spawn instead of waiting for the
    /// startup-complete line.
    pub optimistic_running: bool,
    /// Pause before an automatic respawn.
    pub restart_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            command: worker::DEFAULT_COMMAND.iter().map(|arg| arg.to_string()).collect(),
            working_dir: Some(PathBuf::from("spigot")),
            auto_restart: true,
            optimistic_running: true,
            restart_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    Running,
    StoppedAwaitingRestart,
    Terminated,
}

enum SessionEnd {
    Exited(WorkerExit),
    Quit,
}

enum AfterExit {
    Restart,
    AwaitOperator,
    Terminate,
}

enum Resume {
    Start,
    Quit,
}

/// Owns the child-process lifecycle.
///
/// Drains worker output into the event parser and scrollback, feeds queued
/// commands to the worker, and applies the restart policy whenever the
/// child exits. Commands that could not be delivered to a session are held
/// for the next one.
pub struct Supervisor {
    config: SupervisorConfig,
    monitor: Arc<Monitor>,
    outbound: OutboundReceiver,
    pending: VecDeque<String>,
    phase: Phase,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, monitor: Arc<Monitor>, outbound: OutboundReceiver) -> Self {
        Self {
            config,
            monitor,
            outbound,
            pending: VecDeque::new(),
            phase: Phase::NotStarted,
        }
    }

    /// Runs until an operator quits or a spawn fails. Either way the
    /// monitor shutdown is requested on return.
    pub async fn run(mut self) -> Result<(), SpawnError> {
        let result = self.drive().await;
        self.terminate();
        result
    }

    async fn drive(&mut self) -> Result<(), SpawnError> {
        let mut worker = self.start_session()?;
        loop {
            let exit = match self.serve(&mut worker).await {
                SessionEnd::Exited(exit) => exit,
                SessionEnd::Quit => return Ok(()),
            };

            let restart = self.config.auto_restart && !self.monitor.is_quitting();
            if restart {
                self.end_session(exit, &AfterExit::Restart);
                if !self.config.restart_delay.is_zero() {
                    tokio::time::sleep(self.config.restart_delay).await;
                }
            } else {
                self.end_session(exit, &AfterExit::AwaitOperator);
                if let Resume::Quit = self.await_operator().await {
                    return Ok(());
                }
            }
            worker = self.start_session()?;
        }
    }

    fn start_session(&mut self) -> Result<WorkerHandle, SpawnError> {
        let worker = match worker::spawn_worker(&self.config.command, self.config.working_dir.as_deref()) {
            Ok(worker) => worker,
            Err(err) => {
                error!(event = "spawn_failed", error = %err);
                self.monitor.add_info(&format!("Failed to start the server: {err}"));
                return Err(err);
            }
        };

        let status = if self.config.optimistic_running {
            ServerState::Running
        } else {
            ServerState::Starting
        };
        let pid = worker.pid();
        let session = self.monitor.update_state(|state| {
            state.status = status;
            state.diagnostics = Diagnostics::default();
            state.pid = pid;
            state.sessions_started += 1;
            state.sessions_started
        });
        self.transition(Phase::Running);
        info!(event = "worker_spawned", pid = ?pid, session, held_commands = self.pending.len());
        Ok(worker)
    }

    async fn serve(&mut self, worker: &mut WorkerHandle) -> SessionEnd {
        loop {
            self.flush_pending(worker);
            tokio::select! {
                event = worker.recv() => match event {
                    Some(WorkerEvent::Line { stream, line }) => self.ingest(stream, line),
                    Some(WorkerEvent::Exited(exit)) => return SessionEnd::Exited(exit),
                    None => {
                        warn!(event = "worker_channel_closed");
                        return SessionEnd::Exited(WorkerExit::channel_closed());
                    }
                },
                item = self.outbound.recv() => match item {
                    Some(Outbound::Child(command)) => self.pending.push_back(command),
                    Some(Outbound::Monitor(Directive::Quit)) | None => {
                        let exit = self.teardown(worker).await;
                        self.end_session(exit, &AfterExit::Terminate);
                        return SessionEnd::Quit;
                    }
                },
            }
        }
    }

    fn flush_pending(&mut self, worker: &WorkerHandle) {
        while let Some(command) = self.pending.pop_front() {
            debug!(event = "command_forwarded", command = %command.trim_end());
            if let Err(command) = worker.send(command) {
                self.pending.push_front(command);
                break;
            }
        }
    }

    /// Kills the session, still recording whatever it printed on the way out.
    async fn teardown(&mut self, worker: &mut WorkerHandle) -> WorkerExit {
        info!(event = "worker_teardown");
        worker.detach_input();
        while let Some(event) = worker.recv().await {
            match event {
                WorkerEvent::Line { stream, line } => self.ingest(stream, line),
                WorkerEvent::Exited(exit) => return exit,
            }
        }
        WorkerExit::channel_closed()
    }

    fn ingest(&mut self, stream: StreamKind, line: String) {
        debug!(event = "server_output", stream = stream.as_str(), line = %line);
        match events::classify(&line) {
            Ok(Some(event)) => self.apply(event),
            Ok(None) => {}
            Err(err) => warn!(event = "parse_error", error = %err, line = %line),
        }
        self.monitor.add_message(line);
    }

    fn apply(&mut self, event: LineEvent) {
        match event {
            LineEvent::Chat { sender } => debug!(event = "chat", player = %sender),
            LineEvent::StartupComplete { seconds } => {
                info!(event = "startup_complete", "startup time is {seconds} seconds");
                self.monitor.update_state(|state| {
                    state.diagnostics.startup_time = Some(seconds);
                    state.status = ServerState::Running;
                });
            }
            LineEvent::PlayerJoined { player } => {
                info!(event = "player_joined", "{player} joined the game");
                let added = self.monitor.update_state(|state| state.roster.join(&player));
                if !added {
                    debug!(event = "player_already_listed", player = %player);
                }
            }
            LineEvent::PlayerLeft { player } => {
                info!(event = "player_left", "{player} left the game");
                let removed = self.monitor.update_state(|state| state.roster.leave(&player));
                if !removed {
                    warn!(event = "roster_inconsistent", player = %player, "player left but was not listed");
                }
            }
            LineEvent::PlayerDied {
                player,
                cause,
                attacker,
            } => {
                info!(
                    event = "player_died",
                    player = %player,
                    cause = cause.as_str(),
                    attacker = attacker.as_deref().unwrap_or("-")
                );
            }
        }
    }

    fn end_session(&mut self, exit: WorkerExit, next: &AfterExit) {
        let WorkerExit {
            reason,
            code,
            unsent,
        } = exit;
        let returned = unsent.len();
        for command in unsent.into_iter().rev() {
            self.pending.push_front(command);
        }
        info!(
            event = "server_stopped",
            reason = reason.as_str(),
            code = ?code,
            returned_commands = returned,
            held_commands = self.pending.len()
        );

        self.monitor.update_state(|state| {
            state.status = ServerState::Stopped;
            state.roster.clear();
            state.pid = None;
        });
        self.transition(Phase::StoppedAwaitingRestart);
        match next {
            AfterExit::Restart => self.monitor.add_info(RESTARTING_NOTICE),
            AfterExit::AwaitOperator => self.monitor.add_info(STOPPED_NOTICE),
            AfterExit::Terminate => self.monitor.add_info(CLOSING_NOTICE),
        };
        self.monitor.notify_session_exit();
    }

    async fn await_operator(&mut self) -> Resume {
        loop {
            match self.outbound.recv().await {
                Some(Outbound::Child(command)) => {
                    let keyword = command.trim().to_lowercase();
                    match keyword.as_str() {
                        "start" => {
                            info!(event = "operator_start");
                            return Resume::Start;
                        }
                        "quit" | "stop" => return self.farewell(),
                        _ => {
                            debug!(event = "command_held", command = %command.trim_end());
                            self.pending.push_back(command);
                            self.monitor.add_info(HELD_NOTICE);
                        }
                    }
                }
                Some(Outbound::Monitor(Directive::Quit)) | None => return self.farewell(),
            }
        }
    }

    fn farewell(&self) -> Resume {
        info!(event = "operator_quit");
        self.monitor.add_info("KTHXBAI");
        Resume::Quit
    }

    fn transition(&mut self, next: Phase) {
        debug!(event = "supervisor_phase", from = ?self.phase, to = ?next);
        self.phase = next;
    }

    fn terminate(&mut self) {
        self.transition(Phase::Terminated);
        self.monitor.update_state(|state| {
            state.status = ServerState::Stopped;
            state.roster.clear();
            state.pid = None;
        });
        if !self.pending.is_empty() {
            warn!(event = "commands_discarded", count = self.pending.len());
        }
        info!(event = "supervisor_terminated");
        self.monitor.request_shutdown();
    }
}
