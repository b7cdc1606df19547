use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const DEFAULT_COMMAND: &[&str] = &["java", "-jar", "spigot.jar", "nogui", "--nojline"];

const EVENT_CHANNEL_CAPACITY: usize = 512;
const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("no command configured")]
    EmptyCommand,
    #[error("failed to spawn '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The child exited on its own.
    ProcessExited,
    /// Writing to the child's stdin failed.
    InputBroken,
    /// The supervisor dropped its side of the channel; the child was killed.
    Detached,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::ProcessExited => "process_exited",
            ExitReason::InputBroken => "input_broken",
            ExitReason::Detached => "detached",
        }
    }
}

#[derive(Debug)]
pub struct WorkerExit {
    pub reason: ExitReason,
    pub code: Option<i32>,
    /// Commands received but never written to the child, oldest first.
    pub unsent: Vec<String>,
}

impl WorkerExit {
    /// Stand-in for an exit event lost with a broken channel.
    pub fn channel_closed() -> Self {
        Self {
            reason: ExitReason::Detached,
            code: None,
            unsent: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub enum WorkerEvent {
    Line { stream: StreamKind, line: String },
    Exited(WorkerExit),
}

/// The supervisor's end of one child session.
pub struct WorkerHandle {
    pid: Option<u32>,
    commands: Option<mpsc::UnboundedSender<String>>,
    events: mpsc::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Hands a command to the worker, giving it back if the worker is gone.
    pub fn send(&self, command: String) -> Result<(), String> {
        match &self.commands {
            Some(commands) => commands.send(command).map_err(|err| err.0),
            None => Err(command),
        }
    }

    pub async fn recv(&mut self) -> Option<WorkerEvent> {
        self.events.recv().await
    }

    /// Closes the command side; the worker kills the child and reports exit.
    pub fn detach_input(&mut self) {
        self.commands = None;
    }
}

/// Spawns the child with piped stdio and starts its I/O pump.
pub fn spawn_worker(command: &[String], working_dir: Option<&Path>) -> Result<WorkerHandle, SpawnError> {
    let (program, args) = command.split_first().ok_or(SpawnError::EmptyCommand)?;
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }
    let mut child = cmd.spawn().map_err(|source| SpawnError::Io {
        program: program.clone(),
        source,
    })?;
    let pid = child.id();

    let stdin = child.stdin.take();
    let stdout = child.stdout.take().map(LineReader::new);
    let stderr = child.stderr.take().map(LineReader::new);

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(pump(child, stdin, stdout, stderr, commands_rx, events_tx));

    Ok(WorkerHandle {
        pid,
        commands: Some(commands_tx),
        events: events_rx,
    })
}

enum Ending {
    Exited(io::Result<ExitStatus>),
    Abort(ExitReason),
}

async fn pump<O, E>(
    mut child: Child,
    mut stdin: Option<ChildStdin>,
    mut stdout: Option<LineReader<O>>,
    mut stderr: Option<LineReader<E>>,
    mut commands: mpsc::UnboundedReceiver<String>,
    events: mpsc::Sender<WorkerEvent>,
) where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut unsent = Vec::new();
    let ending = loop {
        tokio::select! {
            biased;
            line = next_line(&mut stdout) => match line {
                Some(line) => {
                    if !forward(&events, StreamKind::Stdout, &line).await {
                        break Ending::Abort(ExitReason::Detached);
                    }
                }
                None => stdout = None,
            },
            line = next_line(&mut stderr) => match line {
                Some(line) => {
                    if !forward(&events, StreamKind::Stderr, &line).await {
                        break Ending::Abort(ExitReason::Detached);
                    }
                }
                None => stderr = None,
            },
            command = commands.recv() => match command {
                Some(command) => {
                    if let Err(err) = write_command(&mut stdin, &command).await {
                        warn!(event = "stdin_write_failed", error = %err);
                        unsent.push(command);
                        break Ending::Abort(ExitReason::InputBroken);
                    }
                }
                None => break Ending::Abort(ExitReason::Detached),
            },
            status = child.wait() => break Ending::Exited(status),
        }
    };

    let (reason, status) = match ending {
        Ending::Exited(status) => (ExitReason::ProcessExited, status),
        Ending::Abort(reason) => {
            if let Err(err) = child.start_kill() {
                debug!(event = "kill_failed", error = %err);
            }
            (reason, child.wait().await)
        }
    };
    let code = match status {
        Ok(status) => status.code(),
        Err(err) => {
            warn!(event = "wait_failed", error = %err);
            None
        }
    };

    if !events.is_closed() {
        let drain = async {
            if let Some(reader) = stdout.as_mut() {
                while let Some(line) = reader.next_line().await {
                    forward(&events, StreamKind::Stdout, &line).await;
                }
            }
            if let Some(reader) = stderr.as_mut() {
                while let Some(line) = reader.next_line().await {
                    forward(&events, StreamKind::Stderr, &line).await;
                }
            }
        };
        if tokio::time::timeout(EXIT_DRAIN_TIMEOUT, drain).await.is_err() {
            debug!(event = "output_drain_timeout");
        }
    }

    commands.close();
    while let Ok(command) = commands.try_recv() {
        unsent.push(command);
    }

    let _ = events
        .send(WorkerEvent::Exited(WorkerExit {
            reason,
            code,
            unsent,
        }))
        .await;
}

/// Pending forever once the stream is gone so `select!` ignores it.
async fn next_line<R: AsyncRead + Unpin>(reader: &mut Option<LineReader<R>>) -> Option<String> {
    match reader {
        Some(reader) => reader.next_line().await,
        None => std::future::pending().await,
    }
}

async fn forward(events: &mpsc::Sender<WorkerEvent>, stream: StreamKind, raw: &str) -> bool {
    for line in raw.split(['\n', '\r']).filter(|line| !line.is_empty()) {
        let event = WorkerEvent::Line {
            stream,
            line: line.to_string(),
        };
        if events.send(event).await.is_err() {
            return false;
        }
    }
    true
}

async fn write_command(stdin: &mut Option<ChildStdin>, command: &str) -> io::Result<()> {
    let pipe = stdin
        .as_mut()
        .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "child stdin closed"))?;
    pipe.write_all(command.as_bytes()).await?;
    pipe.flush().await
}

/// Line reader that survives being cancelled mid-line and tolerates
/// non-UTF-8 output.
struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// `None` at end of stream. Partial data stays buffered across
    /// cancellation because `buf` is only cleared once a line is complete.
    async fn next_line(&mut self) -> Option<String> {
        loop {
            match self.reader.read_until(b'\n', &mut self.buf).await {
                Ok(0) if self.buf.is_empty() => return None,
                Ok(0) => return Some(self.take_line()),
                Ok(_) if self.buf.ends_with(b"\n") => return Some(self.take_line()),
                Ok(_) => continue,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(event = "stream_read_failed", error = %err);
                    return None;
                }
            }
        }
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        line
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    async fn collect_until_exit(handle: &mut WorkerHandle) -> (Vec<(StreamKind, String)>, WorkerExit) {
        let mut lines = Vec::new();
        loop {
            match tokio::time::timeout(Duration::from_secs(10), handle.recv())
                .await
                .expect("worker event")
            {
                Some(WorkerEvent::Line { stream, line }) => lines.push((stream, line)),
                Some(WorkerEvent::Exited(exit)) => return (lines, exit),
                None => panic!("worker channel closed without exit event"),
            }
        }
    }

    #[tokio::test]
    async fn forwards_stdout_and_stderr_lines() {
        let mut handle = spawn_worker(&sh("echo out; echo err 1>&2; printf 'tail'"), None)
            .expect("spawn");
        let (lines, exit) = collect_until_exit(&mut handle).await;
        assert!(lines.contains(&(StreamKind::Stdout, "out".to_string())));
        assert!(lines.contains(&(StreamKind::Stderr, "err".to_string())));
        assert!(lines.contains(&(StreamKind::Stdout, "tail".to_string())));
        assert_eq!(exit.reason, ExitReason::ProcessExited);
        assert_eq!(exit.code, Some(0));
    }

    #[tokio::test]
    async fn writes_commands_to_stdin() {
        let mut handle = spawn_worker(&sh("read line; echo \"got $line\"; exit 3"), None)
            .expect("spawn");
        handle.send("hello there\n".to_string()).expect("send");
        let (lines, exit) = collect_until_exit(&mut handle).await;
        assert_eq!(lines, vec![(StreamKind::Stdout, "got hello there".to_string())]);
        assert_eq!(exit.code, Some(3));
    }

    #[tokio::test]
    async fn command_for_closed_stdin_is_handed_back() {
        let mut handle = spawn_worker(&sh("exec 0<&-; echo closed; exec sleep 30"), None)
            .expect("spawn");
        match tokio::time::timeout(Duration::from_secs(10), handle.recv())
            .await
            .expect("first line")
        {
            Some(WorkerEvent::Line { line, .. }) => assert_eq!(line, "closed"),
            other => panic!("unexpected event {other:?}"),
        }
        handle.send("say lost?\n".to_string()).expect("send");
        let (_, exit) = collect_until_exit(&mut handle).await;
        assert_eq!(exit.reason, ExitReason::InputBroken);
        assert_eq!(exit.unsent, vec!["say lost?\n".to_string()]);
    }

    #[tokio::test]
    async fn blank_lines_are_not_forwarded() {
        let mut handle = spawn_worker(&sh("printf 'a\\n\\n\\r\\nb\\n'"), None).expect("spawn");
        let (lines, _) = collect_until_exit(&mut handle).await;
        let texts: Vec<_> = lines.into_iter().map(|(_, line)| line).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn detaching_kills_the_child() {
        let mut handle = spawn_worker(&sh("sleep 30"), None).expect("spawn");
        handle.detach_input();
        let (_, exit) = collect_until_exit(&mut handle).await;
        assert_eq!(exit.reason, ExitReason::Detached);
        assert!(handle.send("late\n".to_string()).is_err());
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        assert!(matches!(spawn_worker(&[], None), Err(SpawnError::EmptyCommand)));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let result = spawn_worker(&["./definitely-not-a-real-server".to_string()], None);
        assert!(matches!(result, Err(SpawnError::Io { .. })));
    }
}
