//! External profiler process: argument contract, output capture, and result finalization.
//!
//! One process per run. Positional arguments are appended to the configured command prefix as
//! `[target_path, color_mode, format_template]`. Stdout is buffered whole and parsed on exit; any
//! stderr output fails the run, but the process is still allowed to exit before finalizing.

use serde::{Deserialize, Serialize};

use std::fmt;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use crate::{ProfileError, ProfileErrorKind, StatsModel, parse_report};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const READ_CHUNK: usize = 8 * 1024;

/// Which measurement the profiler uses to color lines. Wire values are `"1"`, `"2"`, `"3"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorMode {
    #[serde(rename = "1")]
    Calls,
    #[serde(rename = "2")]
    ExecTime,
    #[default]
    #[serde(rename = "3")]
    TotalTime,
}

impl ColorMode {
    pub fn as_arg(self) -> &'static str {
        match self {
            Self::Calls => "1",
            Self::ExecTime => "2",
            Self::TotalTime => "3",
        }
    }
}

impl FromStr for ColorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(Self::Calls),
            "2" => Ok(Self::ExecTime),
            "3" => Ok(Self::TotalTime),
            other => Err(format!(
                "unknown color selection {other:?} (expected 1 = calls, 2 = exec time, 3 = total time)"
            )),
        }
    }
}

/// Command prefix used to start the profiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilerCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for ProfilerCommand {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            args: vec!["read-stats.py".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub target: String,
    pub color_mode: ColorMode,
    pub format: String,
    pub timeout: Option<Duration>,
}

impl RunRequest {
    pub fn argv(&self) -> [&str; 3] {
        [&self.target, self.color_mode.as_arg(), &self.format]
    }
}

/// Monotonic tag for one profiling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RunId(pub u64);

impl RunId {
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// Stderr text, surfaced as soon as it arrives.
    Warning { run: RunId, message: String },
    Finished {
        run: RunId,
        outcome: Result<StatsModel, ProfileError>,
    },
}

/// Cancellation handle for an in-flight run.
#[derive(Debug, Clone, Default)]
pub struct RunHandle {
    cancelled: Arc<AtomicBool>,
}

impl RunHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Starts profiler runs for the session controller.
pub trait Launcher {
    fn launch(&mut self, run: RunId, request: RunRequest) -> Result<RunHandle, ProfileError>;
}

/// Buffers one run's output until exit.
#[derive(Debug, Default)]
pub struct OutputCollector {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl OutputCollector {
    pub fn push_stdout(&mut self, chunk: &[u8]) {
        self.stdout.extend_from_slice(chunk);
    }

    /// Records stderr and returns the text to surface, if any. Blank chunks still fail the run.
    pub fn push_stderr(&mut self, chunk: &[u8]) -> Option<String> {
        if chunk.is_empty() {
            return None;
        }
        self.stderr.extend_from_slice(chunk);
        let text = String::from_utf8_lossy(chunk).trim_end().to_string();
        (!text.trim().is_empty()).then_some(text)
    }

    pub fn finish(self) -> Result<StatsModel, ProfileError> {
        if !self.stderr.is_empty() {
            let text = String::from_utf8_lossy(&self.stderr).trim().to_string();
            return Err(ProfileError::new(
                ProfileErrorKind::ProcessStderrOutput,
                format!("profiler wrote to stderr: {text}"),
            ));
        }
        if self.stdout.is_empty() {
            return Err(ProfileError::new(
                ProfileErrorKind::EmptyOutput,
                "profiler exited without writing to stdout",
            ));
        }
        parse_report(&String::from_utf8_lossy(&self.stdout))
    }
}

/// Spawns real processes and reports back over a channel.
#[derive(Debug)]
pub struct ProcessLauncher {
    command: ProfilerCommand,
    events: Sender<ProcessEvent>,
}

impl ProcessLauncher {
    pub fn new(command: ProfilerCommand, events: Sender<ProcessEvent>) -> Self {
        Self { command, events }
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&mut self, run: RunId, request: RunRequest) -> Result<RunHandle, ProfileError> {
        let handle = RunHandle::new();
        let worker_handle = handle.clone();
        let events = self.events.clone();
        let timeout = request.timeout;
        let (child_tx, child_rx) = mpsc::channel::<Child>();
        std::thread::Builder::new()
            .name(format!("heatline-{}", run.0))
            .spawn(move || {
                // Sender dropped without a child: the process never started.
                let Ok(mut child) = child_rx.recv() else {
                    return;
                };
                let outcome = supervise(run, &mut child, timeout, &worker_handle, &events);
                match &outcome {
                    Ok(model) => tracing::info!("{run}: report with {} files", model.files().len()),
                    Err(err) => tracing::debug!("{run}: {err}"),
                }
                if events.send(ProcessEvent::Finished { run, outcome }).is_err() {
                    tracing::debug!("{run}: controller gone, dropping result");
                }
            })
            .map_err(|e| {
                ProfileError::new(
                    ProfileErrorKind::ProcessSpawnFailure,
                    format!("failed to start profiler worker: {e}"),
                )
            })?;

        let child = Command::new(&self.command.program)
            .args(&self.command.args)
            .args(request.argv())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ProfileError::new(
                    ProfileErrorKind::ProcessSpawnFailure,
                    format!("failed to start profiler {:?}: {e}", self.command.program),
                )
            })?;
        tracing::info!(
            "{run}: started profiler pid={} for {}",
            child.id(),
            request.target
        );
        hand_off(run, &child_tx, child)?;
        Ok(handle)
    }
}

/// Give `child` to its worker; if the worker is gone the process is killed here.
fn hand_off(run: RunId, worker: &Sender<Child>, child: Child) -> Result<(), ProfileError> {
    match worker.send(child) {
        Ok(()) => Ok(()),
        Err(mpsc::SendError(mut child)) => {
            kill(run, &mut child);
            Err(ProfileError::new(
                ProfileErrorKind::ProcessSpawnFailure,
                "profiler worker exited before the process was handed over",
            ))
        }
    }
}

enum Chunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Closed,
}

fn pump<R: Read + Send + 'static>(
    mut stream: R,
    tx: Sender<Chunk>,
    wrap: fn(Vec<u8>) -> Chunk,
) -> std::io::Result<()> {
    std::thread::Builder::new().spawn(move || {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(wrap(buf[..n].to_vec())).is_err() {
                        return;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!("profiler pipe read failed: {e}");
                    break;
                }
            }
        }
        let _ = tx.send(Chunk::Closed);
    })?;
    Ok(())
}

fn supervise(
    run: RunId,
    child: &mut Child,
    timeout: Option<Duration>,
    handle: &RunHandle,
    events: &Sender<ProcessEvent>,
) -> Result<StatsModel, ProfileError> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let (tx, rx) = mpsc::channel();
    let mut open = 0usize;
    let pumped = [
        child.stdout.take().map(|s| pump(s, tx.clone(), Chunk::Stdout)),
        child.stderr.take().map(|s| pump(s, tx.clone(), Chunk::Stderr)),
    ];
    drop(tx);
    for result in pumped.into_iter().flatten() {
        match result {
            Ok(()) => open += 1,
            Err(e) => {
                kill(run, child);
                return Err(ProfileError::new(
                    ProfileErrorKind::ProcessSpawnFailure,
                    format!("failed to read profiler output: {e}"),
                ));
            }
        }
    }

    let mut collector = OutputCollector::default();
    while open > 0 {
        check_interrupt(run, child, deadline, timeout, handle)?;
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(Chunk::Stdout(bytes)) => collector.push_stdout(&bytes),
            Ok(Chunk::Stderr(bytes)) => {
                if let Some(message) = collector.push_stderr(&bytes) {
                    tracing::warn!("{run}: profiler stderr: {message}");
                    let _ = events.send(ProcessEvent::Warning { run, message });
                }
            }
            Ok(Chunk::Closed) => open -= 1,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!("{run}: profiler exited with {status}");
                break;
            }
            Ok(None) => {
                check_interrupt(run, child, deadline, timeout, handle)?;
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                tracing::warn!("{run}: failed to wait for profiler: {e}");
                break;
            }
        }
    }

    collector.finish()
}

fn check_interrupt(
    run: RunId,
    child: &mut Child,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
    handle: &RunHandle,
) -> Result<(), ProfileError> {
    if handle.is_cancelled() {
        kill(run, child);
        return Err(ProfileError::new(
            ProfileErrorKind::Cancelled,
            "profiling stopped by user",
        ));
    }
    if let Some(deadline) = deadline
        && Instant::now() >= deadline
    {
        kill(run, child);
        let ms = timeout.map(|t| t.as_millis()).unwrap_or_default();
        return Err(ProfileError::new(
            ProfileErrorKind::Timeout,
            format!("profiler did not finish within {ms} ms"),
        ));
    }
    Ok(())
}

fn kill(run: RunId, child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::debug!("{run}: kill failed: {e}");
    }
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_mode_round_trips_through_arg() {
        for mode in [ColorMode::Calls, ColorMode::ExecTime, ColorMode::TotalTime] {
            assert_eq!(mode.as_arg().parse::<ColorMode>().expect("parse"), mode);
        }
        assert!("0".parse::<ColorMode>().is_err());
    }

    #[test]
    fn argv_is_target_mode_template() {
        let req = RunRequest {
            target: "/w/a.py".to_string(),
            color_mode: ColorMode::TotalTime,
            format: "[%calls] %exec_time".to_string(),
            timeout: None,
        };
        assert_eq!(req.argv(), ["/w/a.py", "3", "[%calls] %exec_time"]);
    }

    #[test]
    fn collector_joins_chunks_before_parsing() {
        let mut c = OutputCollector::default();
        c.push_stdout(b"DATA_START[{\"file_path\":\"/a.py\",");
        c.push_stdout(b"\"stats\":[[0,\"x\"]]}]DATA_END\n");
        let model = c.finish().expect("model");
        assert_eq!(model.line_count(), 1);
    }

    #[test]
    fn collector_stderr_wins_over_valid_stdout() {
        let mut c = OutputCollector::default();
        c.push_stdout(b"DATA_START[]DATA_END");
        assert_eq!(c.push_stderr(b"Traceback\n").as_deref(), Some("Traceback"));
        let err = c.finish().expect_err("stderr");
        assert_eq!(err.kind, ProfileErrorKind::ProcessStderrOutput);
        assert!(err.message.contains("Traceback"));
    }

    #[test]
    fn blank_stderr_fails_without_a_warning() {
        let mut c = OutputCollector::default();
        c.push_stdout(b"DATA_START[]DATA_END");
        assert_eq!(c.push_stderr(b"\n"), None);
        assert_eq!(c.push_stderr(b"  \t\r\n"), None);
        let err = c.finish().expect_err("stderr");
        assert_eq!(err.kind, ProfileErrorKind::ProcessStderrOutput);
    }

    #[test]
    fn collector_distinguishes_empty_from_malformed() {
        let err = OutputCollector::default().finish().expect_err("empty");
        assert_eq!(err.kind, ProfileErrorKind::EmptyOutput);

        let mut c = OutputCollector::default();
        c.push_stdout(b"DATA_START{not json}DATA_END");
        let err = c.finish().expect_err("malformed");
        assert_eq!(err.kind, ProfileErrorKind::MalformedOutput);
    }

    #[cfg(unix)]
    mod spawn {
        use super::*;
        use std::sync::mpsc::Receiver;

        fn sh(script: &str) -> ProfilerCommand {
            ProfilerCommand {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), script.to_string(), "heatline".to_string()],
            }
        }

        fn request(timeout: Option<Duration>) -> RunRequest {
            RunRequest {
                target: "/w/a.py".to_string(),
                color_mode: ColorMode::TotalTime,
                format: "[%calls] %exec_time".to_string(),
                timeout,
            }
        }

        fn finished(rx: &Receiver<ProcessEvent>) -> (Vec<String>, Result<StatsModel, ProfileError>) {
            let mut warnings = Vec::new();
            loop {
                match rx.recv_timeout(Duration::from_secs(10)).expect("event") {
                    ProcessEvent::Warning { message, .. } => warnings.push(message),
                    ProcessEvent::Finished { outcome, .. } => return (warnings, outcome),
                }
            }
        }

        #[test]
        fn passes_positional_arguments_and_parses_report() {
            let (tx, rx) = mpsc::channel();
            let mut launcher = ProcessLauncher::new(
                sh(r#"printf 'loading\nDATA_START[{"file_path":"%s","stats":[[4,"%s|%s",[255,100,0]]]}]DATA_END\n' "$1" "$2" "$3""#),
                tx,
            );
            launcher.launch(RunId(1), request(None)).expect("launch");
            let (warnings, outcome) = finished(&rx);
            assert!(warnings.is_empty());
            let model = outcome.expect("model");
            let file = model.profile_for("/w/a.py").expect("file");
            assert_eq!(file.lines[0].line_index, 4);
            assert_eq!(file.lines[0].label, "3|[%calls] %exec_time");
        }

        #[test]
        fn silent_exit_is_empty_output() {
            let (tx, rx) = mpsc::channel();
            let mut launcher = ProcessLauncher::new(sh("exit 0"), tx);
            launcher.launch(RunId(2), request(None)).expect("launch");
            let (_, outcome) = finished(&rx);
            assert_eq!(outcome.expect_err("empty").kind, ProfileErrorKind::EmptyOutput);
        }

        #[test]
        fn stderr_is_surfaced_and_fails_run() {
            let (tx, rx) = mpsc::channel();
            let mut launcher =
                ProcessLauncher::new(sh("echo boom >&2; printf 'DATA_START[]DATA_END'"), tx);
            launcher.launch(RunId(3), request(None)).expect("launch");
            let (warnings, outcome) = finished(&rx);
            assert_eq!(warnings, vec!["boom".to_string()]);
            assert_eq!(
                outcome.expect_err("stderr").kind,
                ProfileErrorKind::ProcessStderrOutput
            );
        }

        #[test]
        fn hung_profiler_times_out() {
            let (tx, rx) = mpsc::channel();
            let mut launcher = ProcessLauncher::new(sh("exec sleep 5"), tx);
            launcher
                .launch(RunId(4), request(Some(Duration::from_millis(100))))
                .expect("launch");
            let (_, outcome) = finished(&rx);
            assert_eq!(outcome.expect_err("timeout").kind, ProfileErrorKind::Timeout);
        }

        #[test]
        fn cancel_kills_the_process() {
            let (tx, rx) = mpsc::channel();
            let mut launcher = ProcessLauncher::new(sh("exec sleep 5"), tx);
            let handle = launcher.launch(RunId(5), request(None)).expect("launch");
            handle.cancel();
            let (_, outcome) = finished(&rx);
            assert_eq!(outcome.expect_err("cancel").kind, ProfileErrorKind::Cancelled);
        }

        #[test]
        fn missing_program_is_spawn_failure() {
            let (tx, _rx) = mpsc::channel();
            let mut launcher = ProcessLauncher::new(
                ProfilerCommand {
                    program: "/nonexistent/heatline-profiler".to_string(),
                    args: Vec::new(),
                },
                tx,
            );
            let err = launcher.launch(RunId(6), request(None)).expect_err("spawn");
            assert_eq!(err.kind, ProfileErrorKind::ProcessSpawnFailure);
        }

        #[test]
        fn orphaned_child_is_killed_when_worker_is_gone() {
            let marker =
                std::env::temp_dir().join(format!("heatline-orphan-{}", uuid::Uuid::new_v4()));
            let child = Command::new("sh")
                .arg("-c")
                .arg(r#"sleep 1; touch "$0""#)
                .arg(&marker)
                .spawn()
                .expect("spawn sh");
            let (worker_tx, worker_rx) = mpsc::channel::<Child>();
            drop(worker_rx);

            let err = hand_off(RunId(7), &worker_tx, child).expect_err("no worker");
            assert_eq!(err.kind, ProfileErrorKind::ProcessSpawnFailure);
            std::thread::sleep(Duration::from_millis(1500));
            assert!(!marker.exists());
        }
    }
}
