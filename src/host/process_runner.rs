//! Process Runner
//!
//! Compiles and runs a single source file as an external program, using the
//! host's per-extension command table. One runner owns at most one child at a
//! time. The control thread owns the child's stdin and stdout; when an error
//! callback is registered, a background [`ErrorPump`] owns stderr.
//!
//! Dropping a runner does not stop its child. Call [`ProcessRunner::terminate`]
//! first if the process may still be alive.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::error_pump::{ErrorCallback, ErrorPump};
use super::spawn;
use super::text_stream::{encode_for_child, TextReader};
use crate::core::{CommandKind, CommandTable, HostPlatform, Lookup, Platform, SourcePaths};
use crate::error::{Result, RunnerError};

/// Interval for polling a child's exit status while waiting on it
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runner tuning
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Bytes per error stream read while the child runs
    pub pump_chunk_size: usize,
    /// Let `run` replace a handle whose process is still alive
    pub allow_overlapping_runs: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            pump_chunk_size: 1,
            allow_overlapping_runs: false,
        }
    }
}

/// Result of resolving a command template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// No rule matches the file's extension
    Unresolved,
    /// A rule matches but has no template for this kind
    NoOp,
    Command(String),
}

/// Result of [`ProcessRunner::compile`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompileOutcome {
    Unresolved,
    NoOp,
    Finished { exit_code: i32, output: String },
}

impl CompileOutcome {
    pub fn succeeded(&self) -> bool {
        match self {
            CompileOutcome::Unresolved => false,
            CompileOutcome::NoOp => true,
            CompileOutcome::Finished { exit_code, .. } => *exit_code == 0,
        }
    }
}

type SharedChild = Arc<Mutex<Child>>;

fn lock(child: &SharedChild) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything needed to compile, detached from the live process slot
#[derive(Debug, Clone)]
struct CompileJob {
    paths: SourcePaths,
    table: Arc<CommandTable>,
    platform: Arc<dyn Platform>,
}

impl CompileJob {
    fn resolve(&self, kind: CommandKind, args: &str) -> Resolution {
        match self.table.lookup(&self.paths.extension, kind) {
            Lookup::Unresolved => Resolution::Unresolved,
            Lookup::NoOp => Resolution::NoOp,
            Lookup::Template(template) => Resolution::Command(self.paths.substitute(template, args)),
        }
    }

    fn execute(&self) -> Result<CompileOutcome> {
        let command = match self.resolve(CommandKind::Compile, "") {
            Resolution::Unresolved => {
                debug!(extension = %self.paths.extension, "No compile rule");
                return Ok(CompileOutcome::Unresolved);
            }
            Resolution::NoOp => {
                debug!(file = %self.paths.file, "Nothing to compile");
                return Ok(CompileOutcome::NoOp);
            }
            Resolution::Command(command) => command,
        };

        let mut cmd = spawn::shell_command(&command, &*self.platform);
        if let Some(dir) = self.paths.working_dir() {
            cmd.current_dir(dir);
        }

        info!(command = %command, "Compiling");
        let (exit_code, output) = spawn::run_merged(cmd)?;
        debug!(exit_code, bytes = output.len(), "Compile finished");

        Ok(CompileOutcome::Finished { exit_code, output })
    }
}

/// Stdout/stderr collection started by `communicate`, kept across timeouts
struct Collectors {
    rx: Receiver<(Stream, io::Result<String>)>,
    remaining: usize,
    stdout: String,
    stderr: String,
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl Collectors {
    fn start(
        stdout: Option<TextReader<ChildStdout>>,
        stderr: Option<TextReader<ChildStderr>>,
    ) -> io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut remaining = 0;

        if let Some(mut reader) = stdout {
            let tx = tx.clone();
            thread::Builder::new()
                .name("coderunner-stdout".to_string())
                .spawn(move || {
                    let _ = tx.send((Stream::Stdout, reader.read_to_end_text()));
                })?;
            remaining += 1;
        }
        if let Some(mut reader) = stderr {
            let tx = tx.clone();
            thread::Builder::new()
                .name("coderunner-stderr-collect".to_string())
                .spawn(move || {
                    let _ = tx.send((Stream::Stderr, reader.read_to_end_text()));
                })?;
            remaining += 1;
        }

        Ok(Self {
            rx,
            remaining,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

/// The live child and the stream ends this runner still holds
struct RunningProcess {
    child: SharedChild,
    pid: u32,
    stdin: Option<ChildStdin>,
    stdout: Option<TextReader<ChildStdout>>,
    stderr: Option<TextReader<ChildStderr>>,
    pump: Option<ErrorPump>,
    collectors: Option<Collectors>,
}

impl RunningProcess {
    fn poll(&self) -> io::Result<Option<i32>> {
        Ok(lock(&self.child).try_wait()?.map(spawn::exit_code))
    }

    fn is_alive(&self) -> bool {
        matches!(self.poll(), Ok(None))
    }

    fn pump_running(&self) -> bool {
        self.pump.as_ref().is_some_and(ErrorPump::is_running)
    }
}

/// Compiles and runs one source file as a managed child process
pub struct ProcessRunner {
    paths: SourcePaths,
    table: Arc<CommandTable>,
    platform: Arc<dyn Platform>,
    options: RunnerOptions,
    process: Option<RunningProcess>,
    has_started: bool,
    test_counter: u32,
    error_callback: Option<ErrorCallback>,
}

impl ProcessRunner {
    pub fn new(source_file: impl AsRef<Path>, table: Arc<CommandTable>) -> Self {
        Self {
            paths: SourcePaths::new(source_file),
            table,
            platform: Arc::new(HostPlatform),
            options: RunnerOptions::default(),
            process: None,
            has_started: false,
            test_counter: 0,
            error_callback: None,
        }
    }

    /// Pin the platform instead of using the build target's
    pub fn with_platform(mut self, platform: Arc<dyn Platform>) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn source_paths(&self) -> &SourcePaths {
        &self.paths
    }

    pub fn source_file(&self) -> PathBuf {
        PathBuf::from(&self.paths.source_file)
    }

    /// Whether the most recent `run` spawned a process
    pub fn has_started(&self) -> bool {
        self.has_started
    }

    pub fn test_counter(&self) -> u32 {
        self.test_counter
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|p| p.pid)
    }

    /// Register the callback that receives the error stream of later runs.
    ///
    /// The callback is invoked on the pump thread, not the caller's.
    pub fn set_error_callback<F>(&mut self, callback: F) -> Result<()>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.ensure_pump_idle()?;
        self.error_callback = Some(Arc::new(callback));
        Ok(())
    }

    pub fn clear_error_callback(&mut self) -> Result<()> {
        self.ensure_pump_idle()?;
        self.error_callback = None;
        Ok(())
    }

    fn ensure_pump_idle(&self) -> Result<()> {
        match &self.process {
            Some(process) if process.pump_running() => Err(RunnerError::Busy),
            _ => Ok(()),
        }
    }

    /// Resolve the compile or run template for this file
    pub fn resolve_command(&self, kind: CommandKind, args: &str) -> Resolution {
        self.compile_job().resolve(kind, args)
    }

    fn compile_job(&self) -> CompileJob {
        CompileJob {
            paths: self.paths.clone(),
            table: Arc::clone(&self.table),
            platform: Arc::clone(&self.platform),
        }
    }

    /// Run the compile command to completion with stderr merged into stdout.
    ///
    /// Blocks until the compiler exits.
    pub fn compile(&self) -> Result<CompileOutcome> {
        self.compile_job().execute()
    }

    /// [`compile`](Self::compile) on the blocking thread pool
    pub async fn compile_async(&self) -> Result<CompileOutcome> {
        let job = self.compile_job();
        tokio::task::spawn_blocking(move || job.execute())
            .await
            .map_err(|e| RunnerError::Task(e.to_string()))?
    }

    /// Start the run command with `args` joined by spaces.
    ///
    /// Returns the child's pid, or `None` when the matching rule has no run
    /// template. Returns once the process exists.
    pub fn run<S: AsRef<str>>(&mut self, args: &[S]) -> Result<Option<u32>> {
        if let Some(previous) = &self.process {
            if previous.is_alive() && !self.options.allow_overlapping_runs {
                return Err(RunnerError::AlreadyRunning { pid: previous.pid });
            }
        }

        self.has_started = false;

        let args = args.iter().map(|a| a.as_ref()).collect::<Vec<&str>>().join(" ");
        let command = match self.resolve_command(CommandKind::Run, &args) {
            Resolution::Unresolved => {
                return Err(RunnerError::Unresolved {
                    kind: CommandKind::Run,
                    extension: self.paths.extension.clone(),
                })
            }
            Resolution::NoOp => {
                debug!(file = %self.paths.file, "Run rule has no command");
                return Ok(None);
            }
            Resolution::Command(command) => command,
        };

        let mut cmd = spawn::run_command(&command, &*self.platform);
        if let Some(dir) = self.paths.working_dir() {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        spawn::configure_run(&mut cmd, &*self.platform);

        let mut child = cmd.spawn().map_err(RunnerError::SpawnFailed)?;
        let pid = child.id();
        info!(pid, command = %command, "Process spawned");

        let process = RunningProcess {
            pid,
            stdin: child.stdin.take(),
            stdout: child.stdout.take().map(TextReader::new),
            stderr: child.stderr.take().map(TextReader::new),
            child: Arc::new(Mutex::new(child)),
            pump: None,
            collectors: None,
        };

        if let Some(previous) = self.process.replace(process) {
            if previous.is_alive() {
                warn!(pid = previous.pid, "Replacing handle of a live process without terminating it");
            }
        }
        self.has_started = true;

        if let Some(callback) = self.error_callback.clone() {
            self.start_pump(callback)?;
        }

        Ok(Some(pid))
    }

    fn start_pump(&mut self, callback: ErrorCallback) -> Result<()> {
        let chunk_size = self.options.pump_chunk_size;
        let Some(process) = self.process.as_mut() else {
            return Ok(());
        };
        let Some(stderr) = process.stderr.take() else {
            return Ok(());
        };

        let child = Arc::clone(&process.child);
        let exited = move || !matches!(lock(&child).try_wait(), Ok(None));

        process.pump = Some(ErrorPump::spawn(stderr.into_inner(), exited, callback, chunk_size)?);
        debug!(pid = process.pid, "Error stream pump started");
        Ok(())
    }

    fn process_mut(&mut self) -> Result<&mut RunningProcess> {
        self.process.as_mut().ok_or(RunnerError::NotStarted)
    }

    /// Write to the child's stdin and flush. Does nothing once the child has
    /// exited or its stdin was closed.
    pub fn write(&mut self, s: &str) -> Result<()> {
        let data = encode_for_child(s, &*self.platform);
        let process = self.process_mut()?;
        if !process.is_alive() {
            debug!(pid = process.pid, "Write to exited process ignored");
            return Ok(());
        }
        let Some(stdin) = process.stdin.as_mut() else {
            return Ok(());
        };

        match stdin.write_all(data.as_bytes()).and_then(|_| stdin.flush()) {
            Ok(()) => Ok(()),
            // The child exited between the poll and the write
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!(pid = process.pid, "Child closed its input");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Close the child's stdin so it sees end of input
    pub fn close_input(&mut self) -> Result<()> {
        let process = self.process_mut()?;
        drop(process.stdin.take());
        Ok(())
    }

    /// Read from stdout. `None` blocks until end of stream; `Some(n)` reads at
    /// most `n` bytes and may return less. An empty string means end of
    /// stream.
    pub fn read(&mut self, size: Option<usize>) -> Result<String> {
        let process = self.process_mut()?;
        let Some(stdout) = process.stdout.as_mut() else {
            return Ok(String::new());
        };
        Ok(match size {
            None => stdout.read_to_end_text()?,
            Some(n) => stdout.read_text(n)?,
        })
    }

    /// Read from stderr with the same contract as [`read`](Self::read).
    ///
    /// Not available while the error pump owns the stream.
    pub fn read_error(&mut self, size: Option<usize>) -> Result<String> {
        let process = self.process_mut()?;
        if process.pump.is_some() {
            return Err(RunnerError::StreamOwnedByPump);
        }
        let Some(stderr) = process.stderr.as_mut() else {
            return Ok(String::new());
        };
        Ok(match size {
            None => stderr.read_to_end_text()?,
            Some(n) => stderr.read_text(n)?,
        })
    }

    /// Send `input`, close stdin, then collect stdout and stderr until the
    /// child exits.
    ///
    /// On timeout the child keeps running and collection resumes on the next
    /// call. Stderr is empty when the error pump owns it.
    pub fn communicate(
        &mut self,
        input: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<(String, String)> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let data = input.map(|s| encode_for_child(s, &*self.platform));
        let process = self.process_mut()?;

        if let Some(mut stdin) = process.stdin.take() {
            if let Some(data) = data.filter(|d| !d.is_empty()) {
                match stdin.write_all(data.as_bytes()).and_then(|_| stdin.flush()) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        if process.collectors.is_none() {
            process.collectors = Some(Collectors::start(
                process.stdout.take(),
                process.stderr.take(),
            )?);
        }

        let timed_out = || RunnerError::Timeout(timeout.unwrap_or_default());

        if let Some(collectors) = process.collectors.as_mut() {
            while collectors.remaining > 0 {
                let (stream, result) = match deadline {
                    Some(deadline) => match collectors.rx.recv_deadline(deadline) {
                        Ok(message) => message,
                        Err(RecvTimeoutError::Timeout) => return Err(timed_out()),
                        Err(RecvTimeoutError::Disconnected) => break,
                    },
                    None => match collectors.rx.recv() {
                        Ok(message) => message,
                        Err(_) => break,
                    },
                };
                collectors.remaining -= 1;
                match stream {
                    Stream::Stdout => collectors.stdout = result?,
                    Stream::Stderr => collectors.stderr = result?,
                }
            }
        }

        // Streams are closed; the exit usually follows right behind
        loop {
            if process.poll()?.is_some() {
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(timed_out());
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }

        let collected = process
            .collectors
            .take()
            .map(|c| (c.stdout, c.stderr))
            .unwrap_or_default();
        Ok(collected)
    }

    /// Exit code if the child has exited, `None` while it runs
    pub fn is_stopped(&mut self) -> Result<Option<i32>> {
        Ok(self.process_mut()?.poll()?)
    }

    /// Start a fresh run with no arguments and optionally feed it input.
    ///
    /// Returns the updated test counter.
    pub fn new_test(&mut self, input: Option<&str>) -> Result<u32> {
        self.test_counter += 1;
        let pid = self.run::<&str>(&[])?;
        if let (Some(_), Some(input)) = (pid, input) {
            self.write(input)?;
        }
        Ok(self.test_counter)
    }

    /// Stop the child. On platforms with process groups the whole group gets
    /// SIGTERM, elsewhere the direct process is killed. Never fails.
    pub fn terminate(&mut self) {
        let Some(process) = self.process.as_ref() else {
            return;
        };
        let mut child = lock(&process.child);
        spawn::terminate_child(&mut child, &*self.platform);
    }

    /// Block until the error pump has delivered everything
    pub fn wait_error_pump(&mut self) {
        if let Some(pump) = self.process.as_mut().and_then(|p| p.pump.take()) {
            pump.join();
        }
    }
}

impl std::fmt::Debug for ProcessRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRunner")
            .field("source_file", &self.paths.source_file)
            .field("pid", &self.pid())
            .field("has_started", &self.has_started)
            .field("test_counter", &self.test_counter)
            .field("error_callback", &self.error_callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CommandRule, FixedPlatform};

    fn table() -> Arc<CommandTable> {
        Arc::new(CommandTable::new(vec![
            CommandRule::new(["sh"]).run("sh {file} {args}"),
            CommandRule::new(["py"]).run("python3 {file}"),
            CommandRule::new(["c"])
                .compile("gcc {file} -o {file_name}")
                .run("./{file_name} {args}"),
            CommandRule::new(["txt"]).compile("cat {file}; echo warn 1>&2; exit 2"),
        ]))
    }

    struct Fixture {
        dir: tempfile::TempDir,
        runner: ProcessRunner,
    }

    fn script(body: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prog.sh");
        std::fs::write(&path, body).unwrap();
        let runner = ProcessRunner::new(&path, table())
            .with_platform(Arc::new(FixedPlatform { windows: cfg!(windows) }));
        Fixture { dir, runner }
    }

    fn wait_stopped(runner: &mut ProcessRunner) -> Option<i32> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(code) = runner.is_stopped().unwrap() {
                return Some(code);
            }
            thread::sleep(Duration::from_millis(10));
        }
        None
    }

    #[test]
    fn test_resolve_command() {
        let runner = ProcessRunner::new("/tmp/a/prog.c", table());
        assert_eq!(
            runner.resolve_command(CommandKind::Compile, ""),
            Resolution::Command("gcc prog.c -o prog".to_string())
        );
        assert_eq!(
            runner.resolve_command(CommandKind::Run, "1 2"),
            Resolution::Command("./prog 1 2".to_string())
        );

        let runner = ProcessRunner::new("/tmp/a/prog.py", table());
        assert_eq!(runner.resolve_command(CommandKind::Compile, ""), Resolution::NoOp);

        let runner = ProcessRunner::new("/tmp/a/prog.rb", table());
        assert_eq!(runner.resolve_command(CommandKind::Run, ""), Resolution::Unresolved);
    }

    #[test]
    fn test_compile_noop_and_unresolved() {
        let runner = ProcessRunner::new("/nonexistent/dir/prog.py", table());
        assert_eq!(runner.compile().unwrap(), CompileOutcome::NoOp);
        assert!(runner.pid().is_none());

        let runner = ProcessRunner::new("/nonexistent/dir/prog.rb", table());
        assert_eq!(runner.compile().unwrap(), CompileOutcome::Unresolved);
    }

    #[test]
    fn test_run_unresolved_and_noop() {
        let mut runner = ProcessRunner::new("/tmp/prog.rb", table());
        assert!(matches!(
            runner.run::<&str>(&[]),
            Err(RunnerError::Unresolved { kind: CommandKind::Run, .. })
        ));

        let mut runner = ProcessRunner::new("/tmp/prog.txt", table());
        assert_eq!(runner.run::<&str>(&[]).unwrap(), None);
        assert!(!runner.has_started());
        assert!(matches!(runner.read(None), Err(RunnerError::NotStarted)));
        assert!(matches!(runner.write("x"), Err(RunnerError::NotStarted)));
    }

    #[test]
    fn test_terminate_without_process_is_noop() {
        let mut runner = ProcessRunner::new("/tmp/prog.sh", table());
        runner.terminate();
        runner.terminate();
    }

    #[test]
    fn test_compile_outcome_success() {
        assert!(CompileOutcome::NoOp.succeeded());
        assert!(!CompileOutcome::Unresolved.succeeded());
        assert!(!CompileOutcome::Finished {
            exit_code: 1,
            output: String::new()
        }
        .succeeded());
    }

    #[cfg(unix)]
    mod unix {
        use super::*;

        #[test]
        fn test_compile_merges_output() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("notes.txt");
            std::fs::write(&path, "hello\n").unwrap();

            let runner = ProcessRunner::new(&path, table());
            let outcome = runner.compile().unwrap();
            assert_eq!(
                outcome,
                CompileOutcome::Finished {
                    exit_code: 2,
                    output: "hello\nwarn\n".to_string()
                }
            );
        }

        #[tokio::test]
        async fn test_compile_async() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("notes.txt");
            std::fs::write(&path, "async\n").unwrap();

            let runner = ProcessRunner::new(&path, table());
            match runner.compile_async().await.unwrap() {
                CompileOutcome::Finished { exit_code, output } => {
                    assert_eq!(exit_code, 2);
                    assert!(output.starts_with("async\n"));
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        #[test]
        fn test_run_reads_output_in_source_dir() {
            let mut fx = script("pwd\necho \"args:$1,$2\"\n");
            let pid = fx.runner.run(&["a", "b"]).unwrap();
            assert!(pid.is_some());
            assert!(fx.runner.has_started());

            let out = fx.runner.read(None).unwrap();
            let dir = fx.dir.path().canonicalize().unwrap();
            let mut lines = out.lines();
            assert_eq!(
                PathBuf::from(lines.next().unwrap()).canonicalize().unwrap(),
                dir
            );
            assert_eq!(lines.next(), Some("args:a,b"));
            assert_eq!(fx.runner.read(Some(16)).unwrap(), "");
            assert_eq!(wait_stopped(&mut fx.runner), Some(0));
        }

        #[test]
        fn test_write_then_read() {
            let mut fx = script("read line\necho \"got $line\"\n");
            fx.runner.run::<&str>(&[]).unwrap();
            fx.runner.write("abc\n").unwrap();
            assert_eq!(fx.runner.read(None).unwrap(), "got abc\n");
        }

        #[test]
        fn test_error_callback_receives_everything_in_order() {
            let mut fx = script("printf 'e1' >&2\necho out\nprintf 'e2\\nlast' >&2\n");
            let collected = Arc::new(Mutex::new(String::new()));
            let sink = Arc::clone(&collected);
            fx.runner
                .set_error_callback(move |s| sink.lock().unwrap().push_str(s))
                .unwrap();

            fx.runner.run::<&str>(&[]).unwrap();
            assert!(matches!(fx.runner.read_error(None), Err(RunnerError::StreamOwnedByPump)));
            assert_eq!(fx.runner.read(None).unwrap(), "out\n");
            fx.runner.wait_error_pump();

            assert_eq!(*collected.lock().unwrap(), "e1e2\nlast");
        }

        #[test]
        fn test_callback_cannot_change_while_pumping() {
            let mut fx = script("sleep 5\n");
            fx.runner.set_error_callback(|_| {}).unwrap();
            fx.runner.run::<&str>(&[]).unwrap();
            assert!(matches!(fx.runner.clear_error_callback(), Err(RunnerError::Busy)));

            fx.runner.terminate();
            fx.runner.wait_error_pump();
            assert!(fx.runner.clear_error_callback().is_ok());
        }

        #[test]
        fn test_read_error_without_pump() {
            let mut fx = script("echo oops >&2\n");
            fx.runner.run::<&str>(&[]).unwrap();
            assert_eq!(fx.runner.read_error(None).unwrap(), "oops\n");
            assert_eq!(fx.runner.read(None).unwrap(), "");
        }

        #[test]
        fn test_write_after_exit_is_silent() {
            let mut fx = script("exit 4\n");
            fx.runner.run::<&str>(&[]).unwrap();
            assert_eq!(wait_stopped(&mut fx.runner), Some(4));
            fx.runner.write("ignored\n").unwrap();
            fx.runner.write("ignored again\n").unwrap();
        }

        #[test]
        fn test_terminate_twice_never_fails() {
            let mut fx = script("sleep 30\n");
            fx.runner.run::<&str>(&[]).unwrap();
            assert_eq!(fx.runner.is_stopped().unwrap(), None);

            fx.runner.terminate();
            let code = wait_stopped(&mut fx.runner);
            assert!(code.is_some_and(|c| c != 0), "{code:?}");
            fx.runner.terminate();
        }

        #[test]
        fn test_failed_run_clears_has_started() {
            let mut fx = script("exit 0\n");
            fx.runner.run::<&str>(&[]).unwrap();
            assert!(fx.runner.has_started());
            wait_stopped(&mut fx.runner);

            // The working directory is gone, so the next spawn fails
            let dir = fx.dir.path().to_path_buf();
            std::fs::remove_dir_all(&dir).unwrap();
            assert!(matches!(
                fx.runner.run::<&str>(&[]),
                Err(RunnerError::SpawnFailed(_))
            ));
            assert!(!fx.runner.has_started());
        }

        /// Exists and is not a zombie waiting to be reaped
        fn process_alive(pid: nix::unistd::Pid) -> bool {
            match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
                Ok(stat) => !stat
                    .rsplit(')')
                    .next()
                    .is_some_and(|rest| rest.trim_start().starts_with('Z')),
                Err(_) => nix::sys::signal::kill(pid, None).is_ok(),
            }
        }

        #[test]
        fn test_terminate_reaches_grandchildren() {
            use nix::unistd::Pid;

            let mut fx = script("sleep 30 &\necho $!\nwait\n");
            fx.runner.run::<&str>(&[]).unwrap();

            let mut line = String::new();
            while !line.contains('\n') {
                let chunk = fx.runner.read(Some(64)).unwrap();
                assert!(!chunk.is_empty(), "stream ended before the pid: {line:?}");
                line.push_str(&chunk);
            }
            let grandchild = Pid::from_raw(line.trim().parse().unwrap());
            assert!(process_alive(grandchild));

            fx.runner.terminate();
            assert!(wait_stopped(&mut fx.runner).is_some());

            let deadline = Instant::now() + Duration::from_secs(5);
            while process_alive(grandchild) && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            assert!(!process_alive(grandchild), "grandchild {grandchild} survived");
        }

        #[test]
        fn test_child_leads_its_own_session() {
            use nix::unistd::{getpgid, getsid, Pid};

            let mut fx = script("sleep 30\n");
            let pid = fx.runner.run::<&str>(&[]).unwrap().unwrap();
            let pid = Pid::from_raw(pid as i32);
            assert_eq!(getsid(Some(pid)).unwrap(), pid);
            assert_eq!(getpgid(Some(pid)).unwrap(), pid);
            fx.runner.terminate();
        }

        #[test]
        fn test_communicate_timeout_leaves_process_running() {
            let mut fx = script("sleep 5\n");
            fx.runner.run::<&str>(&[]).unwrap();

            let result = fx.runner.communicate(Some("input\n"), Some(Duration::from_millis(10)));
            assert!(matches!(result, Err(RunnerError::Timeout(_))));
            assert_eq!(fx.runner.is_stopped().unwrap(), None);

            fx.runner.terminate();
            assert!(wait_stopped(&mut fx.runner).is_some());
        }

        #[test]
        fn test_communicate_collects_both_streams() {
            let mut fx = script("cat\necho err >&2\n");
            fx.runner.run::<&str>(&[]).unwrap();
            let (out, err) = fx
                .runner
                .communicate(Some("one\ntwo\n"), Some(Duration::from_secs(10)))
                .unwrap();
            assert_eq!(out, "one\ntwo\n");
            assert_eq!(err, "err\n");
            assert_eq!(fx.runner.is_stopped().unwrap(), Some(0));
        }

        #[test]
        fn test_communicate_leaves_stderr_to_the_pump() {
            let mut fx = script("cat\necho err >&2\n");
            let collected = Arc::new(Mutex::new(String::new()));
            let sink = Arc::clone(&collected);
            fx.runner
                .set_error_callback(move |s| sink.lock().unwrap().push_str(s))
                .unwrap();

            fx.runner.run::<&str>(&[]).unwrap();
            let (out, err) = fx
                .runner
                .communicate(Some("in\n"), Some(Duration::from_secs(10)))
                .unwrap();
            assert_eq!(out, "in\n");
            assert_eq!(err, "");

            fx.runner.wait_error_pump();
            assert_eq!(*collected.lock().unwrap(), "err\n");
        }

        #[test]
        fn test_communicate_resumes_after_timeout() {
            let mut fx = script("sleep 0.3\necho done\n");
            fx.runner.run::<&str>(&[]).unwrap();
            assert!(fx.runner.communicate(None, Some(Duration::from_millis(1))).is_err());
            let (out, _) = fx.runner.communicate(None, None).unwrap();
            assert_eq!(out, "done\n");
        }

        #[test]
        fn test_single_run_at_a_time() {
            let mut fx = script("sleep 30\n");
            let first = fx.runner.run::<&str>(&[]).unwrap().unwrap();
            assert!(matches!(
                fx.runner.run::<&str>(&[]),
                Err(RunnerError::AlreadyRunning { pid }) if pid == first
            ));
            fx.runner.terminate();
            wait_stopped(&mut fx.runner);

            let second = fx.runner.run::<&str>(&[]).unwrap().unwrap();
            assert_ne!(first, second);
            fx.runner.terminate();
        }

        #[test]
        fn test_overlapping_runs_when_allowed() {
            let fx = script("sleep 30\n");
            let mut runner = fx.runner.with_options(RunnerOptions {
                allow_overlapping_runs: true,
                ..RunnerOptions::default()
            });
            let first = runner.run::<&str>(&[]).unwrap().unwrap();
            let second = runner.run::<&str>(&[]).unwrap().unwrap();
            assert_eq!(runner.pid(), Some(second));
            runner.terminate();

            // The discarded child is the caller's problem; clean it up here
            let _ = nix::sys::signal::killpg(
                nix::unistd::Pid::from_raw(first as i32),
                nix::sys::signal::Signal::SIGKILL,
            );
        }

        #[test]
        fn test_new_test_counts_and_feeds_input() {
            let mut fx = script("read n\necho $((n * 2))\n");
            assert_eq!(fx.runner.new_test(Some("21\n")).unwrap(), 1);
            assert_eq!(fx.runner.read(None).unwrap(), "42\n");
            wait_stopped(&mut fx.runner);

            assert_eq!(fx.runner.new_test(Some("5\n")).unwrap(), 2);
            assert_eq!(fx.runner.read(None).unwrap(), "10\n");
            assert_eq!(fx.runner.test_counter(), 2);
        }

        #[test]
        fn test_close_input_signals_eof() {
            let mut fx = script("wc -l\n");
            fx.runner.run::<&str>(&[]).unwrap();
            fx.runner.write("a\nb\nc\n").unwrap();
            fx.runner.close_input().unwrap();
            assert_eq!(fx.runner.read(None).unwrap().trim(), "3");
        }

        #[test]
        fn test_spawn_failure_surfaces() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("missing").join("prog.sh");
            let mut runner = ProcessRunner::new(&path, table());
            assert!(matches!(
                runner.run::<&str>(&[]),
                Err(RunnerError::SpawnFailed(_))
            ));
        }
    }
}
