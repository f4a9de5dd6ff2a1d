//! Process spawning and termination, branched per platform
//!
//! On Unix, run commands go through `sh -c` and the child calls `setsid()`
//! before exec so it leads its own session and process group; terminating
//! signals the whole group. On Windows the program is started directly with
//! no console window and only the direct handle is killed.

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};

use tracing::debug;

use crate::core::Platform;
use crate::error::{Result, RunnerError};

/// Build a command that runs `cmd` through the platform shell
pub(crate) fn shell_command(cmd: &str, platform: &dyn Platform) -> Command {
    if platform.is_windows() {
        let mut command = Command::new("cmd");
        command.arg("/C");
        push_raw_args(&mut command, cmd);
        command
    } else {
        let mut command = Command::new("sh");
        command.arg("-c").arg(cmd);
        command
    }
}

/// Build the command for an interactive run
///
/// Windows starts the program directly so the handle `terminate` kills is the
/// program itself rather than a shell wrapping it.
pub(crate) fn run_command(cmd: &str, platform: &dyn Platform) -> Command {
    if platform.is_windows() {
        let (program, rest) = split_program(cmd);
        let mut command = Command::new(program);
        push_raw_args(&mut command, rest);
        command
    } else {
        shell_command(cmd, platform)
    }
}

/// Apply session/window settings for an interactive run
pub(crate) fn configure_run(command: &mut Command, platform: &dyn Platform) {
    #[cfg(unix)]
    if platform.supports_process_groups() {
        use std::os::unix::process::CommandExt;

        // SAFETY: setsid is async-signal-safe and the closure allocates nothing.
        unsafe {
            command.pre_exec(|| {
                nix::unistd::setsid()
                    .map(|_| ())
                    .map_err(io::Error::from)
            });
        }
    }

    #[cfg(windows)]
    if platform.is_windows() {
        use std::os::windows::process::CommandExt;
        use windows::Win32::System::Threading::CREATE_NO_WINDOW;

        command.creation_flags(CREATE_NO_WINDOW.0);
    }

    #[cfg(not(any(unix, windows)))]
    let _ = (command, platform);
}

/// Best-effort termination. Every failure is logged and swallowed.
pub(crate) fn terminate_child(child: &mut Child, platform: &dyn Platform) {
    let pid = child.id();

    #[cfg(unix)]
    if platform.supports_process_groups() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        // The child called setsid(), so its pid is the group id. The group
        // outlives a reaped leader while descendants remain.
        match killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => debug!(pid, "Sent SIGTERM to process group"),
            Err(e) => debug!(pid, error = %e, "Process group termination failed"),
        }
        return;
    }

    #[cfg(not(unix))]
    let _ = platform;

    match child.kill() {
        Ok(()) => debug!(pid, "Killed process"),
        Err(e) => debug!(pid, error = %e, "Process kill failed"),
    }
}

/// Exit code as a caller sees it. Unix signal deaths report `-signal`.
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    status.code().unwrap_or(-1)
}

/// Run `command` to completion with stderr merged into stdout.
///
/// Stdin is opened and closed right away, so the command sees end of input.
pub(crate) fn run_merged(mut command: Command) -> Result<(i32, String)> {
    command.stdin(Stdio::piped());

    #[cfg(unix)]
    let (mut child, output) = {
        let (reader, writer) = nix::unistd::pipe().map_err(io::Error::from)?;
        let writer_err = writer.try_clone()?;
        command.stdout(Stdio::from(writer)).stderr(Stdio::from(writer_err));

        let mut child = command.spawn().map_err(RunnerError::SpawnFailed)?;
        // The command keeps its copies of the write end open until dropped
        drop(command);
        drop(child.stdin.take());

        let mut output = Vec::new();
        std::fs::File::from(reader).read_to_end(&mut output)?;
        (child, output)
    };

    #[cfg(not(unix))]
    let (mut child, output) = {
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = command.spawn().map_err(RunnerError::SpawnFailed)?;
        drop(child.stdin.take());
        let output = collect_interleaved(child.stdout.take(), child.stderr.take());
        (child, output)
    };

    let status = child.wait()?;
    Ok((exit_code(status), String::from_utf8_lossy(&output).into_owned()))
}

/// Drain two pipes into one buffer in arrival order
#[cfg(not(unix))]
fn collect_interleaved<A, B>(first: Option<A>, second: Option<B>) -> Vec<u8>
where
    A: Read + Send + 'static,
    B: Read + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::unbounded::<Vec<u8>>();

    fn forward<R: Read>(mut stream: R, tx: crossbeam_channel::Sender<Vec<u8>>) {
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    }

    if let Some(stream) = first {
        let tx = tx.clone();
        std::thread::spawn(move || forward(stream, tx));
    }
    if let Some(stream) = second {
        let tx = tx.clone();
        std::thread::spawn(move || forward(stream, tx));
    }
    drop(tx);

    rx.iter().flatten().collect()
}

/// Split a command line into the program and the raw remainder.
/// A leading double-quoted program may contain spaces.
pub(crate) fn split_program(cmd: &str) -> (&str, &str) {
    let cmd = cmd.trim_start();
    if let Some(quoted) = cmd.strip_prefix('"') {
        if let Some(end) = quoted.find('"') {
            return (&quoted[..end], quoted[end + 1..].trim_start());
        }
        return (quoted, "");
    }
    match cmd.find(char::is_whitespace) {
        Some(end) => (&cmd[..end], cmd[end..].trim_start()),
        None => (cmd, ""),
    }
}

#[cfg(windows)]
fn push_raw_args(command: &mut Command, line: &str) {
    use std::os::windows::process::CommandExt;
    if !line.trim().is_empty() {
        command.raw_arg(line);
    }
}

#[cfg(not(windows))]
fn push_raw_args(command: &mut Command, line: &str) {
    command.args(line.split_whitespace());
}
