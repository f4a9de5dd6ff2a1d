//! Error stream pump
//!
//! A background thread that owns the child's stderr and hands every chunk to
//! a caller-supplied callback while the control thread keeps stdin/stdout.
//!
//! The callback runs on the pump thread. Hosts with a UI thread must hand the
//! text off themselves.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::debug;

use super::text_stream::TextDecoder;

/// Callback receiving error stream text
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Pump lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Running,
    Drained,
}

/// Handle to a running error stream pump
pub struct ErrorPump {
    drained: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ErrorPump {
    /// Start draining `stream` on a named background thread.
    ///
    /// `exited` is polled before every read; once it reports the process has
    /// exited the remainder is read and delivered in a single call.
    /// `chunk_size` bounds each read while the process runs, 1 gives the
    /// lowest latency.
    pub fn spawn<R, F>(
        stream: R,
        exited: F,
        callback: ErrorCallback,
        chunk_size: usize,
    ) -> io::Result<Self>
    where
        R: Read + Send + 'static,
        F: Fn() -> bool + Send + 'static,
    {
        let drained = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&drained);

        let handle = thread::Builder::new()
            .name("coderunner-stderr".to_string())
            .spawn(move || {
                if let Err(e) = pump(stream, exited, &*callback, chunk_size) {
                    debug!(error = %e, "Error stream pump stopped");
                }
                flag.store(true, Ordering::SeqCst);
            })?;

        Ok(Self {
            drained,
            handle: Some(handle),
        })
    }

    pub fn state(&self) -> PumpState {
        if self.drained.load(Ordering::SeqCst) {
            PumpState::Drained
        } else {
            PumpState::Running
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == PumpState::Running
    }

    /// Wait for the pump to finish. Blocks until the error stream closes.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                debug!("Error stream callback panicked");
            }
        }
    }
}

impl std::fmt::Debug for ErrorPump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorPump")
            .field("state", &self.state())
            .finish()
    }
}

fn pump<R, F>(mut stream: R, exited: F, callback: &dyn Fn(&str), chunk_size: usize) -> io::Result<()>
where
    R: Read,
    F: Fn() -> bool,
{
    let mut decoder = TextDecoder::new();
    let mut buf = vec![0u8; chunk_size.max(1)];

    loop {
        if exited() {
            let mut rest = Vec::new();
            stream.read_to_end(&mut rest)?;
            let mut text = decoder.decode(&rest);
            text.push_str(&decoder.finish());
            if !text.is_empty() {
                callback(&text);
            }
            return Ok(());
        }

        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        let text = decoder.decode(&buf[..n]);
        if !text.is_empty() {
            callback(&text);
        }
    }

    // Stream closed before the exit was observed
    let tail = decoder.finish();
    if !tail.is_empty() {
        callback(&tail);
    }
    Ok(())
}
