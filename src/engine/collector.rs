//! Concurrent, bounded capture of a child's output streams.
//!
//! Each stream gets its own reader task that keeps draining the pipe for the
//! whole life of the process, so a chatty program can never block on a full
//! pipe buffer. Only the first `limit` bytes are kept.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

const READ_CHUNK: usize = 8 * 1024;

/// Output captured from one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub bytes: Vec<u8>,
    /// Whether output was discarded because the limit was reached
    pub truncated: bool,
}

impl CapturedOutput {
    pub fn into_string(self) -> String {
        match String::from_utf8(self.bytes) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }
}

#[derive(Debug)]
struct BoundedBuffer {
    limit: usize,
    captured: CapturedOutput,
    sealed: bool,
}

impl BoundedBuffer {
    fn push(&mut self, chunk: &[u8]) {
        if self.sealed {
            return;
        }
        let room = self.limit.saturating_sub(self.captured.bytes.len());
        if chunk.len() > room {
            self.captured.truncated = true;
        }
        let keep = chunk.len().min(room);
        self.captured.bytes.extend_from_slice(&chunk[..keep]);
    }
}

/// Background reader for one output stream.
pub struct OutputCollector {
    name: &'static str,
    buffer: Arc<Mutex<BoundedBuffer>>,
    task: JoinHandle<()>,
}

impl OutputCollector {
    /// Start draining `stream` on its own task.
    pub fn spawn<R>(name: &'static str, mut stream: R, limit: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(BoundedBuffer {
            limit,
            captured: CapturedOutput::default(),
            sealed: false,
        }));

        let sink = Arc::clone(&buffer);
        let task = tokio::spawn(async move {
            let mut chunk = vec![0u8; READ_CHUNK];
            loop {
                match stream.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        trace!(stream = name, bytes = n, "Captured output chunk");
                        lock(&sink).push(&chunk[..n]);
                    }
                    Err(e) => {
                        debug!(stream = name, error = %e, "Output stream read failed");
                        break;
                    }
                }
            }
        });

        Self { name, buffer, task }
    }

    /// Stop accepting output. Reading continues so the writer never blocks.
    pub fn seal(&self) {
        lock(&self.buffer).sealed = true;
    }

    /// Wait up to `grace` for the stream to reach EOF, then return what was
    /// captured. A descendant still holding the pipe open after `grace` is
    /// ignored.
    pub async fn finish(mut self, grace: Duration) -> CapturedOutput {
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            debug!(stream = self.name, "Output stream still open after grace period");
            self.task.abort();
        }
        self.take()
    }

    /// Stop reading immediately and return what was captured so far.
    pub fn abort(self) -> CapturedOutput {
        self.seal();
        self.task.abort();
        self.take()
    }

    fn take(&self) -> CapturedOutput {
        let mut buffer = lock(&self.buffer);
        buffer.sealed = true;
        std::mem::take(&mut buffer.captured)
    }
}

impl Drop for OutputCollector {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn lock(buffer: &Mutex<BoundedBuffer>) -> std::sync::MutexGuard<'_, BoundedBuffer> {
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
