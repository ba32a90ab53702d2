use std::collections::VecDeque;

use bytes::Bytes;
use hearth_process::{StreamKind, ViewerId};
use tokio::sync::mpsc;

/// One record as seen by viewers and kept in history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    pub stream: StreamKind,
    pub data: Bytes,
}

impl ConsoleLine {
    pub fn stdout(data: impl Into<Bytes>) -> Self {
        Self {
            stream: StreamKind::Stdout,
            data: data.into(),
        }
    }

    pub fn stderr(data: impl Into<Bytes>) -> Self {
        Self {
            stream: StreamKind::Stderr,
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewerOptions {
    pub no_repeat: bool,
    pub stdout_capacity: usize,
    pub stderr_capacity: usize,
}

/// Sending half kept by the multiplexer. Dropping it closes the viewer's
/// queues.
#[derive(Debug)]
pub(crate) struct ViewerHandle {
    pub(crate) stdout: mpsc::Sender<Bytes>,
    pub(crate) stderr: mpsc::Sender<Bytes>,
}

impl ViewerHandle {
    pub(crate) fn sender(&self, stream: StreamKind) -> &mpsc::Sender<Bytes> {
        match stream {
            StreamKind::Stdout => &self.stdout,
            StreamKind::Stderr => &self.stderr,
        }
    }
}

/// A registered consumer of a console.
///
/// Yields the history replay captured at registration first, then live
/// records. `recv` returns `None` once the viewer has been deregistered (or
/// the console tore down) and both queues are drained.
#[derive(Debug)]
pub struct ViewerSession {
    id: ViewerId,
    replay: VecDeque<ConsoleLine>,
    stdout: mpsc::Receiver<Bytes>,
    stderr: mpsc::Receiver<Bytes>,
    stdout_open: bool,
    stderr_open: bool,
}

impl ViewerSession {
    pub(crate) fn new(
        id: ViewerId,
        options: ViewerOptions,
        replay: VecDeque<ConsoleLine>,
    ) -> (Self, ViewerHandle) {
        let (stdout_tx, stdout_rx) = mpsc::channel(options.stdout_capacity.max(1));
        let (stderr_tx, stderr_rx) = mpsc::channel(options.stderr_capacity.max(1));
        let session = Self {
            id,
            replay,
            stdout: stdout_rx,
            stderr: stderr_rx,
            stdout_open: true,
            stderr_open: true,
        };
        let handle = ViewerHandle {
            stdout: stdout_tx,
            stderr: stderr_tx,
        };
        (session, handle)
    }

    pub fn id(&self) -> ViewerId {
        self.id
    }

    /// Replayed records not yet consumed.
    pub fn pending_replay(&self) -> usize {
        self.replay.len()
    }

    /// Next record, replay first. Cancel safe.
    pub async fn recv(&mut self) -> Option<ConsoleLine> {
        if let Some(line) = self.replay.pop_front() {
            return Some(line);
        }

        loop {
            if !self.stdout_open && !self.stderr_open {
                return None;
            }
            tokio::select! {
                msg = self.stdout.recv(), if self.stdout_open => match msg {
                    Some(data) => return Some(ConsoleLine { stream: StreamKind::Stdout, data }),
                    None => self.stdout_open = false,
                },
                msg = self.stderr.recv(), if self.stderr_open => match msg {
                    Some(data) => return Some(ConsoleLine { stream: StreamKind::Stderr, data }),
                    None => self.stderr_open = false,
                },
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv). Stdout is checked first.
    pub fn try_recv(&mut self) -> Option<ConsoleLine> {
        if let Some(line) = self.replay.pop_front() {
            return Some(line);
        }
        if let Ok(data) = self.stdout.try_recv() {
            return Some(ConsoleLine::stdout(data));
        }
        self.stderr.try_recv().ok().map(ConsoleLine::stderr)
    }
}
