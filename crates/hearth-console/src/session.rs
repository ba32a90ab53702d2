use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

pub type PipeWriter = Pin<Box<dyn AsyncWrite + Send>>;
pub type PipeReader = Pin<Box<dyn AsyncRead + Send>>;

/// The three pipes of one live process backing a resource.
///
/// Ownership moves into the multiplexer, which splits it across its pumps.
/// Dropping the handles closes the pipes.
pub struct ProcessSession {
    pub stdin: PipeWriter,
    pub stdout: PipeReader,
    pub stderr: PipeReader,
}

impl ProcessSession {
    pub fn new(
        stdin: impl AsyncWrite + Send + 'static,
        stdout: impl AsyncRead + Send + 'static,
        stderr: impl AsyncRead + Send + 'static,
    ) -> Self {
        Self {
            stdin: Box::pin(stdin),
            stdout: Box::pin(stdout),
            stderr: Box::pin(stderr),
        }
    }

    /// Takes the piped stdio handles out of a spawned child.
    ///
    /// Returns `None` unless all three were configured with `Stdio::piped()`.
    pub fn from_child(child: &mut tokio::process::Child) -> Option<Self> {
        let stdin = child.stdin.take()?;
        let stdout = child.stdout.take()?;
        let stderr = child.stderr.take()?;
        Some(Self::new(stdin, stdout, stderr))
    }
}

impl std::fmt::Debug for ProcessSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSession").finish_non_exhaustive()
    }
}
