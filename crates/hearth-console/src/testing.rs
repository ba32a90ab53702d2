//! In-memory process and launcher doubles for the unit tests.

use std::{
    collections::HashMap,
    io,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use hearth_process::{IntegrationConfig, LaunchParams, ResourceId};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, DuplexStream, ReadBuf},
    sync::Mutex,
};

use crate::{
    config::{ConsoleConfig, FanoutPolicy},
    launcher::ProcessLauncher,
    multiplexer::{Multiplexer, TeardownContext},
    registry::Registry,
    session::ProcessSession,
    store::{MemoryStore, ResourceStore},
};

const PIPE_BUFFER: usize = 64 * 1024;

pub(crate) fn test_config() -> ConsoleConfig {
    let mut cfg = ConsoleConfig {
        fanout: FanoutPolicy::BoundedBlock(Duration::from_millis(50)),
        stop_timeout: Duration::from_millis(300),
        ..ConsoleConfig::default()
    };
    cfg.webhook.batch_window = Duration::from_millis(50);
    cfg.webhook.min_interval = Duration::ZERO;
    cfg.webhook.request_timeout = Duration::from_secs(5);
    cfg
}

/// Reader that fails once `fail` is set, even with data pending.
struct FailingReader {
    inner: DuplexStream,
    fail: Arc<AtomicBool>,
}

impl AsyncRead for FailingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.fail.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe broken")));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

struct ProcessSide {
    stdin: Option<BufReader<DuplexStream>>,
    stdout: DuplexStream,
    stderr: DuplexStream,
}

/// The process end of a fake session. Clones share the same pipes.
#[derive(Clone)]
pub(crate) struct FakeProcess {
    side: Arc<Mutex<Option<ProcessSide>>>,
    fail: Arc<AtomicBool>,
}

impl FakeProcess {
    pub(crate) fn pipes() -> (ProcessSession, FakeProcess) {
        let (stdin_w, stdin_r) = tokio::io::duplex(PIPE_BUFFER);
        let (stdout_w, stdout_r) = tokio::io::duplex(PIPE_BUFFER);
        let (stderr_w, stderr_r) = tokio::io::duplex(PIPE_BUFFER);
        let fail = Arc::new(AtomicBool::new(false));

        let session = ProcessSession::new(
            stdin_w,
            FailingReader {
                inner: stdout_r,
                fail: fail.clone(),
            },
            stderr_r,
        );
        let process = FakeProcess {
            side: Arc::new(Mutex::new(Some(ProcessSide {
                stdin: Some(BufReader::new(stdin_r)),
                stdout: stdout_w,
                stderr: stderr_w,
            }))),
            fail,
        };
        (session, process)
    }

    pub(crate) async fn emit_stdout(&self, text: &str) {
        let mut side = self.side.lock().await;
        let side = side.as_mut().expect("process exited");
        side.stdout.write_all(text.as_bytes()).await.unwrap();
    }

    pub(crate) async fn emit_stderr(&self, text: &str) {
        let mut side = self.side.lock().await;
        let side = side.as_mut().expect("process exited");
        side.stderr.write_all(text.as_bytes()).await.unwrap();
    }

    pub(crate) async fn read_stdin_line(&self) -> String {
        let mut side = self.side.lock().await;
        let stdin = side
            .as_mut()
            .and_then(|s| s.stdin.as_mut())
            .expect("stdin closed");
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), stdin.read_line(&mut line))
            .await
            .expect("timed out reading stdin")
            .unwrap();
        line
    }

    pub(crate) async fn close_stdin_reader(&self) {
        if let Some(side) = self.side.lock().await.as_mut() {
            side.stdin = None;
        }
    }

    /// Closes every pipe, like a clean process exit.
    pub(crate) async fn exit(&self) {
        self.side.lock().await.take();
    }

    /// Breaks stdout and closes everything.
    pub(crate) async fn crash(&self) {
        self.fail.store(true, Ordering::SeqCst);
        self.side.lock().await.take();
    }

    pub(crate) async fn exited(&self) -> bool {
        self.side.lock().await.is_none()
    }
}

#[derive(Default)]
pub(crate) struct FakeLauncher {
    pub(crate) launches: AtomicUsize,
    pub(crate) attaches: AtomicUsize,
    pub(crate) terminations: AtomicUsize,
    pub(crate) fail_launch: AtomicBool,
    pub(crate) fail_attach: AtomicBool,
    /// When set, terminate reports success but leaves the pipes open.
    pub(crate) ignore_terminate: AtomicBool,
    /// When set, launched processes exit before the console is installed.
    pub(crate) exit_on_launch: AtomicBool,
    processes: std::sync::Mutex<HashMap<ResourceId, FakeProcess>>,
}

impl FakeLauncher {
    pub(crate) fn process(&self, id: ResourceId) -> Option<FakeProcess> {
        self.processes.lock().unwrap().get(&id).cloned()
    }

    fn open(&self, id: ResourceId) -> ProcessSession {
        let (session, process) = FakeProcess::pipes();
        self.processes.lock().unwrap().insert(id, process);
        session
    }
}

#[async_trait::async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn launch(
        &self,
        id: ResourceId,
        _params: &LaunchParams,
    ) -> anyhow::Result<ProcessSession> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_launch.load(Ordering::SeqCst) {
            anyhow::bail!("no such image");
        }
        let session = self.open(id);
        if self.exit_on_launch.load(Ordering::SeqCst) {
            if let Some(process) = self.process(id) {
                process.exit().await;
            }
        }
        Ok(session)
    }

    async fn attach_existing(&self, id: ResourceId) -> anyhow::Result<ProcessSession> {
        self.attaches.fetch_add(1, Ordering::SeqCst);
        // Widen the window for concurrent attach attempts.
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.fail_attach.load(Ordering::SeqCst) {
            anyhow::bail!("container not running");
        }
        Ok(self.open(id))
    }

    async fn terminate(&self, id: ResourceId) -> anyhow::Result<()> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        if self.ignore_terminate.load(Ordering::SeqCst) {
            return Ok(());
        }
        let process = self.process(id);
        if let Some(process) = process {
            process.exit().await;
        }
        Ok(())
    }
}

/// [`MemoryStore`] whose integration lookups take a while.
pub(crate) struct SlowStore {
    pub(crate) inner: MemoryStore,
    pub(crate) delay: Duration,
}

#[async_trait::async_trait]
impl ResourceStore for SlowStore {
    async fn set_running(&self, id: ResourceId, running: bool) -> anyhow::Result<()> {
        self.inner.set_running(id, running).await
    }

    async fn integration_config(
        &self,
        id: ResourceId,
    ) -> anyhow::Result<Option<IntegrationConfig>> {
        tokio::time::sleep(self.delay).await;
        self.inner.integration_config(id).await
    }

    async fn launch_params(&self, id: ResourceId) -> anyhow::Result<LaunchParams> {
        self.inner.launch_params(id).await
    }
}

pub(crate) struct TestContext {
    pub(crate) launcher: Arc<FakeLauncher>,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) registry: Registry,
}

impl TestContext {
    fn teardown(&self) -> TeardownContext {
        TeardownContext {
            launcher: self.launcher.clone(),
            store: self.store.clone(),
            registry: self.registry.clone(),
        }
    }
}

/// A registered multiplexer over fresh fake pipes, marked running.
pub(crate) async fn spawn_with_fake(
    id: ResourceId,
    config: ConsoleConfig,
) -> (Arc<Multiplexer>, FakeProcess, TestContext) {
    let (session, process) = FakeProcess::pipes();
    let ctx = TestContext {
        launcher: Arc::new(FakeLauncher::default()),
        store: Arc::new(MemoryStore::new()),
        registry: Registry::default(),
    };
    ctx.store.set_running(id, true).await.unwrap();
    let mux = Multiplexer::spawn(id, session, config, ctx.teardown());
    (mux, process, ctx)
}
