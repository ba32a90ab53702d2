use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use hearth_process::{MultiplexerState, ResourceId, StreamKind, TerminationCause, ViewerId};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::{
        Mutex, mpsc,
        mpsc::error::{SendTimeoutError, TrySendError},
        watch,
    },
    task::JoinHandle,
};
use tracing::Instrument;

use crate::{
    config::{ConsoleConfig, FanoutPolicy},
    error::{ConsoleError, ConsoleResult},
    launcher::ProcessLauncher,
    registry::Registry,
    ring_buffer::RingBuffer,
    session::{PipeReader, PipeWriter, ProcessSession},
    store::ResourceStore,
    viewer::{ConsoleLine, ViewerHandle, ViewerOptions, ViewerSession},
};

const READER_DRAIN: Duration = Duration::from_millis(500);

/// What a pump reports to the input pump, which owns teardown.
#[derive(Debug)]
enum PumpSignal {
    Eof,
    Failed {
        pipe: &'static str,
        error: std::io::Error,
    },
    Stop,
}

impl PumpSignal {
    fn cause(&self) -> TerminationCause {
        match self {
            PumpSignal::Eof => TerminationCause::Graceful,
            PumpSignal::Failed { .. } => TerminationCause::Crash,
            PumpSignal::Stop => TerminationCause::Stopped,
        }
    }
}

/// Collaborators the teardown path needs once the pipes die.
#[derive(Clone)]
pub(crate) struct TeardownContext {
    pub(crate) launcher: Arc<dyn ProcessLauncher>,
    pub(crate) store: Arc<dyn ResourceStore>,
    pub(crate) registry: Registry,
}

#[derive(Debug)]
struct Shared {
    viewers: HashMap<ViewerId, ViewerHandle>,
    no_repeat: HashSet<ViewerId>,
    history: RingBuffer<ConsoleLine>,
    relay: Option<ViewerId>,
}

enum Delivery {
    Delivered,
    Dropped,
    Gone,
}

impl Shared {
    /// Enqueues `line` to every eligible viewer, in map order.
    ///
    /// With `echo_from` set, the submitter and every no-repeat viewer are
    /// skipped. Viewers whose receiver is gone are pruned.
    async fn fan_out(
        &mut self,
        resource: ResourceId,
        policy: FanoutPolicy,
        line: &ConsoleLine,
        echo_from: Option<ViewerId>,
    ) {
        let mut gone = Vec::new();
        for (id, handle) in &self.viewers {
            let skip = echo_from.is_some_and(|from| *id == from || self.no_repeat.contains(id));
            if skip {
                continue;
            }
            match deliver(policy, handle.sender(line.stream), line.data.clone()).await {
                Delivery::Delivered => {}
                Delivery::Dropped => {
                    tracing::warn!(resource = %resource, viewer = %id, stream = ?line.stream, "viewer queue full, dropped record");
                }
                Delivery::Gone => gone.push(*id),
            }
        }
        for id in gone {
            tracing::debug!(resource = %resource, viewer = %id, "pruning viewer with closed queue");
            self.remove(id);
        }
    }

    fn remove(&mut self, id: ViewerId) -> bool {
        self.no_repeat.remove(&id);
        if self.relay == Some(id) {
            self.relay = None;
        }
        self.viewers.remove(&id).is_some()
    }
}

async fn deliver(policy: FanoutPolicy, tx: &mpsc::Sender<Bytes>, data: Bytes) -> Delivery {
    match tx.try_send(data) {
        Ok(()) => Delivery::Delivered,
        Err(TrySendError::Closed(_)) => Delivery::Gone,
        Err(TrySendError::Full(data)) => match policy {
            FanoutPolicy::Drop => Delivery::Dropped,
            FanoutPolicy::BoundedBlock(wait) => match tx.send_timeout(data, wait).await {
                Ok(()) => Delivery::Delivered,
                Err(SendTimeoutError::Closed(_)) => Delivery::Gone,
                Err(SendTimeoutError::Timeout(_)) => Delivery::Dropped,
            },
        },
    }
}

/// Fans one process's console out to many viewers.
///
/// History, viewer registration, output fan-out and input echo all run under
/// `shared`, so every viewer and the history see one global record order.
/// The lock is never held across a pipe read or write.
pub struct Multiplexer {
    id: ResourceId,
    config: ConsoleConfig,
    input: mpsc::Sender<Bytes>,
    signals: mpsc::Sender<PumpSignal>,
    shared: Mutex<Shared>,
    state: watch::Sender<MultiplexerState>,
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("id", &self.id)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl Multiplexer {
    /// Takes ownership of the session, registers the multiplexer and starts
    /// the three pumps.
    ///
    /// Registration comes first so a process that exits at once is still
    /// removed by its own teardown.
    pub(crate) fn spawn(
        id: ResourceId,
        session: ProcessSession,
        config: ConsoleConfig,
        ctx: TeardownContext,
    ) -> Arc<Self> {
        let (input_tx, input_rx) = mpsc::channel(config.input_queue.max(1));
        // Two slots: the first signal wins, a racing second one is dropped.
        let (signal_tx, signal_rx) = mpsc::channel(2);
        let (state, _) = watch::channel(MultiplexerState::Attaching);

        let mux = Arc::new(Self {
            id,
            input: input_tx,
            signals: signal_tx,
            shared: Mutex::new(Shared {
                viewers: HashMap::new(),
                no_repeat: HashSet::new(),
                history: RingBuffer::new(config.history_lines),
                relay: None,
            }),
            state,
            config,
        });

        if ctx.registry.insert(mux.clone()).is_some() {
            tracing::error!(resource = %id, "replaced a live console; action lock was bypassed");
        }

        let ProcessSession {
            stdin,
            stdout,
            stderr,
        } = session;

        let span = tracing::info_span!("console", resource = %id);
        let readers = vec![
            tokio::spawn(
                output_pump(mux.clone(), StreamKind::Stdout, stdout).instrument(span.clone()),
            ),
            tokio::spawn(
                output_pump(mux.clone(), StreamKind::Stderr, stderr).instrument(span.clone()),
            ),
        ];
        mux.state.send_replace(MultiplexerState::Running);
        tokio::spawn(input_pump(mux.clone(), stdin, input_rx, signal_rx, readers, ctx).instrument(span));

        tracing::info!(resource = %id, "console attached");
        mux
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn state(&self) -> MultiplexerState {
        *self.state.borrow()
    }

    /// Resolves once teardown has finished. Returns false on timeout.
    pub async fn wait_gone(&self, timeout: Duration) -> bool {
        let mut rx = self.state.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|s| *s == MultiplexerState::Gone))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    pub async fn register_viewer(&self) -> ConsoleResult<ViewerSession> {
        self.register_viewer_with(ViewerOptions {
            no_repeat: false,
            stdout_capacity: self.config.viewer_queue,
            stderr_capacity: self.config.viewer_queue,
        })
        .await
    }

    /// Registers a viewer and hands it the current history as replay.
    ///
    /// Replay capture and insertion share one lock acquisition, so the viewer
    /// sees no gap and no duplicate between history and live records.
    pub async fn register_viewer_with(
        &self,
        options: ViewerOptions,
    ) -> ConsoleResult<ViewerSession> {
        let mut shared = self.shared.lock().await;
        self.register_locked(&mut shared, options)
    }

    fn register_locked(
        &self,
        shared: &mut Shared,
        options: ViewerOptions,
    ) -> ConsoleResult<ViewerSession> {
        if self.state() != MultiplexerState::Running {
            return Err(ConsoleError::Closed(self.id));
        }
        let replay: VecDeque<ConsoleLine> = shared.history.iter().cloned().collect();
        let id = ViewerId::new();
        let (session, handle) = ViewerSession::new(id, options, replay);
        shared.viewers.insert(id, handle);
        if options.no_repeat {
            shared.no_repeat.insert(id);
        }
        tracing::debug!(resource = %self.id, viewer = %id, no_repeat = options.no_repeat, "viewer registered");
        Ok(session)
    }

    /// Removes the viewer and closes its queues. Returns false if it was not
    /// registered.
    pub async fn deregister_viewer(&self, viewer: ViewerId) -> bool {
        let removed = self.shared.lock().await.remove(viewer);
        if removed {
            tracing::debug!(resource = %self.id, viewer = %viewer, "viewer deregistered");
        }
        removed
    }

    /// Mute-echo / unmute-echo. Returns false for an unknown viewer.
    pub async fn set_no_repeat(&self, viewer: ViewerId, no_repeat: bool) -> bool {
        let mut shared = self.shared.lock().await;
        if !shared.viewers.contains_key(&viewer) {
            return false;
        }
        if no_repeat {
            shared.no_repeat.insert(viewer);
        } else {
            shared.no_repeat.remove(&viewer);
        }
        true
    }

    pub async fn is_no_repeat(&self, viewer: ViewerId) -> bool {
        self.shared.lock().await.no_repeat.contains(&viewer)
    }

    pub async fn viewer_count(&self) -> usize {
        self.shared.lock().await.viewers.len()
    }

    pub async fn history(&self) -> Vec<ConsoleLine> {
        self.shared.lock().await.history.iter().cloned().collect()
    }

    /// Sends one input record to the process.
    ///
    /// Unless `no_repeat` is set, the record is first echoed to every other
    /// viewer that is not muted, under the same lock as output fan-out.
    /// A trailing newline is added when missing.
    pub async fn submit_input(
        &self,
        submitter: ViewerId,
        record: impl Into<Bytes>,
        no_repeat: bool,
    ) -> ConsoleResult<()> {
        let record = terminate_line(record.into());
        {
            let mut shared = self.shared.lock().await;
            if self.state() != MultiplexerState::Running {
                return Err(ConsoleError::Closed(self.id));
            }
            if !no_repeat {
                let echo = ConsoleLine::stdout(record.clone());
                shared
                    .fan_out(self.id, self.config.fanout, &echo, Some(submitter))
                    .await;
            }
        }
        self.input
            .send(record)
            .await
            .map_err(|_| ConsoleError::Closed(self.id))
    }

    /// Asks the input pump to tear down without terminating the process.
    pub(crate) fn shutdown(&self) {
        let _ = self.signals.try_send(PumpSignal::Stop);
    }

    /// Registers the webhook relay viewer unless one is already present.
    pub(crate) async fn install_relay(
        &self,
        options: ViewerOptions,
    ) -> ConsoleResult<Option<ViewerSession>> {
        let mut shared = self.shared.lock().await;
        if shared.relay.is_some() {
            return Ok(None);
        }
        let session = self.register_locked(&mut shared, options)?;
        shared.relay = Some(session.id());
        Ok(Some(session))
    }

    pub(crate) async fn remove_relay(&self) -> bool {
        let mut shared = self.shared.lock().await;
        match shared.relay {
            Some(id) => shared.remove(id),
            None => false,
        }
    }

    pub(crate) async fn has_relay(&self) -> bool {
        self.shared.lock().await.relay.is_some()
    }

    async fn publish(&self, line: ConsoleLine) {
        let mut shared = self.shared.lock().await;
        if shared.history.is_full() {
            shared.history.pop();
        }
        shared.history.push(line.clone());
        shared.fan_out(self.id, self.config.fanout, &line, None).await;
    }

    async fn teardown(
        &self,
        signal: PumpSignal,
        mut stdin: PipeWriter,
        readers: Vec<JoinHandle<()>>,
        ctx: TeardownContext,
    ) {
        let cause = signal.cause();
        {
            let _shared = self.shared.lock().await;
            self.state.send_replace(MultiplexerState::TearingDown);
        }

        match &signal {
            PumpSignal::Eof => tracing::info!(resource = %self.id, "console stream closed"),
            PumpSignal::Failed { pipe, error } => {
                tracing::error!(resource = %self.id, pipe, %error, "console pipe failed")
            }
            PumpSignal::Stop => tracing::info!(resource = %self.id, "console stopped"),
        }

        // Close, discard the error, proceed: the process may already have
        // closed its side.
        let _ = stdin.shutdown().await;
        drop(stdin);
        for mut reader in readers {
            // After a clean exit, let stderr flush its last lines.
            if cause == TerminationCause::Graceful
                && tokio::time::timeout(READER_DRAIN, &mut reader).await.is_ok()
            {
                continue;
            }
            reader.abort();
        }

        if let Err(error) = ctx.store.set_running(self.id, false).await {
            tracing::warn!(resource = %self.id, %error, "failed to persist stopped state");
        }

        if cause == TerminationCause::Crash {
            tracing::info!(resource = %self.id, "stopping resource after crash");
            if let Err(error) = ctx.launcher.terminate(self.id).await {
                tracing::warn!(resource = %self.id, %error, "terminate after crash failed");
            }
        }

        ctx.registry.remove_if_same(self.id, self);

        {
            let mut shared = self.shared.lock().await;
            shared.viewers.clear();
            shared.no_repeat.clear();
            shared.relay = None;
        }
        self.state.send_replace(MultiplexerState::Gone);
        tracing::info!(resource = %self.id, ?cause, "console gone");
    }
}

fn terminate_line(record: Bytes) -> Bytes {
    if record.ends_with(b"\n") {
        return record;
    }
    let mut buf = Vec::with_capacity(record.len() + 1);
    buf.extend_from_slice(&record);
    buf.push(b'\n');
    Bytes::from(buf)
}

/// Single consumer of the input queue; also the only place teardown runs.
async fn input_pump(
    mux: Arc<Multiplexer>,
    mut stdin: PipeWriter,
    mut input: mpsc::Receiver<Bytes>,
    mut signals: mpsc::Receiver<PumpSignal>,
    readers: Vec<JoinHandle<()>>,
    ctx: TeardownContext,
) {
    let signal = loop {
        tokio::select! {
            biased;
            Some(signal) = signals.recv() => break signal,
            record = input.recv() => {
                let Some(record) = record else {
                    break PumpSignal::Stop;
                };
                let write = async {
                    stdin.write_all(&record).await?;
                    stdin.flush().await
                };
                // A process that stopped reading must not pin the pump.
                tokio::select! {
                    biased;
                    Some(signal) = signals.recv() => break signal,
                    written = write => {
                        if let Err(error) = written {
                            break PumpSignal::Failed { pipe: "stdin", error };
                        }
                    }
                }
            }
        }
    };
    mux.teardown(signal, stdin, readers, ctx).await;
}

/// Reads newline-delimited records from one output pipe.
///
/// Only stdout EOF requests teardown; stderr closing on its own is ignored so
/// a normal exit produces exactly one signal.
async fn output_pump(mux: Arc<Multiplexer>, stream: StreamKind, pipe: PipeReader) {
    let pipe_name = match stream {
        StreamKind::Stdout => "stdout",
        StreamKind::Stderr => "stderr",
    };
    let mut reader = BufReader::new(pipe);
    loop {
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                tracing::debug!(resource = %mux.id, pipe = pipe_name, "pipe reached end of stream");
                if stream == StreamKind::Stdout {
                    let _ = mux.signals.try_send(PumpSignal::Eof);
                }
                return;
            }
            Ok(_) => {
                if !buf.ends_with(b"\n") {
                    buf.push(b'\n');
                }
                mux.publish(ConsoleLine {
                    stream,
                    data: Bytes::from(buf),
                })
                .await;
            }
            Err(error) => {
                let _ = mux.signals.try_send(PumpSignal::Failed {
                    pipe: pipe_name,
                    error,
                });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::testing::{spawn_with_fake, test_config};

    const WAIT: Duration = Duration::from_secs(5);

    async fn recv_text(viewer: &mut ViewerSession) -> (StreamKind, String) {
        let line = tokio::time::timeout(WAIT, viewer.recv())
            .await
            .expect("timed out waiting for record")
            .expect("viewer closed");
        (line.stream, String::from_utf8_lossy(&line.data).into_owned())
    }

    #[tokio::test]
    async fn example_scenario_fans_out_and_echoes() {
        let (mux, proc, _ctx) = spawn_with_fake(ResourceId(42), test_config()).await;

        let mut a = mux.register_viewer().await.unwrap();
        let mut b = mux.register_viewer().await.unwrap();
        let mut c = mux.register_viewer().await.unwrap();

        proc.emit_stdout("Server started\n").await;
        for v in [&mut a, &mut b, &mut c] {
            assert_eq!(recv_text(v).await, (StreamKind::Stdout, "Server started\n".into()));
        }
        let history = mux.history().await;
        assert_eq!(history, vec![ConsoleLine::stdout("Server started\n")]);

        mux.submit_input(a.id(), "/save", false).await.unwrap();
        assert_eq!(recv_text(&mut b).await.1, "/save\n");
        assert_eq!(recv_text(&mut c).await.1, "/save\n");
        assert!(a.try_recv().is_none(), "submitter must not get its own echo");

        assert_eq!(proc.read_stdin_line().await, "/save\n");
    }

    #[tokio::test]
    async fn late_viewer_gets_bounded_replay_then_live() {
        let mut cfg = test_config();
        cfg.history_lines = 3;
        let (mux, proc, _ctx) = spawn_with_fake(ResourceId(1), cfg).await;

        // A viewer present from the start acts as a barrier for publication.
        let mut early = mux.register_viewer().await.unwrap();
        for i in 0..5 {
            proc.emit_stdout(&format!("line {i}\n")).await;
            assert_eq!(recv_text(&mut early).await.1, format!("line {i}\n"));
        }

        let mut late = mux.register_viewer().await.unwrap();
        assert_eq!(late.pending_replay(), 3);
        proc.emit_stdout("line 5\n").await;

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(recv_text(&mut late).await.1);
        }
        assert_eq!(seen, vec!["line 2\n", "line 3\n", "line 4\n", "line 5\n"]);
    }

    #[tokio::test]
    async fn stderr_goes_to_error_queue_and_history() {
        let (mux, proc, _ctx) = spawn_with_fake(ResourceId(2), test_config()).await;
        let mut v = mux.register_viewer().await.unwrap();

        proc.emit_stderr("oops\n").await;
        assert_eq!(recv_text(&mut v).await, (StreamKind::Stderr, "oops\n".into()));

        let mut late = mux.register_viewer().await.unwrap();
        assert_eq!(recv_text(&mut late).await, (StreamKind::Stderr, "oops\n".into()));
    }

    #[tokio::test]
    async fn partial_last_line_gets_newline() {
        let (mux, proc, _ctx) = spawn_with_fake(ResourceId(12), test_config()).await;
        let mut v = mux.register_viewer().await.unwrap();

        proc.emit_stdout("Saving").await;
        proc.exit().await;
        assert_eq!(recv_text(&mut v).await.1, "Saving\n");
        assert!(tokio::time::timeout(WAIT, v.recv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stderr_written_before_exit_is_delivered() {
        let (mux, proc, _ctx) = spawn_with_fake(ResourceId(13), test_config()).await;
        let mut v = mux.register_viewer().await.unwrap();

        proc.emit_stderr("Exception in server tick loop\n").await;
        proc.exit().await;
        assert_eq!(
            recv_text(&mut v).await,
            (StreamKind::Stderr, "Exception in server tick loop\n".into())
        );
        assert!(mux.wait_gone(WAIT).await);
        assert!(tokio::time::timeout(WAIT, v.recv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn no_repeat_viewers_never_see_echoes() {
        let (mux, proc, _ctx) = spawn_with_fake(ResourceId(3), test_config()).await;
        let submitter = mux.register_viewer().await.unwrap();
        let mut muted = mux.register_viewer().await.unwrap();
        let mut plain = mux.register_viewer().await.unwrap();

        assert!(mux.set_no_repeat(muted.id(), true).await);
        mux.submit_input(submitter.id(), "say hi\n", false).await.unwrap();
        mux.submit_input(muted.id(), "list\n", false).await.unwrap();

        assert_eq!(recv_text(&mut plain).await.1, "say hi\n");
        assert_eq!(recv_text(&mut plain).await.1, "list\n");
        assert_eq!(proc.read_stdin_line().await, "say hi\n");
        assert_eq!(proc.read_stdin_line().await, "list\n");
        assert!(muted.try_recv().is_none());

        assert!(mux.set_no_repeat(muted.id(), false).await);
        mux.submit_input(submitter.id(), "again\n", false).await.unwrap();
        assert_eq!(recv_text(&mut muted).await.1, "again\n");
    }

    #[tokio::test]
    async fn quiet_submission_skips_echo() {
        let (mux, proc, _ctx) = spawn_with_fake(ResourceId(4), test_config()).await;
        let submitter = mux.register_viewer().await.unwrap();
        let mut other = mux.register_viewer().await.unwrap();

        mux.submit_input(submitter.id(), "secret", true).await.unwrap();
        assert_eq!(proc.read_stdin_line().await, "secret\n");
        assert!(other.try_recv().is_none());
    }

    #[tokio::test]
    async fn every_viewer_gets_every_record_once() {
        let mut cfg = test_config();
        cfg.viewer_queue = 64;
        let (mux, proc, _ctx) = spawn_with_fake(ResourceId(5), cfg).await;

        let mut viewers = Vec::new();
        for _ in 0..6 {
            viewers.push(mux.register_viewer().await.unwrap());
        }
        for i in 0..20 {
            proc.emit_stdout(&format!("{i}\n")).await;
        }
        for v in &mut viewers {
            for i in 0..20 {
                assert_eq!(recv_text(v).await.1, format!("{i}\n"));
            }
            assert!(v.try_recv().is_none());
        }
    }

    #[tokio::test]
    async fn deregister_closes_queues() {
        let (mux, _proc, _ctx) = spawn_with_fake(ResourceId(6), test_config()).await;
        let mut v = mux.register_viewer().await.unwrap();
        assert!(mux.set_no_repeat(v.id(), true).await);

        assert!(mux.deregister_viewer(v.id()).await);
        assert!(!mux.deregister_viewer(v.id()).await);
        assert!(!mux.is_no_repeat(v.id()).await);
        assert_eq!(mux.viewer_count().await, 0);
        assert!(tokio::time::timeout(WAIT, v.recv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn full_queue_drops_under_drop_policy() {
        let mut cfg = test_config();
        cfg.viewer_queue = 1;
        cfg.fanout = FanoutPolicy::Drop;
        let (mux, proc, _ctx) = spawn_with_fake(ResourceId(7), cfg).await;

        let mut stuck = mux.register_viewer().await.unwrap();
        let mut fast = mux.register_viewer_with(ViewerOptions {
            no_repeat: false,
            stdout_capacity: 16,
            stderr_capacity: 16,
        })
        .await
        .unwrap();

        for i in 0..3 {
            proc.emit_stdout(&format!("{i}\n")).await;
            assert_eq!(recv_text(&mut fast).await.1, format!("{i}\n"));
        }
        assert_eq!(recv_text(&mut stuck).await.1, "0\n");
        assert!(stuck.try_recv().is_none());
    }

    #[tokio::test]
    async fn graceful_exit_tears_down_without_terminate() {
        let (mux, proc, ctx) = spawn_with_fake(ResourceId(8), test_config()).await;
        let mut v = mux.register_viewer().await.unwrap();

        proc.exit().await;
        assert!(mux.wait_gone(WAIT).await);
        assert_eq!(ctx.launcher.terminations.load(Ordering::SeqCst), 0);
        assert!(ctx.registry.get(ResourceId(8)).is_none());
        assert!(!ctx.store.running(ResourceId(8)).await);
        assert!(tokio::time::timeout(WAIT, v.recv()).await.unwrap().is_none());
        assert!(matches!(
            mux.register_viewer().await,
            Err(ConsoleError::Closed(ResourceId(8)))
        ));
        assert!(matches!(
            mux.submit_input(v.id(), "x", false).await,
            Err(ConsoleError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn pipe_failure_terminates_exactly_once() {
        let (mux, proc, ctx) = spawn_with_fake(ResourceId(9), test_config()).await;

        // Fail stdout and close everything at once so EOF and errors race.
        proc.crash().await;
        assert!(mux.wait_gone(WAIT).await);
        assert_eq!(ctx.launcher.terminations.load(Ordering::SeqCst), 1);
        assert!(ctx.registry.get(ResourceId(9)).is_none());
    }

    #[tokio::test]
    async fn stdin_write_failure_is_a_crash() {
        let (mux, proc, ctx) = spawn_with_fake(ResourceId(10), test_config()).await;
        let v = mux.register_viewer().await.unwrap();

        proc.close_stdin_reader().await;
        // The first write may land in the duplex buffer; keep writing until
        // the pump notices the broken pipe.
        for _ in 0..100 {
            if mux.submit_input(v.id(), "ping", true).await.is_err() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(mux.wait_gone(WAIT).await);
        assert_eq!(ctx.launcher.terminations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_tears_down_as_stopped() {
        let (mux, _proc, ctx) = spawn_with_fake(ResourceId(11), test_config()).await;
        mux.shutdown();
        mux.shutdown();
        assert!(mux.wait_gone(WAIT).await);
        assert_eq!(ctx.launcher.terminations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn terminate_line_appends_once() {
        assert_eq!(terminate_line(Bytes::from_static(b"a")), Bytes::from_static(b"a\n"));
        assert_eq!(terminate_line(Bytes::from_static(b"a\n")), Bytes::from_static(b"a\n"));
    }
}
