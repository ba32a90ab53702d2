use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use hearth_process::{IntegrationConfig, ResourceId, StreamKind};
use reqwest::{StatusCode, header::HeaderMap};
use serde::Serialize;
use tokio::time::Instant;

use crate::{
    config::WebhookConfig,
    multiplexer::Multiplexer,
    viewer::{ConsoleLine, ViewerSession},
};

const STDERR_PREFIX: &str = "ERROR: ";
const TRUNCATED_SUFFIX: &str = "…(truncated)";
const MAX_ATTEMPTS: u32 = 5;
const FALLBACK_RETRY: Duration = Duration::from_secs(1);
const MAX_RETRY: Duration = Duration::from_secs(10 * 60);
const MAX_BACKLOG: usize = 1000;

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar_url: Option<&'a str>,
}

/// Formatted records waiting to be posted, oldest first.
///
/// Bounded by record count; when full the oldest record is dropped.
#[derive(Debug)]
struct Backlog {
    records: VecDeque<String>,
    bytes: usize,
    dropped: usize,
    max_content: usize,
    limit: usize,
}

impl Backlog {
    fn new(max_content: usize, limit: usize) -> Self {
        Self {
            records: VecDeque::new(),
            bytes: 0,
            dropped: 0,
            max_content,
            limit: limit.max(1),
        }
    }

    fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Enough queued to fill a message.
    fn is_full_batch(&self) -> bool {
        self.bytes >= self.max_content
    }

    fn push(&mut self, line: &ConsoleLine) {
        while self.records.len() >= self.limit {
            let Some(old) = self.records.pop_front() else {
                break;
            };
            self.bytes -= old.len();
            self.dropped += 1;
        }
        let text = format_record(line, self.max_content);
        self.bytes += text.len();
        self.records.push_back(text);
    }

    /// Takes as many leading records as fit in one message; at least one.
    fn take_batch(&mut self) -> String {
        let mut body = String::new();
        while let Some(next) = self.records.front() {
            if !body.is_empty() && body.len() + next.len() > self.max_content {
                break;
            }
            if let Some(text) = self.records.pop_front() {
                self.bytes -= text.len();
                body.push_str(&text);
            }
        }
        body
    }

    fn take_dropped(&mut self) -> usize {
        std::mem::take(&mut self.dropped)
    }
}

/// Reads the relay's viewer queues into the backlog until `work` finishes.
///
/// Keeps the relay's queues moving while a post or back-off is in flight, so
/// fan-out never waits on the webhook.
async fn drain_while<F: Future>(
    session: &mut ViewerSession,
    backlog: &mut Backlog,
    open: &mut bool,
    work: F,
) -> F::Output {
    tokio::pin!(work);
    loop {
        tokio::select! {
            out = &mut work => return out,
            line = session.recv(), if *open => match line {
                Some(line) => backlog.push(&line),
                None => *open = false,
            },
        }
    }
}

/// The webhook endpoint plus the client used to post to it.
struct Poster {
    resource: ResourceId,
    client: reqwest::Client,
    target: IntegrationConfig,
}

impl Poster {
    async fn send(&self, body: &str) {
        let message = WebhookMessage {
            content: body,
            username: self.target.display_name.as_deref(),
            avatar_url: self.target.avatar_url.as_deref(),
        };

        for attempt in 1..=MAX_ATTEMPTS {
            let resp = match self
                .client
                .post(&self.target.endpoint)
                .json(&message)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(error) => {
                    tracing::warn!(resource = %self.resource, %error, "webhook request failed, dropping batch");
                    return;
                }
            };

            let status = resp.status();
            if status.is_success() {
                return;
            }
            if status != StatusCode::TOO_MANY_REQUESTS {
                tracing::warn!(resource = %self.resource, status = %status, "webhook rejected batch");
                return;
            }

            let headers = resp.headers().clone();
            let payload = resp.json::<serde_json::Value>().await.ok();
            let wait = rate_limit_wait(&headers, payload.as_ref(), SystemTime::now());
            tracing::debug!(
                resource = %self.resource,
                attempt,
                wait_ms = wait.as_millis() as u64,
                "webhook rate limited"
            );
            tokio::time::sleep(wait).await;
        }
        tracing::warn!(resource = %self.resource, "webhook still rate limited, dropping batch");
    }
}

/// Forwards one console to a chat webhook as batched messages.
///
/// Runs as a no-repeat viewer of the multiplexer and exits when its queues
/// close, i.e. on teardown or when the integration is disabled, after
/// posting what is still queued.
pub(crate) struct WebhookRelay {
    mux: Arc<Multiplexer>,
    session: ViewerSession,
    poster: Poster,
    config: WebhookConfig,
    backlog: Backlog,
    open: bool,
}

impl WebhookRelay {
    pub(crate) fn new(
        mux: Arc<Multiplexer>,
        session: ViewerSession,
        target: IntegrationConfig,
        client: reqwest::Client,
        config: WebhookConfig,
    ) -> Self {
        Self {
            poster: Poster {
                resource: mux.id(),
                client,
                target,
            },
            backlog: Backlog::new(config.max_content, MAX_BACKLOG),
            mux,
            session,
            config,
            open: true,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::info!(resource = %self.mux.id(), "webhook relay started");
        let mut not_before = Instant::now();
        while self.fill(not_before).await {
            let body = self.backlog.take_batch();
            let dropped = self.backlog.take_dropped();
            if dropped > 0 {
                tracing::warn!(resource = %self.mux.id(), dropped, "webhook backlog full, dropped oldest records");
            }
            drain_while(
                &mut self.session,
                &mut self.backlog,
                &mut self.open,
                self.poster.send(&body),
            )
            .await;
            not_before = Instant::now() + self.config.min_interval;
        }
        self.mux.deregister_viewer(self.session.id()).await;
        tracing::info!(resource = %self.mux.id(), "webhook relay stopped");
    }

    /// Waits until a message's worth is ready to post.
    ///
    /// Needs a first record, then keeps reading until the batch window (and
    /// the post-send interval) elapses or the backlog fills a message.
    /// Returns false once the queues are closed and nothing is pending.
    async fn fill(&mut self, not_before: Instant) -> bool {
        if self.backlog.is_empty() {
            if !self.open {
                return false;
            }
            match self.session.recv().await {
                Some(line) => self.backlog.push(&line),
                None => {
                    self.open = false;
                    return false;
                }
            }
        }

        let deadline = (Instant::now() + self.config.batch_window).max(not_before);
        while self.open && !self.backlog.is_full_batch() {
            match tokio::time::timeout_at(deadline, self.session.recv()).await {
                Ok(Some(line)) => self.backlog.push(&line),
                Ok(None) => self.open = false,
                Err(_) => break,
            }
        }
        drain_while(
            &mut self.session,
            &mut self.backlog,
            &mut self.open,
            tokio::time::sleep_until(not_before),
        )
        .await;
        true
    }
}

/// Renders one record as message text, prefixing stderr and capping size.
fn format_record(line: &ConsoleLine, max_bytes: usize) -> String {
    let text = String::from_utf8_lossy(&line.data);
    let text = match line.stream {
        StreamKind::Stdout => text.into_owned(),
        StreamKind::Stderr => format!("{STDERR_PREFIX}{text}"),
    };
    truncate_utf8(&text, max_bytes)
}

fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }

    let keep = max_bytes.saturating_sub(TRUNCATED_SUFFIX.len());
    let mut end = keep.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = s[..end].to_string();
    out.push_str(TRUNCATED_SUFFIX);
    out
}

/// How long to back off after a 429.
///
/// Prefers the body's `retry_after`, then `X-RateLimit-Reset-After`, then
/// the absolute `X-RateLimit-Reset` epoch. Waits derived from headers are
/// spread over the remaining quota when one is reported.
fn rate_limit_wait(
    headers: &HeaderMap,
    payload: Option<&serde_json::Value>,
    now: SystemTime,
) -> Duration {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
    };

    let secs = if let Some(retry_after) = payload
        .and_then(|p| p.get("retry_after"))
        .and_then(serde_json::Value::as_f64)
    {
        retry_after
    } else {
        let now_secs = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let base = header("x-ratelimit-reset-after")
            .or_else(|| header("x-ratelimit-reset").map(|reset| reset - now_secs));
        match (base, header("x-ratelimit-remaining")) {
            (Some(base), Some(remaining)) if remaining >= 1.0 => base / (remaining + 1.0),
            (Some(base), _) => base,
            (None, _) => FALLBACK_RETRY.as_secs_f64(),
        }
    };

    if !secs.is_finite() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(secs).min(MAX_RETRY)
}
