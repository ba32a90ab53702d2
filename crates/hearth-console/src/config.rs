use std::time::Duration;

const DEFAULT_HISTORY_LINES: usize = 100;
const DEFAULT_QUEUE: usize = 5;
const DEFAULT_FANOUT_TIMEOUT_MS: u64 = 250;
const DEFAULT_STOP_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_WEBHOOK_BATCH_MS: u64 = 500;
const DEFAULT_WEBHOOK_MIN_INTERVAL_MS: u64 = 500;
const DEFAULT_WEBHOOK_TIMEOUT_SEC: u64 = 5 * 60;
// Discord's message content limit.
const DEFAULT_WEBHOOK_MAX_CONTENT: usize = 2000;
const DEFAULT_WEBHOOK_STDOUT_QUEUE: usize = 20;
const DEFAULT_WEBHOOK_STDERR_QUEUE: usize = 5;

/// What fan-out does when a viewer's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutPolicy {
    /// Wait up to the duration for room, then drop the record for that viewer.
    BoundedBlock(Duration),
    /// Drop the record for that viewer immediately.
    Drop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    pub batch_window: Duration,
    pub min_interval: Duration,
    pub request_timeout: Duration,
    pub max_content: usize,
    pub stdout_queue: usize,
    pub stderr_queue: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            batch_window: Duration::from_millis(DEFAULT_WEBHOOK_BATCH_MS),
            min_interval: Duration::from_millis(DEFAULT_WEBHOOK_MIN_INTERVAL_MS),
            request_timeout: Duration::from_secs(DEFAULT_WEBHOOK_TIMEOUT_SEC),
            max_content: DEFAULT_WEBHOOK_MAX_CONTENT,
            stdout_queue: DEFAULT_WEBHOOK_STDOUT_QUEUE,
            stderr_queue: DEFAULT_WEBHOOK_STDERR_QUEUE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleConfig {
    pub history_lines: usize,
    pub input_queue: usize,
    pub viewer_queue: usize,
    pub fanout: FanoutPolicy,
    pub stop_timeout: Duration,
    pub webhook: WebhookConfig,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            history_lines: DEFAULT_HISTORY_LINES,
            input_queue: DEFAULT_QUEUE,
            viewer_queue: DEFAULT_QUEUE,
            fanout: FanoutPolicy::BoundedBlock(Duration::from_millis(DEFAULT_FANOUT_TIMEOUT_MS)),
            stop_timeout: Duration::from_millis(DEFAULT_STOP_TIMEOUT_MS),
            webhook: WebhookConfig::default(),
        }
    }
}

impl ConsoleConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable lookup. Unparseable values fall
    /// back to defaults; out-of-range values are clamped.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let usize_var = |name: &str| lookup(name).and_then(|v| v.trim().parse::<usize>().ok());
        let u64_var = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());

        let fanout_timeout = Duration::from_millis(
            u64_var("HEARTH_FANOUT_TIMEOUT_MS")
                .map(|v| v.clamp(1, 10_000))
                .unwrap_or(DEFAULT_FANOUT_TIMEOUT_MS),
        );
        let fanout = match lookup("HEARTH_FANOUT_POLICY")
            .map(|s| s.trim().to_ascii_lowercase())
            .as_deref()
        {
            Some("drop") => FanoutPolicy::Drop,
            _ => FanoutPolicy::BoundedBlock(fanout_timeout),
        };

        Self {
            history_lines: usize_var("HEARTH_HISTORY_LINES")
                .map(|v| v.clamp(1, 50_000))
                .unwrap_or(DEFAULT_HISTORY_LINES),
            input_queue: usize_var("HEARTH_INPUT_QUEUE")
                .map(|v| v.clamp(1, 1024))
                .unwrap_or(DEFAULT_QUEUE),
            viewer_queue: usize_var("HEARTH_VIEWER_QUEUE")
                .map(|v| v.clamp(1, 1024))
                .unwrap_or(DEFAULT_QUEUE),
            fanout,
            stop_timeout: Duration::from_millis(
                u64_var("HEARTH_STOP_TIMEOUT_MS")
                    .map(|v| v.clamp(1000, 10 * 60 * 1000))
                    .unwrap_or(DEFAULT_STOP_TIMEOUT_MS),
            ),
            webhook: WebhookConfig {
                batch_window: Duration::from_millis(
                    u64_var("HEARTH_WEBHOOK_BATCH_MS")
                        .map(|v| v.clamp(50, 60_000))
                        .unwrap_or(DEFAULT_WEBHOOK_BATCH_MS),
                ),
                min_interval: Duration::from_millis(
                    u64_var("HEARTH_WEBHOOK_MIN_INTERVAL_MS")
                        .map(|v| v.clamp(0, 60_000))
                        .unwrap_or(DEFAULT_WEBHOOK_MIN_INTERVAL_MS),
                ),
                request_timeout: Duration::from_secs(
                    u64_var("HEARTH_WEBHOOK_TIMEOUT_SEC")
                        .map(|v| v.clamp(1, 600))
                        .unwrap_or(DEFAULT_WEBHOOK_TIMEOUT_SEC),
                ),
                max_content: usize_var("HEARTH_WEBHOOK_MAX_CONTENT")
                    .map(|v| v.clamp(64, 100_000))
                    .unwrap_or(DEFAULT_WEBHOOK_MAX_CONTENT),
                stdout_queue: usize_var("HEARTH_WEBHOOK_STDOUT_QUEUE")
                    .map(|v| v.clamp(1, 1024))
                    .unwrap_or(DEFAULT_WEBHOOK_STDOUT_QUEUE),
                stderr_queue: usize_var("HEARTH_WEBHOOK_STDERR_QUEUE")
                    .map(|v| v.clamp(1, 1024))
                    .unwrap_or(DEFAULT_WEBHOOK_STDERR_QUEUE),
            },
        }
    }
}
