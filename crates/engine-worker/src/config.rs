//! Worker configuration from environment variables

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::EngineError;

/// Program and arguments used to launch an engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl EngineCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Display name used in logs and errors.
    pub fn label(&self) -> String {
        self.program.display().to_string()
    }
}

/// Settings consumed by one engine session.
#[derive(Clone, Debug)]
pub struct SessionSettings {
    /// Depth sent when a request names neither depth nor movetime
    pub default_depth: u32,

    /// Time budget sent alongside the default depth, if any
    pub default_movetime: Option<Duration>,

    /// Deadline for `uci` .. `readyok`
    pub handshake_timeout: Duration,

    /// Minimum deadline for `go` .. `bestmove`
    pub compute_timeout: Duration,

    /// Added to a caller time budget to form the compute deadline
    pub compute_grace: Duration,

    /// Slice of each bounded read before the process is polled for exit
    pub poll_interval: Duration,

    /// How long `close` waits after sending `quit`
    pub quit_grace: Duration,

    /// How long `close` waits after SIGTERM before killing
    pub terminate_grace: Duration,

    /// How long `close` waits after killing the process
    pub kill_timeout: Duration,

    /// `setoption` pairs sent after the handshake acknowledgement
    pub options: Vec<(String, String)>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_depth: 12,
            default_movetime: None,
            handshake_timeout: Duration::from_millis(3000),
            compute_timeout: Duration::from_millis(5000),
            compute_grace: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(50),
            quit_grace: Duration::from_millis(1000),
            terminate_grace: Duration::from_millis(1000),
            kill_timeout: Duration::from_millis(1000),
            options: vec![
                ("Threads".to_string(), "1".to_string()),
                ("Hash".to_string(), "16".to_string()),
            ],
        }
    }
}

impl SessionSettings {
    /// Compute deadline for a request: the configured minimum, or the caller's
    /// time budget plus the grace margin when that is longer.
    pub fn compute_deadline(&self, movetime: Option<Duration>) -> Duration {
        match movetime {
            Some(budget) => self.compute_timeout.max(budget + self.compute_grace),
            None => self.compute_timeout,
        }
    }
}

/// Retry behaviour within one fallback tier.
#[derive(Clone, Debug)]
pub struct RetrySettings {
    /// Attempts per tier for retryable errors (at least 1)
    pub attempts: u32,

    /// Base delay; doubles per attempt
    pub backoff: Duration,

    /// Upper bound on a single delay
    pub max_backoff: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 2,
            backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetrySettings {
    /// Delay after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Primary engine executable
    pub engine: EngineCommand,

    /// Alternate engine tried when the primary tier fails
    pub fallback_engine: Option<EngineCommand>,

    /// Per-session timeouts and defaults
    pub session: SessionSettings,

    /// Per-tier retry behaviour
    pub retry: RetrySettings,

    /// Move reported by the placeholder tier; `None` disables that tier
    pub placeholder_move: Option<String>,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, EngineError> {
        let engine_path = env::var("STOCKFISH_PATH")
            .unwrap_or_else(|_| "/usr/local/bin/stockfish".to_string());
        if engine_path.trim().is_empty() {
            return Err(EngineError::Config("STOCKFISH_PATH is empty".into()));
        }

        let fallback_engine = env::var("ENGINE_FALLBACK_PATH")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(EngineCommand::new);

        let defaults = SessionSettings::default();
        let threads: u32 = env_parse("ENGINE_THREADS").unwrap_or(1);
        let hash_mb: u32 = env_parse("ENGINE_HASH_MB").unwrap_or(16);

        let session = SessionSettings {
            default_depth: env_parse("ENGINE_DEFAULT_DEPTH").unwrap_or(defaults.default_depth),
            default_movetime: env_millis("ENGINE_DEFAULT_MOVETIME_MS"),
            handshake_timeout: env_millis("ENGINE_HANDSHAKE_TIMEOUT_MS")
                .unwrap_or(defaults.handshake_timeout),
            compute_timeout: env_millis("ENGINE_COMPUTE_TIMEOUT_MS")
                .unwrap_or(defaults.compute_timeout),
            compute_grace: env_millis("ENGINE_COMPUTE_GRACE_MS").unwrap_or(defaults.compute_grace),
            poll_interval: env_millis("ENGINE_POLL_INTERVAL_MS").unwrap_or(defaults.poll_interval),
            quit_grace: env_millis("ENGINE_QUIT_GRACE_MS").unwrap_or(defaults.quit_grace),
            terminate_grace: env_millis("ENGINE_TERMINATE_GRACE_MS")
                .unwrap_or(defaults.terminate_grace),
            kill_timeout: env_millis("ENGINE_KILL_TIMEOUT_MS").unwrap_or(defaults.kill_timeout),
            options: vec![
                ("Threads".to_string(), threads.to_string()),
                ("Hash".to_string(), hash_mb.to_string()),
            ],
        };

        let retry_defaults = RetrySettings::default();
        let retry = RetrySettings {
            attempts: env_parse::<u32>("ENGINE_RETRY_ATTEMPTS")
                .unwrap_or(retry_defaults.attempts)
                .max(1),
            backoff: env_millis("ENGINE_RETRY_BACKOFF_MS").unwrap_or(retry_defaults.backoff),
            max_backoff: retry_defaults.max_backoff,
        };

        let placeholder_move = env::var("ENGINE_PLACEHOLDER_MOVE")
            .ok()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());

        Ok(Self {
            engine: EngineCommand::new(engine_path),
            fallback_engine,
            session,
            retry,
            placeholder_move,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_deadline_scales_with_budget() {
        let settings = SessionSettings::default();
        // No budget: configured minimum
        assert_eq!(settings.compute_deadline(None), Duration::from_secs(5));
        // Short budget: minimum still wins
        assert_eq!(
            settings.compute_deadline(Some(Duration::from_millis(500))),
            Duration::from_secs(5)
        );
        // Long budget: budget + grace
        assert_eq!(
            settings.compute_deadline(Some(Duration::from_secs(10))),
            Duration::from_secs(11)
        );
    }

    #[test]
    fn test_backoff_is_capped_exponential() {
        let retry = RetrySettings::default();
        assert_eq!(retry.delay_after(1), Duration::from_millis(200));
        assert_eq!(retry.delay_after(2), Duration::from_millis(400));
        assert_eq!(retry.delay_after(3), Duration::from_millis(800));
        assert_eq!(retry.delay_after(5), Duration::from_secs(2));
        assert_eq!(retry.delay_after(64), Duration::from_secs(2));
    }

    #[test]
    fn test_engine_command_builder() {
        let cmd = EngineCommand::new("sh").arg("-c").arg("exit 0");
        assert_eq!(cmd.label(), "sh");
        assert_eq!(cmd.args, vec!["-c", "exit 0"]);
    }
}
