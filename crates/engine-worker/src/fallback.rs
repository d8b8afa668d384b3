//! Ordered engine tiers with per-tier retries.
//!
//! Tiers are tried in order until one produces an outcome. Within a tier,
//! retryable errors (timeouts, process death) are retried with capped
//! exponential backoff; fatal errors (missing executable, permissions) skip to
//! the next tier at once. An optional placeholder closes the list and is always
//! reported as non-authoritative.

use std::fmt;

use async_trait::async_trait;
use chess_core::PositionError;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{EngineCommand, EngineConfig, RetrySettings, SessionSettings};
use crate::error::{EngineError, RetryClass};
use crate::session::{EngineSession, MoveRequest, SearchOutcome, SessionState};

/// Anything that can answer a [`MoveRequest`] with the session contract.
#[async_trait]
pub trait MoveBackend: Send {
    /// Tier name used in logs and failure reports
    fn name(&self) -> &str;

    async fn best_move(&mut self, request: &MoveRequest) -> Result<SearchOutcome, EngineError>;

    /// Release any engine the backend holds.
    async fn close(&mut self) {}
}

/// Backend that drives a UCI engine process through an [`EngineSession`].
///
/// The session is kept between requests and replaced after it faults.
pub struct ProcessBackend {
    name: String,
    command: EngineCommand,
    settings: SessionSettings,
    session: Option<EngineSession>,
}

impl ProcessBackend {
    pub fn new(name: impl Into<String>, command: EngineCommand, settings: SessionSettings) -> Self {
        Self {
            name: name.into(),
            command,
            settings,
            session: None,
        }
    }

    async fn ready_session(&mut self) -> Result<&mut EngineSession, EngineError> {
        let reusable = self
            .session
            .as_ref()
            .is_some_and(|s| s.state() == SessionState::Ready);
        if !reusable {
            if let Some(mut stale) = self.session.take() {
                stale.close().await;
            }
            let session =
                EngineSession::launch(self.command.clone(), self.settings.clone()).await?;
            self.session = Some(session);
        }
        self.session.as_mut().ok_or(EngineError::NotReady(SessionState::Stopped))
    }
}

#[async_trait]
impl MoveBackend for ProcessBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn best_move(&mut self, request: &MoveRequest) -> Result<SearchOutcome, EngineError> {
        let session = self.ready_session().await?;
        match session.compute(request).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // A bad request leaves the session usable; anything else faulted it
                if e.retry_class() != RetryClass::Caller {
                    self.close().await;
                }
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }
}

/// One failed attempt within a tier.
#[derive(Debug)]
pub struct TierFailure {
    pub tier: String,
    pub attempt: u32,
    pub error: EngineError,
}

impl fmt::Display for TierFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (attempt {}): {}", self.tier, self.attempt, self.error)
    }
}

#[derive(Error, Debug)]
pub enum FallbackError {
    #[error("Invalid position: {0}")]
    InvalidPosition(PositionError),

    #[error("All engine tiers failed: {}", summarize(.0))]
    Exhausted(Vec<TierFailure>),
}

impl FallbackError {
    /// The failure that ended the last tier tried.
    pub fn last_failure(&self) -> Option<&TierFailure> {
        match self {
            FallbackError::Exhausted(failures) => failures.last(),
            FallbackError::InvalidPosition(_) => None,
        }
    }
}

fn summarize(failures: &[TierFailure]) -> String {
    if failures.is_empty() {
        return "no tiers configured".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// How a request was answered.
#[derive(Debug)]
pub enum Resolution {
    /// A genuine engine outcome from the named tier
    Engine {
        tier: String,
        outcome: SearchOutcome,
        failures: Vec<TierFailure>,
    },
    /// Every engine tier failed; `best_move` is a configured stand-in
    Placeholder {
        best_move: String,
        failures: Vec<TierFailure>,
    },
}

impl Resolution {
    pub fn is_authoritative(&self) -> bool {
        matches!(self, Resolution::Engine { .. })
    }

    /// Attempts that failed before this resolution was reached.
    pub fn failures(&self) -> &[TierFailure] {
        match self {
            Resolution::Engine { failures, .. } | Resolution::Placeholder { failures, .. } => {
                failures
            }
        }
    }
}

pub struct FallbackPolicy {
    tiers: Vec<Box<dyn MoveBackend>>,
    retry: RetrySettings,
    placeholder: Option<String>,
}

impl FallbackPolicy {
    pub fn new(retry: RetrySettings) -> Self {
        Self {
            tiers: Vec::new(),
            retry,
            placeholder: None,
        }
    }

    /// Primary engine, then the alternate engine and placeholder if configured.
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut policy = Self::new(config.retry.clone()).with_tier(ProcessBackend::new(
            "primary",
            config.engine.clone(),
            config.session.clone(),
        ));
        if let Some(fallback) = &config.fallback_engine {
            policy = policy.with_tier(ProcessBackend::new(
                "alternate",
                fallback.clone(),
                config.session.clone(),
            ));
        }
        if let Some(mv) = &config.placeholder_move {
            policy = policy.with_placeholder(mv.clone());
        }
        policy
    }

    pub fn with_tier(mut self, backend: impl MoveBackend + 'static) -> Self {
        self.tiers.push(Box::new(backend));
        self
    }

    pub fn with_placeholder(mut self, best_move: impl Into<String>) -> Self {
        self.placeholder = Some(best_move.into());
        self
    }

    pub fn tier_names(&self) -> Vec<&str> {
        self.tiers.iter().map(|t| t.name()).collect()
    }

    pub async fn resolve(&mut self, request: &MoveRequest) -> Result<Resolution, FallbackError> {
        let mut failures = Vec::new();
        let attempts = self.retry.attempts.max(1);

        for backend in self.tiers.iter_mut() {
            for attempt in 1..=attempts {
                let error = match backend.best_move(request).await {
                    Ok(outcome) => {
                        return Ok(Resolution::Engine {
                            tier: backend.name().to_string(),
                            outcome,
                            failures,
                        })
                    }
                    Err(e) => e,
                };

                let class = error.retry_class();
                warn!(
                    tier = backend.name(),
                    attempt,
                    error = %error,
                    ?class,
                    "Engine tier attempt failed"
                );
                let error = match error {
                    EngineError::InvalidPosition(reason) => {
                        return Err(FallbackError::InvalidPosition(reason))
                    }
                    other => other,
                };
                failures.push(TierFailure {
                    tier: backend.name().to_string(),
                    attempt,
                    error,
                });

                if class != RetryClass::Retryable || attempt == attempts {
                    break;
                }
                tokio::time::sleep(self.retry.delay_after(attempt)).await;
            }
        }

        match &self.placeholder {
            Some(best_move) => {
                warn!(best_move = %best_move, "All engine tiers failed, using placeholder move");
                Ok(Resolution::Placeholder {
                    best_move: best_move.clone(),
                    failures,
                })
            }
            None => Err(FallbackError::Exhausted(failures)),
        }
    }

    /// Close every tier's engine.
    pub async fn close(&mut self) {
        for backend in self.tiers.iter_mut() {
            backend.close().await;
        }
        info!("Engine tiers closed");
    }
}
