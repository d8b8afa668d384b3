pub use chess_core;

pub mod config;
pub mod error;
pub mod fallback;
pub mod protocol;
pub mod session;

pub use config::{EngineCommand, EngineConfig, RetrySettings, SessionSettings};
pub use error::{EngineError, RetryClass};
pub use fallback::{FallbackError, FallbackPolicy, MoveBackend, ProcessBackend, Resolution};
pub use protocol::Score;
pub use session::{EngineSession, MoveRequest, MoveResult, SearchOutcome, SessionState};
