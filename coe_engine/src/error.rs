use thiserror::Error;

/// Errors raised by the headless engine host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("trigger has been destroyed")]
    TriggerDestroyed,

    #[error("{0} has already been destroyed")]
    AlreadyDestroyed(&'static str),

    #[error("timer manager has been destroyed")]
    TimerManagerDestroyed,

    #[error("interval must be at least one update pulse")]
    ZeroInterval,

    #[error("only the active instance can raise ticks")]
    NotActiveInstance,

    #[error("play already has an active instance (instance {0})")]
    DuplicateActiveInstance(u32),

    #[error("condition not reached within {0} frames")]
    FrameLimitReached(u64),
}

pub type EngineResult<T> = Result<T, EngineError>;
