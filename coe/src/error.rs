use coe_engine::EngineError;
use coe_messages::MessageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoeError {
    #[error("coe is already initialized for this game")]
    AlreadyInitialized,

    #[error("{0} has already been destroyed")]
    AlreadyDestroyed(&'static str),

    #[error("{0} has been destroyed")]
    Destroyed(&'static str),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("message error: {0}")]
    Message(#[from] MessageError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CoeResult<T> = Result<T, CoeError>;
