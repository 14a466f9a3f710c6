use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ObsError {
    #[error("not connected to OBS")]
    NotConnected,

    #[error("{request} failed (code {code}): {comment}")]
    Request {
        request: String,
        code: u32,
        comment: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{0} timed out")]
    Timeout(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("refused: {0}")]
    Refused(String),
}

pub type ObsResult<T> = Result<T, ObsError>;
