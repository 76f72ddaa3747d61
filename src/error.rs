use axum::extract::rejection::JsonRejection;
use thiserror::Error;

pub type Result<T, E = KioskError> = std::result::Result<T, E>;

/// 业务错误
///
/// HTTP 层根据变体决定状态码，见 `server::error`
#[derive(Debug, Error)]
pub enum KioskError {
    /// 缺少或格式错误的字段
    #[error("{0}")]
    Validation(String),
    /// 唯一约束冲突
    #[error("{0}")]
    Conflict(String),
    #[error("camera is not running")]
    CameraNotRunning,
    #[error("camera device unavailable: {0}")]
    CameraUnavailable(String),
    #[error("no face detected in the image")]
    NoFaceDetected,
    #[error("{0} not found")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("image processing error: {0}")]
    Image(#[from] opencv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KioskError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<JsonRejection> for KioskError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}
