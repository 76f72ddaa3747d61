use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::error;
use serde_json::json;

use crate::error::KioskError;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// API错误类型
#[derive(Debug)]
pub struct AppError(pub KioskError);

impl AppError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            KioskError::Validation(_)
            | KioskError::Conflict(_)
            | KioskError::CameraNotRunning
            | KioskError::NoFaceDetected => StatusCode::BAD_REQUEST,
            KioskError::NotFound(_) => StatusCode::NOT_FOUND,
            KioskError::CameraUnavailable(_)
            | KioskError::Database(_)
            | KioskError::Image(_)
            | KioskError::Io(_)
            | KioskError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("请求处理失败: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<KioskError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
