use axum::body::Bytes;
use axum::extract::FromRequest;
use axum_typed_multipart::{FieldData, TryFromMultipart};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::AppError;
use crate::students::CardId;
use crate::task::LoopState;

/// JSON 请求体，解析失败时返回 400
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);

/// 普通的成功响应
#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// 错误响应（用于API文档）
#[derive(Debug, Serialize, ToSchema)]
#[allow(unused)]
pub struct ErrorResponse {
    pub error: String,
}

/// 从摄像头拍照的参数
#[derive(Debug, Deserialize, ToSchema)]
pub struct CaptureImageRequest {
    /// 学生卡号
    #[serde(default)]
    pub card_id: Option<CardId>,
}

/// 上传人脸图片的参数
#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignImageRequest {
    /// 学生卡号
    #[serde(default)]
    pub card_id: Option<CardId>,
    /// base64 编码的图片，可以带有 `data:image/png;base64,` 前缀
    #[serde(default)]
    pub image: Option<String>,
}

/// 设置机构信息的参数
#[derive(TryFromMultipart)]
pub struct SetProfileRequest {
    pub institution_name: String,
    pub logo: Option<FieldData<Bytes>>,
}

/// 设置机构信息的表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SetProfileForm {
    /// 机构名称
    pub institution_name: String,
    /// 机构 logo，可选
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub logo: Option<String>,
}

/// 后台循环状态
#[derive(Debug, Serialize, ToSchema)]
pub struct LoopStatus {
    /// `idle`、`running` 或 `degraded`
    pub state: String,
    /// 进入降级状态的原因
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<LoopState> for LoopStatus {
    fn from(state: LoopState) -> Self {
        match state {
            LoopState::Idle => Self { state: "idle".into(), reason: None },
            LoopState::Running => Self { state: "running".into(), reason: None },
            LoopState::Degraded(reason) => Self { state: "degraded".into(), reason: Some(reason) },
        }
    }
}

/// 服务状态
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub camera: LoopStatus,
    pub recognition: LoopStatus,
    /// 图库中的身份数量
    pub gallery_identities: usize,
    /// 当前连接的客户端数量
    pub subscribers: usize,
}
