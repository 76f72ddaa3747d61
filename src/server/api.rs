use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum_typed_multipart::TypedMultipart;
use log::info;
use tokio::task::block_in_place;

use super::error::Result;
use super::state::AppState;
use super::types::*;
use crate::db::StudentRecord;
use crate::error::KioskError;
use crate::events::Event;
use crate::face::lock_engine;
use crate::profile::{self, Profile};
use crate::students::{self, StudentForm};
use crate::{metrics, utils};

/// 添加学生
#[utoipa::path(
    post,
    path = "/api/students",
    request_body = StudentForm,
    responses(
        (status = 201, body = StudentRecord),
        (status = 400, body = ErrorResponse),
    )
)]
pub async fn add_student_handler(
    State(state): State<Arc<AppState>>,
    JsonBody(form): JsonBody<StudentForm>,
) -> Result<(StatusCode, Json<StudentRecord>)> {
    let record = students::create(&state.db, form).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// 根据卡号获取学生
#[utoipa::path(
    get,
    path = "/api/students/{id}",
    params(("id" = i64, Path, description = "学生卡号")),
    responses(
        (status = 200, body = StudentRecord),
        (status = 404, body = ErrorResponse),
    )
)]
pub async fn get_student_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<StudentRecord>> {
    Ok(Json(students::get(&state.db, id).await?))
}

/// 列出还没有人脸图片的学生卡号
#[utoipa::path(
    get,
    path = "/api/unassigned-cards",
    responses((status = 200, body = Vec<String>))
)]
pub async fn unassigned_cards_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>> {
    Ok(Json(students::list_unassigned(&state.db, &state.gallery).await?))
}

/// 打开摄像头
#[utoipa::path(
    post,
    path = "/api/start-camera",
    responses(
        (status = 200, body = MessageResponse),
        (status = 500, body = ErrorResponse),
    )
)]
pub async fn start_camera_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MessageResponse>> {
    state.capture.start().await?;
    Ok(Json(MessageResponse::new("Camera started")))
}

/// 关闭摄像头
#[utoipa::path(post, path = "/api/stop-camera", responses((status = 200, body = MessageResponse)))]
pub async fn stop_camera_handler(State(state): State<Arc<AppState>>) -> Json<MessageResponse> {
    state.capture.stop().await;
    Json(MessageResponse::new("Camera stopped"))
}

/// 用摄像头当前画面作为学生的人脸图片
#[utoipa::path(
    post,
    path = "/api/capture-image",
    request_body = CaptureImageRequest,
    responses(
        (status = 200, body = MessageResponse),
        (status = 400, body = ErrorResponse),
    )
)]
pub async fn capture_image_handler(
    State(state): State<Arc<AppState>>,
    JsonBody(data): JsonBody<CaptureImageRequest>,
) -> Result<Json<MessageResponse>> {
    let identity = data
        .card_id
        .ok_or_else(|| KioskError::validation("card_id is required"))?
        .into_identity()?;
    let frame = state.capture.latest_frame()?;

    block_in_place(|| {
        let mut engine = lock_engine(&state.engine);
        state.gallery.append(&identity, "jpg", &frame.jpeg, &mut **engine)
    })?;

    info!("已为 {} 拍摄人脸图片", identity);
    state.events.publish(Event::ImageCaptured { success: true, card_id: identity.clone() });
    Ok(Json(MessageResponse::new(format!("Image captured for card {identity}"))))
}

/// 上传 base64 编码的人脸图片
#[utoipa::path(
    post,
    path = "/api/assign-image",
    request_body = AssignImageRequest,
    responses(
        (status = 200, body = MessageResponse),
        (status = 400, body = ErrorResponse),
    )
)]
pub async fn assign_image_handler(
    State(state): State<Arc<AppState>>,
    JsonBody(data): JsonBody<AssignImageRequest>,
) -> Result<Json<MessageResponse>> {
    let identity = data
        .card_id
        .ok_or_else(|| KioskError::validation("card_id is required"))?
        .into_identity()?;
    let image = data.image.ok_or_else(|| KioskError::validation("image is required"))?;
    let (ext, bytes) = utils::decode_data_url(&image)?;

    block_in_place(|| {
        let mut engine = lock_engine(&state.engine);
        state.gallery.append(&identity, &ext, &bytes, &mut **engine)
    })?;

    info!("已为 {} 上传人脸图片", identity);
    Ok(Json(MessageResponse::new(format!("Image assigned to card {identity}"))))
}

/// 启动人脸识别
#[utoipa::path(post, path = "/api/start-recognition", responses((status = 200, body = MessageResponse)))]
pub async fn start_recognition_handler(State(state): State<Arc<AppState>>) -> Json<MessageResponse> {
    state.recognition.start().await;
    Json(MessageResponse::new("Face recognition started"))
}

/// 停止人脸识别
#[utoipa::path(post, path = "/api/stop-recognition", responses((status = 200, body = MessageResponse)))]
pub async fn stop_recognition_handler(State(state): State<Arc<AppState>>) -> Json<MessageResponse> {
    state.recognition.stop().await;
    Json(MessageResponse::new("Face recognition stopped"))
}

/// 获取摄像头与人脸识别的状态
#[utoipa::path(get, path = "/api/status", responses((status = 200, body = StatusResponse)))]
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        camera: state.capture.status().into(),
        recognition: state.recognition.status().into(),
        gallery_identities: state.gallery.identities().len(),
        subscribers: state.events.subscriber_count(),
    })
}

/// 获取机构信息
#[utoipa::path(get, path = "/api/get-profile", responses((status = 200, body = Profile)))]
pub async fn get_profile_handler(State(state): State<Arc<AppState>>) -> Result<Json<Profile>> {
    Ok(Json(profile::latest(&state.db).await?))
}

/// 设置机构信息
#[utoipa::path(
    post,
    path = "/api/set-profile",
    request_body(content = SetProfileForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = Profile),
        (status = 400, body = ErrorResponse),
    )
)]
pub async fn set_profile_handler(
    State(state): State<Arc<AppState>>,
    TypedMultipart(data): TypedMultipart<SetProfileRequest>,
) -> Result<Json<Profile>> {
    let logo = data.logo.as_ref().map(|file| {
        let file_name = file.metadata.file_name.as_deref().unwrap_or("logo.png");
        (file_name, file.contents.as_ref())
    });
    let profile =
        profile::set(&state.db, &state.data_dir.uploads(), &data.institution_name, logo).await?;
    Ok(Json(profile))
}

/// Prometheus 指标
pub async fn metrics_handler() -> Result<String> {
    Ok(metrics::gather_text().map_err(anyhow::Error::from)?)
}
