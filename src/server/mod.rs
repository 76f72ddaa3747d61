mod api;
mod error;
mod state;
mod types;
mod ws;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::error::AppError;
pub use self::state::*;
pub use self::ws::{ClientMessage, handle_message};

#[derive(OpenApi)]
#[openapi(
    paths(
        api::add_student_handler,
        api::get_student_handler,
        api::unassigned_cards_handler,
        api::start_camera_handler,
        api::stop_camera_handler,
        api::capture_image_handler,
        api::assign_image_handler,
        api::start_recognition_handler,
        api::stop_recognition_handler,
        api::status_handler,
        api::get_profile_handler,
        api::set_profile_handler,
    ),
    components(schemas(
        crate::students::StudentForm,
        crate::students::CardId,
        crate::db::StudentRecord,
        crate::profile::Profile,
        types::MessageResponse,
        types::ErrorResponse,
        types::CaptureImageRequest,
        types::AssignImageRequest,
        types::SetProfileForm,
        types::LoopStatus,
        types::StatusResponse,
    ))
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    let uploads = ServeDir::new(state.data_dir.uploads());
    let api = Router::new()
        .route("/students", post(api::add_student_handler))
        .route("/students/{id}", get(api::get_student_handler))
        .route("/unassigned-cards", get(api::unassigned_cards_handler))
        .route("/start-camera", post(api::start_camera_handler))
        .route("/stop-camera", post(api::stop_camera_handler))
        .route("/capture-image", post(api::capture_image_handler))
        .route("/assign-image", post(api::assign_image_handler))
        .route("/start-recognition", post(api::start_recognition_handler))
        .route("/stop-recognition", post(api::stop_recognition_handler))
        .route("/status", get(api::status_handler))
        .route("/get-profile", get(api::get_profile_handler))
        .route("/set-profile", post(api::set_profile_handler));

    Router::new()
        .nest("/api", api)
        .route("/ws", get(ws::ws_handler))
        .route("/metrics", get(api::metrics_handler))
        .nest_service("/uploads", uploads)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::disable())
        // 上传限制：10M
        .layer(RequestBodyLimitLayer::new(1024 * 1024 * 10))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
