use std::sync::Arc;

use crate::capture::{CameraDevice, CaptureController};
use crate::config::{CameraOptions, DataDir};
use crate::db::Database;
use crate::events::EventPublisher;
use crate::face::SharedEngine;
use crate::gallery::GalleryStore;
use crate::recognition::{Recognizer, RecognitionWorker};

/// 应用状态
pub struct AppState {
    /// 数据库连接
    pub db: Database,
    /// 数据目录
    pub data_dir: DataDir,
    /// 人脸引擎
    pub engine: SharedEngine,
    /// 人脸图库
    pub gallery: Arc<GalleryStore>,
    /// 事件广播
    pub events: EventPublisher,
    /// 摄像头采集
    pub capture: CaptureController,
    /// 人脸识别循环
    pub recognition: RecognitionWorker,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(
        db: Database,
        data_dir: DataDir,
        engine: SharedEngine,
        gallery: Arc<GalleryStore>,
        device: Arc<dyn CameraDevice>,
        camera: CameraOptions,
        tolerance: f32,
    ) -> Arc<Self> {
        let events = EventPublisher::default();
        let capture = CaptureController::new(device, events.clone(), camera.clone());
        let recognizer = Recognizer::new(gallery.clone(), engine.clone(), db.clone(), tolerance);
        let recognition =
            RecognitionWorker::new(Arc::new(recognizer), capture.subscribe(), events.clone(), camera);
        Arc::new(AppState { db, data_dir, engine, gallery, events, capture, recognition })
    }

    /// 停止所有后台循环
    pub async fn shutdown(&self) {
        self.recognition.stop().await;
        self.capture.stop().await;
    }
}
