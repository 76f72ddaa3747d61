#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use opencv::core::{CV_8UC3, Mat, Scalar, Vec3b, Vector};
use opencv::imgcodecs;
use opencv::prelude::*;
use rollcall::KioskError;
use rollcall::capture::{CameraDevice, FrameSource};
use rollcall::config::{CameraOptions, DataDir};
use rollcall::db::{self, Database};
use rollcall::face::{self, Encoding, FaceEngine};
use rollcall::gallery::GalleryStore;
use rollcall::server::AppState;
use rollcall::students::{self, StudentForm};
use serde_json::json;
use tempfile::TempDir;

/// 亮度低于该值的画面视为没有人脸
pub const NO_FACE: u8 = 0;
pub const ENROLLED_FACE: u8 = 200;
pub const STRANGER_FACE: u8 = 100;
pub const TOLERANCE: f32 = 0.3;

/// 用左上角像素的亮度作为人脸特征
pub struct FakeEngine;

impl FaceEngine for FakeEngine {
    fn encode(&mut self, image: &Mat) -> opencv::Result<Vec<Encoding>> {
        let value = image.at_2d::<Vec3b>(0, 0)?[0];
        if value < 10 {
            return Ok(vec![]);
        }
        Ok(vec![vec![value as f32 / 100., 0.]])
    }
}

/// 每次都报错的人脸引擎
pub struct FailingEngine;

impl FaceEngine for FailingEngine {
    fn encode(&mut self, _image: &Mat) -> opencv::Result<Vec<Encoding>> {
        Err(opencv::Error::new(opencv::core::StsError, "model is broken"))
    }
}

/// 纯色图片
pub fn solid_image(value: u8) -> Mat {
    Mat::new_rows_cols_with_default(32, 32, CV_8UC3, Scalar::all(value as f64)).unwrap()
}

pub fn png_bytes(value: u8) -> Vec<u8> {
    let mut buf = Vector::<u8>::new();
    imgcodecs::imencode(".png", &solid_image(value), &mut buf, &Vector::new()).unwrap();
    buf.to_vec()
}

/// 画面内容可以随时切换的摄像头
#[derive(Clone)]
pub struct FakeCamera {
    scene: Arc<AtomicU8>,
}

impl FakeCamera {
    pub fn new(scene: u8) -> Self {
        Self { scene: Arc::new(AtomicU8::new(scene)) }
    }

    pub fn show(&self, scene: u8) {
        self.scene.store(scene, Ordering::SeqCst);
    }
}

struct FakeSource {
    scene: Arc<AtomicU8>,
}

impl FrameSource for FakeSource {
    fn read(&mut self) -> opencv::Result<Option<Mat>> {
        Ok(Some(solid_image(self.scene.load(Ordering::SeqCst))))
    }
}

impl CameraDevice for FakeCamera {
    fn open(&self) -> rollcall::Result<Box<dyn FrameSource>> {
        Ok(Box::new(FakeSource { scene: self.scene.clone() }))
    }
}

/// 无法打开的摄像头
pub struct MissingCamera;

impl CameraDevice for MissingCamera {
    fn open(&self) -> rollcall::Result<Box<dyn FrameSource>> {
        Err(KioskError::CameraUnavailable("no such device".into()))
    }
}

/// 能打开但读不出画面的摄像头
pub struct BrokenCamera;

struct BrokenSource;

impl FrameSource for BrokenSource {
    fn read(&mut self) -> opencv::Result<Option<Mat>> {
        Ok(None)
    }
}

impl CameraDevice for BrokenCamera {
    fn open(&self) -> rollcall::Result<Box<dyn FrameSource>> {
        Ok(Box::new(BrokenSource))
    }
}

pub fn camera_options() -> CameraOptions {
    CameraOptions {
        frame_interval: 10,
        recognition_interval: 20,
        max_failures: 3,
        stop_timeout: 1000,
        ..CameraOptions::default()
    }
}

pub async fn test_db(dir: &TempDir) -> Database {
    db::init_db(dir.path().join("rollcall.db")).await.unwrap()
}

pub struct TestEnv {
    pub dir: TempDir,
    pub state: Arc<AppState>,
}

pub async fn test_env(device: Arc<dyn CameraDevice>) -> TestEnv {
    test_env_with_engine(device, FakeEngine).await
}

pub async fn test_env_with_engine(
    device: Arc<dyn CameraDevice>,
    engine: impl FaceEngine + 'static,
) -> TestEnv {
    let dir = TempDir::new().unwrap();
    let data_dir = DataDir::new(dir.path());
    data_dir.ensure().unwrap();
    let pool = test_db(&dir).await;
    let gallery = Arc::new(GalleryStore::new(data_dir.gallery()));
    let state = AppState::new(
        pool,
        data_dir,
        face::shared(engine),
        gallery,
        device,
        camera_options(),
        TOLERANCE,
    );
    TestEnv { dir, state }
}

pub fn student_form(id: Option<i64>, reg_no: &str, phone: &str) -> StudentForm {
    serde_json::from_value(json!({
        "id": id,
        "Name": "grace hopper",
        "Reg_No": reg_no,
        "DOB": "1906-12-09",
        "Blood_Group": "A+",
        "Phone": phone,
        "Dept": "Mathematics",
        "Gender": "Female",
        "Organization": "Navy",
        "Performance": "Outstanding",
        "Remarks": "COBOL",
    }))
    .unwrap()
}

pub async fn add_student(db: &Database, id: i64) -> rollcall::db::StudentRecord {
    let form = student_form(Some(id), &format!("REG{id}"), &format!("{:010}", id));
    students::create(db, form).await.unwrap()
}

/// 轮询直到条件成立，最多等待 5 秒
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
