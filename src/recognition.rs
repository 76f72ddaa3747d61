use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, trace, warn};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::spawn_blocking;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::capture::Frame;
use crate::config::CameraOptions;
use crate::db::{Database, StudentRecord};
use crate::error::Result;
use crate::events::{Event, EventPublisher};
use crate::face::{SharedEngine, lock_engine};
use crate::gallery::GalleryStore;
use crate::task::{FailureCounter, LoopHandle, LoopState, SharedState};
use crate::{metrics, students, utils};

/// 一帧画面的识别结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionResult {
    pub face_detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student: Option<StudentRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

impl RecognitionResult {
    pub fn no_face() -> Self {
        Self { face_detected: false, identified: None, student_name: None, student: None, distance: None }
    }

    pub fn unidentified() -> Self {
        Self { face_detected: true, identified: Some(false), ..Self::no_face() }
    }

    pub fn identified(student: StudentRecord, distance: f32) -> Self {
        Self {
            face_detected: true,
            identified: Some(true),
            student_name: Some(student.name.clone()),
            student: Some(student),
            distance: Some(distance),
        }
    }

    pub fn is_identified(&self) -> bool {
        self.identified == Some(true)
    }

    fn outcome(&self) -> &'static str {
        match (self.face_detected, self.is_identified()) {
            (false, _) => "no_face",
            (true, false) => "unknown",
            (true, true) => "identified",
        }
    }
}

/// 对单帧画面做人脸识别
pub struct Recognizer {
    gallery: Arc<GalleryStore>,
    engine: SharedEngine,
    db: Database,
    tolerance: f32,
}

impl Recognizer {
    pub fn new(gallery: Arc<GalleryStore>, engine: SharedEngine, db: Database, tolerance: f32) -> Self {
        Self { gallery, engine, db, tolerance }
    }

    /// 识别画面中置信度最高的人脸
    pub async fn recognize(&self, frame: &Frame) -> Result<RecognitionResult> {
        let start = Instant::now();

        let engine = self.engine.clone();
        let jpeg = frame.jpeg.clone();
        let encoding = spawn_blocking(move || -> Result<_> {
            let image = utils::imdecode(&jpeg)?;
            let mut engine = lock_engine(&engine);
            Ok(engine.encode(&image)?.into_iter().next())
        })
        .await
        .map_err(anyhow::Error::from)??;

        let result = match encoding {
            None => RecognitionResult::no_face(),
            Some(encoding) => match self.gallery.best_match(&encoding, self.tolerance) {
                None => RecognitionResult::unidentified(),
                Some(m) => match students::find(&self.db, &m.identity).await? {
                    Some(student) => {
                        debug!("识别到 {}（距离 {:.3}）", m.identity, m.distance);
                        RecognitionResult::identified(student, m.distance)
                    }
                    None => {
                        warn!("图库中的身份 {} 没有对应的学生记录", m.identity);
                        RecognitionResult::unidentified()
                    }
                },
            },
        };

        metrics::inc_recognition(result.outcome(), start.elapsed().as_secs_f32());
        Ok(result)
    }
}

/// 人脸识别后台循环
///
/// 与摄像头独立启停，摄像头没有画面时跳过本轮
pub struct RecognitionWorker {
    recognizer: Arc<Recognizer>,
    frames: watch::Receiver<Option<Frame>>,
    events: EventPublisher,
    opts: CameraOptions,
    state: SharedState,
    session: Mutex<Option<LoopHandle>>,
}

impl RecognitionWorker {
    pub fn new(
        recognizer: Arc<Recognizer>,
        frames: watch::Receiver<Option<Frame>>,
        events: EventPublisher,
        opts: CameraOptions,
    ) -> Self {
        Self {
            recognizer,
            frames,
            events,
            opts,
            state: SharedState::default(),
            session: Mutex::new(None),
        }
    }

    /// 启动识别循环，已经在运行时什么都不做
    pub async fn start(&self) {
        let mut session = self.session.lock().await;
        if let Some(handle) = session.take() {
            if !handle.is_finished() {
                debug!("人脸识别已经在运行");
                *session = Some(handle);
                return;
            }
            handle.shutdown(self.opts.stop_timeout(), "人脸识别").await;
        }

        let cancel = CancellationToken::new();
        let worker = RecognitionLoop {
            cancel: cancel.clone(),
            recognizer: self.recognizer.clone(),
            frames: self.frames.clone(),
            events: self.events.clone(),
            state: self.state.clone(),
            failures: FailureCounter::new(self.opts.max_failures),
        };
        self.state.set(LoopState::Running);
        let handle = tokio::spawn(worker.run(self.opts.recognition_interval()));
        *session = Some(LoopHandle::new(cancel, handle));

        info!("人脸识别已启动");
    }

    /// 停止识别循环，没有启动时什么都不做
    pub async fn stop(&self) {
        let mut session = self.session.lock().await;
        let Some(handle) = session.take() else {
            debug!("人脸识别没有启动");
            return;
        };
        handle.shutdown(self.opts.stop_timeout(), "人脸识别").await;
        self.state.set(LoopState::Idle);
        info!("人脸识别已停止");
    }

    pub fn status(&self) -> LoopState {
        self.state.get()
    }

    pub fn recognizer(&self) -> &Recognizer {
        &self.recognizer
    }
}

struct RecognitionLoop {
    cancel: CancellationToken,
    recognizer: Arc<Recognizer>,
    frames: watch::Receiver<Option<Frame>>,
    events: EventPublisher,
    state: SharedState,
    failures: FailureCounter,
}

impl RecognitionLoop {
    async fn run(mut self, period: std::time::Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let frame = self.frames.borrow().clone();
            let Some(frame) = frame else {
                trace!("没有可用的画面");
                continue;
            };

            match self.recognizer.recognize(&frame).await {
                Ok(result) => {
                    self.failures.reset();
                    self.events.publish(Event::FaceRecognitionResult(result));
                }
                Err(e) => {
                    warn!("人脸识别失败（连续 {} 次）: {}", self.failures.consecutive() + 1, e);
                    if self.failures.record() {
                        let reason = format!(
                            "recognition failed {} times in a row: {}",
                            self.failures.consecutive(),
                            e
                        );
                        error!("人脸识别进入降级状态: {}", reason);
                        self.state.set(LoopState::Degraded(reason.clone()));
                        self.events.publish(Event::FaceRecognitionError { error: reason });
                        return;
                    }
                }
            }
        }
        debug!("识别循环结束");
    }
}
