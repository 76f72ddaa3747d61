use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture};
use tokio::sync::{Mutex, watch};
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;

use crate::config::CameraOptions;
use crate::error::{KioskError, Result};
use crate::events::{Event, EventPublisher};
use crate::metrics;
use crate::task::{FailureCounter, LoopHandle, LoopState, SharedState};
use crate::utils;

/// 摄像头中读出的一帧画面，已编码为 JPEG
#[derive(Debug, Clone)]
pub struct Frame {
    pub jpeg: Bytes,
    pub captured_at: DateTime<Utc>,
}

/// 已打开的摄像头
pub trait FrameSource: Send {
    /// 读取一帧画面，设备没有返回画面时为 None
    fn read(&mut self) -> opencv::Result<Option<Mat>>;
}

/// 摄像头设备
pub trait CameraDevice: Send + Sync {
    fn open(&self) -> Result<Box<dyn FrameSource>>;
}

/// 通过 OpenCV videoio 访问的本地摄像头
pub struct OpencvCamera {
    index: i32,
}

impl OpencvCamera {
    pub fn new(index: i32) -> Self {
        Self { index }
    }
}

impl CameraDevice for OpencvCamera {
    fn open(&self) -> Result<Box<dyn FrameSource>> {
        let capture = VideoCapture::new(self.index, videoio::CAP_ANY)
            .map_err(|e| KioskError::CameraUnavailable(e.to_string()))?;
        if !capture.is_opened()? {
            return Err(KioskError::CameraUnavailable(format!(
                "device {} could not be opened",
                self.index
            )));
        }
        Ok(Box::new(OpencvFrameSource(capture)))
    }
}

struct OpencvFrameSource(VideoCapture);

// VideoCapture 只会在采集线程中使用
unsafe impl Send for OpencvFrameSource {}

impl FrameSource for OpencvFrameSource {
    fn read(&mut self) -> opencv::Result<Option<Mat>> {
        let mut frame = Mat::default();
        if self.0.read(&mut frame)? && !frame.empty() { Ok(Some(frame)) } else { Ok(None) }
    }
}

impl Drop for OpencvFrameSource {
    fn drop(&mut self) {
        if let Err(e) = self.0.release() {
            warn!("释放摄像头失败: {}", e);
        }
    }
}

/// 摄像头采集控制器
///
/// 采集线程是唯一读取设备的地方，画面通过 watch 通道分发给识别循环和拍照接口
pub struct CaptureController {
    device: Arc<dyn CameraDevice>,
    events: EventPublisher,
    opts: CameraOptions,
    frames: Arc<watch::Sender<Option<Frame>>>,
    state: SharedState,
    session: Mutex<Option<LoopHandle>>,
}

impl CaptureController {
    pub fn new(device: Arc<dyn CameraDevice>, events: EventPublisher, opts: CameraOptions) -> Self {
        let (frames, _) = watch::channel(None);
        Self {
            device,
            events,
            opts,
            frames: Arc::new(frames),
            state: SharedState::default(),
            session: Mutex::new(None),
        }
    }

    /// 打开摄像头并启动采集循环，已经在运行时什么都不做
    pub async fn start(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if let Some(handle) = session.take() {
            if !handle.is_finished() {
                debug!("摄像头已经在运行");
                *session = Some(handle);
                return Ok(());
            }
            // 上一次采集因为连续失败已经退出
            handle.shutdown(self.opts.stop_timeout(), "摄像头采集").await;
        }

        let device = self.device.clone();
        let source = spawn_blocking(move || device.open()).await.map_err(anyhow::Error::from)??;

        let cancel = CancellationToken::new();
        let worker = CaptureLoop {
            cancel: cancel.clone(),
            events: self.events.clone(),
            frames: self.frames.clone(),
            state: self.state.clone(),
            interval: self.opts.frame_interval(),
            quality: self.opts.jpeg_quality,
            failures: FailureCounter::new(self.opts.max_failures),
        };
        self.state.set(LoopState::Running);
        let handle = spawn_blocking(move || worker.run(source));
        *session = Some(LoopHandle::new(cancel, handle));

        info!("摄像头已启动");
        Ok(())
    }

    /// 停止采集并释放摄像头，没有启动时什么都不做
    pub async fn stop(&self) {
        let mut session = self.session.lock().await;
        let Some(handle) = session.take() else {
            debug!("摄像头没有启动");
            return;
        };
        handle.shutdown(self.opts.stop_timeout(), "摄像头采集").await;
        self.frames.send_replace(None);
        self.state.set(LoopState::Idle);
        info!("摄像头已停止");
    }

    pub fn status(&self) -> LoopState {
        self.state.get()
    }

    /// 订阅最新画面
    pub fn subscribe(&self) -> watch::Receiver<Option<Frame>> {
        self.frames.subscribe()
    }

    /// 最近一帧画面
    pub fn latest_frame(&self) -> Result<Frame> {
        self.frames.borrow().clone().ok_or(KioskError::CameraNotRunning)
    }
}

struct CaptureLoop {
    cancel: CancellationToken,
    events: EventPublisher,
    frames: Arc<watch::Sender<Option<Frame>>>,
    state: SharedState,
    interval: Duration,
    quality: i32,
    failures: FailureCounter,
}

impl CaptureLoop {
    fn run(mut self, mut source: Box<dyn FrameSource>) {
        debug!("采集循环开始");
        while !self.cancel.is_cancelled() {
            let start = Instant::now();
            match self.capture(source.as_mut()) {
                Ok(frame) => {
                    self.failures.reset();
                    self.publish(frame);
                }
                Err(e) => {
                    warn!("读取摄像头画面失败（连续 {} 次）: {}", self.failures.consecutive() + 1, e);
                    if self.failures.record() {
                        let reason = format!(
                            "camera failed {} times in a row: {}",
                            self.failures.consecutive(),
                            e
                        );
                        error!("摄像头进入降级状态: {}", reason);
                        self.frames.send_replace(None);
                        self.state.set(LoopState::Degraded(reason.clone()));
                        self.events.publish(Event::CameraError { error: reason });
                        return;
                    }
                }
            }
            std::thread::sleep(self.interval.saturating_sub(start.elapsed()));
        }
        debug!("采集循环结束");
    }

    fn capture(&self, source: &mut dyn FrameSource) -> Result<Frame> {
        let image = source.read()?.ok_or_else(|| anyhow::anyhow!("device returned no frame"))?;
        let jpeg = utils::imencode_jpeg(&image, self.quality)?;
        Ok(Frame { jpeg: Bytes::from(jpeg), captured_at: Utc::now() })
    }

    /// 保存并推送一帧画面，循环已被取消时丢弃
    fn publish(&self, frame: Frame) -> bool {
        let jpeg = frame.jpeg.clone();
        // 在 watch 的写锁内检查取消标记，stop() 清空画面之后不会再被覆盖
        let stored = self.frames.send_if_modified(|latest| {
            if self.cancel.is_cancelled() {
                return false;
            }
            *latest = Some(frame);
            true
        });
        if !stored {
            debug!("采集已停止，丢弃画面");
            return false;
        }

        // 没有客户端时跳过 base64 编码
        if self.events.subscriber_count() > 0 {
            let image = BASE64_STANDARD.encode(&jpeg);
            self.events.publish(Event::CameraFrame { image });
        }
        metrics::inc_frame_count();
        true
    }
}
