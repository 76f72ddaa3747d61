mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rollcall::KioskError;
use rollcall::capture::CaptureController;
use rollcall::events::{Event, EventPublisher};
use rollcall::task::LoopState;
use tokio::time::timeout;

use common::*;

fn controller(device: impl rollcall::capture::CameraDevice + 'static) -> CaptureController {
    CaptureController::new(Arc::new(device), EventPublisher::default(), camera_options())
}

#[tokio::test]
async fn start_is_idempotent() -> Result<()> {
    let capture = controller(FakeCamera::new(ENROLLED_FACE));
    capture.start().await?;
    capture.start().await?;
    assert_eq!(capture.status(), LoopState::Running);

    wait_until(|| capture.latest_frame().is_ok()).await;
    let frame = capture.latest_frame()?;
    assert!(!frame.jpeg.is_empty());

    capture.stop().await;
    assert_eq!(capture.status(), LoopState::Idle);
    assert!(matches!(capture.latest_frame(), Err(KioskError::CameraNotRunning)));
    Ok(())
}

#[tokio::test]
async fn stop_without_start_is_noop() {
    let capture = controller(FakeCamera::new(ENROLLED_FACE));
    capture.stop().await;
    assert_eq!(capture.status(), LoopState::Idle);
    assert!(matches!(capture.latest_frame(), Err(KioskError::CameraNotRunning)));
}

#[tokio::test]
async fn unavailable_device_fails_start() {
    let capture = controller(MissingCamera);
    assert!(matches!(capture.start().await, Err(KioskError::CameraUnavailable(_))));
    assert_eq!(capture.status(), LoopState::Idle);
}

#[tokio::test]
async fn frames_are_published_to_subscribers() -> Result<()> {
    let events = EventPublisher::default();
    let mut rx = events.subscribe();
    let capture =
        CaptureController::new(Arc::new(FakeCamera::new(STRANGER_FACE)), events, camera_options());
    capture.start().await?;

    let event = timeout(Duration::from_secs(5), rx.recv()).await??;
    match event {
        Event::CameraFrame { image } => assert!(!image.is_empty()),
        other => panic!("unexpected event {other:?}"),
    }
    capture.stop().await;
    Ok(())
}

#[tokio::test]
async fn repeated_failures_degrade() -> Result<()> {
    let events = EventPublisher::default();
    let mut rx = events.subscribe();
    let capture = CaptureController::new(Arc::new(BrokenCamera), events, camera_options());
    capture.start().await?;

    let event = timeout(Duration::from_secs(5), rx.recv()).await??;
    assert_eq!(event.name(), "camera_error");
    wait_until(|| matches!(capture.status(), LoopState::Degraded(_))).await;
    assert!(matches!(capture.latest_frame(), Err(KioskError::CameraNotRunning)));

    // 降级后可以重新启动
    capture.start().await?;
    assert_eq!(capture.status(), LoopState::Running);
    capture.stop().await;
    assert_eq!(capture.status(), LoopState::Idle);
    Ok(())
}
