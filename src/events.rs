use serde::Serialize;
use tokio::sync::broadcast;

use crate::recognition::RecognitionResult;
use crate::students::CardScanResult;

/// 推送给客户端的事件
///
/// 序列化为 `{"event": <名称>, "data": <内容>}`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Event {
    /// 摄像头画面，base64 编码的 JPEG
    CameraFrame { image: String },
    FaceRecognitionResult(RecognitionResult),
    ImageCaptured { success: bool, card_id: String },
    CardScanned(CardScanResult),
    CameraError { error: String },
    FaceRecognitionError { error: String },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CameraFrame { .. } => "camera_frame",
            Self::FaceRecognitionResult(_) => "face_recognition_result",
            Self::ImageCaptured { .. } => "image_captured",
            Self::CardScanned(_) => "card_scanned",
            Self::CameraError { .. } => "camera_error",
            Self::FaceRecognitionError { .. } => "face_recognition_error",
        }
    }
}

/// 事件广播
///
/// 不保证送达：没有订阅者时事件直接丢弃，处理过慢的订阅者会跳过积压的事件
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<Event>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// 发布事件，返回收到事件的订阅者数量
    pub fn publish(&self, event: Event) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = Event::ImageCaptured { success: true, card_id: "42".into() };
        assert_eq!(event.name(), "image_captured");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "image_captured", "data": {"success": true, "card_id": "42"}})
        );

        let event = Event::FaceRecognitionResult(RecognitionResult::no_face());
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "face_recognition_result", "data": {"face_detected": false}})
        );
    }

    #[tokio::test]
    async fn test_publish_fan_out() {
        let events = EventPublisher::new(4);
        assert_eq!(events.publish(Event::CameraError { error: "lost".into() }), 0);

        let mut a = events.subscribe();
        let mut b = events.subscribe();
        assert_eq!(events.subscriber_count(), 2);
        assert_eq!(events.publish(Event::CameraError { error: "lost".into() }), 2);
        assert_eq!(a.recv().await.unwrap().name(), "camera_error");
        assert_eq!(b.recv().await.unwrap().name(), "camera_error");
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips() {
        let events = EventPublisher::new(2);
        let mut rx = events.subscribe();
        for i in 0..5 {
            events.publish(Event::CameraFrame { image: i.to_string() });
        }
        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Lagged(3))));
        match rx.recv().await.unwrap() {
            Event::CameraFrame { image } => assert_eq!(image, "3"),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
