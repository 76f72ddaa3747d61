use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use super::state::AppState;
use crate::events::Event;
use crate::students::{self, CardId, CardScanResult};

static NEXT_CLIENT: AtomicUsize = AtomicUsize::new(1);

/// 客户端发送的消息，格式与推送的事件相同
#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    ScanCard { card_id: CardId },
    PerformFaceRecognition,
    StopFaceRecognition,
}

/// WebSocket 入口
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let client = NEXT_CLIENT.fetch_add(1, Ordering::Relaxed);
    info!("客户端 {} 已连接", client);

    let (mut sender, mut receiver) = socket.split();
    let mut events = state.events.subscribe();
    // 只发给当前客户端的回复
    let (reply_tx, mut reply_rx) = mpsc::channel::<Event>(16);

    let mut send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                reply = reply_rx.recv() => match reply {
                    Some(event) => event,
                    None => break,
                },
                event = events.recv() => match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(n)) => {
                        debug!("客户端 {} 跳过了 {} 个事件", client, n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("序列化事件 {} 失败: {}", event.name(), e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => {
                    let message = match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!("客户端 {} 发送了无法解析的消息: {}", client, e);
                            continue;
                        }
                    };
                    debug!("客户端 {} 消息: {:?}", client, message);
                    if let Some(reply) = handle_message(&state, message).await {
                        if reply_tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    info!("客户端 {} 已断开", client);
}

/// 处理一条客户端消息，返回只回复给该客户端的事件
pub async fn handle_message(state: &AppState, message: ClientMessage) -> Option<Event> {
    match message {
        ClientMessage::ScanCard { card_id } => {
            let result = match students::scan_card(&state.db, card_id).await {
                Ok(result) => result,
                Err(e) => {
                    warn!("刷卡查询失败: {}", e);
                    CardScanResult { success: false, student: None, message: e.to_string() }
                }
            };
            Some(Event::CardScanned(result))
        }
        ClientMessage::PerformFaceRecognition => {
            state.recognition.start().await;
            None
        }
        ClientMessage::StopFaceRecognition => {
            state.recognition.stop().await;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_client_message() {
        let message: ClientMessage =
            serde_json::from_value(json!({"event": "scan_card", "data": {"card_id": "123456"}}))
                .unwrap();
        assert_eq!(message, ClientMessage::ScanCard { card_id: CardId::Text("123456".into()) });

        let message: ClientMessage =
            serde_json::from_value(json!({"event": "scan_card", "data": {"card_id": 42}})).unwrap();
        assert_eq!(message, ClientMessage::ScanCard { card_id: CardId::Number(42) });

        let message: ClientMessage =
            serde_json::from_value(json!({"event": "perform_face_recognition"})).unwrap();
        assert_eq!(message, ClientMessage::PerformFaceRecognition);

        let message: ClientMessage =
            serde_json::from_value(json!({"event": "stop_face_recognition", "data": null})).unwrap();
        assert_eq!(message, ClientMessage::StopFaceRecognition);
    }

    #[test]
    fn test_reject_unknown_event() {
        assert!(serde_json::from_value::<ClientMessage>(json!({"event": "reboot"})).is_err());
        assert!(serde_json::from_value::<ClientMessage>(json!({"event": "scan_card"})).is_err());
    }
}
