use application::{ApplicationError, ClientEvent, ServerEvent, Session};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{ConnectionId, DomainError, UserId};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};

use crate::state::AppState;

/// WebSocket 连接管理器
///
/// 封装单个已认证连接的生命周期：
/// - 登记会话并接收分发中心推来的事件
/// - 解析客户端事件并交给协议处理器
/// - 心跳与断开后的清理
pub struct WebSocketConnection {
    state: AppState,
    session: Session,
}

impl WebSocketConnection {
    pub fn new(state: AppState, user_id: UserId) -> Self {
        Self {
            state,
            session: Session::new(user_id, ConnectionId::random()),
        }
    }

    /// 运行 WebSocket 连接的主循环
    pub async fn run(self, mut socket: WebSocket) {
        let session = self.session;
        let chat = self.state.chat_service.clone();

        let mut events = match chat.open_session(session).await {
            Ok(events) => events,
            Err(err) => {
                tracing::error!(user_id = %session.user_id, error = %err, "会话建立失败");
                let frame = encode(&ServerEvent::error(err.code(), err.public_message()));
                if let Some(text) = frame {
                    let _ = socket.send(WsMessage::Text(text.into())).await;
                }
                let _ = socket.send(WsMessage::Close(None)).await;
                return;
            }
        };
        tracing::info!(
            user_id = %session.user_id,
            connection_id = %session.connection_id,
            "WebSocket 连接已建立"
        );

        let (mut sender, mut incoming) = socket.split();

        // 创建 mpsc channel 来解耦对 sender 的访问
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        // 发送任务：统一处理所有对 WebSocket sender 的写操作
        let mut send_task = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    Some(cmd) = cmd_rx.recv() => cmd,
                    Some(event) = events.recv() => match encode(&event) {
                        Some(text) => WsCommand::SendText(text),
                        None => continue,
                    },
                    else => break,
                };
                let message = match frame {
                    WsCommand::SendText(text) => WsMessage::Text(text.into()),
                    WsCommand::SendPong(data) => WsMessage::Pong(data.into()),
                };
                if sender.send(message).await.is_err() {
                    tracing::debug!("WebSocket 写入失败，连接可能已断开");
                    break;
                }
            }
        });

        // 写端失效后只停止读取新帧，正在处理的事件照常完成
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        // 接收任务：按到达顺序逐条处理客户端事件
        let mut recv_task = {
            let chat = chat.clone();
            tokio::spawn(async move {
                loop {
                    let message = tokio::select! {
                        _ = &mut stop_rx => break,
                        next = incoming.next() => match next {
                            Some(Ok(message)) => message,
                            _ => break,
                        },
                    };
                    match message {
                        WsMessage::Text(text) => {
                            match serde_json::from_str::<ClientEvent>(text.as_str()) {
                                Ok(event) => chat.handle(session, event).await,
                                Err(err) => {
                                    let err = DomainError::invalid_input(
                                        "event",
                                        format!("unparseable frame: {err}"),
                                    );
                                    chat.reject(session, &ApplicationError::from(err)).await;
                                }
                            }
                        }
                        WsMessage::Binary(_) => {
                            let err = DomainError::invalid_input(
                                "event",
                                "binary frames are not supported",
                            );
                            chat.reject(session, &ApplicationError::from(err)).await;
                        }
                        WsMessage::Ping(data) => {
                            tracing::debug!("收到ping消息，发送pong回应");
                            if cmd_tx.send(WsCommand::SendPong(data.to_vec())).await.is_err() {
                                break;
                            }
                        }
                        WsMessage::Pong(_) => {
                            tracing::debug!("收到pong消息");
                        }
                        WsMessage::Close(_) => {
                            tracing::info!("WebSocket收到关闭消息");
                            break;
                        }
                    }
                }
            })
        };

        // 等待任意一个任务完成（连接断开）
        tokio::select! {
            _ = &mut send_task => {
                let _ = stop_tx.send(());
                if let Err(err) = recv_task.await {
                    tracing::warn!(error = %err, "接收任务异常结束");
                }
            }
            _ = &mut recv_task => send_task.abort(),
        }

        chat.close_session(session).await;
        tracing::info!(
            user_id = %session.user_id,
            connection_id = %session.connection_id,
            "WebSocket连接已断开，在线状态已清理"
        );
    }
}

fn encode(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json),
        Err(err) => {
            tracing::warn!(error = %err, event = event.name(), "事件序列化失败");
            None
        }
    }
}

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    SendText(String),
    SendPong(Vec<u8>),
}
