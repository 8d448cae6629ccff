#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use application::{MemoryDirectory, MemoryStorage, MonotonicClock};
use config::{ChatSettings, JwtConfig};
use domain::{UserId, UserProfile};
use futures_util::{SinkExt, StreamExt};
use infrastructure::{DataUrlUploader, InMemoryRealtimeHub};
use reqwest::Client;
use serde_json::Value;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::{sleep, timeout},
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, JwtService, StorageBackends};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestApp {
    pub state: AppState,
    pub jwt: JwtService,
    pub users: Arc<MemoryDirectory>,
}

pub fn test_jwt() -> JwtService {
    JwtService::new(JwtConfig {
        secret: "integration-test-secret-with-enough-length".to_string(),
        expiration_hours: 1,
    })
}

/// 全部使用内存存储的应用状态
pub fn test_app(settings: ChatSettings) -> TestApp {
    let jwt = test_jwt();
    let storage = Arc::new(MemoryStorage::new());
    let users = Arc::new(MemoryDirectory::new());
    let uploader = Arc::new(DataUrlUploader::new(settings.max_upload_bytes));

    let state = AppState::assemble(
        StorageBackends {
            rooms: storage.clone(),
            messages: storage,
            friendships: users.clone(),
            users: users.clone(),
        },
        Arc::new(InMemoryRealtimeHub::new()),
        Arc::new(MonotonicClock::new()),
        settings,
        Arc::new(jwt.clone()),
        uploader,
    );
    TestApp { state, jwt, users }
}

/// 在进程内启动的 HTTP/WebSocket 服务器
pub struct TestServer {
    pub base_http: String,
    pub base_ws: String,
    pub jwt: JwtService,
    pub users: Arc<MemoryDirectory>,
    pub client: Client,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(ChatSettings::default()).await
    }

    pub async fn start_with(settings: ChatSettings) -> Self {
        let TestApp { state, jwt, users } = test_app(settings);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(state);
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            base_http: format!("http://{addr}"),
            base_ws: format!("ws://{addr}"),
            jwt,
            users,
            client: Client::new(),
            shutdown: Some(shutdown_tx),
        }
    }

    /// 登记用户并签发令牌
    pub async fn user(&self, name: &str) -> (UserId, String) {
        let id = UserId::random();
        self.users
            .add_user(UserProfile {
                id,
                display_name: name.to_string(),
                avatar_url: None,
            })
            .await;
        let token = self.jwt.issue_token(id).expect("token");
        (id, token)
    }

    pub async fn befriend(&self, a: UserId, b: UserId) {
        self.users.befriend(a, b).await;
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_http, path)
    }

    pub async fn connect(&self, token: &str) -> WsClient {
        let url = format!("{}/api/v1/ws?token={}", self.base_ws, token);
        let (stream, _) = connect_async(url).await.expect("websocket connect");
        stream
    }

    pub async fn is_online(&self, token: &str, user_id: UserId) -> bool {
        let body: Value = self
            .client
            .get(self.url(&format!("/api/v1/presence/{user_id}")))
            .bearer_auth(token)
            .send()
            .await
            .expect("presence request")
            .json()
            .await
            .expect("presence json");
        body["isOnline"].as_bool().unwrap_or(false)
    }

    /// 会话在升级后异步登记，轮询到指定状态为止
    pub async fn wait_presence(&self, token: &str, user_id: UserId, online: bool) {
        for _ in 0..100 {
            if self.is_online(token, user_id).await == online {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("user {user_id} never became online={online}");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn send_event(ws: &mut WsClient, event: Value) {
    ws.send(TungsteniteMessage::text(event.to_string()))
        .await
        .expect("send frame");
}

/// 读到指定名称的事件为止，中途的其他事件丢弃
pub async fn next_event(ws: &mut WsClient, name: &str) -> Value {
    let wait = async {
        loop {
            let frame = ws
                .next()
                .await
                .expect("stream ended")
                .expect("websocket error");
            if let TungsteniteMessage::Text(text) = frame {
                let value: Value = serde_json::from_str(text.as_str()).expect("json frame");
                if value["event"] == name {
                    return value["data"].clone();
                }
            }
        }
    };
    timeout(EVENT_TIMEOUT, wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {name}"))
}

/// 在给定时间内不应出现指定事件
pub async fn assert_no_event(ws: &mut WsClient, name: &str, within: Duration) {
    let wait = async {
        loop {
            match ws.next().await {
                Some(Ok(TungsteniteMessage::Text(text))) => {
                    let value: Value = serde_json::from_str(text.as_str()).expect("json frame");
                    if value["event"] == name {
                        return value;
                    }
                }
                Some(Ok(_)) => continue,
                _ => std::future::pending::<()>().await,
            }
        }
    };
    if let Ok(value) = timeout(within, wait).await {
        panic!("unexpected {name} event: {value}");
    }
}
