mod support;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use config::ChatSettings;
use domain::{UserId, UserProfile};
use serde_json::{json, Value};
use tower::ServiceExt;
use web_api::router;

use support::{test_app, TestApp};

struct Harness {
    app: Router,
    test: TestApp,
}

impl Harness {
    fn new(settings: ChatSettings) -> Self {
        let test = test_app(settings);
        Self {
            app: router(test.state.clone()),
            test,
        }
    }

    async fn user(&self, name: &str) -> (UserId, String) {
        let id = UserId::random();
        self.test
            .users
            .add_user(UserProfile {
                id,
                display_name: name.to_string(),
                avatar_url: None,
            })
            .await;
        (id, self.test.jwt.issue_token(id).expect("token"))
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = self.app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    async fn upload(&self, token: &str, content_type: &str, body: Vec<u8>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/uploads")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .expect("request");
        let response = self.app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }
}

#[tokio::test]
async fn health_is_public_and_api_requires_token() {
    let harness = Harness::new(ChatSettings::default());

    let (status, _) = harness.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = harness.call(Method::GET, "/api/v1/rooms", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "AUTHENTICATION_FAILED");

    let (status, _) = harness
        .call(Method::GET, "/api/v1/rooms", Some("garbage"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn group_management_permissions() {
    let harness = Harness::new(ChatSettings::default());
    let (admin, admin_token) = harness.user("admin").await;
    let (manager, manager_token) = harness.user("manager").await;
    let (member, member_token) = harness.user("member").await;

    let (status, room) = harness
        .call(
            Method::POST,
            "/api/v1/groups",
            Some(&admin_token),
            Some(json!({ "name": "ops", "memberIds": [manager, member] })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let room_id = room["id"].as_str().expect("room id").to_string();
    assert_eq!(room["managers"], json!([admin]));

    let (status, body) = harness
        .call(
            Method::POST,
            "/api/v1/groups",
            Some(&admin_token),
            Some(json!({ "name": "", "memberIds": [member] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");

    let promote = format!("/api/v1/groups/{room_id}/managers/{manager}");
    let (status, _) = harness
        .call(Method::POST, &promote, Some(&member_token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, room) = harness
        .call(Method::POST, &promote, Some(&admin_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(room["managers"], json!([admin, manager]));
    let (status, body) = harness
        .call(Method::POST, &promote, Some(&admin_token), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");

    let (status, room) = harness
        .call(
            Method::PUT,
            &format!("/api/v1/groups/{room_id}"),
            Some(&manager_token),
            Some(json!({ "name": "ops-renamed" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(room["name"], "ops-renamed");

    let (status, _) = harness
        .call(
            Method::DELETE,
            &format!("/api/v1/groups/{room_id}/members/{admin}"),
            Some(&manager_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = harness
        .call(
            Method::POST,
            &format!("/api/v1/groups/{room_id}/leave"),
            Some(&admin_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "ADMIN_CANNOT_LEAVE");

    let (status, room) = harness
        .call(
            Method::DELETE,
            &format!("/api/v1/groups/{room_id}/members/{member}"),
            Some(&manager_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(room["members"].as_array().map(Vec::len), Some(2));

    let (status, body) = harness
        .call(
            Method::GET,
            &format!("/api/v1/rooms/{room_id}"),
            Some(&member_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = harness
        .call(Method::DELETE, &promote, Some(&admin_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = harness
        .call(
            Method::DELETE,
            &format!("/api/v1/groups/{room_id}/managers/{admin}"),
            Some(&admin_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INVALID_OPERATION");

    let (status, _) = harness
        .call(
            Method::POST,
            &format!("/api/v1/groups/{room_id}/leave"),
            Some(&manager_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn batch_send_reports_each_target() {
    let harness = Harness::new(ChatSettings::default());
    let (alice, alice_token) = harness.user("alice").await;
    let (bob, _) = harness.user("bob").await;
    let (stranger, _) = harness.user("stranger").await;
    harness.test.users.befriend(alice, bob).await;

    let (status, outcomes) = harness
        .call(
            Method::POST,
            "/api/v1/messages/batch",
            Some(&alice_token),
            Some(json!({
                "targets": [
                    { "type": "user", "id": bob },
                    { "type": "user", "id": stranger },
                    { "type": "room", "id": UserId::random() }
                ],
                "content": "announcement"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let outcomes = outcomes.as_array().expect("outcomes");
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0]["status"], "delivered");
    assert_eq!(outcomes[0]["target"]["id"], json!(bob));
    assert_eq!(outcomes[1]["status"], "failed");
    assert_eq!(outcomes[1]["code"], "NOT_FRIENDS");
    assert_eq!(outcomes[2]["status"], "failed");
    assert_eq!(outcomes[2]["code"], "NOT_FOUND");

    let room_id = outcomes[0]["roomId"].as_str().expect("room id").to_string();
    let (status, page) = harness
        .call(
            Method::GET,
            &format!("/api/v1/rooms/{room_id}/messages"),
            Some(&alice_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["messages"][0]["content"], "announcement");
    assert_eq!(page["messages"][0]["id"], outcomes[0]["messageId"]);
}

#[tokio::test]
async fn uploads_are_checked_for_type_and_size() {
    let settings = ChatSettings {
        max_upload_bytes: 16,
        ..ChatSettings::default()
    };
    let harness = Harness::new(settings);
    let (_, token) = harness.user("alice").await;

    let (status, body) = harness.upload(&token, "image/png", vec![1, 2, 3]).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["url"], "data:image/png;base64,AQID");

    let (status, body) = harness
        .upload(&token, "application/x-msdownload", vec![1, 2, 3])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");

    let (status, _) = harness.upload(&token, "image/png", vec![0; 64]).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}
