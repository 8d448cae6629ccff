mod support;

use std::time::Duration;

use serde_json::{json, Value};
use tokio_tungstenite::connect_async;

use support::{assert_no_event, next_event, send_event, TestServer};

#[tokio::test]
async fn first_private_message_creates_room_for_both_sides() {
    let server = TestServer::start().await;
    let (alice, alice_token) = server.user("alice").await;
    let (bob, bob_token) = server.user("bob").await;
    server.befriend(alice, bob).await;

    let mut alice_ws = server.connect(&alice_token).await;
    let mut bob_ws = server.connect(&bob_token).await;
    server.wait_presence(&alice_token, alice, true).await;
    server.wait_presence(&alice_token, bob, true).await;

    send_event(
        &mut alice_ws,
        json!({
            "event": "private-message",
            "data": { "toUserId": bob, "content": "hi bob", "clientRef": "c-1" }
        }),
    )
    .await;

    let created = next_event(&mut alice_ws, "room-created").await;
    let room_id = created["roomId"].clone();
    assert_eq!(created["room"]["kind"], "private");
    assert_eq!(created["room"]["members"].as_array().map(Vec::len), Some(2));

    let echoed = next_event(&mut alice_ws, "new-message").await;
    assert_eq!(echoed["roomId"], room_id);
    assert_eq!(echoed["clientRef"], "c-1");
    assert_eq!(echoed["message"]["content"], "hi bob");
    assert_eq!(echoed["message"]["sender"]["displayName"], "alice");

    let bob_created = next_event(&mut bob_ws, "room-created").await;
    assert_eq!(bob_created["roomId"], room_id);
    let delivered = next_event(&mut bob_ws, "new-message").await;
    assert_eq!(delivered["message"]["id"], echoed["message"]["id"]);

    // 第二条消息复用同一个房间
    send_event(
        &mut bob_ws,
        json!({
            "event": "private-message",
            "data": { "toUserId": alice, "content": "hey" }
        }),
    )
    .await;
    let reply = next_event(&mut alice_ws, "new-message").await;
    assert_eq!(reply["roomId"], room_id);
    assert!(reply.get("clientRef").is_none());
}

#[tokio::test]
async fn typing_read_receipts_and_history() {
    let server = TestServer::start().await;
    let (alice, alice_token) = server.user("alice").await;
    let (bob, bob_token) = server.user("bob").await;
    server.befriend(alice, bob).await;

    let mut alice_ws = server.connect(&alice_token).await;
    let mut bob_ws = server.connect(&bob_token).await;
    server.wait_presence(&alice_token, alice, true).await;
    server.wait_presence(&alice_token, bob, true).await;

    send_event(
        &mut alice_ws,
        json!({
            "event": "private-message",
            "data": { "toUserId": bob, "content": "first" }
        }),
    )
    .await;
    let delivered = next_event(&mut bob_ws, "new-message").await;
    let room_id = delivered["roomId"].as_str().expect("room id").to_string();
    let message_id = delivered["message"]["id"].clone();
    next_event(&mut alice_ws, "new-message").await;

    send_event(
        &mut bob_ws,
        json!({ "event": "typing", "data": { "roomId": room_id, "isTyping": true } }),
    )
    .await;
    let typing = next_event(&mut alice_ws, "typing").await;
    assert_eq!(typing["userId"], json!(bob));
    assert_eq!(typing["username"], "bob");
    assert_eq!(typing["isTyping"], true);
    assert_no_event(&mut bob_ws, "typing", Duration::from_millis(200)).await;

    let rooms: Value = server
        .client
        .get(server.url("/api/v1/rooms"))
        .bearer_auth(&bob_token)
        .send()
        .await
        .expect("list rooms")
        .json()
        .await
        .expect("rooms json");
    assert_eq!(rooms.as_array().map(Vec::len), Some(1));
    assert_eq!(rooms[0]["unreadCount"], 1);

    send_event(
        &mut bob_ws,
        json!({
            "event": "message-read",
            "data": { "roomId": room_id, "messageIds": [message_id] }
        }),
    )
    .await;
    let read = next_event(&mut alice_ws, "messages-read").await;
    assert_eq!(read["userId"], json!(bob));
    assert_eq!(read["messageIds"], json!([message_id]));

    let page: Value = server
        .client
        .get(server.url(&format!("/api/v1/rooms/{room_id}/messages?limit=10")))
        .bearer_auth(&alice_token)
        .send()
        .await
        .expect("history")
        .json()
        .await
        .expect("history json");
    assert_eq!(page["hasMore"], false);
    assert_eq!(page["messages"][0]["content"], "first");
    assert_eq!(page["messages"][0]["readBy"][0]["userId"], json!(alice));
    assert_eq!(page["messages"][0]["readBy"][1]["userId"], json!(bob));
}

#[tokio::test]
async fn invalid_frames_are_answered_with_error() {
    let server = TestServer::start().await;
    let (alice, alice_token) = server.user("alice").await;
    let (stranger, _) = server.user("stranger").await;

    let mut ws = server.connect(&alice_token).await;
    server.wait_presence(&alice_token, alice, true).await;

    send_event(&mut ws, json!({ "event": "no-such-event", "data": {} })).await;
    let error = next_event(&mut ws, "error").await;
    assert_eq!(error["code"], "INVALID_INPUT");

    send_event(
        &mut ws,
        json!({
            "event": "private-message",
            "data": { "toUserId": stranger, "content": "hello?" }
        }),
    )
    .await;
    let error = next_event(&mut ws, "error").await;
    assert_eq!(error["code"], "NOT_FRIENDS");

    send_event(
        &mut ws,
        json!({
            "event": "private-message",
            "data": { "toUserId": alice, "content": "note to self" }
        }),
    )
    .await;
    let error = next_event(&mut ws, "error").await;
    assert_eq!(error["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn upgrade_without_credentials_is_rejected() {
    let server = TestServer::start().await;

    let missing = connect_async(format!("{}/api/v1/ws", server.base_ws)).await;
    assert!(missing.is_err());

    let forged = connect_async(format!("{}/api/v1/ws?token=not-a-jwt", server.base_ws)).await;
    match forged {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 401);
        }
        Err(other) => panic!("expected http 401, got {other}"),
        Ok(_) => panic!("forged token was accepted"),
    }
}

#[tokio::test]
async fn group_lifecycle_is_broadcast() {
    let server = TestServer::start().await;
    let (admin, admin_token) = server.user("admin").await;
    let (member, member_token) = server.user("member").await;
    let (late, late_token) = server.user("late").await;

    let mut admin_ws = server.connect(&admin_token).await;
    let mut member_ws = server.connect(&member_token).await;
    let mut late_ws = server.connect(&late_token).await;
    for user in [admin, member, late] {
        server.wait_presence(&admin_token, user, true).await;
    }

    let created = server
        .client
        .post(server.url("/api/v1/groups"))
        .bearer_auth(&admin_token)
        .json(&json!({ "name": "team", "memberIds": [member] }))
        .send()
        .await
        .expect("create group");
    assert_eq!(created.status().as_u16(), 201);
    let room: Value = created.json().await.expect("room json");
    let room_id = room["id"].as_str().expect("room id").to_string();
    assert_eq!(room["admin"], json!(admin));

    next_event(&mut admin_ws, "room-created").await;
    let added = next_event(&mut member_ws, "added-to-group").await;
    assert_eq!(added["room"]["name"], "team");

    send_event(
        &mut member_ws,
        json!({
            "event": "group-message",
            "data": { "roomId": room_id, "content": "hello team" }
        }),
    )
    .await;
    let message = next_event(&mut admin_ws, "new-message").await;
    assert_eq!(message["message"]["content"], "hello team");

    let response = server
        .client
        .post(server.url(&format!("/api/v1/groups/{room_id}/members")))
        .bearer_auth(&admin_token)
        .json(&json!({ "memberIds": [late] }))
        .send()
        .await
        .expect("add members");
    assert_eq!(response.status().as_u16(), 200);
    next_event(&mut late_ws, "added-to-group").await;
    let updated = next_event(&mut member_ws, "room-updated").await;
    assert_eq!(updated["room"]["members"].as_array().map(Vec::len), Some(3));

    let response = server
        .client
        .delete(server.url(&format!("/api/v1/rooms/{room_id}")))
        .bearer_auth(&member_token)
        .send()
        .await
        .expect("delete as member");
    assert_eq!(response.status().as_u16(), 403);

    let response = server
        .client
        .delete(server.url(&format!("/api/v1/rooms/{room_id}")))
        .bearer_auth(&admin_token)
        .send()
        .await
        .expect("delete as admin");
    assert_eq!(response.status().as_u16(), 204);
    for ws in [&mut admin_ws, &mut member_ws, &mut late_ws] {
        let deleted = next_event(ws, "room-deleted").await;
        assert_eq!(deleted["roomId"], room_id.as_str());
    }
}

#[tokio::test]
async fn message_sent_before_abrupt_disconnect_still_reaches_peer() {
    let server = TestServer::start().await;
    let (alice, alice_token) = server.user("alice").await;
    let (bob, bob_token) = server.user("bob").await;
    server.befriend(alice, bob).await;

    let mut alice_ws = server.connect(&alice_token).await;
    let mut bob_ws = server.connect(&bob_token).await;
    server.wait_presence(&bob_token, alice, true).await;
    server.wait_presence(&bob_token, bob, true).await;

    send_event(
        &mut alice_ws,
        json!({
            "event": "private-message",
            "data": { "toUserId": bob, "content": "sent then gone" }
        }),
    )
    .await;
    // 不发关闭帧直接断开 TCP
    drop(alice_ws);

    let delivered = next_event(&mut bob_ws, "new-message").await;
    assert_eq!(delivered["message"]["content"], "sent then gone");
    server.wait_presence(&bob_token, alice, false).await;

    let rooms: Value = server
        .client
        .get(server.url("/api/v1/rooms"))
        .bearer_auth(&bob_token)
        .send()
        .await
        .expect("list rooms")
        .json()
        .await
        .expect("rooms json");
    assert_eq!(rooms[0]["unreadCount"], 1);
    assert_eq!(rooms[0]["lastActivityAt"], delivered["message"]["createdAt"]);
}
