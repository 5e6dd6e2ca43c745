mod support;

use serde_json::json;
use tokio_tungstenite::connect_async;

use support::{next_json, send_json, spawn_app, wait_for_type};

/// 两个用户共享会话 42 的完整消息流转：
/// 发送 → 双方收到 new_message → 发送者收到 delivered 提示 →
/// 对方 mark_seen → 双方收到 seen 状态。
#[tokio::test]
async fn direct_conversation_delivery_flow() {
    let app = spawn_app().await;

    // 用户1连接，准入后收到已订阅会话列表
    let (mut ws_a, _) = connect_async(app.ws_url(&app.token(1)))
        .await
        .expect("user1 ws connect");
    let joined = wait_for_type(&mut ws_a, "joined_conversations").await;
    assert_eq!(joined["conversation_ids"], json!([42]));

    // 用户2连接
    let (mut ws_b, _) = connect_async(app.ws_url(&app.token(2)))
        .await
        .expect("user2 ws connect");
    let joined = wait_for_type(&mut ws_b, "joined_conversations").await;
    assert_eq!(joined["conversation_ids"], json!([42]));

    // 用户1看到用户2上线
    let presence = wait_for_type(&mut ws_a, "presence").await;
    assert_eq!(presence["user_id"], 2);
    assert_eq!(presence["online"], true);

    // 用户1发消息
    send_json(
        &mut ws_a,
        json!({
            "type": "send_message",
            "conversation_id": 42,
            "body": "hi",
            "client_msg_id": "tmp-1"
        }),
    )
    .await;

    // 双方都收到 new_message
    let new_message = wait_for_type(&mut ws_a, "new_message").await;
    assert_eq!(new_message["message"]["body"], "hi");
    assert_eq!(new_message["message"]["sender_id"], 1);
    let message_id = new_message["message"]["id"].as_i64().expect("message id");

    let new_message_b = wait_for_type(&mut ws_b, "new_message").await;
    assert_eq!(new_message_b["message"]["id"], message_id);
    assert_eq!(new_message_b["message"]["body"], "hi");

    // 发送者收到 delivered 提示（用户2在线）和带服务端 id 的应答
    let status = wait_for_type(&mut ws_a, "message_status").await;
    assert_eq!(status["message_id"], message_id);
    assert_eq!(status["status"], "delivered");

    let ack = wait_for_type(&mut ws_a, "send_ack").await;
    assert_eq!(ack["ok"], true);
    assert_eq!(ack["message"]["id"], message_id);
    assert_eq!(ack["client_msg_id"], "tmp-1");

    // 用户2确认已读，双方都看到 seen
    send_json(&mut ws_b, json!({"type": "mark_seen", "conversation_id": 42})).await;

    let seen_a = wait_for_type(&mut ws_a, "message_status").await;
    assert_eq!(seen_a["message_id"], message_id);
    assert_eq!(seen_a["status"], "seen");

    let seen_b = wait_for_type(&mut ws_b, "message_status").await;
    assert_eq!(seen_b["message_id"], message_id);
    assert_eq!(seen_b["status"], "seen");

    let seen_ack = wait_for_type(&mut ws_b, "seen_ack").await;
    assert_eq!(seen_ack["conversation_id"], 42);
    assert_eq!(seen_ack["updated"], 1);
}

/// 输入中信号只到达房间里的其它连接
#[tokio::test]
async fn typing_reaches_only_the_peer() {
    let app = spawn_app().await;

    let (mut ws_a, _) = connect_async(app.ws_url(&app.token(1)))
        .await
        .expect("user1 ws connect");
    wait_for_type(&mut ws_a, "joined_conversations").await;
    let (mut ws_b, _) = connect_async(app.ws_url(&app.token(2)))
        .await
        .expect("user2 ws connect");
    wait_for_type(&mut ws_b, "joined_conversations").await;

    send_json(
        &mut ws_a,
        json!({"type": "typing", "conversation_id": 42, "is_typing": true}),
    )
    .await;

    let typing = wait_for_type(&mut ws_b, "typing").await;
    assert_eq!(typing["conversation_id"], 42);
    assert_eq!(typing["user_id"], 1);
    assert_eq!(typing["is_typing"], true);

    // 发起方自己没有收到 typing：用 ping/pong 对齐，期间不应有 typing 帧
    send_json(&mut ws_a, json!({"type": "ping"})).await;
    loop {
        let event = next_json(&mut ws_a).await;
        assert_ne!(event["type"], "typing", "typing echoed back to sender");
        if event["type"] == "pong" {
            break;
        }
    }
}

/// 空消息被拒绝且不产生任何广播
#[tokio::test]
async fn empty_message_is_rejected() {
    let app = spawn_app().await;

    let (mut ws_a, _) = connect_async(app.ws_url(&app.token(1)))
        .await
        .expect("user1 ws connect");
    wait_for_type(&mut ws_a, "joined_conversations").await;

    send_json(
        &mut ws_a,
        json!({"type": "send_message", "conversation_id": 42, "body": "  "}),
    )
    .await;

    let ack = wait_for_type(&mut ws_a, "send_ack").await;
    assert_eq!(ack["ok"], false);
    assert!(ack["error"].as_str().is_some());
    assert_eq!(app.gateway.message_count().await, 0);
}

/// 无法识别的请求只回错误帧，不断开连接
#[tokio::test]
async fn unknown_request_yields_error_frame() {
    let app = spawn_app().await;

    let (mut ws_a, _) = connect_async(app.ws_url(&app.token(1)))
        .await
        .expect("user1 ws connect");
    wait_for_type(&mut ws_a, "joined_conversations").await;

    send_json(&mut ws_a, json!({"type": "shrug"})).await;
    let error = wait_for_type(&mut ws_a, "error").await;
    assert_eq!(error["code"], "INVALID_ARGUMENT");

    // 连接仍然可用
    send_json(&mut ws_a, json!({"type": "ping"})).await;
    wait_for_type(&mut ws_a, "pong").await;
}
