mod support;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use condux_client::{
    Channel, ChannelOptions, ChannelStatus, Client, ClientConfig, ClientError, Persistence,
};
use condux_frame::INVALID_PAYLOAD_MESSAGE;
use condux_transport::MemoryTransport;
use serde_json::{json, Value};

use support::*;

fn request_token(frame: &str, topic: &str) -> String {
    let prefix = format!("req,{topic},");
    let body = frame
        .strip_prefix(&prefix)
        .unwrap_or_else(|| panic!("expected a request frame on {topic}, got {frame}"));
    let body: Value = serde_json::from_str(body).expect("request body should be JSON");
    body["request_token"]
        .as_str()
        .expect("request should carry a token")
        .to_string()
}

#[tokio::test]
async fn every_listener_sees_the_same_message_and_snapshot() {
    let (transport, mut server) = MemoryTransport::new();
    let client = Client::new(transport);
    let chat = client.register_topic("chat").unwrap();
    let recorders: Vec<_> = (0..3)
        .map(|_| {
            let (seen, handlers) = recorder();
            chat.add_listener(handlers);
            seen
        })
        .collect();

    let peer = connect(&client, &mut server).await;
    peer.send(r#"msg,chat,{"text":"hi"}"#);
    wait_until("message applied", || chat.version() == 1).await;
    client.flush().await;

    for seen in &recorders {
        assert_eq!(
            *seen.lock(),
            vec![r#"message {"text":"hi"} {"text":"hi"}"#.to_string()]
        );
    }
}

#[tokio::test]
async fn hydration_then_message_builds_history() {
    let (transport, mut server) = MemoryTransport::new();
    let client = Client::new(transport);
    let chat = client.register_topic("chat").unwrap();
    let (seen, handlers) = recorder();
    chat.add_listener(handlers);

    let peer = connect(&client, &mut server).await;
    peer.send(r#"conn,chat,{"history":[]}"#);
    peer.send(r#"msg,chat,{"history":["hi"]}"#);
    wait_until("message applied", || chat.version() == 1).await;
    client.flush().await;

    assert_eq!(chat.data(), json!({ "history": ["hi"] }));
    assert_eq!(chat.history(0), Some(json!({ "history": [] })));
    assert_eq!(chat.status(), ChannelStatus::Subscribed);
    assert_eq!(
        *seen.lock(),
        vec![
            r#"connection {"history":[]}"#.to_string(),
            r#"message {"history":["hi"]} {"history":["hi"]}"#.to_string(),
        ]
    );
}

#[tokio::test]
async fn merging_channel_accumulates_messages() {
    let (transport, mut server) = MemoryTransport::new();
    let client = Client::new(transport);
    let feed = client
        .register_topic_with("feed", ChannelOptions::merging())
        .unwrap();

    let peer = connect(&client, &mut server).await;
    peer.send(r#"conn,feed,{"items":[1],"meta":{"a":1}}"#);
    peer.send(r#"msg,feed,{"items":[1,2],"meta":{"b":2}}"#);
    wait_until("merge applied", || feed.version() == 1).await;

    assert_eq!(
        feed.data(),
        json!({ "items": [1, 2], "meta": { "a": 1, "b": 2 } })
    );
}

#[tokio::test]
async fn removed_listener_receives_nothing_further() {
    let (transport, mut server) = MemoryTransport::new();
    let client = Client::new(transport);
    let chat = client.register_topic("chat").unwrap();
    let (kept, kept_handlers) = recorder();
    let (removed, removed_handlers) = recorder();
    chat.add_listener(kept_handlers);
    let token = chat.add_listener(removed_handlers);

    let peer = connect(&client, &mut server).await;
    peer.send("msg,chat,1");
    wait_until("first message", || chat.version() == 1).await;
    client.flush().await;

    assert!(chat.remove_listener(token));
    peer.send("msg,chat,2");
    wait_until("second message", || chat.version() == 2).await;
    client.flush().await;

    assert_eq!(*removed.lock(), vec!["message 1 1".to_string()]);
    assert_eq!(
        *kept.lock(),
        vec!["message 1 1".to_string(), "message 2 2".to_string()]
    );
}

#[tokio::test]
async fn late_listener_is_hydrated_with_current_snapshot() {
    let (transport, mut server) = MemoryTransport::new();
    let client = Client::new(transport);
    let chat = client.register_topic("chat").unwrap();

    let peer = connect(&client, &mut server).await;
    peer.send(r#"conn,chat,{"users":2}"#);
    wait_until("hydration", || chat.is_subscribed()).await;

    let (seen, handlers) = recorder();
    chat.add_listener(handlers);
    assert_eq!(*seen.lock(), vec![r#"connection {"users":2}"#.to_string()]);
}

#[tokio::test]
async fn panicking_listener_does_not_block_others() {
    let (transport, mut server) = MemoryTransport::new();
    let client = Client::new(transport);
    let chat = client.register_topic("chat").unwrap();
    chat.add_listener(condux_client::Handlers::new().on_message(|_, _| panic!("listener bug")));
    let (seen, handlers) = recorder();
    chat.add_listener(handlers);

    let peer = connect(&client, &mut server).await;
    peer.send("msg,chat,true");
    peer.send("msg,chat,false");
    wait_until("both messages", || chat.version() == 2).await;
    client.flush().await;

    assert_eq!(
        *seen.lock(),
        vec!["message true true".to_string(), "message false false".to_string()]
    );
}

#[tokio::test]
async fn malformed_payload_becomes_error_event() {
    let (transport, mut server) = MemoryTransport::new();
    let client = Client::new(transport);
    let chat = client.register_topic("chat").unwrap();
    let (seen, handlers) = recorder();
    chat.add_listener(handlers);

    let peer = connect(&client, &mut server).await;
    peer.send("msg,chat,{not json");
    peer.send("msg,chat,3");
    wait_until("valid message after malformed one", || chat.version() == 1).await;
    client.flush().await;

    let expected_error = format!("error {}", json!({ "message": INVALID_PAYLOAD_MESSAGE }));
    assert_eq!(
        *seen.lock(),
        vec![expected_error, "message 3 3".to_string()]
    );
    assert_eq!(chat.data(), json!(3));
}

#[tokio::test]
async fn request_resolves_with_matching_response() {
    let (transport, mut server) = MemoryTransport::new();
    let client = Client::new(transport);
    let lookup = client.register_topic("lookup").unwrap();
    let (seen, handlers) = recorder();
    lookup.add_listener(handlers);
    let mut peer = connect(&client, &mut server).await;
    peer.drain();

    let pending = tokio::spawn({
        let lookup = lookup.clone();
        async move { lookup.request(json!({ "id": 7 })).await }
    });

    let frame = next_frame(&mut peer).await;
    let token = request_token(&frame, "lookup");
    assert!(frame.contains(r#""constraints":{"id":7}"#), "unexpected frame {frame}");

    peer.send(format!(
        "res,lookup,{}",
        json!({ "request_token": "someone-else", "rows": [] })
    ));
    peer.send(format!(
        "res,lookup,{}",
        json!({ "request_token": token, "rows": [1, 2] })
    ));

    let response = pending.await.unwrap().expect("request should resolve");
    assert_eq!(response, json!({ "request_token": token, "rows": [1, 2] }));

    client.flush().await;
    assert_eq!(seen.lock().len(), 2, "listeners see every response");
}

#[tokio::test]
async fn request_fails_on_matching_error_frame() {
    let (transport, mut server) = MemoryTransport::new();
    let client = Client::new(transport);
    let lookup = client.register_topic("lookup").unwrap();
    let mut peer = connect(&client, &mut server).await;
    peer.drain();

    let pending = tokio::spawn({
        let lookup = lookup.clone();
        async move { lookup.request(json!(null)).await }
    });
    let token = request_token(&next_frame(&mut peer).await, "lookup");
    peer.send(format!(
        "err,lookup,{}",
        json!({ "request_token": token, "message": "denied" })
    ));

    match pending.await.unwrap() {
        Err(ClientError::Remote { topic, payload }) => {
            assert_eq!(topic, "lookup");
            assert_eq!(payload["message"], "denied");
        }
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn request_before_connect_fails_without_writing() {
    let (transport, mut server) = MemoryTransport::new();
    let client = Client::new(transport);
    let lookup = client.register_topic("lookup").unwrap();

    let result = lookup.request(json!({ "id": 1 })).await;
    assert!(matches!(result, Err(ClientError::NotConnected(topic)) if topic == "lookup"));

    let mut peer = connect(&client, &mut server).await;
    assert_eq!(
        peer.drain(),
        vec![SYSTEM_SUBSCRIPTIONS[0], SYSTEM_SUBSCRIPTIONS[1], "sub,lookup"]
    );
}

#[tokio::test]
async fn request_times_out() {
    let (transport, mut server) = MemoryTransport::new();
    let client = Client::with_config(
        transport,
        ClientConfig::default().with_request_timeout(Some(Duration::from_millis(50))),
    );
    let lookup = client.register_topic("lookup").unwrap();
    let _peer = connect(&client, &mut server).await;

    let result = lookup.request(json!({})).await;
    assert!(matches!(result, Err(ClientError::Timeout(limit)) if limit == Duration::from_millis(50)));
}

#[tokio::test]
async fn pending_request_fails_when_connection_drops() {
    let (transport, mut server) = MemoryTransport::new();
    let client = Client::with_config(
        transport,
        ClientConfig::default().with_persistence(Persistence::disabled()),
    );
    let lookup = client.register_topic("lookup").unwrap();
    let mut peer = connect(&client, &mut server).await;
    peer.drain();

    let pending = tokio::spawn({
        let lookup = lookup.clone();
        async move { lookup.request(json!({})).await }
    });
    next_frame(&mut peer).await;
    peer.close("bye");

    assert!(matches!(pending.await.unwrap(), Err(ClientError::Disconnected)));
}

#[tokio::test]
async fn close_rejects_requests_and_unsubscribes() {
    let (transport, mut server) = MemoryTransport::new();
    let client = Client::new(transport);
    let chat = client.register_topic("chat").unwrap();
    let (seen, handlers) = recorder();
    chat.add_listener(handlers);
    let mut peer = connect(&client, &mut server).await;
    peer.drain();

    let pending = tokio::spawn({
        let chat = chat.clone();
        async move { chat.request(json!({})).await }
    });
    next_frame(&mut peer).await;

    chat.close();
    assert!(matches!(pending.await.unwrap(), Err(ClientError::ChannelClosed(topic)) if topic == "chat"));
    assert_eq!(next_frame(&mut peer).await, "uns,chat");
    assert_eq!(chat.status(), ChannelStatus::Closed);
    assert_eq!(chat.listener_count(), 0);
    assert!(matches!(
        chat.request(json!({})).await,
        Err(ClientError::ChannelClosed(_))
    ));

    client.flush().await;
    assert_eq!(*seen.lock(), vec!["close".to_string()]);

    let reopened = client.register_topic("chat").unwrap();
    assert!(!reopened.ptr_eq(&chat), "a closed channel is replaced");
    assert_eq!(next_frame(&mut peer).await, "sub,chat");
}

#[tokio::test]
async fn server_unsubscribe_destroys_channel() {
    let (transport, mut server) = MemoryTransport::new();
    let client = Client::new(transport);
    let chat = client.register_topic("chat").unwrap();
    let (seen, handlers) = recorder();
    chat.add_listener(handlers);
    let mut peer = connect(&client, &mut server).await;
    peer.drain();

    peer.send("uns,chat");
    wait_until("channel removal", || client.topic("chat").is_none()).await;
    client.flush().await;

    assert_eq!(*seen.lock(), vec!["close".to_string()]);
    assert_eq!(chat.status(), ChannelStatus::Closed);
    assert!(peer.drain().is_empty(), "server-initiated close is not echoed");

    let fresh = client.register_topic("chat").unwrap();
    assert!(!fresh.ptr_eq(&chat));
    assert_eq!(next_frame(&mut peer).await, "sub,chat");
}

#[tokio::test]
async fn frames_for_other_topics_do_not_leak() {
    let (transport, mut server) = MemoryTransport::new();
    let client = Client::new(transport);
    let chat = client.register_topic("chat").unwrap();
    let news = client.register_topic("news").unwrap();
    let (chat_seen, chat_handlers) = recorder();
    chat.add_listener(chat_handlers);

    let peer = connect(&client, &mut server).await;
    peer.send(r#"msg,news,"headline""#);
    peer.send(r#"msg,chat,"hello""#);
    wait_until("both topics updated", || chat.version() == 1 && news.version() == 1).await;
    client.flush().await;

    assert_eq!(news.data(), json!("headline"));
    assert_eq!(*chat_seen.lock(), vec![r#"message "hello" "hello""#.to_string()]);
}

#[tokio::test]
async fn panicking_update_function_is_contained_to_its_topic() {
    let (transport, mut server) = MemoryTransport::new();
    let client = Client::new(transport);
    let bad = client
        .register_topic_with(
            "bad",
            ChannelOptions::default().with_update(|_, _| panic!("merge bug")),
        )
        .unwrap();
    let good = client.register_topic("good").unwrap();
    let (seen, handlers) = recorder();
    bad.add_listener(handlers);

    let peer = connect(&client, &mut server).await;
    peer.send("msg,bad,1");
    peer.send("msg,good,1");
    wait_until("sibling topic still receives", || good.version() == 1).await;
    client.flush().await;

    assert!(client.is_connected());
    assert_eq!(good.data(), json!(1));
    assert_eq!(bad.version(), 0);
    assert_eq!(bad.data(), Value::Null);
    let expected_error = format!("error {}", json!({ "message": INVALID_PAYLOAD_MESSAGE }));
    assert_eq!(*seen.lock(), vec![expected_error]);

    peer.send("msg,bad,2");
    peer.send("msg,good,2");
    wait_until("reader survives repeated panics", || good.version() == 2).await;
}

#[tokio::test]
async fn panicking_hydrate_function_reports_error() {
    let (transport, mut server) = MemoryTransport::new();
    let client = Client::new(transport);
    let feed = client
        .register_topic_with(
            "feed",
            ChannelOptions::default().with_hydrate(|_| panic!("bad seed")),
        )
        .unwrap();
    let (seen, handlers) = recorder();
    feed.add_listener(handlers);

    let peer = connect(&client, &mut server).await;
    peer.send("conn,feed,{}");
    peer.send("msg,feed,3");
    wait_until("message after failed hydration", || feed.version() == 1).await;
    client.flush().await;

    assert_eq!(seen.lock().len(), 2);
    assert!(seen.lock()[0].starts_with("error "));
    assert_eq!(feed.status(), ChannelStatus::Subscribing);
}

#[tokio::test]
async fn update_function_may_read_its_own_channel() {
    let (transport, mut server) = MemoryTransport::new();
    let client = Client::new(transport);
    let own: Arc<OnceLock<Channel>> = Arc::default();
    let lookup = Arc::clone(&own);
    let counter = client
        .register_topic_with(
            "counter",
            ChannelOptions::default().with_update(move |_, message| {
                let seen = lookup.get().map(Channel::version).unwrap_or_default();
                json!({ "seen": seen, "last": message })
            }),
        )
        .unwrap();
    own.set(counter.clone()).unwrap();

    let peer = connect(&client, &mut server).await;
    peer.send("msg,counter,1");
    peer.send("msg,counter,2");
    wait_until("both updates applied", || counter.version() == 2).await;

    assert_eq!(counter.data(), json!({ "seen": 1, "last": 2 }));
}
