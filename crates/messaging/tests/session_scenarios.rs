//! End-to-end behaviour of a running session against an in-memory backend.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use parley_config::AppConfig;
use parley_messaging::connection::{ChannelHandle, PeerEnd};
use parley_messaging::{
    ChatSession, ConnectionState, Connector, Credentials, EventKind, InboundEvent,
    MessagingError, SessionHandle, TransportError, UserRef,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Default)]
struct FakeBackend {
    channels: Mutex<VecDeque<Result<ChannelHandle, TransportError>>>,
    opens: AtomicUsize,
    stall_when_drained: AtomicBool,
}

impl FakeBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn accept(&self) -> PeerEnd {
        let (handle, peer) = ChannelHandle::in_memory(32);
        self.channels.lock().unwrap().push_back(Ok(handle));
        peer
    }

    fn refuse(&self, error: TransportError) {
        self.channels.lock().unwrap().push_back(Err(error));
    }

    /// Once the queued results run out, handshakes never complete.
    fn stall_when_drained(&self) {
        self.stall_when_drained.store(true, Ordering::SeqCst);
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeBackend {
    async fn open(&self, _credentials: &Credentials) -> Result<ChannelHandle, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let next = self.channels.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None if self.stall_when_drained.load(Ordering::SeqCst) => {
                std::future::pending().await
            }
            None => Err(TransportError::network("backend unreachable")),
        }
    }
}

fn me() -> UserRef {
    UserRef::new("me", "Me", "me@example.org", "student")
}

fn user_json(id: &str) -> Value {
    json!({"_id": id, "name": id.to_uppercase(), "email": format!("{id}@example.org"), "role": "student"})
}

fn new_message_frame(id: &str, sender: &str, content: &str, second: u32) -> String {
    json!({
        "event": "message.new",
        "data": {
            "conversationId": "c1",
            "message": {
                "_id": id,
                "conversation": "c1",
                "sender": user_json(sender),
                "content": content,
                "readBy": [sender],
                "createdAt": format!("2024-05-01T10:00:{second:02}Z"),
                "updatedAt": format!("2024-05-01T10:00:{second:02}Z"),
            }
        }
    })
    .to_string()
}

fn start(config: AppConfig, backend: &Arc<FakeBackend>) -> SessionHandle {
    let connector: Arc<dyn Connector> = backend.clone();
    let (handle, _task) = ChatSession::spawn(&config, me(), connector);
    handle
}

async fn subscribe(handle: &SessionHandle, kind: EventKind) -> mpsc::UnboundedReceiver<InboundEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    handle
        .on(kind, move |event: &InboundEvent| {
            let _ = tx.send(event.clone());
        })
        .await
        .expect("session is running");
    rx
}

fn event_name(frame: &str) -> String {
    let value: Value = serde_json::from_str(frame).expect("outbound frames are json");
    value["event"].as_str().unwrap_or_default().to_string()
}

#[tokio::test(start_paused = true)]
async fn optimistic_send_is_replaced_by_server_echo() {
    let backend = FakeBackend::new();
    let mut peer = backend.accept();
    let session = start(AppConfig::default(), &backend);
    let mut arrivals = subscribe(&session, EventKind::MessageNew).await;

    session.connect(Credentials::new("token")).await.unwrap();
    let local = session.send_message("c1", "hello").await.unwrap();
    assert_eq!(local.id, "tmp-1");

    let sent: Value =
        serde_json::from_str(&peer.outbound_rx.recv().await.unwrap()).unwrap();
    assert_eq!(sent["event"], "message.send");
    assert_eq!(sent["data"], json!({"conversationId": "c1", "content": "hello"}));

    peer.push_text(new_message_frame("m-42", "me", "hello", 0)).await;
    arrivals.recv().await.expect("echo delivered");

    let messages = session.messages("c1").await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "m-42");
    assert!(!messages[0].is_pending());
}

#[tokio::test(start_paused = true)]
async fn replayed_and_out_of_order_messages_stay_sorted_and_unique() {
    let backend = FakeBackend::new();
    let peer = backend.accept();
    let session = start(AppConfig::default(), &backend);
    let mut arrivals = subscribe(&session, EventKind::MessageNew).await;
    session.connect(Credentials::new("token")).await.unwrap();

    for (id, second) in [("m3", 30), ("m1", 10), ("m3", 30), ("m2", 20), ("m1", 10)] {
        peer.push_text(new_message_frame(id, "b", "text", second)).await;
    }
    for _ in 0..5 {
        arrivals.recv().await.unwrap();
    }

    let ids: Vec<String> = session
        .messages("c1")
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec!["m1", "m2", "m3"]);
}

#[tokio::test(start_paused = true)]
async fn remote_typing_expires_after_window() {
    let backend = FakeBackend::new();
    let peer = backend.accept();
    let session = start(AppConfig::default(), &backend);
    let mut signals = subscribe(&session, EventKind::TypingSignal).await;
    session.connect(Credentials::new("token")).await.unwrap();

    peer.push_text(
        json!({"event": "typing.signal", "data": {"conversationId": "c1", "userId": "a", "isTyping": true}})
            .to_string(),
    )
    .await;
    signals.recv().await.unwrap();
    assert_eq!(
        session.who_is_typing("c1").await.unwrap(),
        BTreeSet::from(["a".to_string()])
    );

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(session.who_is_typing("c1").await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn local_typing_debounces_to_one_start_and_one_stop() {
    let backend = FakeBackend::new();
    let mut peer = backend.accept();
    let session = start(AppConfig::default(), &backend);
    session.connect(Credentials::new("token")).await.unwrap();

    for _ in 0..10 {
        session.notify_typing("c1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let last_keystroke = Instant::now() - Duration::from_millis(100);

    assert_eq!(event_name(&peer.outbound_rx.recv().await.unwrap()), "typing.start");
    assert_eq!(event_name(&peer.outbound_rx.recv().await.unwrap()), "typing.stop");
    assert!(last_keystroke.elapsed() >= Duration::from_secs(2));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(peer.outbound_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn viewing_a_conversation_acknowledges_unread_in_one_batch() {
    let backend = FakeBackend::new();
    let mut peer = backend.accept();
    let session = start(AppConfig::default(), &backend);
    let mut arrivals = subscribe(&session, EventKind::MessageNew).await;
    session.connect(Credentials::new("token")).await.unwrap();

    peer.push_text(new_message_frame("m1", "b", "one", 1)).await;
    peer.push_text(new_message_frame("m2", "b", "two", 2)).await;
    arrivals.recv().await.unwrap();
    arrivals.recv().await.unwrap();

    let acknowledged = session.mark_conversation_viewed("c1").await.unwrap();
    assert_eq!(acknowledged, vec!["m1".to_string(), "m2".to_string()]);

    let frame: Value = serde_json::from_str(&peer.outbound_rx.recv().await.unwrap()).unwrap();
    assert_eq!(frame["event"], "message.markRead");
    assert_eq!(frame["data"]["messageIds"], json!(["m1", "m2"]));
    assert!(peer.outbound_rx.try_recv().is_err());

    for message in session.messages("c1").await.unwrap() {
        assert!(message.is_read_by("me"));
    }
    assert!(session.mark_conversation_viewed("c1").await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn read_receipt_marks_own_message_seen() {
    let backend = FakeBackend::new();
    let peer = backend.accept();
    let session = start(AppConfig::default(), &backend);
    let mut arrivals = subscribe(&session, EventKind::MessageNew).await;
    let mut receipts = subscribe(&session, EventKind::MessageRead).await;
    session.connect(Credentials::new("token")).await.unwrap();

    peer.push_text(new_message_frame("m1", "me", "did you see this", 1)).await;
    arrivals.recv().await.unwrap();
    peer.push_text(
        json!({"event": "message.read", "data": {"messageIds": ["m1"], "userId": "b"}}).to_string(),
    )
    .await;
    receipts.recv().await.unwrap();

    let messages = session.messages("c1").await.unwrap();
    let participants = vec![me(), UserRef::new("b", "B", "b@example.org", "student")];
    assert!(messages[0].is_read_by("b"));
    assert!(messages[0].is_read_by("me"));
    assert!(messages[0].seen_by_recipients(&participants));
}

#[tokio::test(start_paused = true)]
async fn presence_follows_arrival_order_and_survives_bad_frames() {
    let backend = FakeBackend::new();
    let peer = backend.accept();
    let session = start(AppConfig::default(), &backend);
    let mut online = subscribe(&session, EventKind::PresenceOnline).await;
    session.connect(Credentials::new("token")).await.unwrap();

    peer.push_text(r#"{"event":"presence.online","data":{"userId":"u"}}"#).await;
    peer.push_text("definitely not json").await;
    peer.push_text(r#"{"event":"poll.vote","data":{}}"#).await;
    peer.push_text(r#"{"event":"presence.offline","data":{"userId":"u"}}"#).await;
    peer.push_text(r#"{"event":"presence.online","data":{"userId":"u"}}"#).await;
    online.recv().await.unwrap();
    online.recv().await.unwrap();

    assert!(session.is_online("u").await.unwrap());
    assert_eq!(
        session.online_users().await.unwrap(),
        BTreeSet::from(["u".to_string()])
    );
    assert_eq!(
        session.connection_state().await.unwrap(),
        ConnectionState::Connected
    );
}

#[tokio::test(start_paused = true)]
async fn reconnect_rejoins_and_reseeding_does_not_duplicate() {
    let backend = FakeBackend::new();
    let first = backend.accept();
    let mut second = backend.accept();
    let session = start(AppConfig::default(), &backend);
    let mut connects = subscribe(&session, EventKind::Connect).await;
    let mut disconnects = subscribe(&session, EventKind::Disconnect).await;

    session.connect(Credentials::new("token")).await.unwrap();
    connects.recv().await.unwrap();
    session.join_conversation("c1").await.unwrap();

    let backlog: Vec<parley_messaging::Message> = (1..=2)
        .map(|n| {
            serde_json::from_value(json!({
                "_id": format!("m{n}"),
                "sender": user_json("b"),
                "content": format!("message {n}"),
                "readBy": ["b", "me"],
                "createdAt": format!("2024-05-01T10:00:0{n}Z"),
            }))
            .unwrap()
        })
        .collect();
    assert_eq!(session.seed_messages("c1", backlog.clone()).await.unwrap(), 2);

    drop(first);
    disconnects.recv().await.expect("loss reported");
    assert_eq!(
        session.connection_state().await.unwrap(),
        ConnectionState::Disconnected
    );

    let lost_at = Instant::now();
    connects.recv().await.expect("reconnected");
    assert!(lost_at.elapsed() <= Duration::from_millis(500));
    assert_eq!(
        session.connection_state().await.unwrap(),
        ConnectionState::Connected
    );

    let rejoin: Value = serde_json::from_str(&second.outbound_rx.recv().await.unwrap()).unwrap();
    assert_eq!(rejoin["event"], "conversation.join");
    assert_eq!(rejoin["data"]["conversationId"], "c1");

    let mut refreshed = backlog;
    refreshed.push(
        serde_json::from_value(json!({
            "_id": "m3",
            "sender": user_json("b"),
            "content": "message 3",
            "readBy": ["b"],
            "createdAt": "2024-05-01T10:00:03Z",
        }))
        .unwrap(),
    );
    assert_eq!(session.seed_messages("c1", refreshed).await.unwrap(), 1);

    let ids: Vec<String> = session
        .messages("c1")
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec!["m1", "m2", "m3"]);
    assert_eq!(backend.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn rejected_handshake_reports_error_and_stays_down_when_retry_disabled() {
    let backend = FakeBackend::new();
    backend.refuse(TransportError::rejected("HTTP 401"));
    let mut config = AppConfig::default();
    config.reconnect.retry_rejected_handshake = false;
    let session = start(config, &backend);
    let mut errors = subscribe(&session, EventKind::Error).await;

    let state = session.connect(Credentials::new("expired")).await.unwrap();
    assert_eq!(state, ConnectionState::Disconnected);
    assert!(matches!(errors.recv().await, Some(InboundEvent::Error(_))));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(backend.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn rejected_handshake_retries_by_default() {
    let backend = FakeBackend::new();
    backend.refuse(TransportError::rejected("HTTP 403"));
    let _peer = backend.accept();
    let session = start(AppConfig::default(), &backend);
    let mut connects = subscribe(&session, EventKind::Connect).await;

    assert_eq!(
        session.connect(Credentials::new("token")).await.unwrap(),
        ConnectionState::Disconnected
    );
    connects.recv().await.expect("second attempt succeeds");
    assert_eq!(backend.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn second_connect_is_refused_and_disconnect_is_terminal() {
    let backend = FakeBackend::new();
    let _first = backend.accept();
    let _second = backend.accept();
    let session = start(AppConfig::default(), &backend);
    let mut connects = subscribe(&session, EventKind::Connect).await;

    session.connect(Credentials::new("token")).await.unwrap();
    assert!(matches!(
        session.connect(Credentials::new("token")).await,
        Err(MessagingError::AlreadyConnected)
    ));

    session.notify_typing("c1").await.unwrap();
    session.disconnect().await.unwrap();
    session.disconnect().await.unwrap();
    assert_eq!(
        session.connection_state().await.unwrap(),
        ConnectionState::Disconnected
    );

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(backend.opens(), 1);

    // Subscriptions went with the old session.
    assert!(connects.recv().await.is_some());
    assert!(connects.recv().await.is_none());

    assert_eq!(
        session.connect(Credentials::new("token")).await.unwrap(),
        ConnectionState::Connected
    );
}

#[tokio::test(start_paused = true)]
async fn leaving_cancels_typing_but_keeps_messages() {
    let backend = FakeBackend::new();
    let mut peer = backend.accept();
    let session = start(AppConfig::default(), &backend);
    let mut arrivals = subscribe(&session, EventKind::MessageNew).await;
    session.connect(Credentials::new("token")).await.unwrap();

    session.join_conversation("c1").await.unwrap();
    peer.push_text(new_message_frame("m1", "b", "hi", 1)).await;
    arrivals.recv().await.unwrap();
    session.notify_typing("c1").await.unwrap();
    session.leave_conversation("c1").await.unwrap();

    let names: Vec<String> = [
        peer.outbound_rx.recv().await.unwrap(),
        peer.outbound_rx.recv().await.unwrap(),
        peer.outbound_rx.recv().await.unwrap(),
        peer.outbound_rx.recv().await.unwrap(),
    ]
    .iter()
    .map(|f| event_name(f))
    .collect();
    assert_eq!(
        names,
        vec!["conversation.join", "typing.start", "typing.stop", "conversation.leave"]
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(peer.outbound_rx.try_recv().is_err(), "idle timer was cancelled");
    assert_eq!(session.messages("c1").await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn summaries_track_activity_unread_and_presence() {
    let backend = FakeBackend::new();
    let peer = backend.accept();
    let session = start(AppConfig::default(), &backend);
    let mut arrivals = subscribe(&session, EventKind::MessageNew).await;
    let mut online = subscribe(&session, EventKind::PresenceOnline).await;
    session.connect(Credentials::new("token")).await.unwrap();

    let conversations: Vec<parley_messaging::Conversation> = serde_json::from_value(json!([
        {"_id": "c1", "participants": [user_json("me"), user_json("b")], "updatedAt": "2024-05-01T09:00:00Z"},
        {"_id": "c2", "participants": [user_json("me"), user_json("d")], "updatedAt": "2024-05-01T09:30:00Z"}
    ]))
    .unwrap();
    assert_eq!(session.seed_conversations(conversations).await.unwrap(), 2);

    let before: Vec<String> = session
        .summaries()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.conversation.id)
        .collect();
    assert_eq!(before, vec!["c2", "c1"]);

    peer.push_text(new_message_frame("m1", "b", "ping", 5)).await;
    peer.push_text(r#"{"event":"presence.online","data":{"userId":"b"}}"#).await;
    arrivals.recv().await.unwrap();
    online.recv().await.unwrap();

    let summaries = session.summaries().await.unwrap();
    assert_eq!(summaries[0].conversation.id, "c1");
    assert_eq!(summaries[0].unread_count, 1);
    assert!(summaries[0].is_other_online);
    assert_eq!(summaries[1].unread_count, 0);

    let found = session.search_summaries("ping").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].conversation.id, "c1");
}

#[tokio::test(start_paused = true)]
async fn stalled_reconnect_does_not_hold_up_commands() {
    let backend = FakeBackend::new();
    let first = backend.accept();
    backend.stall_when_drained();
    let session = start(AppConfig::default(), &backend);
    let mut disconnects = subscribe(&session, EventKind::Disconnect).await;
    session.connect(Credentials::new("token")).await.unwrap();

    drop(first);
    disconnects.recv().await.expect("loss reported");
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(backend.opens(), 2);
    assert_eq!(
        session.connection_state().await.unwrap(),
        ConnectionState::Connecting
    );

    let started = Instant::now();
    let sent = tokio::time::timeout(Duration::from_secs(1), session.send_message("c1", "hi"))
        .await
        .expect("send is served while the handshake hangs");
    assert_eq!(sent.unwrap().id, "tmp-1");
    session.notify_typing("c1").await.unwrap();
    assert!(session.who_is_typing("c1").await.unwrap().is_empty());
    assert!(started.elapsed() < Duration::from_secs(1));

    tokio::time::timeout(Duration::from_secs(1), session.disconnect())
        .await
        .expect("disconnect is served while the handshake hangs")
        .unwrap();
    assert_eq!(
        session.connection_state().await.unwrap(),
        ConnectionState::Disconnected
    );

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(backend.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn messages_without_identity_are_dropped() {
    let backend = FakeBackend::new();
    let mut peer = backend.accept();
    let session = start(AppConfig::default(), &backend);
    let mut arrivals = subscribe(&session, EventKind::MessageNew).await;
    session.connect(Credentials::new("token")).await.unwrap();

    peer.push_text(new_message_frame("", "b", "ghost", 1)).await;
    peer.push_text(new_message_frame("m1", "", "anonymous", 2)).await;
    peer.push_text(
        json!({
            "event": "message.new",
            "data": {
                "conversationId": "",
                "message": {
                    "_id": "m2",
                    "sender": user_json("b"),
                    "content": "nowhere",
                    "createdAt": "2024-05-01T10:00:03Z",
                }
            }
        })
        .to_string(),
    )
    .await;
    peer.push_text(new_message_frame("m3", "b", "kept", 4)).await;

    match arrivals.recv().await {
        Some(InboundEvent::MessageNew(payload)) => assert_eq!(payload.message.id, "m3"),
        other => panic!("expected the valid message, got {other:?}"),
    }

    let ids: Vec<String> = session
        .messages("c1")
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec!["m3"]);
    assert!(session.messages("").await.unwrap().is_empty());
    assert_eq!(
        session.mark_conversation_viewed("c1").await.unwrap(),
        vec!["m3".to_string()]
    );
    assert_eq!(event_name(&peer.outbound_rx.recv().await.unwrap()), "message.markRead");
}

#[tokio::test(start_paused = true)]
async fn lifecycle_frames_from_the_server_are_ignored() {
    let backend = FakeBackend::new();
    let peer = backend.accept();
    let session = start(AppConfig::default(), &backend);
    let mut connects = subscribe(&session, EventKind::Connect).await;
    let mut disconnects = subscribe(&session, EventKind::Disconnect).await;
    let mut online = subscribe(&session, EventKind::PresenceOnline).await;
    session.connect(Credentials::new("token")).await.unwrap();
    connects.recv().await.expect("real connect announced");

    peer.push_text(r#"{"event":"disconnect","data":{"reason":"spoofed"}}"#).await;
    peer.push_text(r#"{"event":"connect"}"#).await;
    peer.push_text(r#"{"event":"presence.online","data":{"userId":"b"}}"#).await;
    online.recv().await.unwrap();

    assert!(connects.try_recv().is_err());
    assert!(disconnects.try_recv().is_err());
    assert_eq!(
        session.connection_state().await.unwrap(),
        ConnectionState::Connected
    );
}
