//! End-to-end session behavior against a scripted transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use taskchat_client::{
    ChatError, ChatHandle, ChatSession, ChatState, ConnectError, DisconnectReason, EventKind,
    EventSink, SessionEvent, SessionStatus, StaticCredentials, Transport, TransportEvent,
};
use taskchat_shared::{ChatMessage, ClientCommand, MessageType};

#[derive(Default)]
struct MockState {
    sent: Vec<ClientCommand>,
    handshakes: usize,
    connected: bool,
    fail_connect: Option<String>,
}

#[derive(Default)]
struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    fn sent(&self) -> Vec<ClientCommand> {
        self.state.lock().unwrap().sent.clone()
    }

    fn handshakes(&self) -> usize {
        self.state.lock().unwrap().handshakes
    }

    fn fail_next_connect(&self, reason: &str) {
        self.state.lock().unwrap().fail_connect = Some(reason.to_string());
    }

    fn joins_for(&self, room_id: &str) -> usize {
        self.sent()
            .iter()
            .filter(|cmd| {
                matches!(cmd, ClientCommand::JoinRoom { room_id: r } if r == room_id)
            })
            .count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _credential: &str) -> Result<(), ConnectError> {
        self.state.lock().unwrap().handshakes += 1;
        // Keep the attempt in flight long enough for concurrent callers
        // to observe it.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = state.fail_connect.take() {
            return Err(ConnectError(reason));
        }
        state.connected = true;
        Ok(())
    }

    fn disconnect(&self) {
        self.state.lock().unwrap().connected = false;
    }

    fn send(&self, command: ClientCommand) {
        self.state.lock().unwrap().sent.push(command);
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }
}

struct Harness {
    session: Arc<ChatSession>,
    transport: Arc<MockTransport>,
    /// The sink the session handed to the transport factory; tests use
    /// it to play the adapter's role.
    sink: EventSink,
}

fn harness_with_token(token: Option<&str>) -> Harness {
    let transport = Arc::new(MockTransport::default());
    let credentials = Arc::new(match token {
        Some(token) => StaticCredentials::new(token),
        None => StaticCredentials::none(),
    });

    let captured: Arc<Mutex<Option<EventSink>>> = Arc::new(Mutex::new(None));
    let session = ChatSession::new(credentials, {
        let transport = transport.clone();
        let captured = captured.clone();
        move |sink| {
            *captured.lock().unwrap() = Some(sink);
            transport as Arc<dyn Transport>
        }
    });
    let sink = captured.lock().unwrap().clone().expect("sink captured");

    Harness {
        session,
        transport,
        sink,
    }
}

fn harness() -> Harness {
    harness_with_token(Some("jwt-token"))
}

fn inbound_message(room_id: &str) -> ChatMessage {
    ChatMessage {
        id: uuid_ish(),
        room_id: room_id.to_string(),
        sender_id: "user-9".to_string(),
        sender_name: Some("other".to_string()),
        body: "hi".to_string(),
        message_type: MessageType::Text,
        created_at: chrono::Utc::now(),
    }
}

fn uuid_ish() -> String {
    use std::sync::atomic::AtomicU64;
    static NEXT: AtomicU64 = AtomicU64::new(0);
    format!("msg-{}", NEXT.fetch_add(1, Ordering::SeqCst))
}

// --- connect ---

#[tokio::test]
async fn connect_without_credential_fails_fast() {
    let h = harness_with_token(None);

    let result = h.session.connect().await;

    assert_eq!(result, Err(ChatError::AuthenticationMissing));
    assert!(!h.session.is_connected());
    assert_eq!(h.transport.handshakes(), 0);
}

#[tokio::test]
async fn concurrent_connects_share_one_handshake() {
    let h = harness();

    let (a, b) = tokio::join!(h.session.connect(), h.session.connect());
    assert_eq!(a, Ok(()));
    assert_eq!(b, Ok(()));
    assert_eq!(h.transport.handshakes(), 1);

    // Already connected: still no second handshake.
    assert_eq!(h.session.connect().await, Ok(()));
    assert_eq!(h.transport.handshakes(), 1);
}

#[tokio::test]
async fn concurrent_connects_share_the_failure() {
    let h = harness();
    h.transport.fail_next_connect("401 unauthorized");

    let (a, b) = tokio::join!(h.session.connect(), h.session.connect());

    assert_eq!(
        a,
        Err(ChatError::HandshakeFailed("401 unauthorized".to_string()))
    );
    assert_eq!(
        b,
        Err(ChatError::HandshakeFailed("401 unauthorized".to_string()))
    );
    assert_eq!(h.transport.handshakes(), 1);
    assert_eq!(h.session.status(), SessionStatus::Disconnected);
}

#[tokio::test]
async fn failed_handshake_emits_error_and_does_not_retry() {
    let h = harness();
    let errors = Arc::new(AtomicUsize::new(0));
    {
        let errors = errors.clone();
        h.session.on(EventKind::Error, move |_| {
            errors.fetch_add(1, Ordering::SeqCst);
        });
    }
    h.transport.fail_next_connect("refused");

    let result = h.session.connect().await;

    assert!(matches!(result, Err(ChatError::HandshakeFailed(_))));
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(h.transport.handshakes(), 1);
}

// --- disconnect ---

#[tokio::test]
async fn disconnect_is_immediate_and_clears_rooms() {
    let h = harness();
    h.session.connect().await.unwrap();
    h.session.join_room("task-1").unwrap();

    let reasons = Arc::new(Mutex::new(Vec::new()));
    {
        let reasons = reasons.clone();
        h.session.on(EventKind::Disconnected, move |event| {
            if let SessionEvent::Disconnected { reason } = event {
                reasons.lock().unwrap().push(reason.clone());
            }
        });
    }

    h.session.disconnect();

    // Synchronous effect: an observer polling right away sees it.
    assert_eq!(h.session.status(), SessionStatus::Disconnected);
    assert!(h.session.joined_rooms().is_empty());
    assert_eq!(reasons.lock().unwrap().as_slice(), [DisconnectReason::Client]);
    // No leave frames were sent for the cleared rooms.
    assert_eq!(h.transport.sent().len(), 1);

    // The session is re-enterable.
    assert_eq!(h.session.connect().await, Ok(()));
    assert!(h.session.is_connected());
}

#[tokio::test]
async fn commands_while_disconnected_never_reach_the_transport() {
    let h = harness();

    assert_eq!(h.session.send_message("task-1", "hello"), Err(ChatError::NotConnected));
    assert_eq!(h.session.send_typing("task-1"), Err(ChatError::NotConnected));
    assert_eq!(h.session.send_stop_typing("task-1"), Err(ChatError::NotConnected));
    assert_eq!(
        h.session.mark_messages_read("task-1", vec!["m1".to_string()]),
        Err(ChatError::NotConnected)
    );
    assert_eq!(h.session.join_room("task-1"), Err(ChatError::NotConnected));

    assert!(h.transport.sent().is_empty());
}

// --- commands ---

#[tokio::test]
async fn send_message_validates_body() {
    let h = harness();
    h.session.connect().await.unwrap();

    assert_eq!(h.session.send_message("task-1", "   "), Err(ChatError::EmptyMessage));
    let oversized = "x".repeat(2001);
    assert_eq!(
        h.session.send_message("task-1", &oversized),
        Err(ChatError::MessageTooLong)
    );

    h.session.send_message("task-1", "  hello  ").unwrap();
    assert_eq!(
        h.transport.sent(),
        vec![ClientCommand::SendMessage {
            room_id: "task-1".to_string(),
            body: "hello".to_string(),
            message_type: MessageType::Text,
        }]
    );
}

#[tokio::test]
async fn read_receipt_batch_is_forwarded_as_given() {
    let h = harness();
    h.session.connect().await.unwrap();

    let ids = vec!["m1".to_string(), "m2".to_string(), "m3".to_string()];
    h.session.mark_messages_read("task-1", ids.clone()).unwrap();

    assert_eq!(
        h.transport.sent(),
        vec![ClientCommand::MarkRead {
            room_id: "task-1".to_string(),
            message_ids: ids,
        }]
    );
}

#[tokio::test]
async fn join_room_is_idempotent() {
    let h = harness();
    h.session.connect().await.unwrap();

    h.session.join_room("task-1").unwrap();
    h.session.join_room("task-1").unwrap();

    assert_eq!(h.transport.joins_for("task-1"), 1);
    assert_eq!(h.session.joined_rooms(), vec!["task-1".to_string()]);
}

// --- reconnection ---

#[tokio::test]
async fn reconnect_replays_joins_in_insertion_order() {
    let h = harness();
    h.session.connect().await.unwrap();
    h.session.join_room("task-3").unwrap();
    h.session.join_room("task-1").unwrap();
    h.session.join_room("task-2").unwrap();
    h.session.join_room("task-1").unwrap(); // duplicate, must not replay twice

    // Readiness must be announced only after the joins are replayed.
    let joins_at_connected = Arc::new(Mutex::new(None));
    {
        let joins_at_connected = joins_at_connected.clone();
        let transport = h.transport.clone();
        h.session.on(EventKind::Connected, move |_| {
            *joins_at_connected.lock().unwrap() = Some(transport.sent().len());
        });
    }

    let before = h.transport.sent().len();
    (h.sink)(TransportEvent::Disconnected {
        reason: DisconnectReason::Dropped("server closed".to_string()),
    });
    assert_eq!(h.session.status(), SessionStatus::Reconnecting);

    (h.sink)(TransportEvent::Connected);
    assert!(h.session.is_connected());

    let replayed: Vec<ClientCommand> = h.transport.sent().split_off(before);
    assert_eq!(
        replayed,
        vec![
            ClientCommand::JoinRoom { room_id: "task-3".to_string() },
            ClientCommand::JoinRoom { room_id: "task-1".to_string() },
            ClientCommand::JoinRoom { room_id: "task-2".to_string() },
        ]
    );
    assert_eq!(joins_at_connected.lock().unwrap().unwrap(), before + 3);
    // Exactly one replay each, even for the double-joined room.
    assert_eq!(h.transport.joins_for("task-1"), 2);
}

#[tokio::test]
async fn recoverable_drop_is_not_an_error() {
    let h = harness();
    h.session.connect().await.unwrap();

    (h.sink)(TransportEvent::Disconnected {
        reason: DisconnectReason::Dropped("server closed".to_string()),
    });

    assert_eq!(h.session.status(), SessionStatus::Reconnecting);
    assert_eq!(h.session.last_error(), None);
}

#[tokio::test]
async fn rejected_drop_surfaces_a_distinguished_error() {
    let h = harness();
    h.session.connect().await.unwrap();

    (h.sink)(TransportEvent::Disconnected {
        reason: DisconnectReason::Rejected("forced disconnect".to_string()),
    });

    assert_eq!(h.session.status(), SessionStatus::Disconnected);
    assert!(matches!(
        h.session.last_error(),
        Some(taskchat_client::ErrorEvent::ConnectionLost { .. })
    ));
}

#[tokio::test]
async fn drop_events_after_client_disconnect_are_ignored() {
    let h = harness();
    h.session.connect().await.unwrap();
    h.session.disconnect();

    (h.sink)(TransportEvent::Disconnected {
        reason: DisconnectReason::Dropped("late teardown".to_string()),
    });

    assert_eq!(h.session.status(), SessionStatus::Disconnected);
    assert_eq!(h.session.last_error(), None);
}

// --- dispatcher surface ---

#[tokio::test]
async fn deregistered_handler_stops_receiving() {
    let h = harness();
    let count = Arc::new(AtomicUsize::new(0));
    let id = {
        let count = count.clone();
        h.session.on(EventKind::Message, move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    };

    (h.sink)(TransportEvent::Message(inbound_message("task-1")));
    assert_eq!(count.load(Ordering::SeqCst), 1);

    h.session.off(id);
    (h.sink)(TransportEvent::Message(inbound_message("task-1")));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

// --- consumer adapter ---

#[tokio::test]
async fn handle_scenario_drop_and_auto_rejoin() {
    let h = harness();
    let chat = ChatHandle::new(h.session.clone());

    chat.connect().await.unwrap();
    assert!(chat.is_connected());
    assert!(!chat.is_connecting());

    chat.join_room("task-42").unwrap();

    (h.sink)(TransportEvent::Disconnected {
        reason: DisconnectReason::Dropped("server closed".to_string()),
    });
    assert!(!chat.is_connected());
    // Not every disconnect is an error.
    assert_eq!(chat.error(), None);

    (h.sink)(TransportEvent::Connected);
    assert!(chat.is_connected());
    // Rejoined without a second explicit join_room call.
    assert_eq!(h.transport.joins_for("task-42"), 2);
}

#[tokio::test]
async fn handle_clears_error_on_successful_connect() {
    let h = harness();
    let chat = ChatHandle::new(h.session.clone());

    h.transport.fail_next_connect("refused");
    assert!(chat.connect().await.is_err());
    assert!(chat.error().is_some());

    chat.connect().await.unwrap();
    assert_eq!(chat.error(), None);
}

#[tokio::test]
async fn handle_counts_unread_for_unfocused_rooms() {
    let h = harness();
    let chat = ChatHandle::new(h.session.clone());
    chat.connect().await.unwrap();

    chat.set_focused_room(Some("task-1".to_string()));

    (h.sink)(TransportEvent::Message(inbound_message("task-1")));
    (h.sink)(TransportEvent::Message(inbound_message("task-2")));
    (h.sink)(TransportEvent::Message(inbound_message("task-2")));

    assert_eq!(chat.unread_count(), 2);

    chat.reset_unread();
    assert_eq!(chat.unread_count(), 0);
}

#[tokio::test]
async fn snapshot_mirrors_the_observable_state() {
    let h = harness();
    let chat = ChatHandle::new(h.session.clone());

    assert_eq!(
        chat.snapshot(),
        ChatState {
            is_connected: false,
            is_connecting: false,
            error: None,
            unread_count: 0,
        }
    );

    chat.connect().await.unwrap();
    (h.sink)(TransportEvent::Message(inbound_message("task-1")));

    assert_eq!(
        chat.snapshot(),
        ChatState {
            is_connected: true,
            is_connecting: false,
            error: None,
            unread_count: 1,
        }
    );
}

#[tokio::test]
async fn dropped_handle_leaves_no_subscriptions() {
    let h = harness();
    let chat = ChatHandle::new(h.session.clone());
    chat.connect().await.unwrap();
    drop(chat);

    // No dangling handler is left to observe these.
    (h.sink)(TransportEvent::Message(inbound_message("task-1")));
    (h.sink)(TransportEvent::Disconnected {
        reason: DisconnectReason::Dropped("late".to_string()),
    });

    // A fresh handle derives its state from the session, not from the
    // dropped one's subscriptions.
    let chat = ChatHandle::new(h.session.clone());
    assert_eq!(chat.unread_count(), 0);
}
