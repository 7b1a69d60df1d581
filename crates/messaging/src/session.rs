//! The session context object and its event loop.
//!
//! A [`ChatSession`] owns the connection manager and every component. It
//! runs as one task that processes user commands, timer fires and inbound
//! frames strictly one at a time, so no component needs a lock. Callers talk
//! to it through a cloneable [`SessionHandle`].

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use parley_config::AppConfig;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::connection::{
    AttemptOutcome, ConnectionEvent, ConnectionManager, ConnectionState, Connector, Credentials,
    EventHandler, SubscriptionId, TransportFrame,
};
use crate::entities::{Conversation, Message, UserRef};
use crate::services::{
    ConversationList, ConversationSummary, MessageStore, PresenceTracker, ReadReceiptReconciler,
    TypingCoordinator, TypingSignal,
};
use crate::timers::{timer_channel, TimerFired, TimerKey, TimerReceiver};
use crate::types::{
    ConversationId, EventKind, InboundEvent, MessageId, MessagingResult, NewMessagePayload,
    OutboundEvent, UserId,
};

type Reply<T> = oneshot::Sender<T>;

enum SessionCommand {
    Connect {
        credentials: Credentials,
        reply: Reply<MessagingResult<ConnectionState>>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    Shutdown {
        reply: Reply<()>,
    },
    Join {
        conversation_id: ConversationId,
        reply: Reply<()>,
    },
    Leave {
        conversation_id: ConversationId,
        reply: Reply<()>,
    },
    SendMessage {
        conversation_id: ConversationId,
        content: String,
        reply: Reply<MessagingResult<Message>>,
    },
    NotifyTyping {
        conversation_id: ConversationId,
        reply: Reply<()>,
    },
    NotifyStopped {
        conversation_id: ConversationId,
        reply: Reply<()>,
    },
    MarkViewed {
        conversation_id: ConversationId,
        reply: Reply<Vec<MessageId>>,
    },
    SeedConversations {
        conversations: Vec<Conversation>,
        reply: Reply<usize>,
    },
    SeedMessages {
        conversation_id: ConversationId,
        messages: Vec<Message>,
        reply: Reply<usize>,
    },
    Messages {
        conversation_id: ConversationId,
        reply: Reply<Vec<Message>>,
    },
    Summaries {
        reply: Reply<Vec<ConversationSummary>>,
    },
    Search {
        query: String,
        reply: Reply<Vec<ConversationSummary>>,
    },
    WhoIsTyping {
        conversation_id: ConversationId,
        reply: Reply<BTreeSet<UserId>>,
    },
    IsOnline {
        user_id: UserId,
        reply: Reply<bool>,
    },
    OnlineUsers {
        reply: Reply<BTreeSet<UserId>>,
    },
    State {
        reply: Reply<ConnectionState>,
    },
    Subscribe {
        kind: EventKind,
        handler: EventHandler,
        reply: Reply<SubscriptionId>,
    },
    Unsubscribe {
        kind: EventKind,
        id: SubscriptionId,
        reply: Reply<bool>,
    },
}

/// Cloneable front door to a running [`ChatSession`].
///
/// Every method fails with `SessionClosed` once the loop has ended.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> MessagingResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands.send(build(reply)).await?;
        Ok(response.await?)
    }

    /// Open the channel and wait for the first handshake to finish.
    /// Transport faults are reported through the returned state and `error`
    /// events, not as errors. Other calls are served while this one waits.
    pub async fn connect(&self, credentials: Credentials) -> MessagingResult<ConnectionState> {
        self.request(|reply| SessionCommand::Connect { credentials, reply })
            .await?
    }

    /// End the session: cancel all timers, drop the channel and every
    /// subscription. Idempotent.
    pub async fn disconnect(&self) -> MessagingResult<()> {
        self.request(|reply| SessionCommand::Disconnect { reply })
            .await
    }

    /// Disconnect and stop the event loop
    pub async fn shutdown(&self) -> MessagingResult<()> {
        self.request(|reply| SessionCommand::Shutdown { reply })
            .await
    }

    pub async fn join_conversation(&self, conversation_id: impl Into<ConversationId>) -> MessagingResult<()> {
        let conversation_id = conversation_id.into();
        self.request(|reply| SessionCommand::Join {
            conversation_id,
            reply,
        })
        .await
    }

    /// Leave a conversation. Its typing timers are cancelled; stored
    /// messages stay.
    pub async fn leave_conversation(&self, conversation_id: impl Into<ConversationId>) -> MessagingResult<()> {
        let conversation_id = conversation_id.into();
        self.request(|reply| SessionCommand::Leave {
            conversation_id,
            reply,
        })
        .await
    }

    /// Send a message optimistically. The returned copy carries its
    /// placeholder id until the server echo replaces it.
    pub async fn send_message(
        &self,
        conversation_id: impl Into<ConversationId>,
        content: impl Into<String>,
    ) -> MessagingResult<Message> {
        let conversation_id = conversation_id.into();
        let content = content.into();
        self.request(|reply| SessionCommand::SendMessage {
            conversation_id,
            content,
            reply,
        })
        .await?
    }

    pub async fn notify_typing(&self, conversation_id: impl Into<ConversationId>) -> MessagingResult<()> {
        let conversation_id = conversation_id.into();
        self.request(|reply| SessionCommand::NotifyTyping {
            conversation_id,
            reply,
        })
        .await
    }

    pub async fn notify_stopped(&self, conversation_id: impl Into<ConversationId>) -> MessagingResult<()> {
        let conversation_id = conversation_id.into();
        self.request(|reply| SessionCommand::NotifyStopped {
            conversation_id,
            reply,
        })
        .await
    }

    /// Flush the conversation's unread messages as one read-receipt batch.
    /// Returns the acknowledged ids.
    pub async fn mark_conversation_viewed(
        &self,
        conversation_id: impl Into<ConversationId>,
    ) -> MessagingResult<Vec<MessageId>> {
        let conversation_id = conversation_id.into();
        self.request(|reply| SessionCommand::MarkViewed {
            conversation_id,
            reply,
        })
        .await
    }

    pub async fn seed_conversations(&self, conversations: Vec<Conversation>) -> MessagingResult<usize> {
        self.request(|reply| SessionCommand::SeedConversations {
            conversations,
            reply,
        })
        .await
    }

    pub async fn seed_messages(
        &self,
        conversation_id: impl Into<ConversationId>,
        messages: Vec<Message>,
    ) -> MessagingResult<usize> {
        let conversation_id = conversation_id.into();
        self.request(|reply| SessionCommand::SeedMessages {
            conversation_id,
            messages,
            reply,
        })
        .await
    }

    pub async fn messages(&self, conversation_id: impl Into<ConversationId>) -> MessagingResult<Vec<Message>> {
        let conversation_id = conversation_id.into();
        self.request(|reply| SessionCommand::Messages {
            conversation_id,
            reply,
        })
        .await
    }

    pub async fn summaries(&self) -> MessagingResult<Vec<ConversationSummary>> {
        self.request(|reply| SessionCommand::Summaries { reply })
            .await
    }

    pub async fn search_summaries(&self, query: impl Into<String>) -> MessagingResult<Vec<ConversationSummary>> {
        let query = query.into();
        self.request(|reply| SessionCommand::Search { query, reply })
            .await
    }

    /// Remote users typing in the conversation, excluding the current user
    pub async fn who_is_typing(
        &self,
        conversation_id: impl Into<ConversationId>,
    ) -> MessagingResult<BTreeSet<UserId>> {
        let conversation_id = conversation_id.into();
        self.request(|reply| SessionCommand::WhoIsTyping {
            conversation_id,
            reply,
        })
        .await
    }

    pub async fn is_online(&self, user_id: impl Into<UserId>) -> MessagingResult<bool> {
        let user_id = user_id.into();
        self.request(|reply| SessionCommand::IsOnline { user_id, reply })
            .await
    }

    pub async fn online_users(&self) -> MessagingResult<BTreeSet<UserId>> {
        self.request(|reply| SessionCommand::OnlineUsers { reply })
            .await
    }

    pub async fn connection_state(&self) -> MessagingResult<ConnectionState> {
        self.request(|reply| SessionCommand::State { reply })
            .await
    }

    /// Subscribe to an event kind. Handlers run on the session loop and
    /// must not block.
    pub async fn on<F>(&self, kind: EventKind, handler: F) -> MessagingResult<SubscriptionId>
    where
        F: FnMut(&InboundEvent) + Send + 'static,
    {
        let handler: EventHandler = Box::new(handler);
        self.request(|reply| SessionCommand::Subscribe {
            kind,
            handler,
            reply,
        })
        .await
    }

    pub async fn off(&self, kind: EventKind, id: SubscriptionId) -> MessagingResult<bool> {
        self.request(|reply| SessionCommand::Unsubscribe { kind, id, reply })
            .await
    }
}

/// Owns all session state. Construct with [`ChatSession::spawn`].
pub struct ChatSession {
    id: String,
    current_user: UserRef,
    connection: ConnectionManager,
    presence: PresenceTracker,
    typing: TypingCoordinator,
    store: MessageStore,
    receipts: ReadReceiptReconciler,
    conversations: ConversationList,
    joined: BTreeSet<ConversationId>,
    pending_connect: Option<Reply<MessagingResult<ConnectionState>>>,
    commands: mpsc::Receiver<SessionCommand>,
    timers: TimerReceiver,
}

impl ChatSession {
    pub fn new(
        config: &AppConfig,
        current_user: UserRef,
        connector: Arc<dyn Connector>,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(config.session.command_buffer.max(1));
        let (timer_tx, timer_rx) = timer_channel();

        let session = Self {
            id: cuid2::create_id(),
            receipts: ReadReceiptReconciler::new(current_user.id.clone()),
            current_user,
            connection: ConnectionManager::new(connector, config, timer_tx.clone()),
            presence: PresenceTracker::new(),
            typing: TypingCoordinator::new(
                config.typing.idle_timeout(),
                config.typing.remote_expiry(),
                timer_tx,
            ),
            store: MessageStore::new(),
            conversations: ConversationList::new(),
            joined: BTreeSet::new(),
            pending_connect: None,
            commands: commands_rx,
            timers: timer_rx,
        };

        (session, SessionHandle { commands: commands_tx })
    }

    /// Build a session and run its loop on a new task
    pub fn spawn(
        config: &AppConfig,
        current_user: UserRef,
        connector: Arc<dyn Connector>,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (session, handle) = Self::new(config, current_user, connector);
        (handle, tokio::spawn(session.run()))
    }

    /// Run until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        let span = info_span!("session", session_id = %self.id, user_id = %self.current_user.id);
        async move {
            info!("session loop started");
            loop {
                tokio::select! {
                    command = self.commands.recv() => match command {
                        Some(command) => {
                            let stop = matches!(command, SessionCommand::Shutdown { .. });
                            self.handle_command(command);
                            if stop {
                                break;
                            }
                        }
                        None => {
                            debug!("all session handles dropped");
                            self.end_session();
                            break;
                        }
                    },
                    Some(fired) = self.timers.recv() => self.handle_timer(fired),
                    event = self.connection.next_event() => match event {
                        ConnectionEvent::Frame(frame) => self.handle_frame(frame),
                        ConnectionEvent::Attempt(outcome) => self.handle_attempt(outcome),
                    },
                }
            }
            info!("session loop stopped");
        }
        .instrument(span)
        .await
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect { credentials, reply } => {
                match self.connection.connect(credentials) {
                    Ok(ConnectionState::Connecting) => self.pending_connect = Some(reply),
                    result => {
                        let _ = reply.send(result);
                    }
                }
            }
            SessionCommand::Disconnect { reply } => {
                self.end_session();
                let _ = reply.send(());
            }
            SessionCommand::Shutdown { reply } => {
                self.end_session();
                let _ = reply.send(());
            }
            SessionCommand::Join {
                conversation_id,
                reply,
            } => {
                if self.joined.insert(conversation_id.clone()) {
                    self.connection.send(&OutboundEvent::join(conversation_id));
                }
                let _ = reply.send(());
            }
            SessionCommand::Leave {
                conversation_id,
                reply,
            } => {
                if let Some(stop) = self.typing.leave_conversation(&conversation_id) {
                    self.connection.send(&stop);
                }
                if self.joined.remove(&conversation_id) {
                    self.connection.send(&OutboundEvent::leave(conversation_id));
                }
                let _ = reply.send(());
            }
            SessionCommand::SendMessage {
                conversation_id,
                content,
                reply,
            } => {
                let _ = reply.send(self.send_message(conversation_id, content));
            }
            SessionCommand::NotifyTyping {
                conversation_id,
                reply,
            } => {
                if let Some(start) = self.typing.notify_typing(&conversation_id) {
                    self.connection.send(&start);
                }
                let _ = reply.send(());
            }
            SessionCommand::NotifyStopped {
                conversation_id,
                reply,
            } => {
                if let Some(stop) = self.typing.notify_stopped(&conversation_id) {
                    self.connection.send(&stop);
                }
                let _ = reply.send(());
            }
            SessionCommand::MarkViewed {
                conversation_id,
                reply,
            } => {
                let ids = self.receipts.pending_ids(&conversation_id);
                if let Some(batch) = self
                    .receipts
                    .mark_conversation_viewed(&conversation_id, &mut self.store)
                {
                    self.connection.send(&batch);
                }
                let _ = reply.send(ids);
            }
            SessionCommand::SeedConversations {
                conversations,
                reply,
            } => {
                let _ = reply.send(self.conversations.seed(conversations));
            }
            SessionCommand::SeedMessages {
                conversation_id,
                messages,
                reply,
            } => {
                let inserted = self.store.seed(&conversation_id, messages);
                for message in self.store.messages(&conversation_id) {
                    self.receipts.observe(&message);
                }
                if let Some(latest) = self.store.latest(&conversation_id) {
                    self.conversations.record_message(latest);
                }
                let _ = reply.send(inserted);
            }
            SessionCommand::Messages {
                conversation_id,
                reply,
            } => {
                let _ = reply.send(self.store.messages(&conversation_id));
            }
            SessionCommand::Summaries { reply } => {
                let _ = reply.send(self.conversations.summaries(
                    &self.store,
                    &self.receipts,
                    &self.presence,
                ));
            }
            SessionCommand::Search { query, reply } => {
                let _ = reply.send(self.conversations.search(
                    &query,
                    &self.store,
                    &self.receipts,
                    &self.presence,
                ));
            }
            SessionCommand::WhoIsTyping {
                conversation_id,
                reply,
            } => {
                let _ = reply.send(
                    self.typing
                        .who_is_typing(&conversation_id, &self.current_user.id),
                );
            }
            SessionCommand::IsOnline { user_id, reply } => {
                let _ = reply.send(self.presence.is_online(&user_id));
            }
            SessionCommand::OnlineUsers { reply } => {
                let _ = reply.send(self.presence.online_users());
            }
            SessionCommand::State { reply } => {
                let _ = reply.send(self.connection.state());
            }
            SessionCommand::Subscribe {
                kind,
                handler,
                reply,
            } => {
                let _ = reply.send(self.connection.on(kind, handler));
            }
            SessionCommand::Unsubscribe { kind, id, reply } => {
                let _ = reply.send(self.connection.off(kind, id));
            }
        }
    }

    fn send_message(
        &mut self,
        conversation_id: ConversationId,
        content: String,
    ) -> MessagingResult<Message> {
        let message = self.store.append_local_optimistic(
            &conversation_id,
            self.current_user.clone(),
            &content,
            Utc::now(),
        )?;

        if let Some(stop) = self.typing.notify_stopped(&conversation_id) {
            self.connection.send(&stop);
        }
        self.conversations.record_message(&message);
        self.connection
            .send(&OutboundEvent::send_message(conversation_id, content));
        Ok(message)
    }

    fn handle_timer(&mut self, fired: TimerFired) {
        match fired.key {
            TimerKey::Reconnect => {
                if let Some(state) = self.connection.on_timer(&fired) {
                    debug!(?state, "reconnect attempt started");
                }
            }
            TimerKey::TypingIdle(_) | TimerKey::TypingExpiry(..) => {
                if let Some(stop) = self.typing.on_timer(&fired) {
                    self.connection.send(&stop);
                }
            }
        }
    }

    fn handle_attempt(&mut self, outcome: AttemptOutcome) {
        let Some(state) = self.connection.on_attempt_finished(outcome) else {
            return;
        };
        // Rooms do not survive the old channel.
        if state == ConnectionState::Connected {
            self.rejoin();
        }
        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(Ok(state));
        }
    }

    fn rejoin(&mut self) {
        for conversation_id in &self.joined {
            self.connection.send(&OutboundEvent::join(conversation_id.clone()));
        }
        if !self.joined.is_empty() {
            info!(count = self.joined.len(), "rejoined conversations");
        }
    }

    fn handle_frame(&mut self, frame: TransportFrame) {
        match frame {
            TransportFrame::Text(text) => match InboundEvent::decode(&text) {
                // Connectivity is reported by the manager, never by the peer.
                Ok(event @ (InboundEvent::Connect | InboundEvent::Disconnect(_))) => {
                    warn!(event = event.kind().as_str(), "dropping server-sent lifecycle event");
                }
                Ok(event) => self.handle_event(event),
                Err(error) => warn!(%error, "dropping malformed event"),
            },
            TransportFrame::Closed { reason } => {
                self.connection.on_transport_lost(&reason);
            }
            TransportFrame::Failed { message } => {
                self.connection.on_transport_lost(&message);
            }
        }
    }

    /// Route one inbound event to its component, then to subscribers.
    fn handle_event(&mut self, event: InboundEvent) {
        if let InboundEvent::MessageNew(payload) = &event {
            if !self.apply_new_message(payload.clone()) {
                return;
            }
        }

        match &event {
            InboundEvent::PresenceOnline(payload) => self.presence.apply_online(&payload.user_id),
            InboundEvent::PresenceOffline(payload) => {
                self.presence.apply_offline(&payload.user_id)
            }
            InboundEvent::TypingSignal(payload) => self
                .typing
                .apply_remote_signal(TypingSignal::observed(payload.clone(), Instant::now())),
            InboundEvent::MessageRead(receipt) => {
                self.receipts.apply_read_receipt(receipt, &mut self.store);
            }
            InboundEvent::MessageNew(_)
            | InboundEvent::Connect
            | InboundEvent::Disconnect(_)
            | InboundEvent::Error(_) => {}
        }

        self.connection.dispatch(&event);
    }

    /// Store an inbound message. Returns `false` when it was dropped.
    fn apply_new_message(&mut self, payload: NewMessagePayload) -> bool {
        let mut message = payload.message;
        if message.conversation_id.is_empty() {
            message.conversation_id = payload.conversation_id;
        }
        if let Err(error) = message.validate_identity() {
            warn!(%error, message_id = %message.id, "dropping malformed message");
            return false;
        }

        let outcome = self.store.apply_remote(message.clone());
        if let Some(stored) = self.store.get(&message.id) {
            self.receipts.observe(stored);
        }
        if outcome.is_new() {
            self.conversations.record_message(&message);
        }
        if message.sender.id != self.current_user.id {
            self.typing
                .clear_remote(&message.conversation_id, &message.sender.id);
        }

        debug!(
            conversation_id = %message.conversation_id,
            message_id = %message.id,
            ?outcome,
            "message applied"
        );
        true
    }

    /// Terminal for the current session. Stored messages and conversations
    /// stay; everything tied to the live session goes.
    fn end_session(&mut self) {
        self.connection.disconnect();
        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(Ok(self.connection.state()));
        }
        self.typing.clear();
        self.presence.clear();
        self.joined.clear();
    }
}
