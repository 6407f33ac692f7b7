//! One mounted conversation: a direct chat or a ticket thread.
//!
//! The view owns its message store, typing state and push channel. It is
//! driven from a single task: the owner awaits `next_event` and feeds the
//! result back through `handle_event`, interleaved with user input.

use crate::config::ClientConfig;
use crate::connection::{
    ChannelEvent, ConnectionHandle, ConnectionManager, Connector, WsConnector,
};
use crate::error::{Error, Result};
use crate::models::{ConversationKey, Message};
use crate::network::ApiClient;
use crate::protocol::{ClientEvent, ServerEvent, TypingNotice};
use crate::store::{Entry, LocalId, MessageStore, Reconciled};
use crate::typing::{PeerTyping, TypingEmitter};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Dismissible inline error.
#[derive(Debug, Clone, Default)]
pub struct ErrorBanner {
    message: Option<String>,
}

impl ErrorBanner {
    pub fn show(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    pub fn dismiss(&mut self) {
        self.message = None;
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_visible(&self) -> bool {
        self.message.is_some()
    }
}

/// What changed after handling a channel event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewChange {
    ConnectionChanged(bool),
    MessageAdded(LocalId),
    DeliveryChanged(Vec<String>),
    TypingChanged { peer: String, typing: bool },
}

/// An optimistic send waiting for its HTTP response.
#[derive(Debug)]
pub struct PendingSend {
    pub local_id: LocalId,
    pub content: String,
}

pub struct ConversationView {
    key: ConversationKey,
    me: String,
    api: Arc<ApiClient>,
    store: MessageStore,
    outbound_typing: TypingEmitter,
    peers_typing: PeerTyping,
    channel: Option<ConnectionHandle>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    banner: ErrorBanner,
    sending: bool,
}

impl ConversationView {
    /// Mounts a direct chat between `me` and `peer`.
    pub fn chat(me: &str, peer: &str, api: Arc<ApiClient>, config: &ClientConfig) -> Result<Self> {
        Self::open_with(WsConnector, ConversationKey::direct(me, peer), me, api, config)
    }

    /// Mounts the message thread of a ticket.
    pub fn ticket(
        me: &str,
        ticket_id: &str,
        api: Arc<ApiClient>,
        config: &ClientConfig,
    ) -> Result<Self> {
        Self::open_with(WsConnector, ConversationKey::ticket(ticket_id), me, api, config)
    }

    pub(crate) fn open_with<C: Connector>(
        connector: C,
        key: ConversationKey,
        me: &str,
        api: Arc<ApiClient>,
        config: &ClientConfig,
    ) -> Result<Self> {
        let url = config.ws_url()?;
        let joins = vec![ClientEvent::join(&key, me)];
        let (channel, events) =
            ConnectionManager::spawn(connector, url, joins, config.connection_settings());

        tracing::info!("Opened conversation {} for {}", key, me);

        Ok(Self {
            key,
            me: me.to_string(),
            api,
            store: MessageStore::new(config.dedup_window_ms),
            outbound_typing: TypingEmitter::new(config.typing_idle()),
            peers_typing: PeerTyping::new(),
            channel: Some(channel),
            events,
            banner: ErrorBanner::default(),
            sending: false,
        })
    }

    // ============= State =============

    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    pub fn me(&self) -> &str {
        &self.me
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.store.iter()
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.store.messages()
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn is_online(&self) -> bool {
        self.channel
            .as_ref()
            .map(ConnectionHandle::is_connected)
            .unwrap_or(false)
    }

    pub fn is_sending(&self) -> bool {
        self.sending
    }

    /// Sending is disabled while offline or while a send is in flight.
    pub fn can_send(&self) -> bool {
        self.is_online() && !self.sending
    }

    pub fn banner(&self) -> &ErrorBanner {
        &self.banner
    }

    pub fn dismiss_error(&mut self) {
        self.banner.dismiss();
    }

    pub fn is_peer_typing(&self) -> bool {
        self.peers_typing.any()
    }

    // ============= History =============

    pub async fn load_history(&mut self) -> Result<()> {
        let result = match &self.key {
            ConversationKey::Direct { .. } => {
                let peer = self.peer().to_string();
                self.api.chat_history(&self.me, &peer).await
            }
            ConversationKey::Ticket { ticket_id } => self.api.ticket_messages(ticket_id).await,
        };

        match result {
            Ok(messages) => {
                tracing::debug!("Loaded {} messages for {}", messages.len(), self.key);
                self.store.load_history(messages);
                Ok(())
            }
            Err(e) => {
                self.banner.show(format!("Could not load messages: {}", e));
                Err(e)
            }
        }
    }

    // ============= Sending =============

    /// Appends the optimistic entry. The caller performs the request from
    /// `request_for` and hands the outcome to `finish_send`.
    pub fn begin_send(&mut self, text: &str) -> Result<PendingSend> {
        let content = text.trim();
        if content.is_empty() {
            return Err(Error::EmptyMessage);
        }
        if self.sending {
            return Err(Error::SendInFlight);
        }
        if !self.is_online() {
            return Err(Error::Offline);
        }

        if let Some(stop) = self.outbound_typing.reset() {
            self.emit(ClientEvent::typing(&self.key, &self.me, stop));
        }

        let message = Message::optimistic(self.key.clone(), &self.me, content, Utc::now());
        let local_id = self.store.append_optimistic(message);
        self.sending = true;

        Ok(PendingSend {
            local_id,
            content: content.to_string(),
        })
    }

    /// The HTTP request for a pending send, detached from the view so it can
    /// run while channel events keep being handled.
    pub fn request_for(
        &self,
        pending: &PendingSend,
    ) -> impl Future<Output = Result<Message>> + Send + 'static {
        let api = self.api.clone();
        let key = self.key.clone();
        let me = self.me.clone();
        let content = pending.content.clone();

        async move {
            match &key {
                ConversationKey::Direct { .. } => {
                    let peer = key.peer_of(&me).unwrap_or_default().to_string();
                    api.send_chat(&me, &peer, &content).await
                }
                ConversationKey::Ticket { ticket_id } => {
                    api.send_ticket_message(ticket_id, &me, &content).await
                }
            }
        }
    }

    pub fn finish_send(&mut self, pending: PendingSend, result: Result<Message>) -> Result<()> {
        self.sending = false;

        match result {
            Ok(server) => {
                self.store.confirm(pending.local_id, server.clone());
                self.emit(ClientEvent::send_message(&server, &self.me));
                Ok(())
            }
            Err(e) => match self.store.fail(pending.local_id) {
                Some(failed) => {
                    tracing::warn!("Send failed, rolled back {:?}: {}", failed.local_id, e);
                    self.banner.show(format!("Message not sent: {}", e));
                    Err(e)
                }
                None => {
                    // The server echo already confirmed it.
                    tracing::debug!("Send request failed after echo: {}", e);
                    Ok(())
                }
            },
        }
    }

    pub async fn send(&mut self, text: &str) -> Result<()> {
        let pending = self.begin_send(text)?;
        let result = self.request_for(&pending).await;
        self.finish_send(pending, result)
    }

    // ============= Typing =============

    pub fn keystroke(&mut self) {
        let signal = self.outbound_typing.keystroke(Instant::now());
        self.emit(ClientEvent::typing(&self.key, &self.me, signal));
    }

    /// Emits `stopTyping` once the composer has been idle long enough.
    pub fn poll_typing(&mut self) -> bool {
        match self.outbound_typing.poll(Instant::now()) {
            Some(signal) => {
                self.emit(ClientEvent::typing(&self.key, &self.me, signal));
                true
            }
            None => false,
        }
    }

    pub fn typing_deadline(&self) -> Option<Instant> {
        self.outbound_typing.deadline()
    }

    // ============= Seen =============

    /// Called once per activation. Marks the conversation seen when its most
    /// recent inbound message is unseen.
    pub async fn acknowledge_seen(&mut self) -> Result<bool> {
        let unseen = self
            .store
            .latest_inbound(&self.me)
            .map(|m| !m.seen())
            .unwrap_or(false);
        if !unseen {
            return Ok(false);
        }

        if !self.key.is_ticket() {
            let peer = self.peer().to_string();
            if let Err(e) = self.api.mark_seen(&peer, &self.me).await {
                self.banner.show(format!("Could not mark messages seen: {}", e));
                return Err(e);
            }
        }

        let changed = self.store.mark_inbound_seen(&self.me);
        tracing::debug!("Marked {} messages seen in {}", changed, self.key);
        Ok(true)
    }

    // ============= Channel =============

    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    pub fn handle_event(&mut self, event: ChannelEvent) -> Option<ViewChange> {
        match event {
            ChannelEvent::Connected => Some(ViewChange::ConnectionChanged(true)),
            ChannelEvent::Disconnected => Some(ViewChange::ConnectionChanged(false)),
            ChannelEvent::ConnectError(e) => {
                tracing::debug!("{}: connect error: {}", self.key, e);
                None
            }
            ChannelEvent::Server(event) => self.handle_server_event(event),
        }
    }

    fn handle_server_event(&mut self, event: ServerEvent) -> Option<ViewChange> {
        match event {
            ServerEvent::NewTicketMessage(mut dto) => {
                if dto.ticket_id.is_empty() {
                    if let ConversationKey::Ticket { ticket_id } = &self.key {
                        dto.ticket_id = ticket_id.clone();
                    }
                }
                self.receive(ServerEvent::NewTicketMessage(dto))
            }
            event @ ServerEvent::NewMessage(_) => self.receive(event),
            ServerEvent::Typing(notice) => self.peer_typing(notice, true),
            ServerEvent::StopTyping(notice) => self.peer_typing(notice, false),
            ServerEvent::MessageDelivered { message_ids } => {
                let changed: Vec<String> = message_ids
                    .into_iter()
                    .filter(|id| self.store.mark_delivered(id))
                    .collect();
                (!changed.is_empty()).then_some(ViewChange::DeliveryChanged(changed))
            }
            ServerEvent::MessageSeen { message_ids } => {
                let changed: Vec<String> = message_ids
                    .into_iter()
                    .filter(|id| self.store.mark_seen(id))
                    .collect();
                (!changed.is_empty()).then_some(ViewChange::DeliveryChanged(changed))
            }
            ServerEvent::Unknown(name) => {
                tracing::debug!("Ignoring {} event", name);
                None
            }
        }
    }

    fn peer_typing(&mut self, notice: TypingNotice, typing: bool) -> Option<ViewChange> {
        if !notice.concerns(&self.key, &self.me) {
            return None;
        }
        let changed = if typing {
            self.peers_typing.start(&notice.from)
        } else {
            self.peers_typing.stop(&notice.from)
        };
        changed.then_some(ViewChange::TypingChanged {
            peer: notice.from,
            typing,
        })
    }

    fn receive(&mut self, event: ServerEvent) -> Option<ViewChange> {
        let message = match event.into_message()? {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("Dropping pushed message: {}", e);
                return None;
            }
        };
        if message.conversation != self.key {
            return None;
        }

        self.peers_typing.message_from(&message.sender);
        match self.store.reconcile(message) {
            Reconciled::Appended(local_id) => Some(ViewChange::MessageAdded(local_id)),
            Reconciled::Duplicate(_) => None,
        }
    }

    fn emit(&self, event: ClientEvent) {
        if let Some(channel) = &self.channel {
            if let Err(e) = channel.emit(event) {
                tracing::debug!("Dropped emit while offline: {}", e);
            }
        }
    }

    fn peer(&self) -> &str {
        self.key.peer_of(&self.me).unwrap_or_default()
    }

    /// Unmount: closes the channel and cancels any pending reconnect.
    pub async fn close(mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
        self.store.clear();
        self.peers_typing.clear();
        tracing::info!("Closed conversation {}", self.key);
    }
}
