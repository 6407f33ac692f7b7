//! IISPPR Console Core Library
//!
//! Real-time messaging layer of the IISPPR internship console.
//! Provides: optimistic message sync, push channel, typing and read receipts,
//! ticket workflow, and role capabilities.

pub mod config;
pub mod connection;
pub mod conversation;
pub mod delivery;
pub mod error;
pub mod models;
pub mod network;
pub mod protocol;
pub mod roles;
pub mod session;
pub mod store;
pub mod ticket;
pub mod typing;

use std::sync::Arc;

pub use config::ClientConfig;
pub use conversation::{ConversationView, ErrorBanner, PendingSend, ViewChange};
pub use delivery::DeliveryState;
pub use error::{Error, Result};
pub use models::{ConversationKey, Message, Ticket, UserRef};
pub use network::ApiClient;
pub use roles::{Capability, Role};
pub use session::{Session, SessionContext};
pub use store::{Entry, EntryState, LocalId, MessageStore};
pub use ticket::{needs_confirmation, TicketAction, TicketStatus, TicketWorkflow};

/// Main client instance
pub struct ConsoleClient {
    config: ClientConfig,
    session: SessionContext,
    api: Arc<ApiClient>,
}

impl ConsoleClient {
    pub fn new(config: ClientConfig, session: SessionContext) -> Result<Self> {
        let api = Arc::new(ApiClient::new(&config, session.clone())?);
        Ok(Self {
            config,
            session,
            api,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn api(&self) -> Arc<ApiClient> {
        self.api.clone()
    }

    /// Mount a direct chat with `peer`
    pub fn open_chat(&self, peer: &str) -> Result<ConversationView> {
        self.session.require(Capability::UseChat)?;
        let me = self.session.user_id()?;
        ConversationView::chat(&me, peer, self.api.clone(), &self.config)
    }

    /// Mount a ticket's message thread
    pub fn open_ticket_chat(&self, ticket_id: &str) -> Result<ConversationView> {
        self.session.require(Capability::UseChat)?;
        let me = self.session.user_id()?;
        ConversationView::ticket(&me, ticket_id, self.api.clone(), &self.config)
    }

    pub fn tickets(&self) -> TicketWorkflow {
        TicketWorkflow::new(self.api.clone(), self.session.clone())
    }
}
