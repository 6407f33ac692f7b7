//! Ticket status workflow.
//!
//! Status moves only through explicit user actions:
//! Open -> In Progress -> Pending Confirmation -> Closed, with the raiser
//! able to bounce a pending ticket back to In Progress and a closed ticket
//! able to be reopened.

use crate::error::{Error, Result};
use crate::models::Ticket;
use crate::network::ApiClient;
use crate::roles::Capability;
use crate::session::SessionContext;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketStatus {
    #[serde(rename = "Open")]
    Open,
    #[serde(rename = "In Progress")]
    InProgress,
    #[serde(rename = "Pending Confirmation")]
    PendingConfirmation,
    #[serde(rename = "Closed")]
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "Open",
            TicketStatus::InProgress => "In Progress",
            TicketStatus::PendingConfirmation => "Pending Confirmation",
            TicketStatus::Closed => "Closed",
        }
    }

    pub fn apply(self, action: TicketAction) -> Result<TicketStatus> {
        use TicketAction::*;
        use TicketStatus::*;

        match (self, action) {
            (Open, Assign) => Ok(InProgress),
            // Reassigning an active ticket keeps it in progress.
            (InProgress, Assign) => Ok(InProgress),
            (InProgress, Resolve) => Ok(PendingConfirmation),
            (PendingConfirmation, ConfirmResolved) => Ok(Closed),
            (PendingConfirmation, RejectResolution) => Ok(InProgress),
            (Closed, Reopen) => Ok(Open),
            (from, action) => Err(Error::InvalidTransition { from, action }),
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketAction {
    Assign,
    Resolve,
    ConfirmResolved,
    RejectResolution,
    Reopen,
}

/// Whether `viewer` opening `ticket` should be asked to confirm resolution.
pub fn needs_confirmation(ticket: &Ticket, viewer: &str) -> bool {
    ticket.status == TicketStatus::PendingConfirmation && ticket.raised_by_id() == viewer
}

/// Ticket actions issued against the backend on behalf of the signed-in user.
#[derive(Clone)]
pub struct TicketWorkflow {
    api: Arc<ApiClient>,
    session: SessionContext,
}

impl TicketWorkflow {
    pub fn new(api: Arc<ApiClient>, session: SessionContext) -> Self {
        Self { api, session }
    }

    pub async fn fetch(&self, ticket_id: &str) -> Result<Ticket> {
        self.api.get_ticket(ticket_id).await
    }

    pub async fn raise(&self, title: &str, description: &str) -> Result<Ticket> {
        self.session.require(Capability::RaiseTicket)?;
        let user_id = self.session.user_id()?;
        if title.trim().is_empty() {
            return Err(Error::EmptyMessage);
        }
        let ticket = self.api.raise_ticket(title, description, &user_id).await?;
        tracing::info!("Ticket raised: id={}, by={}", ticket.id, user_id);
        Ok(ticket)
    }

    pub async fn assign(&self, ticket: &mut Ticket, assignee: &str) -> Result<()> {
        self.session.require(Capability::AssignTickets)?;
        let next = ticket.status.apply(TicketAction::Assign)?;
        *ticket = self.api.assign_ticket(&ticket.id, assignee).await?;
        if ticket.status != next {
            self.update_status(ticket, next).await?;
        }
        Ok(())
    }

    pub async fn resolve(&self, ticket: &mut Ticket) -> Result<()> {
        self.session.require(Capability::ResolveTickets)?;
        let next = ticket.status.apply(TicketAction::Resolve)?;
        self.update_status(ticket, next).await
    }

    /// The raiser's answer to "has this been resolved?".
    /// Yes closes the ticket, no sends it back to In Progress.
    pub async fn answer_confirmation(&self, ticket: &mut Ticket, resolved: bool) -> Result<()> {
        let user_id = self.session.user_id()?;
        let action = if resolved {
            TicketAction::ConfirmResolved
        } else {
            TicketAction::RejectResolution
        };
        let next = ticket.status.apply(action)?;
        if ticket.raised_by_id() != user_id {
            return Err(Error::Forbidden(Capability::RaiseTicket));
        }
        self.update_status(ticket, next).await
    }

    pub async fn reopen(&self, ticket: &mut Ticket) -> Result<()> {
        let user_id = self.session.user_id()?;
        if ticket.raised_by_id() != user_id {
            self.session.require(Capability::ResolveTickets)?;
        }
        let next = ticket.status.apply(TicketAction::Reopen)?;
        self.update_status(ticket, next).await
    }

    async fn update_status(&self, ticket: &mut Ticket, next: TicketStatus) -> Result<()> {
        let user_id = self.session.user_id()?;
        self.api
            .update_ticket_status(&ticket.id, next, &user_id)
            .await?;
        tracing::info!(
            "Ticket {} status {} -> {} by {}",
            ticket.id,
            ticket.status,
            next,
            user_id
        );
        ticket.status = next;
        Ok(())
    }
}
