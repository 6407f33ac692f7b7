//! Transcript formatting

use chrono::{DateTime, Datelike, Local, Utc};
use iisppr_core::{DeliveryState, Entry, EntryState, Ticket};

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    format_relative(at, Local::now())
}

fn format_relative(at: DateTime<Utc>, now: DateTime<Local>) -> String {
    let local = at.with_timezone(&Local);

    if local.date_naive() == now.date_naive() {
        // Today - show time only
        local.format("%H:%M").to_string()
    } else if local.date_naive() == (now - chrono::Duration::days(1)).date_naive() {
        format!("Yesterday {}", local.format("%H:%M"))
    } else if local.year() == now.year() {
        local.format("%d %b %H:%M").to_string()
    } else {
        local.format("%d.%m.%Y").to_string()
    }
}

/// Ticks shown after outgoing messages.
pub fn delivery_ticks(entry: &Entry) -> &'static str {
    if entry.state == EntryState::Pending {
        return "…";
    }
    match entry.message.delivery {
        DeliveryState::Sent => "✓",
        DeliveryState::Delivered => "✓✓",
        DeliveryState::Seen => "✓✓ seen",
    }
}

pub fn format_entry(entry: &Entry, me: &str) -> String {
    let message = &entry.message;
    let time = format_timestamp(message.created_at);

    if message.sender == me {
        format!("[{}] you: {} {}", time, message.content, delivery_ticks(entry))
    } else {
        format!("[{}] {}: {}", time, message.sender, message.content)
    }
}

pub fn format_ticket(ticket: &Ticket) -> String {
    let assignee = ticket.assignee_id().unwrap_or("unassigned");
    format!(
        "Ticket {} \"{}\" [{}] raised by {}, assigned to {}",
        ticket.id,
        ticket.title,
        ticket.status,
        ticket.raised_by_id(),
        assignee
    )
}
