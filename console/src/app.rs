//! Conversation loop
//!
//! One task drives the view: stdin lines, channel events, the in-flight send
//! and the typing idle deadline are multiplexed with `tokio::select!`.

use crate::render;
use anyhow::Context;
use futures::future::BoxFuture;
use iisppr_core::{
    needs_confirmation, ConsoleClient, ConversationView, Message, PendingSend, Ticket,
    TicketWorkflow, ViewChange,
};
use tokio::io::{AsyncBufReadExt, BufReader};

enum Command {
    Quit,
    Seen,
    Answer(bool),
    Resolve,
    Reopen,
    Dismiss,
    Help,
    Draft(String),
    Send(String),
}

enum TicketCommand {
    Answer(bool),
    Resolve,
    Reopen,
}

fn parse_command(line: &str) -> Command {
    match line.trim() {
        "/quit" | "/q" => Command::Quit,
        "/seen" => Command::Seen,
        "/yes" => Command::Answer(true),
        "/no" => Command::Answer(false),
        "/resolve" => Command::Resolve,
        "/reopen" => Command::Reopen,
        "/dismiss" => Command::Dismiss,
        "/help" => Command::Help,
        _ => match line.strip_suffix('\\') {
            // A trailing backslash continues the draft on the next line.
            Some(partial) => Command::Draft(partial.to_string()),
            None => Command::Send(line.to_string()),
        },
    }
}

type SendRequest = BoxFuture<'static, iisppr_core::Result<Message>>;

/// Lines arrive whole, so any composed line counts as typing for the peer.
fn announces_typing(command: &Command) -> bool {
    match command {
        Command::Draft(_) => true,
        Command::Send(text) => !text.trim().is_empty(),
        _ => false,
    }
}

struct TicketContext {
    ticket: Ticket,
    workflow: TicketWorkflow,
}

pub async fn run_chat(client: &ConsoleClient, peer: &str) -> anyhow::Result<()> {
    let view = client.open_chat(peer)?;
    println!("Chat with {} (/help for commands)", peer);
    run(view, None).await
}

pub async fn run_ticket(client: &ConsoleClient, ticket_id: &str) -> anyhow::Result<()> {
    let workflow = client.tickets();
    let ticket = workflow
        .fetch(ticket_id)
        .await
        .with_context(|| format!("fetching ticket {}", ticket_id))?;
    let view = client.open_ticket_chat(ticket_id)?;

    println!("{}", render::format_ticket(&ticket));
    if needs_confirmation(&ticket, view.me()) {
        println!("Has this ticket been resolved? Answer /yes or /no");
    }
    run(view, Some(TicketContext { ticket, workflow })).await
}

async fn run(mut view: ConversationView, mut ticket: Option<TicketContext>) -> anyhow::Result<()> {
    if view.load_history().await.is_ok() {
        for entry in view.entries() {
            println!("{}", render::format_entry(entry, view.me()));
        }
    }
    show_banner(&view);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut draft = String::new();
    let mut in_flight: Option<(PendingSend, SendRequest)> = None;
    let mut seen_acknowledged = false;

    loop {
        let typing_deadline = view.typing_deadline();

        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                let command = parse_command(&line);
                if announces_typing(&command) {
                    view.keystroke();
                }
                match command {
                    Command::Quit => break,
                    Command::Help => print_help(),
                    Command::Dismiss => view.dismiss_error(),
                    Command::Seen => {
                        if let Err(e) = view.acknowledge_seen().await {
                            tracing::warn!("Mark seen failed: {}", e);
                        }
                        show_banner(&view);
                    }
                    Command::Answer(resolved) => {
                        ticket_action(&mut ticket, TicketCommand::Answer(resolved)).await;
                    }
                    Command::Resolve => ticket_action(&mut ticket, TicketCommand::Resolve).await,
                    Command::Reopen => ticket_action(&mut ticket, TicketCommand::Reopen).await,
                    Command::Draft(partial) => {
                        draft.push_str(&partial);
                        draft.push('\n');
                    }
                    Command::Send(text) => {
                        draft.push_str(&text);
                        let text = std::mem::take(&mut draft);
                        match view.begin_send(&text) {
                            Ok(pending) => {
                                let request: SendRequest = Box::pin(view.request_for(&pending));
                                if let Some(entry) = view.store().get(pending.local_id) {
                                    println!("{}", render::format_entry(entry, view.me()));
                                }
                                in_flight = Some((pending, request));
                            }
                            Err(e) if e.is_connectivity() => {
                                println!("! offline, draft kept until reconnected");
                                draft = text;
                            }
                            Err(e) => {
                                println!("! {}", e);
                                draft = text;
                            }
                        }
                    }
                }
            }

            result = async {
                match in_flight.as_mut() {
                    Some((_, request)) => request.await,
                    None => std::future::pending().await,
                }
            } => {
                if let Some((pending, _)) = in_flight.take() {
                    let local_id = pending.local_id;
                    if view.finish_send(pending, result).is_ok() {
                        if let Some(entry) = view.store().get(local_id) {
                            println!("{}", render::format_entry(entry, view.me()));
                        }
                    }
                    show_banner(&view);
                }
            }

            event = view.next_event() => {
                let Some(event) = event else {
                    break;
                };
                match view.handle_event(event) {
                    Some(ViewChange::ConnectionChanged(online)) => {
                        let state = if online { "online" } else { "offline, reconnecting" };
                        println!("-- {} --", state);
                        // Seen is acknowledged once per activation.
                        if online && !seen_acknowledged {
                            seen_acknowledged = true;
                            if let Err(e) = view.acknowledge_seen().await {
                                tracing::warn!("Mark seen failed: {}", e);
                            }
                        }
                    }
                    Some(ViewChange::MessageAdded(local_id)) => {
                        if let Some(entry) = view.store().get(local_id) {
                            println!("{}", render::format_entry(entry, view.me()));
                        }
                    }
                    Some(ViewChange::DeliveryChanged(ids)) => {
                        for entry in view.entries() {
                            if entry.message.id.as_ref().is_some_and(|id| ids.contains(id)) {
                                println!("{}", render::format_entry(entry, view.me()));
                            }
                        }
                    }
                    Some(ViewChange::TypingChanged { peer, typing }) => {
                        if typing {
                            println!("{} is typing…", peer);
                        }
                    }
                    None => {}
                }
            }

            _ = async {
                match typing_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            } => {
                view.poll_typing();
            }
        }
    }

    view.close().await;
    Ok(())
}

async fn ticket_action(ticket: &mut Option<TicketContext>, command: TicketCommand) {
    let Some(ctx) = ticket.as_mut() else {
        println!("! not a ticket conversation");
        return;
    };
    let before = ctx.ticket.status;
    let result = match command {
        TicketCommand::Answer(resolved) => {
            ctx.workflow
                .answer_confirmation(&mut ctx.ticket, resolved)
                .await
        }
        TicketCommand::Resolve => ctx.workflow.resolve(&mut ctx.ticket).await,
        TicketCommand::Reopen => ctx.workflow.reopen(&mut ctx.ticket).await,
    };
    match result {
        Ok(()) => println!("-- ticket {}: {} -> {} --", ctx.ticket.id, before, ctx.ticket.status),
        Err(e) => println!("! {}", e),
    }
}

fn show_banner(view: &ConversationView) {
    if let Some(message) = view.banner().message() {
        println!("! {} (/dismiss)", message);
    }
}

fn print_help() {
    println!("/seen      mark the conversation seen");
    println!("/yes /no   answer a resolution prompt");
    println!("/resolve   mark the ticket resolved");
    println!("/reopen    reopen a closed ticket");
    println!("/dismiss   hide the error banner");
    println!("/quit      leave");
    println!("end a line with \\ to keep composing");
    println!("any typed line tells the peer you are typing");
}
