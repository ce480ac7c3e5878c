//! Interactive chat terminal.
//!
//! A thin frontend over `ChannelSession`: stdin lines go in, session events
//! and rendered bubbles come out. Already-printed bubbles are never
//! reprinted; the session's append-only log makes that safe. While the
//! socket is down the loop polls the store on the resync interval, so
//! reading and sending keep working in degraded mode.

use std::collections::HashMap;
use std::io::BufRead;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::client::{ApiClient, ChannelEvent, ChannelSession, LinkState, LogEntry};
use crate::config::CanalConfig;
use crate::error::ChannelError;
use crate::models::{ChannelIdentity, SenderType};

const HELP: &str = "[canal: commands]
  /list          conversation list with unread badges (operator)
  /open <id>     open a conversation
  /close         leave the current conversation
  /older         load one more page of history
  /clear         hide the visible history (new messages still appear)
  /unhide        reveal hidden history again
  /badge         show the unread badge count
  /bg, /fg       simulate background/foreground transitions
  /quit          exit
anything else is sent as a message into the open conversation";

/// How many bubbles of each conversation are already on the terminal.
type Printed = HashMap<i64, usize>;

pub async fn chat_command(config: &CanalConfig, identity_override: Option<String>) -> Result<()> {
    let (client_config, identity) = super::client_setup(config, identity_override)?;
    let api = ApiClient::new(&client_config, identity);
    let mut session = ChannelSession::new(api, client_config.page_size);
    let mut printed = Printed::new();

    eprintln!("[canal: connecting as {}]", identity);
    match session.connect().await {
        Ok(()) => {}
        Err(ChannelError::Authentication(reason)) => {
            eprintln!("[canal: authentication failed: {}]", reason);
            return Ok(());
        }
        Err(e) => {
            eprintln!("[canal: relay unreachable ({}), running degraded]", e);
        }
    }

    // Psychologists have exactly one channel; open it right away.
    if let ChannelIdentity::Psychologist(_) = identity {
        match session.api().my_conversation().await {
            Ok(own) => {
                if let Err(e) = session.open_conversation(own.id).await {
                    eprintln!("[canal: could not load history: {}]", e);
                }
                sync_active(&mut printed, &mut session);
            }
            Err(e) => eprintln!("[canal: could not open channel: {}]", e),
        }
    } else {
        eprintln!("[canal: /list shows your conversations, /help lists commands]");
    }

    // Blocking stdin reader thread; dies with the process.
    let (input_tx, mut input_rx) = mpsc::channel::<String>(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if input_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    let mut events = session.subscribe();
    let mut poll = tokio::time::interval(client_config.resync_interval);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            maybe_line = input_rx.recv() => {
                let Some(line) = maybe_line else { break };
                if handle_line(&mut printed, &mut session, line.trim()).await {
                    break;
                }
            }

            maybe_event = events.next() => {
                let Some(event) = maybe_event else { break };
                match session.handle_event(event.clone()).await {
                    Ok(()) => render_event(&mut printed, &mut session, &event),
                    Err(ChannelError::Superseded) => {
                        eprintln!("[canal: this channel was opened elsewhere - closing]");
                        break;
                    }
                    Err(e) => eprintln!("[canal: {}]", e),
                }
            }

            _ = poll.tick() => {
                maintain(&mut printed, &mut session).await;
            }
        }
    }

    eprintln!("[canal: bye]");
    Ok(())
}

/// Handle one line of input. Returns true when the loop should end.
async fn handle_line(printed: &mut Printed, session: &mut ChannelSession, line: &str) -> bool {
    if line.is_empty() {
        return false;
    }

    let Some(rest) = line.strip_prefix('/') else {
        send_line(printed, session, line).await;
        return false;
    };

    let mut parts = rest.split_whitespace();
    match parts.next() {
        Some("quit") | Some("q") => return true,
        Some("help") => println!("{}", HELP),

        Some("list") => match session.api().list_conversations().await {
            Ok(summaries) if summaries.is_empty() => {
                println!("[canal: no conversations yet]");
            }
            Ok(summaries) => {
                for s in summaries {
                    let badge = if session.is_unread(s.id) { " *" } else { "" };
                    println!(
                        "  #{} psychologist:{} - {}{}",
                        s.id,
                        s.psychologist_id,
                        s.last_message.as_deref().unwrap_or("(empty)"),
                        badge
                    );
                }
            }
            Err(e) => eprintln!("[canal: {}]", e),
        },

        Some("open") => match parts.next().and_then(|v| v.parse::<i64>().ok()) {
            Some(id) => match session.open_conversation(id).await {
                Ok(()) => redraw(printed, session),
                Err(e) => eprintln!("[canal: {}]", e),
            },
            None => eprintln!("[canal: usage: /open <conversation-id>]"),
        },

        Some("close") => {
            session.close_conversation();
            println!("[canal: conversation closed]");
        }

        Some("older") => match session.active() {
            Some(id) => match session.load_older(id).await {
                Ok(0) => println!("[canal: no older messages]"),
                Ok(n) => {
                    println!("[canal: loaded {} older message(s)]", n);
                    redraw(printed, session);
                }
                Err(e) => eprintln!("[canal: {}]", e),
            },
            None => eprintln!("[canal: open a conversation first]"),
        },

        Some("clear") => {
            let Some(id) = session.active() else {
                eprintln!("[canal: open a conversation first]");
                return false;
            };
            if let Some(view) = session.active_view_mut() {
                view.clear();
            }
            printed.insert(id, 0);
            println!("[canal: history hidden - new messages still appear]");
        }

        Some("unhide") => {
            if let Some(view) = session.active_view_mut() {
                view.unclear();
                redraw(printed, session);
            }
        }

        Some("badge") => println!("[canal: {} unread conversation(s)]", session.badge_count()),

        Some("bg") => {
            let _ = session.set_foreground(false).await;
            println!("[canal: backgrounded - read receipts paused]");
        }

        Some("fg") => match session.set_foreground(true).await {
            Ok(()) => {
                println!("[canal: foregrounded]");
                sync_active(printed, session);
            }
            Err(e) => eprintln!("[canal: {}]", e),
        },

        _ => eprintln!("[canal: unknown command - /help]"),
    }
    false
}

async fn send_line(printed: &mut Printed, session: &mut ChannelSession, line: &str) {
    let Some(conversation_id) = session.active() else {
        eprintln!("[canal: open a conversation first (/list, /open <id>)]");
        return;
    };
    match session.send_message(conversation_id, line.to_string()).await {
        Ok(_) => sync_active(printed, session),
        Err(ChannelError::Persistence(reason)) => {
            eprintln!("[canal: message not sent ({}) - type it again to retry]", reason);
        }
        Err(e) => eprintln!("[canal: {}]", e),
    }
}

fn render_event(printed: &mut Printed, session: &mut ChannelSession, event: &ChannelEvent) {
    match event {
        ChannelEvent::Connected { .. } => {
            eprintln!("[canal: online]");
            sync_active(printed, session);
        }
        ChannelEvent::MessageReceived(message) => {
            if session.active() == Some(message.conversation_id) {
                sync_active(printed, session);
            } else if session.identity() == ChannelIdentity::Admin {
                eprintln!(
                    "[canal: new message in conversation {} (badge: {})]",
                    message.conversation_id,
                    session.badge_count()
                );
            }
        }
        ChannelEvent::StatusUpdated { message_id, status } => {
            // Echo the transition only if it actually applied to something
            // on screen; stale downgrades stay silent.
            let applied = session.active_view().is_some_and(|view| {
                view.visible()
                    .iter()
                    .any(|e| e.message.id == Some(*message_id) && e.message.status == *status)
            });
            if applied {
                eprintln!("[canal: message {} {}]", message_id, status);
            }
        }
        ChannelEvent::LinkDown { reason } => {
            eprintln!("[canal: offline ({}), retrying in the background]", reason);
        }
        ChannelEvent::Superseded => {}
    }
}

/// Degraded-mode tick: try to get the socket back, and failing that keep
/// the views fresh over plain REST.
async fn maintain(printed: &mut Printed, session: &mut ChannelSession) {
    match session.link_state() {
        LinkState::Online => {}
        LinkState::Closed => {
            // First dial never came up; try again. The Connected event
            // will run the resync.
            if session.connect().await.is_err() {
                poll_store(printed, session).await;
            }
        }
        LinkState::Degraded => poll_store(printed, session).await,
    }
}

async fn poll_store(printed: &mut Printed, session: &mut ChannelSession) {
    match session.resync().await {
        Ok(()) => sync_active(printed, session),
        Err(e) => eprintln!("[canal: store unreachable ({})]", e),
    }
}

/// Print the bubbles that have not been printed yet.
fn sync_active(printed: &mut Printed, session: &mut ChannelSession) {
    let Some(conversation_id) = session.active() else {
        return;
    };
    let own = session.identity().sender_type();
    let Some(view) = session.active_view_mut() else {
        return;
    };
    // The terminal is always scrolled to the newest line anyway.
    let _ = view.take_scroll();

    let lines: Vec<String> = view.visible().iter().map(|e| bubble_line(e, own)).collect();
    let count = printed.entry(conversation_id).or_insert(0);
    if *count > lines.len() {
        *count = 0;
    }
    for line in &lines[*count..] {
        println!("{}", line);
    }
    *count = lines.len();
}

/// Reprint the whole visible window, for commands that change it at the top.
fn redraw(printed: &mut Printed, session: &mut ChannelSession) {
    if let Some(id) = session.active() {
        println!("[canal: conversation {}]", id);
        printed.insert(id, 0);
    }
    sync_active(printed, session);
}

fn bubble_line(entry: &LogEntry, own: SenderType) -> String {
    let who = if entry.message.sender_type == own {
        "you"
    } else {
        entry.message.sender_type.as_str()
    };
    if entry.pending {
        format!("  {:>12} | {} (sending...)", who, entry.message.content)
    } else if entry.message.sender_type == own {
        format!(
            "  {:>12} | {} [{}]",
            who, entry.message.content, entry.message.status
        )
    } else {
        format!("  {:>12} | {}", who, entry.message.content)
    }
}
