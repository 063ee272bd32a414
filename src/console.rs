//! Line-based console front end for `lampctl serve`
//!
//! Stands in for a chat integration and an observer at once: viewer chat
//! lines go to the effect orchestrator, JSON lines go to the hub.

use std::io::BufRead;

use async_trait::async_trait;
use lamp_control::catalog::parse_chat_command;
use lamp_control::{ChatAdapter, ChatError, Privileges, ViewerRequest};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const LINE_QUEUE: usize = 64;

/// Prints chat replies to stdout
pub struct ConsoleChat;

#[async_trait]
impl ChatAdapter for ConsoleChat {
    async fn send_reply(&self, text: &str) -> Result<(), ChatError> {
        println!("[chat] {text}");
        Ok(())
    }
}

/// One parsed stdin line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    /// `name[+mod,vip,sub]: !lamp <command>`
    Viewer(ViewerRequest),
    /// Raw observer command, passed to the hub as-is
    Observer(String),
}

/// Parse a console line. Chat lines that are not lamp commands are ignored.
pub fn parse_console_line(line: &str) -> Option<ConsoleInput> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line.starts_with('{') {
        return Some(ConsoleInput::Observer(line.to_string()));
    }

    let (who, message) = line.split_once(':')?;
    let command = parse_chat_command(message)?;

    let (name, roles) = match who.trim().split_once('+') {
        Some((name, roles)) => (name.trim(), roles),
        None => (who.trim(), ""),
    };
    if name.is_empty() {
        return None;
    }

    let mut privileges = Privileges::default();
    for role in roles.split(',').map(str::trim) {
        match role.to_ascii_lowercase().as_str() {
            "mod" | "moderator" => privileges.moderator = true,
            "vip" => privileges.vip = true,
            "sub" | "subscriber" => privileges.subscriber = true,
            _ => {}
        }
    }

    Some(ConsoleInput::Viewer(ViewerRequest {
        requester: name.to_lowercase(),
        display_name: name.to_string(),
        privileges,
        command,
    }))
}

/// Read lines from `input` on a dedicated thread.
///
/// A read blocked on the terminal never holds up runtime shutdown. The
/// channel closes at EOF or on the first read error.
pub fn spawn_line_reader<R>(input: R) -> std::io::Result<mpsc::Receiver<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(LINE_QUEUE);
    std::thread::Builder::new()
        .name("console-reader".into())
        .spawn(move || {
            for line in input.lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Console read failed: {}", e);
                        break;
                    }
                }
            }
            debug!("Console reader stopped");
        })?;
    Ok(rx)
}
