//! `deyu chat` - interactive streaming chat
//!
//! Line-oriented REPL over a `CompletionSession`. Deltas of the answer being
//! streamed are printed as they arrive; Ctrl+C aborts the current answer.

use crate::config::AppConfig;
use anyhow::{Context, Result};
use deyu_chat::{
    agents, ApiClient, ChatMessage, CompletionSession, ConversationState, Feedback, NoticeLevel,
    Role,
};
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

const HELP: &str = "\
Commands:
  /regen            regenerate the last answer
  /replace <text>   replace the last question
  /more             load earlier messages
  /like, /dislike   rate the last answer
  /branch [n]       list alternate answers, or pick one
  /quit             exit";

/// A parsed REPL line
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Send(&'a str),
    Regenerate,
    Replace(&'a str),
    More,
    Rate(Feedback),
    Branch(Option<usize>),
    Help,
    Quit,
    Empty,
    Unknown(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Send(line);
    };

    let (name, arg) = command
        .split_once(char::is_whitespace)
        .map(|(n, a)| (n, a.trim()))
        .unwrap_or((command, ""));

    match name {
        "regen" => Input::Regenerate,
        "replace" if !arg.is_empty() => Input::Replace(arg),
        "more" => Input::More,
        "like" => Input::Rate(Feedback::Like),
        "dislike" => Input::Rate(Feedback::Dislike),
        "branch" if arg.is_empty() => Input::Branch(None),
        "branch" => match arg.parse() {
            Ok(n) => Input::Branch(Some(n)),
            Err(_) => Input::Unknown(line),
        },
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        _ => Input::Unknown(line),
    }
}

pub async fn run(
    config: AppConfig,
    conversation: Option<String>,
    deep_think: bool,
    model: Option<String>,
) -> Result<()> {
    let client = Arc::new(ApiClient::new(&config.api).context("Failed to create API client")?);

    let mut chat_config = config.chat.clone();
    if deep_think {
        chat_config = chat_config.with_deep_think(true);
    }
    if let Some(model) = model {
        if !agents::is_known_model(&model) {
            warn!("Unknown model {}, sending it anyway", model);
        }
        chat_config = chat_config.with_model(model);
    }

    let session = match conversation {
        Some(id) => {
            let session = CompletionSession::new(id, chat_config, client.clone(), client.clone());
            if let Err(e) = session.fetch_earlier().await {
                warn!("Failed to load history: {}", e);
            }
            session
        }
        None => {
            let created = client
                .create_conversation()
                .await
                .context("Failed to create conversation")?;
            CompletionSession::for_new_conversation(
                created.conversation_id,
                chat_config,
                client.clone(),
                client.clone(),
            )
            .on_conversations_changed(|| debug!("Conversation list changed"))
        }
    };
    let session = Arc::new(session);

    let snapshot = session.snapshot();
    println!("\nDeyu Chat");
    println!("{}", "-".repeat(40));
    println!("  Conversation: {}", session.conversation_id());
    println!(
        "  Model:        {}",
        snapshot.model_name().unwrap_or(snapshot.model())
    );
    println!();
    print_history(snapshot.messages());
    println!("{HELP}\n");

    let notice_task = {
        let mut notices = session.notices();
        tokio::spawn(async move {
            while let Ok(notice) = notices.recv().await {
                match notice.level {
                    NoticeLevel::Error => eprintln!("[!] {}", notice.message),
                    _ => eprintln!("[i] {}", notice.message),
                }
            }
        })
    };

    let interrupt_task = {
        let session = session.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                session.abort();
            }
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_input(&line) {
            Input::Empty => {}
            Input::Send(text) => stream_turn(&session, session.submit(text)).await,
            Input::Regenerate => {
                let s = session.clone();
                let started = stream_turn(&session, async move { s.regenerate().await }).await;
                if !started {
                    println!("Nothing to regenerate.");
                }
            }
            Input::Replace(text) => {
                let s = session.clone();
                let text = text.to_string();
                let started = stream_turn(&session, async move { s.replace(&text).await }).await;
                if !started {
                    println!("Nothing to replace.");
                }
            }
            Input::More => match session.fetch_earlier().await {
                Ok(0) => println!("No earlier messages."),
                Ok(count) => {
                    let state = session.snapshot();
                    print_history(&state.messages()[..count.min(state.messages().len())]);
                }
                Err(e) => warn!("Failed to load earlier messages: {}", e),
            },
            Input::Rate(feedback) => match session.snapshot().last_assistant_id() {
                Some(id) => {
                    session.handle_feedback(id, feedback, false).await;
                }
                None => println!("No answer to rate."),
            },
            Input::Branch(choice) => select_branch(&session, choice),
            Input::Help => println!("{HELP}"),
            Input::Quit => break,
            Input::Unknown(line) => println!("Unknown command: {line}"),
        }
    }

    session.abort();
    interrupt_task.abort();
    notice_task.abort();
    Ok(())
}

/// Drive `turn` while printing the streamed answer
async fn stream_turn<F, T>(session: &CompletionSession, turn: F) -> T
where
    F: Future<Output = T>,
{
    let mut updates = session.subscribe();
    updates.borrow_and_update();
    let mut printer = DeltaPrinter::default();

    let result = {
        let printing = async {
            while updates.changed().await.is_ok() {
                let state = updates.borrow_and_update().clone();
                printer.print(&state);
            }
        };
        tokio::pin!(turn);
        tokio::select! {
            result = &mut turn => result,
            _ = printing => turn.await,
        }
    };

    printer.print(&session.snapshot());
    if printer.printed_any() {
        println!();
    }
    result
}

/// Prints what was appended to the last assistant message since last time
#[derive(Debug, Default)]
struct DeltaPrinter {
    think: usize,
    content: usize,
}

impl DeltaPrinter {
    fn print(&mut self, state: &ConversationState) {
        let out = self.delta(state);
        if !out.is_empty() {
            print!("{out}");
            let _ = std::io::stdout().flush();
        }
    }

    fn delta(&mut self, state: &ConversationState) -> String {
        let Some(message) = state
            .messages()
            .last()
            .filter(|m| m.role == Role::Assistant)
        else {
            return String::new();
        };

        let mut out = String::new();
        if let Some(think) = &message.think {
            if let Some(new) = think.get(self.think..).filter(|s| !s.is_empty()) {
                if self.think == 0 {
                    out.push_str("[思考] ");
                }
                out.push_str(new);
                self.think = think.len();
            }
        }
        if let Some(new) = message.content.get(self.content..).filter(|s| !s.is_empty()) {
            if self.content == 0 && self.think > 0 {
                out.push('\n');
            }
            out.push_str(new);
            self.content = message.content.len();
        }
        out
    }

    fn printed_any(&self) -> bool {
        self.think > 0 || self.content > 0
    }
}

fn select_branch(session: &CompletionSession, choice: Option<usize>) {
    let state = session.snapshot();
    let branch = state.branch();
    if branch.is_empty() {
        println!("No alternate answers.");
        return;
    }

    match choice {
        None => {
            for (i, message) in branch.iter().enumerate() {
                let marker = if state.selected_branch() == Some(message.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{marker}{}. {}", i + 1, preview(&message.content));
            }
        }
        Some(n) => match n.checked_sub(1).and_then(|i| branch.get(i)) {
            Some(message) => {
                if session.select_branch(&message.id) {
                    println!("{}", message.content);
                }
            }
            None => println!("No alternate answer {n}."),
        },
    }
}

fn print_history(messages: &[ChatMessage]) {
    for message in messages {
        let who = match message.role {
            Role::User => "You",
            Role::Assistant => "Deyu",
        };
        println!("{who}: {}", message.content);
    }
    if !messages.is_empty() {
        println!();
    }
}

fn preview(text: &str) -> String {
    const MAX: usize = 40;
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(MAX).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deyu_chat::{MetaPayload, SendOptions};

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("  你好 "), Input::Send("你好"));
        assert_eq!(parse_input("/regen"), Input::Regenerate);
        assert_eq!(parse_input("/replace 换个问题"), Input::Replace("换个问题"));
        assert_eq!(parse_input("/replace"), Input::Unknown("/replace"));
        assert_eq!(parse_input("/branch"), Input::Branch(None));
        assert_eq!(parse_input("/branch 2"), Input::Branch(Some(2)));
        assert_eq!(parse_input("/dislike"), Input::Rate(Feedback::Dislike));
        assert_eq!(parse_input("/quit"), Input::Quit);
        assert_eq!(parse_input(""), Input::Empty);
        assert_eq!(parse_input("/nope"), Input::Unknown("/nope"));
    }

    #[test]
    fn test_delta_printer_follows_stream() {
        let mut state = ConversationState::new("c1", "deyu-default");
        state.prepare_turn(&SendOptions::default());
        state.push_user("你好");
        state.apply_meta(&MetaPayload {
            message_id: "a1".to_string(),
            reply_id: Some("u1".to_string()),
            ..Default::default()
        });

        let mut printer = DeltaPrinter::default();
        state.append_fragment(None, Some("想一想"));
        assert_eq!(printer.delta(&state), "[思考] 想一想");
        state.append_fragment(Some("你好"), None);
        assert_eq!(printer.delta(&state), "\n你好");
        state.append_fragment(Some("！"), None);
        assert_eq!(printer.delta(&state), "！");
        assert_eq!(printer.delta(&state), "");
        assert!(printer.printed_any());
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("短"), "短");
        assert_eq!(preview(&"长".repeat(50)), format!("{}...", "长".repeat(40)));
    }
}
