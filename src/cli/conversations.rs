//! `deyu conversations` - conversation management

use crate::config::AppConfig;
use anyhow::{Context, Result};
use clap::Subcommand;
use deyu_chat::{ApiClient, Conversation};

#[derive(Subcommand, Debug)]
pub enum ConversationCommands {
    /// List all conversations
    List,
    /// Search conversations by keyword
    Search {
        /// Keyword
        key: String,
    },
    /// Rename a conversation
    Rename {
        /// Conversation id
        id: String,
        /// New title
        title: String,
    },
    /// Delete a conversation
    Delete {
        /// Conversation id
        id: String,
    },
}

pub async fn run(config: AppConfig, cmd: ConversationCommands) -> Result<()> {
    let client = ApiClient::new(&config.api).context("Failed to create API client")?;
    let page_size = config.chat.page_size;

    match cmd {
        ConversationCommands::List => {
            let conversations = client
                .all_conversations(page_size)
                .await
                .context("Failed to list conversations")?;
            print_conversations(&conversations);
        }
        ConversationCommands::Search { key } => {
            let page = client
                .search_conversations(&key, None, page_size)
                .await
                .context("Failed to search conversations")?;
            print_conversations(&page.conversations);
            if page.has_more {
                println!("(more results not shown)");
            }
        }
        ConversationCommands::Rename { id, title } => {
            client
                .rename_conversation(&id, &title)
                .await
                .context("Failed to rename conversation")?;
            println!("Renamed {id} to {title}");
        }
        ConversationCommands::Delete { id } => {
            client
                .delete_conversation(&id)
                .await
                .context("Failed to delete conversation")?;
            println!("Deleted {id}");
        }
    }
    Ok(())
}

fn print_conversations(conversations: &[Conversation]) {
    if conversations.is_empty() {
        println!("No conversations.");
        return;
    }
    for conversation in conversations {
        println!("{}", format_row(conversation));
    }
}

fn format_row(conversation: &Conversation) -> String {
    let title = if conversation.brief.is_empty() {
        "新对话"
    } else {
        conversation.brief.as_str()
    };
    format!("{:<24} {}", conversation.conversation_id, title)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untitled_row() {
        let row = format_row(&Conversation {
            conversation_id: "c1".to_string(),
            ..Default::default()
        });
        assert!(row.starts_with("c1"));
        assert!(row.ends_with("新对话"));
    }
}
