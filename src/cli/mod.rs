//! CLI module for Deyu
//!
//! Provides commands:
//! - `chat`: interactive streaming chat
//! - `conversations`: list, search, rename and delete conversations
//! - `listen`: voice input from the default microphone
//! - `login` / `set-password`: account access
//! - `config`: print the effective configuration

use clap::{Parser, Subcommand};

pub mod chat;
pub mod conversations;
pub mod listen;
pub mod login;
pub mod show_config;

/// Deyu assistant CLI
#[derive(Parser, Debug)]
#[command(name = "deyu")]
#[command(about = "Moral-education assistant client")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Interactive chat
    Chat {
        /// Continue an existing conversation
        #[arg(short, long)]
        conversation: Option<String>,
        /// Ask for reasoning output
        #[arg(long)]
        deep_think: bool,
        /// Agent model
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Manage conversations
    #[command(subcommand)]
    Conversations(conversations::ConversationCommands),
    /// Voice input from the default microphone
    Listen,
    /// Log in and print the token
    Login {
        /// Phone number or account name
        auth_id: String,
        /// Log in with a password instead of an SMS code
        #[arg(short, long)]
        password: bool,
        /// SMS code or password; prompted for when missing
        #[arg(long)]
        code: Option<String>,
    },
    /// Set the account password
    SetPassword,
    /// Print the effective configuration
    Config,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let Some(command) = cli.command else {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        cmd.print_help()?;
        println!();
        return Ok(());
    };

    let config = crate::config::load_config()?;
    match command {
        Commands::Chat {
            conversation,
            deep_think,
            model,
        } => chat::run(config, conversation, deep_think, model).await,
        Commands::Conversations(cmd) => conversations::run(config, cmd).await,
        Commands::Listen => listen::run(config).await,
        Commands::Login {
            auth_id,
            password,
            code,
        } => login::run(config, auth_id, password, code).await,
        Commands::SetPassword => login::set_password(config).await,
        Commands::Config => show_config::run(&config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat() {
        let cli = Cli::try_parse_from(["deyu", "chat", "-c", "conv-1", "--deep-think"]).unwrap();
        match cli.command {
            Some(Commands::Chat {
                conversation,
                deep_think,
                model,
            }) => {
                assert_eq!(conversation.as_deref(), Some("conv-1"));
                assert!(deep_think);
                assert!(model.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_conversations() {
        let cli = Cli::try_parse_from(["deyu", "conversations", "rename", "c1", "新标题"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Conversations(
                conversations::ConversationCommands::Rename { .. }
            ))
        ));
    }

    #[test]
    fn test_parse_login() {
        let cli = Cli::try_parse_from(["deyu", "login", "13800000000", "--code", "1234"]).unwrap();
        match cli.command {
            Some(Commands::Login {
                auth_id,
                password,
                code,
            }) => {
                assert_eq!(auth_id, "13800000000");
                assert!(!password);
                assert_eq!(code.as_deref(), Some("1234"));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from(["deyu", "login", "alice", "-p"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Login { password: true, code: None, .. })
        ));
        assert!(matches!(
            Cli::try_parse_from(["deyu", "set-password"]).unwrap().command,
            Some(Commands::SetPassword)
        ));
    }
}
