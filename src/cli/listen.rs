//! `deyu listen` - voice input
//!
//! Runs one recognition session from the default microphone, printing the
//! live transcript until Enter is pressed.

use crate::config::AppConfig;
use anyhow::Result;
use deyu_asr::{AsrSession, AsrStatus, NoticeLevel};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(config: AppConfig) -> Result<()> {
    let token = config.token();
    let grace = Duration::from_millis(config.asr.stop_grace_ms);

    println!("\nDeyu Voice Input");
    println!("{}", "-".repeat(40));
    println!("  Server:   {}", config.asr.ws_url);
    println!("  Locale:   {}", config.asr.locale);
    println!(
        "  Fallback: {}",
        if config.asr.fallback.enabled { "enabled" } else { "disabled" }
    );
    println!();

    let transcript = Arc::new(Mutex::new(String::new()));
    let live = transcript.clone();
    let session = AsrSession::from_config(config.asr, token, move |text: &str| {
        print!("\r[T] {text}");
        let _ = std::io::stdout().flush();
        *live.lock().unwrap_or_else(|e| e.into_inner()) = text.to_string();
    });

    let notice_task = {
        let mut notices = session.notices();
        tokio::spawn(async move {
            while let Ok(notice) = notices.recv().await {
                match notice.level {
                    NoticeLevel::Error => eprintln!("\n[!] {}", notice.message),
                    _ => eprintln!("\n[i] {}", notice.message),
                }
            }
        })
    };

    let mut status = session.subscribe_status();
    if !session.start().await {
        println!("Recognition is already running.");
        return Ok(());
    }

    println!("Speak now. Press Enter to stop.\n");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    tokio::select! {
        _ = lines.next_line() => session.stop(),
        _ = status.wait_for(|s| *s == AsrStatus::Idle) => {}
    }

    // Final results may still arrive during the stop grace period.
    let _ = tokio::time::timeout(
        grace + Duration::from_secs(1),
        status.wait_for(|s| *s == AsrStatus::Idle),
    )
    .await;
    session.cleanup();
    notice_task.abort();

    let text = transcript.lock().unwrap_or_else(|e| e.into_inner()).clone();
    println!();
    if text.is_empty() {
        if let Some(error) = session.error() {
            println!("No transcript ({error}).");
        } else {
            println!("No transcript.");
        }
    } else {
        println!("Transcript: {text}");
    }
    Ok(())
}
