//! `deyu login` and `deyu set-password` - account access

use crate::config::AppConfig;
use anyhow::{bail, Context, Result};
use deyu_chat::api::{AuthInfo, AuthType};
use deyu_chat::{ApiClient, SecretString};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Log in and print the token.
///
/// Phone logins request an SMS code first unless `code` is given. The token is
/// printed, not stored; export it as `DEYU_API__TOKEN` for later commands.
pub async fn run(
    config: AppConfig,
    auth_id: String,
    password: bool,
    code: Option<String>,
) -> Result<()> {
    let client = ApiClient::new(&config.api).context("Failed to create API client")?;
    let info = AuthInfo::new(auth_id, auth_type(password));

    let verify = match code {
        Some(code) => code,
        None if password => prompt("Password: ").await?,
        None => {
            client
                .send_verification_code(&info)
                .await
                .context("Failed to send verification code")?;
            println!("Verification code sent to {}", info.auth_id);
            prompt("Code: ").await?
        }
    };
    if verify.is_empty() {
        bail!("Nothing entered");
    }

    let creds = client.login(&info, &verify).await.context("Login failed")?;
    if creds.new {
        println!("Welcome, new account {}", creds.user_id);
    } else {
        println!("Logged in as {}", creds.user_id);
    }
    println!("{}", token_hint(&creds.token));
    Ok(())
}

/// Set the account password; needs a configured token
pub async fn set_password(config: AppConfig) -> Result<()> {
    let client = ApiClient::new(&config.api).context("Failed to create API client")?;
    let new_password = prompt("New password: ").await?;
    if new_password.is_empty() {
        bail!("Nothing entered");
    }
    client
        .set_password(&new_password)
        .await
        .context("Failed to set password")?;
    println!("Password updated");
    Ok(())
}

fn auth_type(password: bool) -> AuthType {
    if password {
        AuthType::Password
    } else {
        AuthType::Phone
    }
}

fn token_hint(token: &SecretString) -> String {
    format!("export DEYU_API__TOKEN={}", token.expose_secret())
}

async fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    std::io::stdout().flush()?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let line = lines.next_line().await?.unwrap_or_default();
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_type_from_flag() {
        assert_eq!(auth_type(true), AuthType::Password);
        assert_eq!(auth_type(false), AuthType::Phone);
    }

    #[test]
    fn test_token_hint_is_env_export() {
        let hint = token_hint(&SecretString::new("tok-1"));
        assert_eq!(hint, "export DEYU_API__TOKEN=tok-1");
    }
}
