//! Authentication against the Matrix homeserver
//!
//! Password login or a manually supplied access token; the token is kept in
//! the config file for later test runs.

pub mod tokens;

use std::io::{BufRead, Write};

use anyhow::{bail, Context, Result};

use crate::config::{validate_url, Config};
use crate::homeserver::HomeserverClient;

pub use tokens::{StoredToken, TokenStore};

/// Environment variable consulted for the password before prompting.
pub const PASSWORD_ENV: &str = "MX_VOIP_TESTER_PASSWORD";

/// How to authenticate.
pub struct LoginArgs {
    pub homeserver: Option<String>,
    pub user: Option<String>,
    pub access_token: Option<String>,
    pub force: bool,
}

fn read_password() -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(password);
    }
    eprint!("Password: ");
    std::io::stderr().flush().ok();
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password")?;
    let password = line.trim_end_matches(&['\r', '\n'][..]).to_string();
    if password.is_empty() {
        bail!("Empty password");
    }
    Ok(password)
}

/// Log in and persist the access token
pub async fn login(args: LoginArgs) -> Result<()> {
    let mut config = Config::load()?;

    let homeserver = args
        .homeserver
        .or_else(|| config.homeserver_url.clone())
        .context("No homeserver configured. Pass --homeserver.")?;
    validate_url(&homeserver)?;

    let same_homeserver = config.homeserver_url.as_deref() == Some(homeserver.as_str());
    if !args.force && same_homeserver && args.access_token.is_none() {
        if let Some(token) = config.get_access_token() {
            if !token.is_expired() {
                println!("Already logged in to {}. Use --force to re-authenticate.", homeserver);
                return Ok(());
            }
        }
    }

    let mut client = HomeserverClient::new(&homeserver, config.request_timeout())?;

    let (user_id, expires_in) = match args.access_token {
        Some(token) => {
            let user_id = client
                .login_with_access_token(&token)
                .await
                .context("Access token rejected")?;
            (user_id, None)
        }
        None => {
            let user = args
                .user
                .or_else(|| config.user_id.clone())
                .context("No user ID. Pass --user or --access-token.")?;
            let password = read_password()?;
            let login = client
                .login(&user, &password)
                .await
                .context("Login failed")?;
            (
                login.user_id.unwrap_or(user),
                login.expires_in_ms.map(|ms| ms / 1000),
            )
        }
    };

    let token = client
        .access_token()
        .context("Homeserver returned no access token")?
        .to_string();
    config.homeserver_url = Some(homeserver);
    config.user_id = Some(user_id.clone());
    config.set_access_token(token, expires_in);
    config.save()?;

    println!("Logged in as {}.", user_id);
    Ok(())
}

/// Clear stored credentials
pub async fn logout() -> Result<()> {
    let mut config = Config::load()?;
    config.clear_tokens();
    config.save()?;
    println!("Logged out.");
    Ok(())
}

/// Display current auth status
pub async fn status() -> Result<()> {
    let config = Config::load()?;

    println!(
        "Homeserver:  {}",
        config.homeserver_url.as_deref().unwrap_or("none")
    );
    println!("User:        {}", config.user_id.as_deref().unwrap_or("none"));
    println!(
        "Test service: {}",
        config.remote_test_service_url.as_deref().unwrap_or("none")
    );

    let token = match config.get_access_token() {
        Some(token) if !token.is_expired() => token,
        Some(_) => {
            println!("Token:       expired");
            return Ok(());
        }
        None => {
            println!("Token:       none");
            return Ok(());
        }
    };

    let Some(homeserver) = config.homeserver_url.as_deref() else {
        println!("Token:       present (no homeserver to check against)");
        return Ok(());
    };

    let client =
        HomeserverClient::new(homeserver, config.request_timeout())?.with_access_token(&token.token);
    match client.whoami().await {
        Ok(user_id) => println!("Token:       valid ({})", user_id),
        Err(e) => println!("Token:       rejected ({})", e),
    }
    if let Some(exp) = token.expires_at {
        println!("  expires_at: {}", exp);
    }

    Ok(())
}
