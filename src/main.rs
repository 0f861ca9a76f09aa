//! mx-voip-tester - Matrix VoIP TURN relay tester
//!
//! Checks that the TURN servers a homeserver hands out really relay traffic,
//! over IPv4 and IPv6 relay candidates.

mod auth;
mod config;
mod error;
mod homeserver;
mod tester;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::TokenStore;
use crate::config::{validate_url, Config};
use crate::homeserver::HomeserverClient;
use crate::tester::progress::NoProgress;
use crate::tester::{ConsoleProgress, ProgressSink, RemoteTestService, VoipTester, WebRtcEngine};

#[derive(Parser)]
#[command(name = "mx-voip-tester")]
#[command(about = "Verify that a Matrix homeserver's TURN servers relay traffic", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in to the homeserver and store the access token
    Login {
        /// Homeserver base URL
        #[arg(long)]
        homeserver: Option<String>,

        /// Matrix user ID for password login (password from $MX_VOIP_TESTER_PASSWORD or stdin)
        #[arg(short, long)]
        user: Option<String>,

        /// Use an existing access token instead of a password
        #[arg(long)]
        access_token: Option<String>,

        /// Log in again even if a token is stored
        #[arg(short, long)]
        force: bool,
    },

    /// Clear the stored access token
    Logout,

    /// Show stored settings and check the access token
    Status,

    /// Store testing service URL and timeouts
    Configure(ConfigureArgs),

    /// Run the relay test against every TURN URI
    Run(RunArgs),
}

#[derive(Args)]
struct ConfigureArgs {
    /// Remote testing service URL
    #[arg(long)]
    service: Option<String>,

    /// Candidate gathering timeout, seconds
    #[arg(long)]
    gathering_timeout: Option<u64>,

    /// Relay test timeout, seconds
    #[arg(long)]
    relay_timeout: Option<u64>,

    /// HTTP request timeout, seconds
    #[arg(long)]
    request_timeout: Option<u64>,
}

#[derive(Args)]
struct RunArgs {
    /// Homeserver base URL (defaults to the one logged in to)
    #[arg(long)]
    homeserver: Option<String>,

    /// Access token (defaults to the stored one)
    #[arg(long)]
    access_token: Option<String>,

    /// Remote testing service URL
    #[arg(long)]
    service: Option<String>,

    /// Candidate gathering timeout, seconds
    #[arg(long)]
    gathering_timeout: Option<u64>,

    /// Relay test timeout, seconds
    #[arg(long)]
    relay_timeout: Option<u64>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Include candidates and offer/answer SDP in the report
    #[arg(long)]
    debug_report: bool,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

fn configure(args: ConfigureArgs) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(service) = args.service {
        validate_url(&service)?;
        config.remote_test_service_url = Some(service);
    }
    if args.gathering_timeout.is_some() {
        config.gathering_timeout_secs = args.gathering_timeout;
    }
    if args.relay_timeout.is_some() {
        config.relay_timeout_secs = args.relay_timeout;
    }
    if args.request_timeout.is_some() {
        config.request_timeout_secs = args.request_timeout;
    }
    config.save()?;
    println!("Saved {}", Config::config_path()?.display());
    Ok(())
}

async fn run_test(args: RunArgs) -> Result<()> {
    let config = Config::load()?;

    let homeserver = args
        .homeserver
        .or_else(|| config.homeserver_url.clone())
        .context("No homeserver. Run 'mx-voip-tester login' or pass --homeserver.")?;
    validate_url(&homeserver)?;

    let service = args
        .service
        .or_else(|| config.remote_test_service_url.clone())
        .context("No testing service. Pass --service or run 'mx-voip-tester configure --service URL'.")?;
    validate_url(&service)?;

    let token = match args.access_token {
        Some(token) => token,
        None => {
            let stored = config
                .get_access_token()
                .context("Not logged in. Run 'mx-voip-tester login'.")?;
            if stored.is_expired() {
                bail!("Access token expired. Run 'mx-voip-tester login --force'.");
            }
            stored.token
        }
    };

    let request_timeout = config.request_timeout();
    let client = HomeserverClient::new(&homeserver, request_timeout)?.with_access_token(&token);
    let user_id = client
        .whoami()
        .await
        .context("Access token check failed")?;
    tracing::info!("Testing TURN servers of {} as {}", homeserver, user_id);

    let mut settings = config.tester_settings();
    if let Some(secs) = args.gathering_timeout {
        settings.gathering_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = args.relay_timeout {
        settings.relay_timeout = Duration::from_secs(secs);
    }
    settings.debug = args.debug_report;

    let remote = RemoteTestService::new(reqwest::Client::new(), &service, request_timeout);
    let engine = WebRtcEngine::new()?;
    let tester = VoipTester::new(client, remote, engine, settings);

    let abort = tester.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, aborting test run");
            abort.abort();
        }
    });

    let mut progress: Box<dyn ProgressSink> = if args.quiet {
        Box::new(NoProgress)
    } else {
        Box::new(ConsoleProgress::stderr())
    };
    let report = tester
        .run(progress.as_mut())
        .await
        .context("Test run failed")?;

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report);
    }

    if !report.any_success() {
        bail!("No TURN URI relayed traffic");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::Login {
            homeserver,
            user,
            access_token,
            force,
        } => {
            tracing::info!("Starting login...");
            auth::login(auth::LoginArgs {
                homeserver,
                user,
                access_token,
                force,
            })
            .await?;
        }
        Commands::Logout => {
            auth::logout().await?;
        }
        Commands::Status => {
            auth::status().await?;
        }
        Commands::Configure(args) => {
            configure(args)?;
        }
        Commands::Run(args) => {
            run_test(args).await?;
        }
    }

    Ok(())
}
