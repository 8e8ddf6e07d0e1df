use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use postdeck_reqwest::SessionContext;
use postdeck_tokens::{Outcome, SessionConfig, SessionResult};

#[derive(Debug, Parser)]
struct Opts {
    /// The base URL of the postdeck API
    #[arg(short, long, env = "POSTDECK_API_BASE")]
    api_base: reqwest::Url,

    /// The local file used to keep the credential between runs
    #[arg(
        short = 'f',
        long,
        env = "POSTDECK_CREDENTIALS_FILE",
        default_value = ".credentials.json"
    )]
    credentials_file: PathBuf,

    /// How long a credential refresh may take, in seconds
    #[arg(long, env = "POSTDECK_REFRESH_TIMEOUT_SECS", default_value_t = 10)]
    refresh_timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Logs in and keeps the credential in the credentials file
    Login {
        /// The email address of the account
        #[arg(short, long, env = "POSTDECK_IDENTIFIER")]
        identifier: String,

        /// The password of the account
        #[arg(short, long, env = "POSTDECK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Lists tags, refreshing the credential if it has expired
    Tags {
        /// How many times to list the tags concurrently
        #[arg(short, long, default_value_t = 3)]
        concurrency: usize,
    },
    /// Creates a tag
    CreateTag {
        /// The name of the new tag
        name: String,
    },
    /// Checks whether an email address can still be registered
    Check {
        /// The email address to check
        identifier: String,
    },
    /// Logs out and forgets the credential
    Logout,
}

fn report<T: serde::Serialize>(outcome: &Outcome<T>) -> color_eyre::Result<()> {
    println!("{}", serde_json::to_string_pretty(outcome)?);
    Ok(())
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let config = SessionConfig::new(opts.api_base)
        .with_refresh_timeout(Duration::from_secs(opts.refresh_timeout_secs))
        .with_credential_file(opts.credentials_file);

    let context = SessionContext::builder(config).build()?;

    tracing::info!(
        authenticated = context.is_authenticated(),
        session = ?context.session(),
        "loaded session"
    );

    match opts.command {
        Command::Login {
            identifier,
            password,
        } => {
            let outcome = Outcome::from(context.service().login(&identifier, &password).await);
            report(&outcome)?;
        }
        Command::Tags { concurrency } => {
            let mut listings = tokio::task::JoinSet::new();
            for _ in 0..concurrency {
                let context = context.clone();
                listings.spawn(async move { context.tags().list().await });
            }
            while let Some(result) = listings.join_next().await {
                report(&Outcome::from(result?))?;
            }
            tracing::info!(
                refreshes = context.coordinator().episodes(),
                "listed tags"
            );
        }
        Command::CreateTag { name } => {
            report(&Outcome::from(context.tags().create(&[name]).await))?;
        }
        Command::Check { identifier } => {
            report(&Outcome::from(
                context.service().check_identifier(&identifier).await,
            ))?;
        }
        Command::Logout => {
            let result: SessionResult<()> = Ok(context.service().logout().await);
            report(&Outcome::from(result))?;
        }
    }

    Ok(())
}
