use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use parley_config::load as load_config;
use parley_messaging::{ConnectionState, Credentials, EventKind, InboundEvent, UserRef};
use parley_runtime::{shutdown_signal, telemetry, ClientServices};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "parley-client")]
#[command(about = "Parley real-time messaging client")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and log every inbound event until ctrl-c
    Listen {
        #[command(flatten)]
        identity: Identity,
        /// Conversations to join after connecting
        #[arg(long = "join")]
        join: Vec<String>,
    },
    /// Send one message and wait for the server to confirm it
    Send {
        #[command(flatten)]
        identity: Identity,
        conversation: String,
        content: String,
    },
    /// Print the effective configuration (default)
    ShowConfig,
}

#[derive(Args)]
struct Identity {
    /// Session token issued by the auth service
    #[arg(long, env = "PARLEY_TOKEN", hide_env_values = true)]
    token: String,
    /// Id of the signed-in user
    #[arg(long, env = "PARLEY_USER_ID")]
    user_id: String,
    /// Display name of the signed-in user
    #[arg(long, default_value = "")]
    name: String,
}

impl Identity {
    fn user(&self) -> UserRef {
        UserRef::new(&self.user_id, &self.name, "", "")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::ShowConfig) {
        Commands::Listen { identity, join } => listen(identity, join).await,
        Commands::Send {
            identity,
            conversation,
            content,
        } => send(identity, conversation, content).await,
        Commands::ShowConfig => show_config(),
    }
}

fn show_config() -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;
    let rendered =
        serde_json::to_string_pretty(&config).context("failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}

async fn listen(identity: Identity, join: Vec<String>) -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise tracing")?;

    let config = load_config().context("failed to load configuration")?;
    let services = ClientServices::initialise(&config, identity.user())
        .await
        .context("failed to initialise client services")?;

    for kind in [
        EventKind::PresenceOnline,
        EventKind::PresenceOffline,
        EventKind::TypingSignal,
        EventKind::MessageNew,
        EventKind::MessageRead,
        EventKind::Connect,
        EventKind::Disconnect,
        EventKind::Error,
    ] {
        services
            .session
            .on(kind, |event: &InboundEvent| {
                let payload = serde_json::to_string(event).unwrap_or_default();
                info!(event = event.kind().as_str(), %payload, "inbound");
            })
            .await?;
    }

    let state = services
        .session
        .connect(Credentials::new(identity.token))
        .await?;
    info!(?state, url = %config.server.url, "connect attempted");

    for conversation in join {
        services.session.join_conversation(conversation).await?;
    }

    shutdown_signal().await;
    services.shutdown().await
}

async fn send(identity: Identity, conversation: String, content: String) -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise tracing")?;

    let config = load_config().context("failed to load configuration")?;
    let user_id = identity.user_id.clone();
    let services = ClientServices::initialise(&config, identity.user())
        .await
        .context("failed to initialise client services")?;

    let (echo_tx, mut echo_rx) = mpsc::unbounded_channel();
    services
        .session
        .on(EventKind::MessageNew, move |event: &InboundEvent| {
            if let InboundEvent::MessageNew(payload) = event {
                let _ = echo_tx.send(payload.message.clone());
            }
        })
        .await?;

    let state = services
        .session
        .connect(Credentials::new(identity.token))
        .await?;
    if state != ConnectionState::Connected {
        services.shutdown().await?;
        bail!("could not connect to {} ({state:?})", config.server.url);
    }

    services.session.join_conversation(&conversation).await?;
    let local = services.session.send_message(&conversation, &content).await?;
    info!(placeholder = %local.id, %conversation, "message sent");

    let confirmed = tokio::time::timeout(config.session.connect_timeout(), async {
        while let Some(message) = echo_rx.recv().await {
            if message.sender.id == user_id && message.content == content {
                return Some(message);
            }
        }
        None
    })
    .await;

    match confirmed {
        Ok(Some(message)) => println!("{}", message.id),
        _ => warn!("no confirmation from server before timeout"),
    }

    services.shutdown().await
}
