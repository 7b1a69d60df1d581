use std::sync::Arc;

use anyhow::{bail, Context, Result};
use parley_config::AppConfig;
use parley_messaging::{ChatSession, Connector, SessionHandle, UserRef, WebSocketConnector};
use tokio::task::JoinHandle;
use tracing::info;

pub mod telemetry {
    use anyhow::Result;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_env_filter(env_filter)
            .with_target(false)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

/// A running client session and the configuration it was built from.
pub struct ClientServices {
    pub config: AppConfig,
    pub session: SessionHandle,
    session_task: JoinHandle<()>,
}

impl ClientServices {
    /// Build a websocket connector for `server.url` and start the session
    /// loop. Nothing is connected yet.
    pub async fn initialise(config: &AppConfig, current_user: UserRef) -> Result<Self> {
        let url = config.server.url.trim();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            bail!("server url must use ws:// or wss://, got '{url}'");
        }

        let connector = WebSocketConnector::new(url, config.session.outbound_buffer);
        info!(url = connector.url(), "websocket connector ready");

        Self::with_connector(config, current_user, Arc::new(connector))
            .await
            .context("failed to start session")
    }

    /// Start a session over any connector
    pub async fn with_connector(
        config: &AppConfig,
        current_user: UserRef,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        if current_user.id.trim().is_empty() {
            bail!("current user id cannot be empty");
        }

        let (session, session_task) = ChatSession::spawn(config, current_user, connector);
        Ok(Self {
            config: config.clone(),
            session,
            session_task,
        })
    }

    /// Disconnect, stop the loop and wait for it to finish
    pub async fn shutdown(self) -> Result<()> {
        self.session
            .shutdown()
            .await
            .context("session loop already stopped")?;
        self.session_task
            .await
            .context("session loop panicked")?;
        info!("client services shut down");
        Ok(())
    }
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
