//! Per-connection glue around the session multiplexer
//!
//! The transport asks [`Server::authenticate`] about every offered public key
//! and feeds the channels of each authenticated connection into
//! [`Server::serve_channels`].

use crate::auth::AuthorizedKeys;
use crate::channel::IncomingChannel;
use crate::config::ServerConfig;
use crate::session::{run_session, SessionOutcome, SessionSpec};
use crate::ServerError;
use anyhow::Result;
use rand::rngs::OsRng;
use ssh_key::{Algorithm, HashAlg, PrivateKey, PublicKey};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Shared, immutable server state
pub struct Server {
    host_key: PrivateKey,
    authorized: Arc<AuthorizedKeys>,
    spec: Arc<SessionSpec>,
}

impl Server {
    pub fn new(host_key: PrivateKey, authorized: AuthorizedKeys, spec: SessionSpec) -> Self {
        Self {
            host_key,
            authorized: Arc::new(authorized),
            spec: Arc::new(spec),
        }
    }

    /// Build everything that must exist before the first connection.
    ///
    /// Host key problems are fatal. Bad allow-list entries are not.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let host_key = load_or_generate_host_key(config.host_key.as_deref())?;
        info!(
            "Host key {}",
            host_key.public_key().fingerprint(HashAlg::Sha256)
        );

        let mut authorized = AuthorizedKeys::from_entries(&config.authorized_keys);
        if let Some(path) = &config.authorized_keys_file {
            authorized.extend(AuthorizedKeys::from_file(path)?);
        }
        if authorized.is_empty() {
            warn!("No authorized keys configured, every login will be rejected");
        } else {
            info!("{} authorized key(s) loaded", authorized.len());
        }

        Ok(Self::new(host_key, authorized, config.session_spec()))
    }

    pub fn host_key(&self) -> &PrivateKey {
        &self.host_key
    }

    pub fn authorized_keys(&self) -> Arc<AuthorizedKeys> {
        Arc::clone(&self.authorized)
    }

    pub fn session_spec(&self) -> Arc<SessionSpec> {
        Arc::clone(&self.spec)
    }

    /// Public key callback for the transport
    pub fn authenticate(&self, user: &str, key: &PublicKey) -> bool {
        if self.authorized.is_authorized(key) {
            info!("User \"{}\" authenticated with PubKey.", user);
            true
        } else {
            warn!("unknown public key for {:?}", user);
            false
        }
    }

    /// Serve every channel offered on one connection.
    ///
    /// Each channel runs as its own task, so a failing session never holds
    /// up the others. Returns once the connection stops offering channels
    /// and every session has finished.
    pub async fn serve_channels<C: IncomingChannel>(
        &self,
        mut channels: mpsc::Receiver<C>,
    ) -> Vec<SessionOutcome> {
        let mut sessions = JoinSet::new();

        while let Some(channel) = channels.recv().await {
            let spec = Arc::clone(&self.spec);
            sessions.spawn(async move { run_session(channel, &spec).await });
        }

        let mut outcomes = Vec::new();
        while let Some(result) = sessions.join_next().await {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("Session task failed: {}", e),
            }
        }
        outcomes
    }
}

/// Load the host key from disk, or generate an Ed25519 key for this run
pub fn load_or_generate_host_key(path: Option<&Path>) -> Result<PrivateKey, ServerError> {
    match path {
        Some(path) => {
            let key =
                PrivateKey::read_openssh_file(path).map_err(|source| ServerError::HostKeyLoad {
                    path: path.to_path_buf(),
                    source,
                })?;
            if key.is_encrypted() {
                return Err(ServerError::EncryptedHostKey(path.to_path_buf()));
            }
            Ok(key)
        }
        None => PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
            .map_err(ServerError::HostKeyGenerate),
    }
}
