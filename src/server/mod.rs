mod invite;
mod session;

pub use session::SshSession;

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use russh::server::Server;
use russh::MethodSet;
use tracing::info;

use crate::admin::Config;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::store::RepoStore;
use crate::types::HostKey;

/// State shared by every SSH session: the repo store and the published
/// config snapshot.
pub struct ServerState {
    pub settings: ServerConfig,
    pub store: RepoStore,

    /// Readers clone the `Arc` and work on that snapshot for the rest of
    /// the operation; writers build a whole new snapshot and swap it in.
    config: RwLock<Arc<Config>>,
}

impl ServerState {
    /// Load (and on first run seed) the configuration and build the shared
    /// state. Refuses to start on a config that does not load.
    pub fn new(settings: ServerConfig) -> Result<Self> {
        let store = RepoStore::new(settings.base_dir.clone());

        let initial = match (&settings.admin_user, &settings.admin_public_key) {
            (Some(username), Some(key)) => Config::bootstrap(&store, username, key)?,
            _ => Config::load(&store)?,
        };

        Ok(Self {
            settings,
            store,
            config: RwLock::new(Arc::new(initial)),
        })
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<Config> {
        self.config.read().expect("config lock poisoned").clone()
    }

    /// Rebuild the snapshot from disk and publish it. A load failure leaves
    /// the previous snapshot in place; in-flight sessions keep the snapshot
    /// they already hold either way.
    pub fn reload(&self) -> Result<()> {
        let mut guard = self.config.write().expect("config lock poisoned");

        let fresh = Config::load(&self.store)?;
        *guard = Arc::new(fresh);

        info!("reloaded config");

        Ok(())
    }

    /// Consume an invite, binding `key` to the invited user, and publish the
    /// resulting snapshot. Returns the username the invite pointed at.
    pub fn redeem_invite(&self, token: &str, key: &crate::types::PublicKey) -> Result<String> {
        invite::redeem(self, token, key)
    }
}

#[derive(Clone)]
struct GitServer {
    state: Arc<ServerState>,
}

impl Server for GitServer {
    type Handler = SshSession;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> SshSession {
        SshSession::new(self.state.clone(), peer_addr)
    }
}

/// Run the SSH server until the listener fails.
pub async fn serve(settings: ServerConfig) -> Result<()> {
    let state = Arc::new(ServerState::new(settings)?);

    let keys = state
        .snapshot()
        .host_keys
        .iter()
        .map(HostKey::keypair)
        .collect();

    let config = russh::server::Config {
        methods: MethodSet::PUBLICKEY,
        keys,
        auth_rejection_time: Duration::from_secs(3),
        auth_rejection_time_initial: Some(Duration::ZERO),
        ..Default::default()
    };

    info!(addr = %state.settings.bind_addr, "starting ssh server");

    let mut server = GitServer {
        state: state.clone(),
    };

    server
        .run_on_address(Arc::new(config), state.settings.bind_addr.as_str())
        .await?;

    Ok(())
}
