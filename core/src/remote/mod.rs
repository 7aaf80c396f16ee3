//! Remote-control collaborator: player lists over RCON, status over A2S.

pub mod a2s;
pub mod rcon;

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::Serialize;

use sitrep_types::ServerConfig;

use crate::error::RemoteError;
use crate::storage::{PlayerId, ServerId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerInfo {
    pub name: String,
    /// `None` for bots.
    pub player_id: Option<PlayerId>,
    pub score: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub map: String,
    pub player_count: u8,
    pub max_players: u8,
    pub bot_count: u8,
}

/// Queries against a running game server. Callers bound every call with a
/// timeout; implementations need not.
#[async_trait]
pub trait RemoteControl: Send + Sync {
    async fn list_players(&self, server: &ServerId) -> Result<Vec<PlayerInfo>, RemoteError>;

    async fn query_status(&self, server: &ServerId) -> Result<ServerStatus, RemoteError>;
}

#[derive(Debug, Clone, Default)]
pub struct Endpoint {
    pub rcon_address: Option<String>,
    pub rcon_password: Option<String>,
    pub query_address: Option<String>,
}

impl From<&ServerConfig> for Endpoint {
    fn from(config: &ServerConfig) -> Self {
        Self {
            rcon_address: config.rcon_address.clone(),
            rcon_password: config.rcon_password.clone(),
            query_address: config.query_address.clone(),
        }
    }
}

/// [`RemoteControl`] speaking Source RCON and A2S to configured endpoints.
#[derive(Debug, Default)]
pub struct GameServerRemote {
    endpoints: HashMap<ServerId, Endpoint>,
}

impl GameServerRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config<'a>(servers: impl IntoIterator<Item = &'a ServerConfig>) -> Self {
        let mut remote = Self::new();
        for server in servers {
            remote.insert(ServerId::new(&server.id), Endpoint::from(server));
        }
        remote
    }

    pub fn insert(&mut self, server: ServerId, endpoint: Endpoint) {
        self.endpoints.insert(server, endpoint);
    }

    fn endpoint(&self, server: &ServerId) -> Option<&Endpoint> {
        self.endpoints.get(server)
    }
}

#[async_trait]
impl RemoteControl for GameServerRemote {
    async fn list_players(&self, server: &ServerId) -> Result<Vec<PlayerInfo>, RemoteError> {
        let endpoint = self.endpoint(server);
        let address = endpoint
            .and_then(|e| e.rcon_address.as_deref())
            .ok_or_else(|| RemoteError::NotConfigured("rcon", server.to_string()))?;
        let password = endpoint
            .and_then(|e| e.rcon_password.as_deref())
            .unwrap_or_default();

        let mut client = rcon::RconClient::connect(address, password).await?;
        let output = client.exec("listplayers").await?;
        Ok(rcon::parse_player_list(&output))
    }

    async fn query_status(&self, server: &ServerId) -> Result<ServerStatus, RemoteError> {
        let address = self
            .endpoint(server)
            .and_then(|e| e.query_address.as_deref())
            .ok_or_else(|| RemoteError::NotConfigured("status query", server.to_string()))?;
        a2s::query_info(address).await
    }
}
