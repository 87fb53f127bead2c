//! Login server, interserver side
//!
//! Hands configured worlds out to world coordinators as they connect and
//! keeps the channel list each coordinator reports.

pub mod interserver;

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::{ServerConfig, WorldDefinition};
use crate::error::ServerError;
use crate::network::dispatch;
use crate::network::PacketSender;

use self::interserver::CoordinatorListener;

/// A channel as announced by its world coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredChannel {
    pub ip: String,
    pub port: u16,
}

#[derive(Debug)]
pub struct WorldSlot {
    pub definition: WorldDefinition,
    /// Live coordinator link, `None` while the world is unclaimed.
    pub coordinator: Option<PacketSender>,
    pub channels: BTreeMap<u8, RegisteredChannel>,
}

pub struct LoginState {
    pub config: ServerConfig,
    pub secret: Arc<str>,
    pub worlds: Mutex<BTreeMap<u8, WorldSlot>>,
}

impl LoginState {
    pub fn new(config: ServerConfig) -> Self {
        let worlds = config
            .worlds
            .iter()
            .map(|def| {
                let slot = WorldSlot {
                    definition: def.clone(),
                    coordinator: None,
                    channels: BTreeMap::new(),
                };
                (def.id, slot)
            })
            .collect();
        Self {
            secret: Arc::from(config.interserver_secret.as_str()),
            config,
            worlds: Mutex::new(worlds),
        }
    }

    /// Bind the interserver port and serve world coordinators forever.
    pub async fn run(state: Arc<Self>) -> Result<(), ServerError> {
        let bind = format!("{}:{}", state.config.bind_ip, state.config.login_interserver_port);
        dispatch::accept("login", &bind, Arc::new(CoordinatorListener::new(state))).await
    }

    /// Give `link` the lowest-id world that has no coordinator.
    pub async fn claim_world(&self, link: PacketSender) -> Option<WorldDefinition> {
        let mut worlds = self.worlds.lock().await;
        let slot = worlds.values_mut().find(|s| s.coordinator.is_none())?;
        slot.coordinator = Some(link);
        slot.channels.clear();
        Some(slot.definition.clone())
    }

    /// Free world `id` if `link` still holds it. Its channels go with it.
    pub async fn release_world(&self, id: u8, link: &PacketSender) -> bool {
        let mut worlds = self.worlds.lock().await;
        match worlds.get_mut(&id) {
            Some(slot) if slot.coordinator.as_ref().is_some_and(|c| c.same_link(link)) => {
                slot.coordinator = None;
                slot.channels.clear();
                true
            }
            _ => false,
        }
    }

    pub async fn register_channel(&self, world_id: u8, channel_id: u8, channel: RegisteredChannel) -> Result<(), ServerError> {
        let mut worlds = self.worlds.lock().await;
        let slot = worlds
            .get_mut(&world_id)
            .ok_or(ServerError::ProtocolViolation("channel registered for an unknown world"))?;
        slot.channels.insert(channel_id, channel);
        Ok(())
    }

    pub async fn remove_channel(&self, world_id: u8, channel_id: u8) -> Option<RegisteredChannel> {
        let mut worlds = self.worlds.lock().await;
        worlds.get_mut(&world_id)?.channels.remove(&channel_id)
    }

    pub async fn channels(&self, world_id: u8) -> Vec<(u8, RegisteredChannel)> {
        let worlds = self.worlds.lock().await;
        worlds
            .get(&world_id)
            .map(|s| s.channels.iter().map(|(id, c)| (*id, c.clone())).collect())
            .unwrap_or_default()
    }

    /// Ids of worlds that currently have a coordinator.
    pub async fn online_worlds(&self) -> Vec<u8> {
        let worlds = self.worlds.lock().await;
        worlds
            .values()
            .filter(|s| s.coordinator.is_some())
            .map(|s| s.definition.id)
            .collect()
    }
}
