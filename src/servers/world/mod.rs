//! World coordinator
//!
//! Dials the login server, receives its world assignment, then accepts and
//! tracks channel workers. All process-wide state lives in one `Topology`
//! behind one lock; every read-modify-write happens inside a single lock
//! scope.

pub mod channel;
pub mod login;

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::{ServerConfig, WorldConfig};
use crate::error::ServerError;
use crate::network::dispatch;
use crate::network::PacketSender;

/// The world this process was told to run.
#[derive(Debug, Clone)]
pub struct WorldAssignment {
    pub id: u8,
    pub port: u16,
    pub config: WorldConfig,
}

/// One registered channel worker.
#[derive(Debug, Clone)]
pub struct ChannelEntry {
    pub ip: IpAddr,
    pub port: u16,
    pub tx: PacketSender,
}

/// What `Topology::assign_world` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    /// First assignment for this process.
    New,
    /// Same world and port as before; only the login link was replaced.
    Rebound,
}

#[derive(Debug, Default)]
pub struct Topology {
    world: Option<WorldAssignment>,
    login: Option<PacketSender>,
    channels: BTreeMap<u8, ChannelEntry>,
}

impl Topology {
    pub fn world(&self) -> Option<&WorldAssignment> {
        self.world.as_ref()
    }

    pub fn login(&self) -> Option<&PacketSender> {
        self.login.as_ref()
    }

    pub fn channel(&self, id: u8) -> Option<&ChannelEntry> {
        self.channels.get(&id)
    }

    pub fn channel_ids(&self) -> Vec<u8> {
        self.channels.keys().copied().collect()
    }

    pub fn channels(&self) -> impl Iterator<Item = (u8, &ChannelEntry)> + '_ {
        self.channels.iter().map(|(id, entry)| (*id, entry))
    }

    /// Checks a world-connect against the current assignment without
    /// touching anything.
    pub fn check_assignment(&self, id: u8, port: u16) -> Result<Assignment, ServerError> {
        match &self.world {
            None => Ok(Assignment::New),
            Some(w) if w.id == id && w.port == port => Ok(Assignment::Rebound),
            Some(w) => Err(ServerError::WorldAlreadyAssigned {
                current: w.id,
                requested: id,
                port,
            }),
        }
    }

    /// Store the world assignment and the login link it arrived on.
    pub fn assign_world(
        &mut self,
        assignment: WorldAssignment,
        login: PacketSender,
    ) -> Result<Assignment, ServerError> {
        let outcome = self.check_assignment(assignment.id, assignment.port)?;
        if outcome == Assignment::New {
            self.world = Some(assignment);
        }
        self.login = Some(login);
        Ok(outcome)
    }

    /// Forget the login link, but only if `link` is still the current one.
    pub fn clear_login(&mut self, link: &PacketSender) -> bool {
        match &self.login {
            Some(current) if current.same_link(link) => {
                self.login = None;
                true
            }
            _ => false,
        }
    }

    /// Lowest free id in `0..max_channels`.
    pub fn free_channel_id(&self) -> Result<u8, ServerError> {
        let world = self.world.as_ref().ok_or(ServerError::NoWorldAssigned)?;
        let max = world.config.max_channels;
        (0..max)
            .find(|id| !self.channels.contains_key(id))
            .ok_or(ServerError::NoFreeChannel { max })
    }

    /// Port channel `id` serves players on.
    pub fn channel_port(&self, id: u8) -> Result<u16, ServerError> {
        let world = self.world.as_ref().ok_or(ServerError::NoWorldAssigned)?;
        world
            .port
            .checked_add(1)
            .and_then(|p| p.checked_add(u16::from(id)))
            .ok_or(ServerError::ProtocolViolation("channel port out of range"))
    }

    /// Allocate the lowest free slot and insert the channel in one step.
    pub fn register_channel(&mut self, ip: IpAddr, tx: PacketSender) -> Result<(u8, u16), ServerError> {
        let id = self.free_channel_id()?;
        let port = self.channel_port(id)?;
        self.channels.insert(id, ChannelEntry { ip, port, tx });
        Ok((id, port))
    }

    pub fn remove_channel(&mut self, id: u8) -> Option<ChannelEntry> {
        self.channels.remove(&id)
    }
}

pub struct WorldState {
    pub config: ServerConfig,
    pub secret: Arc<str>,
    pub topology: Mutex<Topology>,
}

impl WorldState {
    pub fn new(config: ServerConfig) -> Self {
        let secret = Arc::from(config.interserver_secret.as_str());
        Self {
            config,
            secret,
            topology: Mutex::new(Topology::default()),
        }
    }

    /// Address the login server should hand out for a channel seen at `peer`.
    pub fn advertised_ip(&self, peer: IpAddr) -> String {
        self.config
            .external_ip
            .clone()
            .unwrap_or_else(|| peer.to_string())
    }

    /// (world id, port) once assigned.
    pub async fn assigned_world(&self) -> Option<(u8, u16)> {
        let topo = self.topology.lock().await;
        topo.world().map(|w| (w.id, w.port))
    }

    pub async fn channel_ids(&self) -> Vec<u8> {
        self.topology.lock().await.channel_ids()
    }

    pub async fn has_login_link(&self) -> bool {
        self.topology.lock().await.login().is_some()
    }

    /// Keep a link to the login server up until it says no world is left
    /// for us.
    pub async fn run(state: Arc<Self>) -> Result<(), ServerError> {
        let addr = state.config.login_interserver_addr();
        let backoff = state.config.reconnect_backoff();
        let handler = Arc::new(login::LoginLink::new(Arc::clone(&state)));
        loop {
            tracing::info!("[world] [connecting] login={}", addr);
            match dispatch::connect("world", &addr, Arc::clone(&handler), &backoff).await {
                Err(ServerError::NoWorldAvailable) => return Err(ServerError::NoWorldAvailable),
                Err(e) => tracing::warn!("[world] [login_link_closed] {}", e),
                Ok(()) => tracing::warn!("[world] [login_link_closed] Login server closed the link."),
            }
            tokio::time::sleep(backoff.jittered(backoff.initial)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(id: u8, port: u16, max_channels: u8) -> WorldAssignment {
        let mut config = WorldConfig::named("Scania");
        config.max_channels = max_channels;
        WorldAssignment { id, port, config }
    }

    fn link() -> PacketSender {
        PacketSender::channel(4).0
    }

    fn ip() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[test]
    fn test_register_requires_world() {
        let mut topo = Topology::default();
        assert!(matches!(
            topo.register_channel(ip(), link()),
            Err(ServerError::NoWorldAssigned)
        ));
    }

    #[test]
    fn test_lowest_free_channel() {
        let mut topo = Topology::default();
        topo.assign_world(assignment(1, 8585, 4), link()).unwrap();

        assert_eq!(topo.register_channel(ip(), link()).unwrap(), (0, 8586));
        assert_eq!(topo.register_channel(ip(), link()).unwrap(), (1, 8587));
        assert_eq!(topo.register_channel(ip(), link()).unwrap(), (2, 8588));

        assert!(topo.remove_channel(1).is_some());
        assert!(topo.remove_channel(1).is_none());
        assert_eq!(topo.register_channel(ip(), link()).unwrap(), (1, 8587));
        assert_eq!(topo.channel_ids(), vec![0, 1, 2]);
    }

    #[test]
    fn test_channel_slots_exhausted() {
        let mut topo = Topology::default();
        topo.assign_world(assignment(0, 8585, 2), link()).unwrap();
        topo.register_channel(ip(), link()).unwrap();
        topo.register_channel(ip(), link()).unwrap();
        assert!(matches!(
            topo.register_channel(ip(), link()),
            Err(ServerError::NoFreeChannel { max: 2 })
        ));
        assert_eq!(topo.channel_ids().len(), 2);
    }

    #[test]
    fn test_channel_port_overflow_rejected() {
        let mut topo = Topology::default();
        topo.assign_world(assignment(0, u16::MAX - 1, 4), link()).unwrap();
        assert_eq!(topo.register_channel(ip(), link()).unwrap(), (0, u16::MAX));
        assert!(matches!(
            topo.register_channel(ip(), link()),
            Err(ServerError::ProtocolViolation(_))
        ));
        assert_eq!(topo.channel_ids(), vec![0]);
    }

    #[test]
    fn test_reassignment_rules() {
        let mut topo = Topology::default();
        let first = link();
        assert_eq!(topo.assign_world(assignment(1, 8585, 4), first.clone()).unwrap(), Assignment::New);

        let second = link();
        assert_eq!(
            topo.assign_world(assignment(1, 8585, 4), second.clone()).unwrap(),
            Assignment::Rebound
        );
        assert!(topo.login().unwrap().same_link(&second));

        let err = topo.assign_world(assignment(2, 8585, 4), link()).unwrap_err();
        assert!(matches!(err, ServerError::WorldAlreadyAssigned { current: 1, requested: 2, .. }));
        assert_eq!(topo.world().unwrap().id, 1);
        assert!(topo.login().unwrap().same_link(&second));
    }

    #[test]
    fn test_clear_login_only_for_current_link() {
        let mut topo = Topology::default();
        let stale = link();
        let current = link();
        topo.assign_world(assignment(1, 8585, 4), stale.clone()).unwrap();
        topo.assign_world(assignment(1, 8585, 4), current.clone()).unwrap();

        assert!(!topo.clear_login(&stale));
        assert!(topo.login().is_some());
        assert!(topo.clear_login(&current));
        assert!(topo.login().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration_distinct_ids() {
        let state = Arc::new(WorldState::new(
            ServerConfig::from_str("interserver_secret: x\n").unwrap(),
        ));
        state
            .topology
            .lock()
            .await
            .assign_world(assignment(0, 9000, 100), link())
            .unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..64 {
            let s = Arc::clone(&state);
            tasks.spawn(async move {
                let mut topo = s.topology.lock().await;
                topo.register_channel(ip(), link()).unwrap().0
            });
        }
        let mut ids = Vec::new();
        while let Some(id) = tasks.join_next().await {
            ids.push(id.unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, (0..64).collect::<Vec<u8>>());
        assert_eq!(state.channel_ids().await.len(), 64);
    }
}
