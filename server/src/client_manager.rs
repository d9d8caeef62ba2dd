//! Server-side view of connected clients.
//!
//! A [`ConnectedClient`] tracks one peer's connection phase, its newest
//! accepted command and the backlog of snapshots it has not acknowledged yet.
//! The [`ClientManager`] is the table of all clients, keyed by address, and
//! enforces capacity and unique display names on admission.
//!
//! Both are owned by the dispatcher and mutated only from the tick loop.

use log::{debug, info};
use shared::{
    ClientPacket, Command, EntityId, JoinResponse, PacketError, Sequence, Snapshot, Tick, NO_ACK,
};
use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;

/// Connection phase of a client.
///
/// `Ready` clients have joined but not sent a command yet; they get periodic
/// full gamestates. The first accepted command moves them to `InGame`.
/// There is no way back: a silent client is evicted instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    Ready,
    InGame,
}

/// Result of offering a command to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Accepted,
    /// Sequence number not newer than the last accepted one; ignored.
    Stale,
}

#[derive(Debug)]
pub struct ConnectedClient {
    /// Network address, also the identity of the client
    pub addr: SocketAddr,
    /// Display name, unique across the table
    pub name: String,
    /// Player entity this client controls
    pub entity_id: EntityId,
    phase: ClientPhase,
    last_sequence: Sequence,
    latest_command: Option<Command>,
    last_packet_tick: Tick,
    resend_countdown: u32,
    resend_interval: u32,
    /// Unacknowledged snapshots, oldest first
    backlog: VecDeque<Snapshot>,
}

impl ConnectedClient {
    /// Creates a client in the `Ready` phase.
    ///
    /// The resend countdown starts at one so the first tick after joining
    /// already delivers a full gamestate.
    pub fn new(
        addr: SocketAddr,
        name: String,
        entity_id: EntityId,
        now: Tick,
        resend_interval: u32,
    ) -> Self {
        Self {
            addr,
            name,
            entity_id,
            phase: ClientPhase::Ready,
            last_sequence: NO_ACK,
            latest_command: None,
            last_packet_tick: now,
            resend_countdown: 1,
            resend_interval: resend_interval.max(1),
            backlog: VecDeque::new(),
        }
    }

    /// Current connection phase.
    pub fn phase(&self) -> ClientPhase {
        self.phase
    }

    /// Server tick of the last accepted command, or of the join.
    pub fn last_packet_tick(&self) -> Tick {
        self.last_packet_tick
    }

    /// Sequence number of the newest accepted command, or [`NO_ACK`].
    pub fn acked_seq(&self) -> Sequence {
        self.last_sequence
    }

    /// The newest accepted command; its `acked_tick` drives backlog pruning.
    pub fn latest_command(&self) -> Option<&Command> {
        self.latest_command.as_ref()
    }

    /// Number of snapshots waiting for acknowledgement.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Server times of the backlog entries, oldest first.
    pub fn backlog_ticks(&self) -> Vec<Tick> {
        self.backlog.iter().map(Snapshot::server_time).collect()
    }

    /// Decodes an ACTION datagram and offers its command to this client.
    pub fn ingest_command(
        &mut self,
        data: &[u8],
        now: Tick,
    ) -> Result<CommandOutcome, PacketError> {
        match ClientPacket::decode(data)? {
            ClientPacket::Action(command) => Ok(self.accept_command(command, now)),
            other => Err(PacketError::Unexpected(other.packet_type())),
        }
    }

    /// Applies a command if its sequence number is newer than anything seen.
    ///
    /// Stale or duplicated commands change nothing, not even the liveness
    /// timestamp.
    pub fn accept_command(&mut self, command: Command, now: Tick) -> CommandOutcome {
        if command.sequence <= self.last_sequence {
            debug!(
                "Stale command {} from {} (latest {})",
                command.sequence, self.addr, self.last_sequence
            );
            return CommandOutcome::Stale;
        }

        self.last_sequence = command.sequence;
        self.latest_command = Some(command);
        self.last_packet_tick = now;

        if self.phase == ClientPhase::Ready {
            info!("Client {} ({}) is in game", self.name, self.addr);
            self.phase = ClientPhase::InGame;
        }

        CommandOutcome::Accepted
    }

    /// Appends this tick's snapshot to the backlog.
    ///
    /// The dispatcher bounds the backlog: a client that never acknowledges
    /// gets a full gamestate and an empty backlog instead.
    pub fn enqueue_snapshot(&mut self, snapshot: Snapshot) {
        self.backlog.push_back(snapshot);
    }

    /// Drops every backlog entry at or before the tick the client last acked.
    pub fn flush_acknowledged(&mut self) {
        let Some(acked_tick) = self.latest_command.as_ref().map(|c| c.acked_tick) else {
            return;
        };

        while self
            .backlog
            .front()
            .map_or(false, |snapshot| snapshot.server_time() <= acked_tick)
        {
            self.backlog.pop_front();
        }
    }

    /// Drops the whole backlog; a full gamestate supersedes it.
    pub fn flush_backlog(&mut self) {
        self.backlog.clear();
    }

    /// Coalesces the unacknowledged backlog into the one snapshot to send.
    ///
    /// The newest entry is the base and older entries only fill in entities
    /// it does not mention. The backlog itself is left as is: entries leave
    /// it on acknowledgement, not on sending.
    pub fn build_outbound_snapshot(&mut self) -> Option<Snapshot> {
        self.flush_acknowledged();

        let mut newest_first = self.backlog.iter().rev();
        let mut outbound = newest_first.next()?.clone();
        for older in newest_first {
            outbound.merge_missing(older);
        }

        Some(outbound.with_acked_seq(self.last_sequence))
    }

    /// Counts down towards the next full gamestate for a `Ready` client.
    pub fn due_for_resend(&mut self) -> bool {
        if self.phase != ClientPhase::Ready {
            return false;
        }

        self.resend_countdown = self.resend_countdown.saturating_sub(1);
        if self.resend_countdown == 0 {
            self.resend_countdown = self.resend_interval;
            true
        } else {
            false
        }
    }

    /// True once more than `timeout_ticks` have passed without an accepted
    /// command.
    pub fn is_timed_out(&self, now: Tick, timeout_ticks: Tick) -> bool {
        now.saturating_sub(self.last_packet_tick) > timeout_ticks
    }
}

/// Table of connected clients keyed by network address.
pub struct ClientManager {
    clients: BTreeMap<SocketAddr, ConnectedClient>,
    max_clients: usize,
}

impl ClientManager {
    /// Empty table admitting at most `max_clients` clients.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: BTreeMap::new(),
            max_clients,
        }
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// Decides whether a join under `name` may proceed.
    ///
    /// Every client in the table counts, including one at the joining
    /// address: a full table answers `ServerFull` and a name already in use
    /// answers `NameTaken`. Replacing a client at the same address is the
    /// caller's job once admission has passed.
    pub fn check_admission(&self, name: &str) -> Result<(), JoinResponse> {
        if self.clients.len() >= self.max_clients {
            return Err(JoinResponse::ServerFull);
        }

        if self.clients.values().any(|client| client.name == name) {
            return Err(JoinResponse::NameTaken);
        }

        Ok(())
    }

    /// Inserts a client, returning the one it replaced at the same address.
    pub fn insert(&mut self, client: ConnectedClient) -> Option<ConnectedClient> {
        info!(
            "Client {} connected from {} (entity {})",
            client.name, client.addr, client.entity_id
        );
        self.clients.insert(client.addr, client)
    }

    /// Removes and returns the client at `addr`, logging the departure.
    pub fn remove(&mut self, addr: &SocketAddr) -> Option<ConnectedClient> {
        let removed = self.clients.remove(addr);
        if let Some(client) = &removed {
            info!("Client {} ({}) disconnected", client.name, client.addr);
        }
        removed
    }

    /// Looks up a client by its address.
    pub fn get(&self, addr: &SocketAddr) -> Option<&ConnectedClient> {
        self.clients.get(addr)
    }

    pub fn get_mut(&mut self, addr: &SocketAddr) -> Option<&mut ConnectedClient> {
        self.clients.get_mut(addr)
    }

    /// All clients, ordered by address.
    pub fn iter(&self) -> impl Iterator<Item = &ConnectedClient> {
        self.clients.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ConnectedClient> {
        self.clients.values_mut()
    }

    /// Addresses of clients silent for longer than `timeout_ticks`.
    pub fn collect_timed_out(&self, now: Tick, timeout_ticks: Tick) -> Vec<SocketAddr> {
        self.clients
            .values()
            .filter(|client| client.is_timed_out(now, timeout_ticks))
            .map(|client| client.addr)
            .collect()
    }

    /// Number of connected clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
