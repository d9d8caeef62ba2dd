//! Per-tick synchronization logic.
//!
//! The [`Dispatcher`] owns the client table, the world and the server clock.
//! It never touches a socket: inbound datagrams are handed to
//! [`Dispatcher::handle_datagram`] and every packet it wants sent is pushed
//! onto an outbox of [`Outgoing`] values that the network layer writes out.
//!
//! Tick order:
//! 1. inbound datagrams (joins, commands, disconnects) are handled as they
//!    are drained from the receive queue,
//! 2. server time advances and the world steps,
//! 3. one snapshot is built from the world's change buffers, which are then
//!    cleared,
//! 4. each client gets either a full gamestate or its coalesced backlog,
//!    split into as many packets as it takes to stay under the size limit,
//! 5. every `check_interval` ticks silent clients are evicted.

use log::{debug, info, warn};
use shared::{
    ClientPacket, JoinRequest, JoinResponse, PacketType, Sequence, ServerPacket, Snapshot, Tick,
    NO_ACK,
};
use std::net::SocketAddr;

use crate::client_manager::{ClientManager, ClientPhase, CommandOutcome, ConnectedClient};
use crate::config::ServerConfig;
use crate::game::World;

/// An encoded packet waiting to be written to `addr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub addr: SocketAddr,
    pub bytes: Vec<u8>,
}

pub struct Dispatcher<W: World> {
    clients: ClientManager,
    world: W,
    server_time: Tick,
    ticks_since_check: u32,
    check_interval: u32,
    timeout_ticks: Tick,
    resend_interval: u32,
    max_backlog: usize,
}

impl<W: World> Dispatcher<W> {
    /// Creates a dispatcher at server time 0 with no clients, driving
    /// `world` with the limits and intervals from `config`.
    pub fn new(world: W, config: &ServerConfig) -> Self {
        Self {
            clients: ClientManager::new(config.max_clients),
            world,
            server_time: 0,
            ticks_since_check: 0,
            check_interval: config.check_interval.max(1),
            timeout_ticks: config.timeout_ticks,
            resend_interval: config.resend_interval,
            max_backlog: config.max_backlog.max(1),
        }
    }

    /// The current server tick.
    pub fn server_time(&self) -> Tick {
        self.server_time
    }

    /// The connected clients.
    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    /// The world being synchronized.
    pub fn world(&self) -> &W {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut W {
        &mut self.world
    }

    /// Classifies one inbound datagram and acts on it.
    ///
    /// Bad input is logged and dropped; it never affects other clients.
    pub fn handle_datagram(
        &mut self,
        data: &[u8],
        addr: SocketAddr,
        outbox: &mut Vec<Outgoing>,
    ) {
        let packet_type = match PacketType::of(data) {
            Ok(packet_type) => packet_type,
            Err(e) => {
                warn!("Dropping datagram from {}: {}", addr, e);
                return;
            }
        };

        match packet_type {
            PacketType::Join => match ClientPacket::decode(data) {
                Ok(ClientPacket::Join(request)) => self.handle_join(request, addr, outbox),
                Ok(_) => {}
                Err(e) => warn!("Dropping join from {}: {}", addr, e),
            },
            PacketType::Action => self.handle_command(data, addr),
            PacketType::Disconnect => self.handle_disconnect(addr),
            other => warn!("Unexpected {:?} packet from {}", other, addr),
        }
    }

    fn handle_join(
        &mut self,
        request: JoinRequest,
        addr: SocketAddr,
        outbox: &mut Vec<Outgoing>,
    ) {
        let name = request.display_name().to_string();
        info!("Join request from {} as {} ({:?})", addr, name, request.class);

        if let Err(rejection) = self.clients.check_admission(&name) {
            info!("Rejecting {} from {}: {:?}", name, addr, rejection);
            queue(outbox, addr, &ServerPacket::Response(rejection));
            return;
        }

        // Same address means a reconnect: the old session goes first
        if self.clients.get(&addr).is_some() {
            info!("Replacing existing client at {}", addr);
            self.evict(&addr);
        }

        let entity_id = self
            .world
            .spawn_player(&name, request.class, request.colour);
        let client = ConnectedClient::new(
            addr,
            name,
            entity_id,
            self.server_time,
            self.resend_interval,
        );
        self.clients.insert(client);

        queue(
            outbox,
            addr,
            &ServerPacket::Response(JoinResponse::Accepted { entity_id }),
        );
    }

    fn handle_command(&mut self, data: &[u8], addr: SocketAddr) {
        let Some(client) = self.clients.get_mut(&addr) else {
            debug!("Ignoring command from unknown sender {}", addr);
            return;
        };

        match client.ingest_command(data, self.server_time) {
            Ok(CommandOutcome::Accepted) => {
                if let Some(command) = client.latest_command() {
                    self.world.apply_action(client.entity_id, &command.action);
                }
            }
            Ok(CommandOutcome::Stale) => {}
            Err(e) => warn!("Dropping command from {}: {}", addr, e),
        }
    }

    fn handle_disconnect(&mut self, addr: SocketAddr) {
        if self.clients.get(&addr).is_some() {
            self.evict(&addr);
        } else {
            debug!("Ignoring disconnect from unknown sender {}", addr);
        }
    }

    /// Removes a client and its player entity.
    fn evict(&mut self, addr: &SocketAddr) {
        if let Some(client) = self.clients.remove(addr) {
            self.world.despawn(client.entity_id);
        }
    }

    /// Runs one server tick, queueing every packet to send on `outbox`.
    ///
    /// Server time wraps from `Tick::MAX` to `Tick::MIN`, which at 30 Hz
    /// takes over two years of uptime.
    pub fn tick(&mut self, outbox: &mut Vec<Outgoing>) {
        self.server_time = self.server_time.wrapping_add(1);
        self.world.step();

        let snapshot = self.build_tick_snapshot();
        self.fan_out(&snapshot, outbox);

        self.ticks_since_check += 1;
        if self.ticks_since_check >= self.check_interval {
            self.ticks_since_check = 0;
            self.evict_timed_out();
        }

        if self.server_time % 60 == 0 && !self.clients.is_empty() {
            let in_game = self
                .clients
                .iter()
                .filter(|client| client.phase() == ClientPhase::InGame)
                .count();
            debug!(
                "Tick {}: {} clients ({} in game), {} entities in last delta",
                self.server_time,
                self.clients.len(),
                in_game,
                snapshot.len()
            );
        }
    }

    /// Builds this tick's snapshot and consumes the world's change buffers.
    ///
    /// Updates go in first, then creates, then deletes, so a fresh entity is
    /// sent as a create and a removed one as a delete.
    fn build_tick_snapshot(&mut self) -> Snapshot {
        let mut snapshot = Snapshot::new(self.server_time, NO_ACK);

        for entity in self.world.live_entities() {
            snapshot.add_update(entity.id, entity.state);
        }
        for entity in self.world.entities_added_since_last_tick() {
            snapshot.add_create(entity.id, entity.state);
        }
        for id in self.world.entities_removed_since_last_tick() {
            snapshot.add_delete(id);
        }

        self.world.clear_change_buffers();
        snapshot
    }

    /// Sends every client either a full gamestate or its coalesced backlog.
    ///
    /// A client whose backlog has reached `max_backlog` unacknowledged
    /// entries is treated like a `Ready` client due for a resend: the backlog
    /// is dropped and a gamestate goes out instead.
    fn fan_out(&mut self, snapshot: &Snapshot, outbox: &mut Vec<Outgoing>) {
        let server_time = self.server_time;
        let max_backlog = self.max_backlog;
        let world = &self.world;
        let mut gamestate: Option<Vec<Snapshot>> = None;

        for client in self.clients.iter_mut() {
            let resend = client.phase() == ClientPhase::Ready && client.due_for_resend();
            client.flush_acknowledged();
            let overflow = client.backlog_len() >= max_backlog;

            if resend || overflow {
                if overflow {
                    debug!(
                        "{} unacknowledged snapshots for {}, sending a gamestate",
                        client.backlog_len(),
                        client.addr
                    );
                }
                client.flush_backlog();
                let parts = gamestate.get_or_insert_with(|| {
                    split(&Snapshot::full_state(server_time, NO_ACK, world.live_entities()))
                });
                queue_gamestate(outbox, client.addr, parts, client.acked_seq());
                continue;
            }

            client.enqueue_snapshot(snapshot.clone().with_acked_seq(client.acked_seq()));
            if let Some(outbound) = client.build_outbound_snapshot() {
                for part in split(&outbound) {
                    queue(outbox, client.addr, &ServerPacket::Snapshot(part));
                }
            }
        }
    }

    fn evict_timed_out(&mut self) {
        for addr in self
            .clients
            .collect_timed_out(self.server_time, self.timeout_ticks)
        {
            info!("Dropping {} from server after timeout", addr);
            self.evict(&addr);
        }
    }
}

fn queue(outbox: &mut Vec<Outgoing>, addr: SocketAddr, packet: &ServerPacket) {
    match packet.encode() {
        Ok(bytes) => outbox.push(Outgoing { addr, bytes }),
        Err(e) => warn!("Failed to encode packet for {}: {}", addr, e),
    }
}

/// Splits `snapshot` into packet-sized parts, warning if any delta had to be
/// left out.
fn split(snapshot: &Snapshot) -> Vec<Snapshot> {
    let parts = snapshot.split_to_fit();
    let kept: usize = parts.iter().map(Snapshot::len).sum();
    if kept < snapshot.len() {
        warn!(
            "Tick {}: {} deltas too large for any packet were left out",
            snapshot.server_time(),
            snapshot.len() - kept
        );
    }
    parts
}

/// Queues a split gamestate: the first part as a GAMESTATE, which resets the
/// client's view, and the rest as SNAPSHOTs of the same tick.
fn queue_gamestate(
    outbox: &mut Vec<Outgoing>,
    addr: SocketAddr,
    parts: &[Snapshot],
    acked_seq: Sequence,
) {
    for (i, part) in parts.iter().enumerate() {
        let part = part.clone().with_acked_seq(acked_seq);
        let packet = if i == 0 {
            ServerPacket::Gamestate(part)
        } else {
            ServerPacket::Snapshot(part)
        };
        queue(outbox, addr, &packet);
    }
}
