//! Headless bot for poking a running server by hand.
//!
//! Joins, wanders to random points, keeps a local copy of the world from the
//! snapshots it receives and disconnects when done.

use clap::Parser;
use log::{debug, info, warn};
use rand::Rng;
use shared::{
    Action, CharacterClass, ClientPacket, Command, EntityDelta, EntityId, EntityState,
    JoinRequest, JoinResponse, Sequence, ServerPacket, Snapshot, Tick, MAX_PACKET_SIZE, NO_ACK,
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: SocketAddr,

    /// Display name to join with
    #[arg(short, long, default_value = "bot")]
    name: String,

    /// Number of commands to send before disconnecting
    #[arg(short, long, default_value_t = 20)]
    commands: Sequence,

    /// Milliseconds between commands
    #[arg(short, long, default_value_t = 500)]
    interval_ms: u64,
}

/// What the bot believes the world looks like.
#[derive(Default)]
struct KnownWorld {
    newest_tick: Option<Tick>,
    entities: BTreeMap<EntityId, EntityState>,
}

impl KnownWorld {
    fn acked_tick(&self) -> Tick {
        self.newest_tick.unwrap_or(NO_ACK)
    }

    // Large ticks arrive in several parts sharing one server time
    fn is_stale(&self, snapshot: &Snapshot) -> bool {
        matches!(self.newest_tick, Some(newest) if snapshot.server_time() < newest)
    }

    fn replace(&mut self, snapshot: &Snapshot) {
        self.entities.clear();
        self.apply(snapshot);
    }

    fn apply(&mut self, snapshot: &Snapshot) {
        for delta in snapshot.deltas() {
            match delta {
                EntityDelta::Create { id, state } | EntityDelta::Update { id, state } => {
                    self.entities.insert(id, state);
                }
                EntityDelta::Delete { id } => {
                    self.entities.remove(&id);
                }
            }
        }
        self.newest_tick = Some(snapshot.server_time());
    }

    fn handle(&mut self, packet: ServerPacket) {
        match packet {
            ServerPacket::Gamestate(snapshot) if !self.is_stale(&snapshot) => {
                debug!("Gamestate at tick {}", snapshot.server_time());
                self.replace(&snapshot);
            }
            ServerPacket::Snapshot(snapshot) if !self.is_stale(&snapshot) => {
                debug!(
                    "Snapshot at tick {} acking command {} with {} deltas",
                    snapshot.server_time(),
                    snapshot.acked_seq(),
                    snapshot.len()
                );
                self.apply(&snapshot);
            }
            ServerPacket::Gamestate(_) | ServerPacket::Snapshot(_) => {
                debug!("Dropping out-of-date snapshot");
            }
            ServerPacket::Response(response) => debug!("Late response: {:?}", response),
        }
    }
}

async fn send(
    socket: &UdpSocket,
    server: SocketAddr,
    packet: &ClientPacket,
) -> std::io::Result<()> {
    match packet.encode() {
        Ok(bytes) => socket.send_to(&bytes, server).await.map(|_| ()),
        Err(e) => {
            warn!("Failed to encode {:?}: {}", packet.packet_type(), e);
            Ok(())
        }
    }
}

/// Receives and applies packets until `deadline`.
async fn listen_until(socket: &UdpSocket, world: &mut KnownWorld, deadline: Instant) {
    let mut buffer = vec![0u8; MAX_PACKET_SIZE];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, socket.recv_from(&mut buffer)).await {
            Ok(Ok((len, _))) => match ServerPacket::decode(&buffer[..len]) {
                Ok(packet) => world.handle(packet),
                Err(e) => warn!("Undecodable packet from server: {}", e),
            },
            Ok(Err(e)) => warn!("Error receiving: {}", e),
            Err(_) => return,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let mut rng = rand::thread_rng();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    info!("Client socket bound to {}", socket.local_addr()?);

    let class = match rng.gen_range(0..3) {
        0 => CharacterClass::Warrior,
        1 => CharacterClass::Ranger,
        _ => CharacterClass::Mage,
    };
    let join = ClientPacket::Join(JoinRequest {
        name: args.name.clone(),
        class,
        colour: rng.gen_range(0..0x0100_0000),
    });
    info!("Joining {} as {} ({:?})", args.server, args.name, class);
    send(&socket, args.server, &join).await?;

    let mut buffer = vec![0u8; MAX_PACKET_SIZE];
    let (len, _) = timeout(Duration::from_secs(5), socket.recv_from(&mut buffer)).await??;
    let entity_id = match ServerPacket::decode(&buffer[..len])? {
        ServerPacket::Response(JoinResponse::Accepted { entity_id }) => entity_id,
        ServerPacket::Response(rejection) => {
            warn!("Join rejected: {:?}", rejection);
            return Ok(());
        }
        other => {
            warn!("Expected a join response, got {:?}", other.packet_type());
            return Ok(());
        }
    };
    info!("Joined, controlling entity {}", entity_id);

    let mut world = KnownWorld::default();
    let interval = Duration::from_millis(args.interval_ms);

    for sequence in 1..=args.commands {
        let action = Action::MoveTo {
            x: rng.gen_range(0.0..800.0),
            y: rng.gen_range(0.0..600.0),
        };
        let command = ClientPacket::Action(Command {
            sequence,
            acked_tick: world.acked_tick(),
            action,
        });
        debug!("Sending command {}: {:?}", sequence, action);
        send(&socket, args.server, &command).await?;

        listen_until(&socket, &mut world, Instant::now() + interval).await;

        if let Some(EntityState::Character(me)) = world.entities.get(&entity_id) {
            info!(
                "Tick {}: at ({:.1}, {:.1}) with {} hp, {} entities known",
                world.acked_tick(),
                me.x,
                me.y,
                me.health,
                world.entities.len()
            );
        }
    }

    send(&socket, args.server, &ClientPacket::Disconnect).await?;
    info!("Test client finished");
    Ok(())
}
