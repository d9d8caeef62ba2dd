//! Performance benchmarks for the hot paths of snapshot sync

use server::config::ServerConfig;
use server::dispatcher::{Dispatcher, Outgoing};
use server::game::GameWorld;
use shared::{
    Action, CharacterClass, CharacterState, ClientPacket, Command, Entity, EntityState,
    ItemKind, ItemState, JoinRequest, ServerPacket, Snapshot, Tick, MAX_PACKET_SIZE,
};
use std::net::SocketAddr;
use std::time::Instant;

fn character(id: u32) -> Entity {
    Entity::new(
        id,
        EntityState::Character(CharacterState {
            name: format!("player{:02}", id),
            class: CharacterClass::Warrior,
            colour: 0xff0000,
            x: id as f32 * 10.0,
            y: 100.0,
            angle: 0.5,
            health: 150,
            max_health: 150,
        }),
    )
}

fn item(id: u32) -> Entity {
    Entity::new(
        id,
        EntityState::Item(ItemState {
            kind: ItemKind::Potion,
            x: 5.0,
            y: id as f32,
        }),
    )
}

/// A tick's worth of updates for 30 characters and 20 items.
fn busy_snapshot(server_time: Tick) -> Snapshot {
    let mut snapshot = Snapshot::new(server_time, 7);
    for entity in (0..30).map(character).chain((30..50).map(item)) {
        snapshot.add_update(entity.id, entity.state);
    }
    snapshot
}

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Benchmarks coalescing a long unacknowledged backlog
#[test]
fn benchmark_backlog_merge() {
    let backlog: Vec<Snapshot> = (1..=64).map(busy_snapshot).collect();

    let iterations = 200;
    let start = Instant::now();

    for _ in 0..iterations {
        let mut outbound = backlog[backlog.len() - 1].clone();
        for older in backlog.iter().rev().skip(1) {
            outbound.merge_missing(older);
        }
        assert_eq!(outbound.len(), 50);
    }

    let duration = start.elapsed();
    println!(
        "Backlog merge: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks snapshot encoding and decoding
#[test]
fn benchmark_snapshot_serialization() {
    let packet = ServerPacket::Snapshot(busy_snapshot(12345));

    let iterations = 5_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = packet.encode().unwrap();
        assert!(bytes.len() <= MAX_PACKET_SIZE);
        let decoded = ServerPacket::decode(&bytes).unwrap();
        assert_eq!(decoded.packet_type(), packet.packet_type());
    }

    let duration = start.elapsed();
    println!(
        "Snapshot serialization: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks full ticks with a server at capacity
#[test]
fn benchmark_dispatcher_ticks() {
    let config = ServerConfig::default();
    let mut dispatcher = Dispatcher::new(GameWorld::with_seed(800.0, 600.0, 3), &config);
    let mut outbox: Vec<Outgoing> = Vec::new();

    let clients: Vec<SocketAddr> = (0..config.max_clients as u16)
        .map(|i| addr(10_000 + i))
        .collect();
    for (i, client) in clients.iter().enumerate() {
        let join = ClientPacket::Join(JoinRequest {
            name: format!("player{}", i),
            class: CharacterClass::Mage,
            colour: 0x00ff00,
        });
        dispatcher.handle_datagram(&join.encode().unwrap(), *client, &mut outbox);
    }
    assert_eq!(dispatcher.clients().len(), config.max_clients);
    outbox.clear();

    let ticks = 1_000;
    let mut packets = 0;
    let start = Instant::now();

    for sequence in 1..=ticks {
        for (i, client) in clients.iter().enumerate() {
            let command = ClientPacket::Action(Command {
                sequence,
                acked_tick: dispatcher.server_time(),
                action: Action::MoveTo {
                    x: (sequence * 3 % 800) as f32,
                    y: (i * 30) as f32,
                },
            });
            dispatcher.handle_datagram(&command.encode().unwrap(), *client, &mut outbox);
        }
        dispatcher.tick(&mut outbox);
        packets += outbox.len();
        outbox.clear();
    }

    let duration = start.elapsed();
    println!(
        "Dispatcher: {} ticks with {} clients in {:?} ({:.2} μs/tick, {} packets)",
        ticks,
        clients.len(),
        duration,
        duration.as_micros() as f64 / ticks as f64,
        packets
    );

    assert_eq!(packets, ticks as usize * clients.len());
    for client in &clients {
        let state = dispatcher.clients().get(client).unwrap();
        assert_eq!(state.acked_seq(), ticks);
        assert!(state.backlog_len() <= 2);
    }

    // Should complete in under 10 seconds
    assert!(duration.as_millis() < 10_000);
}

/// Stress tests command ingestion with out-of-order and duplicate sequences
#[test]
fn stress_test_reordered_commands() {
    let mut dispatcher = Dispatcher::new(
        GameWorld::with_seed(800.0, 600.0, 5),
        &ServerConfig::default(),
    );
    let mut outbox = Vec::new();
    let client = addr(20_000);

    let join = ClientPacket::Join(JoinRequest {
        name: "stress".to_string(),
        class: CharacterClass::Ranger,
        colour: 0,
    });
    dispatcher.handle_datagram(&join.encode().unwrap(), client, &mut outbox);

    // 7919 is coprime with the count, so this visits every sequence once
    let count = 10_000;
    let start = Instant::now();

    for i in 0..count {
        let sequence = (i * 7919) % count + 1;
        for _ in 0..2 {
            let command = ClientPacket::Action(Command {
                sequence,
                acked_tick: 0,
                action: Action::Idle,
            });
            dispatcher.handle_datagram(&command.encode().unwrap(), client, &mut outbox);
        }
    }

    let duration = start.elapsed();
    println!("Command ingestion: {} commands in {:?}", count * 2, duration);

    assert_eq!(dispatcher.clients().get(&client).unwrap().acked_seq(), count);

    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);
}
