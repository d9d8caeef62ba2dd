//! Server network layer: socket ownership, the receiver task and the tick timer.
//!
//! One spawned task reads datagrams off the socket and pushes them into a
//! bounded queue. The tick loop drains that queue without blocking, runs one
//! [`Dispatcher::tick`] and writes the resulting outbox to the socket. Client
//! and world state live only inside the dispatcher, so nothing is locked.

use log::{debug, info, warn};
use shared::MAX_PACKET_SIZE;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::ServerConfig;
use crate::dispatcher::{Dispatcher, Outgoing};
use crate::error::ServerError;
use crate::game::World;

/// A raw datagram handed from the receiver task to the tick loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub addr: SocketAddr,
    pub bytes: Vec<u8>,
}

/// Stops a running [`Server`] from another task.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

pub struct Server<W: World> {
    socket: Arc<UdpSocket>,
    dispatcher: Dispatcher<W>,
    tick_duration: Duration,
    queue_capacity: usize,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<W: World> Server<W> {
    /// Validates `config` and binds the UDP socket. A bind failure is fatal.
    pub async fn bind(config: &ServerConfig, world: W) -> Result<Self, ServerError> {
        config.validate()?;

        let addr = config.bind_addr();
        let socket = UdpSocket::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!("Server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Server {
            socket: Arc::new(socket),
            dispatcher: Dispatcher::new(world, config),
            tick_duration: config.tick_duration(),
            queue_capacity: config.queue_capacity,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn dispatcher(&self) -> &Dispatcher<W> {
        &self.dispatcher
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Spawns the task that moves datagrams from the socket into the queue.
    fn spawn_receiver(&self, queue_tx: mpsc::Sender<Datagram>) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_PACKET_SIZE];

            loop {
                tokio::select! {
                    result = socket.recv_from(&mut buffer) => match result {
                        Ok((len, addr)) => {
                            let datagram = Datagram {
                                addr,
                                bytes: buffer[..len].to_vec(),
                            };
                            if queue_tx.send(datagram).await.is_err() {
                                debug!("Receive queue closed, stopping receiver");
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Error receiving datagram: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    },
                    _ = shutdown_rx.changed() => break,
                }
            }
        })
    }

    /// Hands every queued datagram to the dispatcher. Never waits.
    fn drain_queue(
        &mut self,
        queue_rx: &mut mpsc::Receiver<Datagram>,
        outbox: &mut Vec<Outgoing>,
    ) {
        while let Ok(datagram) = queue_rx.try_recv() {
            self.dispatcher
                .handle_datagram(&datagram.bytes, datagram.addr, outbox);
        }
    }

    /// Writes the outbox to the socket. A failed send only costs that client
    /// one packet.
    fn flush_outbox(&self, outbox: &mut Vec<Outgoing>) {
        for Outgoing { addr, bytes } in outbox.drain(..) {
            if let Err(e) = send_datagram(&self.socket, addr, &bytes) {
                warn!("{}", e);
            }
        }
    }

    /// Runs the tick loop until [`ShutdownHandle::shutdown`] is called.
    pub async fn run(&mut self) {
        let (queue_tx, mut queue_rx) = mpsc::channel(self.queue_capacity);
        let receiver = self.spawn_receiver(queue_tx);
        let mut shutdown_rx = self.shutdown_rx.clone();

        let mut ticker = interval(self.tick_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut outbox = Vec::new();

        info!("Server started, tick every {:?}", self.tick_duration);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.changed() => {}
            }
            if *shutdown_rx.borrow() {
                break;
            }

            self.drain_queue(&mut queue_rx, &mut outbox);
            self.dispatcher.tick(&mut outbox);
            self.flush_outbox(&mut outbox);
        }

        // Closing the queue unblocks a receiver stuck on a full channel
        drop(queue_rx);
        if let Err(e) = receiver.await {
            warn!("Receiver task failed: {}", e);
        }

        info!(
            "Server shut down at tick {} with {} clients",
            self.dispatcher.server_time(),
            self.dispatcher.clients().len()
        );
    }
}

fn send_datagram(socket: &UdpSocket, addr: SocketAddr, bytes: &[u8]) -> Result<(), ServerError> {
    socket
        .try_send_to(bytes, addr)
        .map(|_| ())
        .map_err(|source| ServerError::Send { addr, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::GameWorld;
    use shared::{
        CharacterClass, ClientPacket, JoinRequest, JoinResponse, PacketType, ServerPacket,
    };

    fn loopback_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            tick_rate: 100,
            ..ServerConfig::default()
        }
    }

    fn world() -> GameWorld {
        GameWorld::with_seed(800.0, 600.0, 7)
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = Server::bind(&loopback_config(), world()).await.unwrap();
        let addr = server.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
        assert_eq!(server.dispatcher().server_time(), 0);
    }

    #[tokio::test]
    async fn test_bind_port_in_use_fails() {
        let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig {
            port: taken.local_addr().unwrap().port(),
            ..loopback_config()
        };
        let result = Server::bind(&config, world()).await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = ServerConfig {
            max_clients: 0,
            ..loopback_config()
        };
        let result = Server::bind(&config, world()).await;
        assert!(matches!(result, Err(ServerError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_shutdown_before_run_returns() {
        let mut server = Server::bind(&loopback_config(), world()).await.unwrap();
        server.shutdown_handle().shutdown();

        tokio::time::timeout(Duration::from_secs(2), server.run())
            .await
            .expect("run should stop after shutdown");
    }

    #[tokio::test]
    async fn test_join_over_loopback() {
        let mut server = Server::bind(&loopback_config(), world()).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let handle = tokio::spawn(async move {
            server.run().await;
            server
        });

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let join = ClientPacket::Join(JoinRequest {
            name: "Goku".to_string(),
            class: CharacterClass::Warrior,
            colour: 0xff8800,
        });
        socket
            .send_to(&join.encode().unwrap(), server_addr)
            .await
            .unwrap();

        let mut buffer = vec![0u8; MAX_PACKET_SIZE];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buffer))
            .await
            .unwrap()
            .unwrap();
        match ServerPacket::decode(&buffer[..len]).unwrap() {
            ServerPacket::Response(JoinResponse::Accepted { .. }) => {}
            other => panic!("Expected acceptance, got {:?}", other),
        }

        let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buffer))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(PacketType::of(&buffer[..len]).unwrap(), PacketType::Gamestate);

        shutdown.shutdown();
        let server = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(server.dispatcher().clients().len(), 1);
    }

    #[tokio::test]
    async fn test_send_datagram_reaches_peer() {
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap();

        sender.writable().await.unwrap();
        send_datagram(&sender, target, &[PacketType::Snapshot as u8, 1, 2]).unwrap();

        let mut buffer = [0u8; 16];
        let (len, from) = receiver.recv_from(&mut buffer).await.unwrap();
        assert_eq!(&buffer[..len], &[PacketType::Snapshot as u8, 1, 2]);
        assert_eq!(from, sender.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_failed_send_does_not_block_later_packets() {
        let server = Server::bind(&loopback_config(), world()).await.unwrap();
        server.socket.writable().await.unwrap();
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        // an IPv6 destination cannot be reached from the IPv4 socket
        let unreachable: SocketAddr = "[::1]:9".parse().unwrap();
        let bytes = vec![PacketType::Snapshot as u8, 4, 2];
        let mut outbox = vec![
            Outgoing {
                addr: unreachable,
                bytes: bytes.clone(),
            },
            Outgoing {
                addr: peer.local_addr().unwrap(),
                bytes: bytes.clone(),
            },
        ];

        server.flush_outbox(&mut outbox);
        assert!(outbox.is_empty());

        let mut buffer = [0u8; 16];
        let (len, from) = tokio::time::timeout(Duration::from_secs(2), peer.recv_from(&mut buffer))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buffer[..len], &bytes[..]);
        assert_eq!(from, server.local_addr().unwrap());
    }
}
