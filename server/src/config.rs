//! Command line configuration for the server.
//!
//! Capacity, timeout and resend values are tuning knobs, not protocol: any
//! positive value keeps the sync protocol correct.

use clap::Parser;
use shared::Tick;
use std::time::Duration;

use crate::error::ServerError;

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(author, version, about)]
pub struct ServerConfig {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,

    /// UDP port to listen on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value_t = 30)]
    pub tick_rate: u32,

    /// Maximum number of connected clients
    #[arg(short, long, default_value_t = 16)]
    pub max_clients: usize,

    /// Ticks between scans for silent clients
    #[arg(long, default_value_t = 60)]
    pub check_interval: u32,

    /// Ticks of silence after which a client is dropped
    #[arg(long, default_value_t = 200)]
    pub timeout_ticks: Tick,

    /// Ticks between full gamestate resends to clients that have not sent a command yet
    #[arg(long, default_value_t = 30)]
    pub resend_interval: u32,

    /// Unacknowledged snapshots kept per client before falling back to a full gamestate
    #[arg(long, default_value_t = 64)]
    pub max_backlog: usize,

    /// Capacity of the queue between the socket reader and the tick loop
    #[arg(long, default_value_t = 1024)]
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig::parse_from(["server"])
    }
}

impl ServerConfig {
    /// `host:port` string handed to the socket bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Time between ticks. A zero tick rate is treated as 1 Hz here;
    /// [`ServerConfig::validate`] rejects it outright.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.tick_rate.max(1)))
    }

    /// Rejects zero rates, capacities and intervals.
    pub fn validate(&self) -> Result<(), ServerError> {
        let checks = [
            (self.tick_rate == 0, "tick rate must be positive"),
            (self.max_clients == 0, "max clients must be positive"),
            (self.check_interval == 0, "check interval must be positive"),
            (self.timeout_ticks <= 0, "timeout ticks must be positive"),
            (self.resend_interval == 0, "resend interval must be positive"),
            (self.max_backlog == 0, "max backlog must be positive"),
            (self.queue_capacity == 0, "queue capacity must be positive"),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(ServerError::InvalidConfig(reason.to_string())),
            None => Ok(()),
        }
    }
}
