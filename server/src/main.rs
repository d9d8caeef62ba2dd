use clap::Parser;
use log::{info, warn};
use server::config::ServerConfig;
use server::game::{GameWorld, WORLD_HEIGHT, WORLD_WIDTH};
use server::network::Server;
use shared::ItemKind;

/// Items scattered over the arena at startup
const STARTING_ITEMS: [ItemKind; 6] = [
    ItemKind::Potion,
    ItemKind::Potion,
    ItemKind::Armour,
    ItemKind::Weapon,
    ItemKind::Weapon,
    ItemKind::DragonBall,
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = ServerConfig::parse();
    config.validate()?;

    let mut world = GameWorld::new(WORLD_WIDTH, WORLD_HEIGHT);
    for kind in STARTING_ITEMS {
        world.spawn_item(kind);
    }

    let mut server = Server::bind(&config, world).await?;
    info!(
        "Accepting up to {} clients at {} Hz",
        config.max_clients, config.tick_rate
    );

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down gracefully...");
                shutdown.shutdown();
            }
            Err(e) => warn!("Unable to listen for Ctrl+C: {}", e),
        }
    });

    server.run().await;
    Ok(())
}
