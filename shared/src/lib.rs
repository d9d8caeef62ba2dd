//! Wire protocol shared by the server and its clients.
//!
//! - [`packet`]: packet type tags, message bodies and the binary codec.
//! - [`snapshot`]: per-tick delta snapshots and the merge used to coalesce them.
//! - [`entity`]: entity payloads replicated inside snapshots.

pub mod entity;
pub mod packet;
pub mod snapshot;

pub use entity::{
    CharacterClass, CharacterState, Entity, EntityId, EntityState, ItemKind, ItemState,
};
pub use packet::{
    Action, ClientPacket, Command, JoinRequest, JoinResponse, PacketError, PacketType, Sequence,
    ServerPacket, Tick, MAX_NAME_LEN, MAX_PACKET_SIZE, NO_ACK,
};
pub use snapshot::{DeltaKind, EntityDelta, Snapshot};
