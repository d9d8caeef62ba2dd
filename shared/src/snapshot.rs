//! Delta snapshots: what changed in the world as of one server tick.
//!
//! A snapshot holds three disjoint sets keyed by entity id: creates, updates
//! and deletes. The server builds one per tick and keeps copies in each
//! client's backlog until the client acknowledges the tick; unacknowledged
//! copies are coalesced with [`Snapshot::merge_missing`] before sending.

use bincode::Options;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::entity::{Entity, EntityId, EntityState};
use crate::packet::{
    encode_packet, wire_options, PacketError, PacketType, Sequence, Tick, MAX_PACKET_SIZE,
};

/// Encoded length of a SNAPSHOT or GAMESTATE packet with no deltas: tag,
/// server time, acked sequence and the u64 delta count.
const HEADER_LEN: usize = 1 + 4 + 4 + 8;

/// One entity change as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityDelta {
    Create { id: EntityId, state: EntityState },
    Update { id: EntityId, state: EntityState },
    Delete { id: EntityId },
}

impl EntityDelta {
    pub fn id(&self) -> EntityId {
        match self {
            EntityDelta::Create { id, .. }
            | EntityDelta::Update { id, .. }
            | EntityDelta::Delete { id } => *id,
        }
    }

    pub fn kind(&self) -> DeltaKind {
        match self {
            EntityDelta::Create { .. } => DeltaKind::Create,
            EntityDelta::Update { .. } => DeltaKind::Update,
            EntityDelta::Delete { .. } => DeltaKind::Delete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    Create,
    Update,
    Delete,
}

// Borrowing twin of `EntityDelta`; variant order must match so both encode
// identically.
#[derive(Serialize)]
enum DeltaRef<'a> {
    Create { id: EntityId, state: &'a EntityState },
    Update { id: EntityId, state: &'a EntityState },
    Delete { id: EntityId },
}

#[derive(Serialize)]
struct SnapshotWireRef<'a> {
    server_time: Tick,
    acked_seq: Sequence,
    deltas: Vec<DeltaRef<'a>>,
}

#[derive(Deserialize)]
pub(crate) struct SnapshotWire {
    server_time: Tick,
    acked_seq: Sequence,
    deltas: Vec<EntityDelta>,
}

/// Everything that changed, as known so far, as of `server_time`.
///
/// An entity id lives in at most one of creates, updates and deletes.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    server_time: Tick,
    acked_seq: Sequence,
    creates: BTreeMap<EntityId, EntityState>,
    updates: BTreeMap<EntityId, EntityState>,
    deletes: BTreeSet<EntityId>,
}

impl Snapshot {
    pub fn new(server_time: Tick, acked_seq: Sequence) -> Self {
        Self {
            server_time,
            acked_seq,
            creates: BTreeMap::new(),
            updates: BTreeMap::new(),
            deletes: BTreeSet::new(),
        }
    }

    /// Builds a full-state snapshot: every live entity as a create.
    pub fn full_state(
        server_time: Tick,
        acked_seq: Sequence,
        entities: impl IntoIterator<Item = Entity>,
    ) -> Self {
        let mut snapshot = Snapshot::new(server_time, acked_seq);
        for entity in entities {
            snapshot.add_create(entity.id, entity.state);
        }
        snapshot
    }

    /// Rebuilds a snapshot from a delta list; later deltas for the same id win.
    pub fn from_deltas(
        server_time: Tick,
        acked_seq: Sequence,
        deltas: impl IntoIterator<Item = EntityDelta>,
    ) -> Self {
        let mut snapshot = Snapshot::new(server_time, acked_seq);
        for delta in deltas {
            match delta {
                EntityDelta::Create { id, state } => snapshot.add_create(id, state),
                EntityDelta::Update { id, state } => snapshot.add_update(id, state),
                EntityDelta::Delete { id } => snapshot.add_delete(id),
            }
        }
        snapshot
    }

    pub fn server_time(&self) -> Tick {
        self.server_time
    }

    pub fn acked_seq(&self) -> Sequence {
        self.acked_seq
    }

    /// Returns the same snapshot answering a different client command.
    pub fn with_acked_seq(mut self, acked_seq: Sequence) -> Self {
        self.acked_seq = acked_seq;
        self
    }

    /// Records `id` as newly created, dropping any update or delete for it.
    pub fn add_create(&mut self, id: EntityId, state: EntityState) {
        self.updates.remove(&id);
        self.deletes.remove(&id);
        self.creates.insert(id, state);
    }

    /// Records a changed entity. Clears a create or delete for the same id.
    pub fn add_update(&mut self, id: EntityId, state: EntityState) {
        self.creates.remove(&id);
        self.deletes.remove(&id);
        self.updates.insert(id, state);
    }

    /// Records `id` as gone; a delete replaces whatever was there.
    pub fn add_delete(&mut self, id: EntityId) {
        self.creates.remove(&id);
        self.updates.remove(&id);
        self.deletes.insert(id);
    }

    /// Whether `id` appears in any category.
    pub fn contains(&self, id: EntityId) -> bool {
        self.category(id).is_some()
    }

    pub fn category(&self, id: EntityId) -> Option<DeltaKind> {
        if self.deletes.contains(&id) {
            Some(DeltaKind::Delete)
        } else if self.creates.contains_key(&id) {
            Some(DeltaKind::Create)
        } else if self.updates.contains_key(&id) {
            Some(DeltaKind::Update)
        } else {
            None
        }
    }

    pub fn create(&self, id: EntityId) -> Option<&EntityState> {
        self.creates.get(&id)
    }

    pub fn update(&self, id: EntityId) -> Option<&EntityState> {
        self.updates.get(&id)
    }

    pub fn is_deleted(&self, id: EntityId) -> bool {
        self.deletes.contains(&id)
    }

    pub fn creates(&self) -> &BTreeMap<EntityId, EntityState> {
        &self.creates
    }

    pub fn updates(&self) -> &BTreeMap<EntityId, EntityState> {
        &self.updates
    }

    pub fn deletes(&self) -> &BTreeSet<EntityId> {
        &self.deletes
    }

    /// Number of entity entries across all three categories.
    pub fn len(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies in every entry of `other` whose id this snapshot does not
    /// mention at all. Existing entries are never overwritten.
    ///
    /// Deletes go first so that an id deleted here, or deleted in `other`,
    /// can no longer pick up a create or update. Callers coalescing a backlog
    /// must merge newest to oldest so the freshest payload for an id wins.
    pub fn merge_missing(&mut self, other: &Snapshot) {
        for &id in &other.deletes {
            if !self.contains(id) {
                self.deletes.insert(id);
            }
        }

        for (&id, state) in &other.creates {
            if !self.contains(id) {
                self.creates.insert(id, state.clone());
            }
        }

        for (&id, state) in &other.updates {
            if !self.contains(id) {
                self.updates.insert(id, state.clone());
            }
        }
    }

    /// Deltas in wire order: deletes, then creates, then updates.
    pub fn deltas(&self) -> impl Iterator<Item = EntityDelta> + '_ {
        let deletes = self.deletes.iter().map(|&id| EntityDelta::Delete { id });
        let creates = self
            .creates
            .iter()
            .map(|(&id, state)| EntityDelta::Create {
                id,
                state: state.clone(),
            });
        let updates = self
            .updates
            .iter()
            .map(|(&id, state)| EntityDelta::Update {
                id,
                state: state.clone(),
            });
        deletes.chain(creates).chain(updates)
    }

    fn to_wire(&self) -> SnapshotWireRef<'_> {
        let mut deltas = Vec::with_capacity(self.len());
        deltas.extend(self.deletes.iter().map(|&id| DeltaRef::Delete { id }));
        deltas.extend(
            self.creates
                .iter()
                .map(|(&id, state)| DeltaRef::Create { id, state }),
        );
        deltas.extend(
            self.updates
                .iter()
                .map(|(&id, state)| DeltaRef::Update { id, state }),
        );
        SnapshotWireRef {
            server_time: self.server_time,
            acked_seq: self.acked_seq,
            deltas,
        }
    }

    /// Splits this snapshot into parts that each encode within
    /// [`MAX_PACKET_SIZE`].
    ///
    /// Every part carries the same server time and acked sequence. Wire order
    /// is kept, so deletes land in the earliest parts. A delta too large for
    /// a packet of its own is left out; callers can compare the summed
    /// [`Snapshot::len`] of the parts with the original to notice. An empty
    /// snapshot yields a single empty part.
    pub fn split_to_fit(&self) -> Vec<Snapshot> {
        self.split_within(MAX_PACKET_SIZE)
    }

    fn split_within(&self, max_len: usize) -> Vec<Snapshot> {
        let mut parts = Vec::new();
        let mut current = Snapshot::new(self.server_time, self.acked_seq);
        let mut current_len = HEADER_LEN;

        for delta in self.to_wire().deltas {
            let delta_len = match wire_options().serialized_size(&delta) {
                Ok(len) => len as usize,
                Err(_) => continue,
            };
            if HEADER_LEN + delta_len > max_len {
                continue;
            }
            if current_len + delta_len > max_len {
                let fresh = Snapshot::new(self.server_time, self.acked_seq);
                parts.push(std::mem::replace(&mut current, fresh));
                current_len = HEADER_LEN;
            }

            match delta {
                DeltaRef::Create { id, state } => {
                    current.creates.insert(id, state.clone());
                }
                DeltaRef::Update { id, state } => {
                    current.updates.insert(id, state.clone());
                }
                DeltaRef::Delete { id } => {
                    current.deletes.insert(id);
                }
            }
            current_len += delta_len;
        }

        parts.push(current);
        parts
    }

    pub(crate) fn from_wire(wire: SnapshotWire) -> Self {
        Snapshot::from_deltas(wire.server_time, wire.acked_seq, wire.deltas)
    }

    /// Encodes this snapshot as a SNAPSHOT packet.
    pub fn serialize(&self) -> Result<Vec<u8>, PacketError> {
        encode_packet(PacketType::Snapshot, &self.to_wire())
    }

    /// Encodes this snapshot as a GAMESTATE packet.
    pub fn serialize_gamestate(&self) -> Result<Vec<u8>, PacketError> {
        encode_packet(PacketType::Gamestate, &self.to_wire())
    }
}
