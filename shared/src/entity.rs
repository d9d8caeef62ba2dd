//! Entity payloads carried inside snapshot deltas.
//!
//! Every entity kind the world can replicate is a variant of [`EntityState`].
//! Create and update deltas both carry the full state, so a client that
//! missed the create of an entity can still materialize it from an update.

use serde::{Deserialize, Serialize};

/// Process-unique entity identifier, assigned by the world and never reused.
pub type EntityId = u32;

/// Character class requested in a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CharacterClass {
    Warrior,
    Ranger,
    Mage,
}

impl CharacterClass {
    /// Maximum health a freshly spawned character of this class starts with.
    pub fn base_health(self) -> u16 {
        match self {
            CharacterClass::Warrior => 150,
            CharacterClass::Ranger => 100,
            CharacterClass::Mage => 80,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    Potion,
    Armour,
    Weapon,
    DragonBall,
}

/// Replicated state of a player-controlled character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterState {
    pub name: String,
    pub class: CharacterClass,
    /// Display colour as 0xRRGGBB.
    pub colour: u32,
    pub x: f32,
    pub y: f32,
    /// Facing angle in radians.
    pub angle: f32,
    pub health: u16,
    pub max_health: u16,
}

/// Replicated state of an item lying in the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemState {
    pub kind: ItemKind,
    pub x: f32,
    pub y: f32,
}

/// Wire payload of one entity, one variant per entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityState {
    Character(CharacterState),
    Item(ItemState),
}

impl EntityState {
    pub fn position(&self) -> (f32, f32) {
        match self {
            EntityState::Character(c) => (c.x, c.y),
            EntityState::Item(i) => (i.x, i.y),
        }
    }
}

/// An entity as handed out by the world: its id plus its current payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub state: EntityState,
}

impl Entity {
    pub fn new(id: EntityId, state: EntityState) -> Self {
        Self { id, state }
    }
}
