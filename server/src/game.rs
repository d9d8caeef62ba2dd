//! World collaborator consumed by the dispatcher.
//!
//! The sync core only needs the [`World`] trait: per-tick change buffers,
//! the live entity set, player spawning and action application.
//! [`GameWorld`] is a small arena implementation used by the server binary
//! and the tests.

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    Action, CharacterClass, CharacterState, Entity, EntityId, EntityState, ItemKind, ItemState,
};
use std::collections::{BTreeMap, HashMap};

pub const WORLD_WIDTH: f32 = 800.0;
pub const WORLD_HEIGHT: f32 = 600.0;
/// Distance a character covers per tick.
pub const CHARACTER_SPEED: f32 = 4.0;
pub const ATTACK_RANGE: f32 = 40.0;
pub const ATTACK_DAMAGE: u16 = 10;
pub const PICKUP_RANGE: f32 = 24.0;

pub trait World {
    /// Entities created since the change buffers were last cleared.
    fn entities_added_since_last_tick(&self) -> Vec<Entity>;

    /// Entities removed since the change buffers were last cleared.
    fn entities_removed_since_last_tick(&self) -> Vec<EntityId>;

    /// Current state of every live entity.
    fn live_entities(&self) -> Vec<Entity>;

    fn clear_change_buffers(&mut self);

    fn spawn_player(&mut self, name: &str, class: CharacterClass, colour: u32) -> EntityId;

    fn despawn(&mut self, id: EntityId);

    fn apply_action(&mut self, id: EntityId, action: &Action);

    /// Advances the simulation by one tick.
    fn step(&mut self) {}
}

pub struct GameWorld {
    width: f32,
    height: f32,
    entities: BTreeMap<EntityId, EntityState>,
    move_targets: HashMap<EntityId, (f32, f32)>,
    added: Vec<EntityId>,
    removed: Vec<EntityId>,
    next_id: EntityId,
    rng: StdRng,
}

impl GameWorld {
    pub fn new(width: f32, height: f32) -> Self {
        Self::with_rng(width, height, StdRng::from_entropy())
    }

    /// World with reproducible spawn positions.
    pub fn with_seed(width: f32, height: f32, seed: u64) -> Self {
        Self::with_rng(width, height, StdRng::seed_from_u64(seed))
    }

    fn with_rng(width: f32, height: f32, rng: StdRng) -> Self {
        Self {
            width,
            height,
            entities: BTreeMap::new(),
            move_targets: HashMap::new(),
            added: Vec::new(),
            removed: Vec::new(),
            next_id: 1,
            rng,
        }
    }

    fn take_id(&mut self) -> EntityId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn random_position(&mut self) -> (f32, f32) {
        (
            self.rng.gen_range(0.0..self.width),
            self.rng.gen_range(0.0..self.height),
        )
    }

    fn insert(&mut self, state: EntityState) -> EntityId {
        let id = self.take_id();
        self.entities.insert(id, state);
        self.added.push(id);
        id
    }

    pub fn spawn_item(&mut self, kind: ItemKind) -> EntityId {
        let (x, y) = self.random_position();
        let id = self.insert(EntityState::Item(ItemState { kind, x, y }));
        debug!("Spawned {:?} {} at ({:.1}, {:.1})", kind, id, x, y);
        id
    }

    pub fn entity(&self, id: EntityId) -> Option<&EntityState> {
        self.entities.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn clamp(&self, x: f32, y: f32) -> (f32, f32) {
        (x.clamp(0.0, self.width), y.clamp(0.0, self.height))
    }

    fn distance(&self, a: EntityId, b: EntityId) -> Option<f32> {
        let (ax, ay) = self.entities.get(&a)?.position();
        let (bx, by) = self.entities.get(&b)?.position();
        Some(((bx - ax).powi(2) + (by - ay).powi(2)).sqrt())
    }

    fn attack(&mut self, attacker: EntityId, target: EntityId) {
        if attacker == target {
            return;
        }
        match self.distance(attacker, target) {
            Some(distance) if distance <= ATTACK_RANGE => {}
            _ => return,
        }

        let respawn_at = self.random_position();
        if let Some(EntityState::Character(victim)) = self.entities.get_mut(&target) {
            victim.health = victim.health.saturating_sub(ATTACK_DAMAGE);
            if victim.health == 0 {
                info!("{} was defeated, respawning", victim.name);
                victim.health = victim.max_health;
                victim.x = respawn_at.0;
                victim.y = respawn_at.1;
                self.move_targets.remove(&target);
            }
        }
    }

    fn pick_up(&mut self, character: EntityId, item: EntityId) {
        let is_item = matches!(self.entities.get(&item), Some(EntityState::Item(_)));
        let in_range = self
            .distance(character, item)
            .map_or(false, |distance| distance <= PICKUP_RANGE);

        if is_item && in_range {
            self.despawn(item);
        }
    }
}

impl World for GameWorld {
    fn entities_added_since_last_tick(&self) -> Vec<Entity> {
        self.added
            .iter()
            .filter_map(|id| {
                self.entities
                    .get(id)
                    .map(|state| Entity::new(*id, state.clone()))
            })
            .collect()
    }

    fn entities_removed_since_last_tick(&self) -> Vec<EntityId> {
        self.removed.clone()
    }

    fn live_entities(&self) -> Vec<Entity> {
        self.entities
            .iter()
            .map(|(id, state)| Entity::new(*id, state.clone()))
            .collect()
    }

    fn clear_change_buffers(&mut self) {
        self.added.clear();
        self.removed.clear();
    }

    fn spawn_player(&mut self, name: &str, class: CharacterClass, colour: u32) -> EntityId {
        let (x, y) = self.random_position();
        let max_health = class.base_health();
        let id = self.insert(EntityState::Character(CharacterState {
            name: name.to_string(),
            class,
            colour,
            x,
            y,
            angle: 0.0,
            health: max_health,
            max_health,
        }));

        info!("Added player {} ({}) at ({:.1}, {:.1})", id, name, x, y);
        id
    }

    fn despawn(&mut self, id: EntityId) {
        if self.entities.remove(&id).is_some() {
            self.move_targets.remove(&id);
            self.removed.push(id);
            debug!("Removed entity {}", id);
        }
    }

    fn apply_action(&mut self, id: EntityId, action: &Action) {
        if !matches!(self.entities.get(&id), Some(EntityState::Character(_))) {
            return;
        }

        match *action {
            Action::Idle => {
                self.move_targets.remove(&id);
            }
            Action::MoveTo { x, y } => {
                let target = self.clamp(x, y);
                self.move_targets.insert(id, target);
            }
            Action::Attack { target } => self.attack(id, target),
            Action::PickUp { item } => self.pick_up(id, item),
        }
    }

    fn step(&mut self) {
        let mut arrived = Vec::new();

        for (id, &(tx, ty)) in &self.move_targets {
            let Some(EntityState::Character(character)) = self.entities.get_mut(id) else {
                continue;
            };

            let dx = tx - character.x;
            let dy = ty - character.y;
            let distance = (dx * dx + dy * dy).sqrt();

            if distance <= CHARACTER_SPEED {
                character.x = tx;
                character.y = ty;
                arrived.push(*id);
            } else {
                character.x += dx / distance * CHARACTER_SPEED;
                character.y += dy / distance * CHARACTER_SPEED;
                character.angle = dy.atan2(dx);
            }
        }

        for id in arrived {
            self.move_targets.remove(&id);
        }
    }
}
