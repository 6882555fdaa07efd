//! The tick scheduler.
//!
//! One [`EntityController`] owns every entity of a session, the queue of
//! client submissions and the simulation clock. A round of work runs at a
//! single simulation time:
//!
//! 1. pending submissions are admitted into their entities' mailboxes;
//! 2. every entity, in construction order, processes its due messages;
//! 3. every time-driven capability, in the same order, acts once;
//! 4. messages addressed to the client become tick outputs, messages for
//!    other entities are queued for the next round.
//!
//! Processing is strictly sequential. Identical inputs produce identical
//! outputs.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::address::{Address, AddressKind, EntityId, IdSource};
use crate::capability::{CapabilityRef, Registry};
use crate::entity::{Entity, EntityConfig, EntityPath};
use crate::error::{SchedulingError, TickworkResult, ValidationError};
use crate::message::{Failure, Message, MessageKind};
use crate::processing::ProcessingResult;
use crate::session::commands::{Submission, TickResult};
use crate::time::SimTime;

#[derive(Debug)]
struct PendingSubmission {
    sequence: u64,
    submission: Submission,
}

/// Builder for [`EntityController`].
#[derive(Debug)]
pub struct EntityControllerBuilder {
    registry: Arc<Registry>,
    configs: Vec<EntityConfig>,
    seed: u64,
    epoch: DateTime<Utc>,
}

impl EntityControllerBuilder {
    /// Adds one entity, built in call order.
    #[must_use]
    pub fn entity(mut self, config: EntityConfig) -> Self {
        self.configs.push(config);
        self
    }

    /// Adds several entities, built in iteration order.
    #[must_use]
    pub fn entities(mut self, configs: impl IntoIterator<Item = EntityConfig>) -> Self {
        self.configs.extend(configs);
        self
    }

    /// Session seed; entities without their own seed derive one from it.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Wall-clock instant of simulation time zero.
    #[must_use]
    pub const fn epoch(mut self, epoch: DateTime<Utc>) -> Self {
        self.epoch = epoch;
        self
    }

    /// Builds every configured entity.
    ///
    /// # Errors
    ///
    /// Returns the first entity construction error; no controller is built.
    pub fn build(self) -> TickworkResult<EntityController> {
        let ids = Arc::new(IdSource::default());
        let address = Address::external(EntityId::new(ids.next_system()?));
        let mut controller = EntityController {
            registry: self.registry,
            ids,
            address,
            entities: Vec::new(),
            by_path: HashMap::new(),
            by_id: HashMap::new(),
            pending: VecDeque::new(),
            last_tick_time: SimTime::ZERO,
            epoch: self.epoch,
            seeds: ChaCha8Rng::seed_from_u64(self.seed),
        };
        for config in &self.configs {
            if let Err(err) = controller.add_entity(config) {
                controller.dispose();
                return Err(err);
            }
        }
        info!(entities = controller.entities.len(), "controller ready");
        Ok(controller)
    }
}

/// Owns the entities of a session and drives them through simulation time.
#[derive(Debug)]
pub struct EntityController {
    registry: Arc<Registry>,
    ids: Arc<IdSource>,
    address: Address,
    entities: Vec<Entity>,
    by_path: HashMap<EntityPath, usize>,
    by_id: HashMap<EntityId, usize>,
    pending: VecDeque<PendingSubmission>,
    last_tick_time: SimTime,
    epoch: DateTime<Utc>,
    seeds: ChaCha8Rng,
}

impl EntityController {
    /// Starts a controller over `registry`.
    #[must_use]
    pub fn builder(registry: Arc<Registry>) -> EntityControllerBuilder {
        EntityControllerBuilder {
            registry,
            configs: Vec::new(),
            seed: 0,
            epoch: DateTime::UNIX_EPOCH,
        }
    }

    /// Builds one more entity and makes it addressable.
    ///
    /// The entity either joins fully or not at all.
    ///
    /// # Errors
    ///
    /// Returns any construction error, or `InvalidPath` if the path is taken.
    pub fn add_entity(&mut self, config: &EntityConfig) -> TickworkResult<EntityId> {
        if self.by_path.contains_key(&config.path) {
            return Err(ValidationError::InvalidPath {
                path: config.path.to_string(),
                reason: "an entity with this path already exists".to_string(),
            }
            .into());
        }
        let default_seed = self.seeds.next_u64();
        let entity = Entity::build(config, &self.registry, Arc::clone(&self.ids), default_seed)?;
        if let Err(err) = entity.activate() {
            entity.dispose();
            return Err(err);
        }

        let id = entity.id();
        let idx = self.entities.len();
        self.by_path.insert(entity.path().clone(), idx);
        self.by_id.insert(id, idx);
        self.entities.push(entity);
        Ok(id)
    }

    /// Queues a submission for the next round and returns its sequence id.
    ///
    /// # Errors
    ///
    /// Returns `IdSpaceExhausted` if no sequence id is left.
    pub fn submit(&mut self, submission: Submission) -> TickworkResult<u64> {
        let sequence = self.ids.next_user()?;
        debug!(
            sequence,
            recipient = submission.recipient_path(),
            class = submission.payload().class(),
            "submitted"
        );
        self.pending.push_back(PendingSubmission { sequence, submission });
        Ok(sequence)
    }

    /// Advances simulation time to `time` and runs one round.
    ///
    /// # Errors
    ///
    /// Returns `TemporalOrderingViolation` if `time` is before the last tick;
    /// nothing is processed in that case.
    pub fn tick(&mut self, time: SimTime) -> TickworkResult<TickResult> {
        if time < self.last_tick_time {
            return Err(SchedulingError::TemporalOrderingViolation {
                requested: time,
                last: self.last_tick_time,
            }
            .into());
        }
        let result = self.run_round(time)?;
        self.last_tick_time = time;
        Ok(result)
    }

    /// Runs another round at the last tick time without advancing it.
    ///
    /// Only submissions already pending are admitted.
    ///
    /// # Errors
    ///
    /// Returns an error only if a message cannot be built for a submission.
    pub fn tick_again(&mut self) -> TickworkResult<TickResult> {
        self.run_round(self.last_tick_time)
    }

    fn run_round(&mut self, time: SimTime) -> TickworkResult<TickResult> {
        let mut round = Round::default();

        let admitted: Vec<PendingSubmission> = self.pending.drain(..).collect();
        for pending in admitted {
            self.admit(pending, time, &mut round)?;
        }

        for idx in 0..self.entities.len() {
            let produced = self.entities[idx].process_messages(time);
            self.route(produced, &mut round);
        }
        for idx in 0..self.entities.len() {
            let produced = self.entities[idx].run_agents(time);
            self.route(produced, &mut round);
        }

        let forwarded = round.forwards.len();
        for (idx, message) in round.forwards {
            self.entities[idx].deliver(message);
        }

        let result = TickResult {
            time,
            wall_time: time.to_datetime(self.epoch),
            outputs: round.outputs,
            forwarded,
            dropped: round.dropped,
            pending: self.entities.iter().map(Entity::pending).sum(),
            next_event_time: self.entities.iter().filter_map(Entity::next_event_time).min(),
        };
        debug!(%result, "round complete");
        Ok(result)
    }

    fn admit(&mut self, pending: PendingSubmission, time: SimTime, round: &mut Round) -> TickworkResult<()> {
        let PendingSubmission { sequence, submission } = pending;
        let target = EntityPath::parse(submission.recipient_path())
            .ok()
            .and_then(|path| self.by_path.get(&path).copied());

        let Some(idx) = target else {
            warn!(sequence, recipient = submission.recipient_path(), "unknown entity");
            let failure = Failure::unknown_entity(submission.recipient_path(), Some(submission.payload().class()));
            round.outputs.push(
                Message::builder()
                    .source(self.address.clone())
                    .destination(Address::client())
                    .sequence(sequence)
                    .scheduled_time(time)
                    .kind(MessageKind::Error)
                    .payload(failure)
                    .build()?,
            );
            return Ok(());
        };

        let entity = &mut self.entities[idx];
        let builder = Message::builder()
            .source(Address::client())
            .destination(entity.handle().address())
            .respond_to(Address::client())
            .sequence(sequence);
        let message = match submission {
            Submission::Command(command) => builder
                .kind(MessageKind::Action)
                .scheduled_time(time)
                .shared_payload(command.payload)
                .build()?,
            Submission::Event(event) => builder
                .kind(MessageKind::Event)
                .scheduled_time(event.event_time)
                .shared_payload(event.payload)
                .build()?,
        };
        entity.deliver(message);
        Ok(())
    }

    fn route(&self, produced: ProcessingResult, round: &mut Round) {
        for message in produced {
            let destination = message.destination();
            match (destination.kind(), destination.entity()) {
                (AddressKind::Client, _) => round.outputs.push(message),
                (AddressKind::External, Some(id)) => match self.by_id.get(&id) {
                    Some(&idx) => round.forwards.push((idx, message)),
                    None => {
                        warn!(destination = %destination, sequence = message.sequence(), "no such entity; dropping");
                        round.dropped += 1;
                    }
                },
                _ => {
                    warn!(destination = %destination, sequence = message.sequence(), "unroutable message; dropping");
                    round.dropped += 1;
                }
            }
        }
    }

    /// Disposes every capability of every entity.
    pub fn dispose(&mut self) {
        for entity in &self.entities {
            entity.dispose();
        }
        self.pending.clear();
    }

    /// Time of the most recent tick, `BIG_BANG` before the first.
    #[must_use]
    pub const fn last_tick_time(&self) -> SimTime {
        self.last_tick_time
    }

    /// Wall-clock instant simulation time zero maps to.
    #[must_use]
    pub const fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    /// The controller's own address, used as the source of framework errors.
    #[must_use]
    pub const fn address(&self) -> &Address {
        &self.address
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Entities in construction order.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Entity paths in construction order.
    pub fn entity_paths(&self) -> impl Iterator<Item = &EntityPath> {
        self.entities.iter().map(Entity::path)
    }

    /// The entity at `path`, or `None` if the path is unknown or malformed.
    #[must_use]
    pub fn entity(&self, path: &str) -> Option<&Entity> {
        let path = EntityPath::parse(path).ok()?;
        self.by_path.get(&path).map(|&idx| &self.entities[idx])
    }

    /// The entity with identifier `id`.
    #[must_use]
    pub fn entity_by_id(&self, id: EntityId) -> Option<&Entity> {
        self.by_id.get(&id).map(|&idx| &self.entities[idx])
    }

    /// The capability named `name` on the entity at `path`.
    #[must_use]
    pub fn find_capability(&self, path: &str, name: &str) -> Option<CapabilityRef> {
        self.entity(path)?.capability(name).cloned()
    }

    /// Submissions waiting for the next round.
    #[must_use]
    pub fn pending_submissions(&self) -> usize {
        self.pending.len()
    }
}

#[derive(Default)]
struct Round {
    outputs: Vec<Message>,
    forwards: Vec<(usize, Message)>,
    dropped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::{AddEntryRequest, AddEntryResponse, Blackboard, GetEntryRequest, GetEntryResponse};
    use crate::capability::{CapabilitySpec, Version};
    use crate::message::FailureKind;
    use crate::session::commands::{Command, Event};

    fn controller() -> EntityController {
        let config = EntityConfig::new("BLUE:Alice")
            .unwrap()
            .capability(CapabilitySpec::at_least(Blackboard::NAME, Version::new(1, 0, 0)));
        EntityController::builder(Arc::new(Registry::with_builtins()))
            .entity(config)
            .build()
            .unwrap()
    }

    #[test]
    fn test_tick_rejects_going_backwards() {
        let mut c = controller();
        c.tick(SimTime::from_millis(100)).unwrap();
        let err = c.tick(SimTime::from_millis(50)).unwrap_err();
        assert!(err.is_scheduling());
        assert_eq!(c.last_tick_time(), SimTime::from_millis(100));
        // Same time is allowed.
        c.tick(SimTime::from_millis(100)).unwrap();
    }

    #[test]
    fn test_tick_again_keeps_time() {
        let mut c = controller();
        c.tick(SimTime::from_millis(100)).unwrap();
        let seq = c
            .submit(Command::new("BLUE:Alice", GetEntryRequest::new("k")).into())
            .unwrap();
        let result = c.tick_again().unwrap();
        assert_eq!(result.time, SimTime::from_millis(100));
        assert_eq!(c.last_tick_time(), SimTime::from_millis(100));
        assert_eq!(result.reply_as::<GetEntryResponse>(seq).unwrap().value, None);
    }

    #[test]
    fn test_unknown_entity_is_an_error_output() {
        let mut c = controller();
        let seq = c.submit(Command::new("RED:Nobody", GetEntryRequest::new("k")).into()).unwrap();
        let result = c.tick(SimTime::ZERO).unwrap();
        let failures: Vec<_> = result.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, seq);
        assert_eq!(failures[0].1.kind, FailureKind::UnknownEntity);
    }

    #[test]
    fn test_events_wait_for_their_time() {
        let mut c = controller();
        let add = AddEntryRequest::new("k", 1_i64, SimTime::ZERO);
        let seq = c
            .submit(Event::new("BLUE:Alice", add, SimTime::from_millis(500)).into())
            .unwrap();

        let early = c.tick(SimTime::from_millis(100)).unwrap();
        assert!(early.outputs.is_empty());
        assert_eq!(early.next_event_time, Some(SimTime::from_millis(500)));

        let due = c.tick(SimTime::from_millis(500)).unwrap();
        assert_eq!(due.reply_as::<AddEntryResponse>(seq).unwrap().entry_count, 1);
        assert_eq!(due.next_event_time, None);
    }

    #[test]
    fn test_duplicate_path_rejected_without_side_effects() {
        let mut c = controller();
        let config = EntityConfig::new("BLUE:Alice").unwrap();
        assert!(c.add_entity(&config).unwrap_err().is_validation());
        assert_eq!(c.entities().len(), 1);
    }

    #[test]
    fn test_failed_entity_does_not_join() {
        let mut c = controller();
        let config = EntityConfig::new("BLUE:Bob")
            .unwrap()
            .capability(CapabilitySpec::at_least("Missing", Version::new(1, 0, 0)));
        assert!(c.add_entity(&config).unwrap_err().is_resolution());
        assert!(c.entity("BLUE:Bob").is_none());
        assert_eq!(c.entity_paths().count(), 1);
    }

    #[test]
    fn test_capabilities_are_active_after_joining() {
        let c = controller();
        let board = c.find_capability("BLUE:Alice", Blackboard::NAME).unwrap();
        assert_eq!(board.state(), crate::capability::LifecycleState::Active);
    }

    #[test]
    fn test_wall_time_follows_epoch() {
        let mut c = controller();
        let result = c.tick(SimTime::from_millis(2_000)).unwrap();
        assert_eq!(result.wall_time, Some(DateTime::UNIX_EPOCH + chrono::Duration::seconds(2)));
    }
}
