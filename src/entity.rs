//! Entities: addressable bundles of capability instances.
//!
//! An entity is built once, from an [`EntityConfig`], when its session is
//! assembled. Construction resolves every requested capability, initializes
//! the instances in resolution order and builds the routing table that maps
//! each payload type to the one capability that handles it. Construction
//! either fully succeeds or leaves nothing behind.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::address::{Address, EntityId, IdSource};
use crate::capability::{CapabilityRef, CapabilitySpec, Registry, Resolver};
use crate::error::{ResolutionError, SchedulingError, TickworkResult, ValidationError};
use crate::message::{Failure, Message, MessageKind, PayloadType};
use crate::processing::ProcessingResult;
use crate::time::SimTime;

/// Separator between the segments of an [`EntityPath`].
pub const PATH_DELIMITER: char = ':';

/// Passes over an entity's own output allowed within one delivery round.
const MAX_LOCAL_PASSES: usize = 64;

/// Hierarchical entity name, e.g. `BLUE:1st Squad:Alice`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityPath(String);

impl EntityPath {
    /// Parses a `:`-separated path.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidPath` for an empty path or an empty segment.
    pub fn parse(path: &str) -> Result<Self, ValidationError> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyName { what: "entity path" });
        }
        if trimmed.split(PATH_DELIMITER).any(|s| s.trim().is_empty()) {
            return Err(ValidationError::InvalidPath {
                path: path.to_string(),
                reason: "empty segment".to_string(),
            });
        }
        let normalized = trimmed
            .split(PATH_DELIMITER)
            .map(str::trim)
            .collect::<Vec<_>>()
            .join(PATH_DELIMITER.to_string().as_str());
        Ok(Self(normalized))
    }

    /// The normalized path text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments, outermost first.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(PATH_DELIMITER)
    }

    /// The last segment.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit(PATH_DELIMITER).next().unwrap_or(&self.0)
    }

    /// Everything but the last segment, if there is more than one.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0
            .rsplit_once(PATH_DELIMITER)
            .map(|(parent, _)| Self(parent.to_string()))
    }
}

impl fmt::Display for EntityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for EntityPath {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<EntityPath> for String {
    fn from(p: EntityPath) -> Self {
        p.0
    }
}

/// Static description of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityConfig {
    /// Where the entity lives; also its client-facing name.
    pub path: EntityPath,
    /// Capabilities requested for this entity, in order.
    pub capabilities: Vec<CapabilitySpec>,
    /// Settings per capability name.
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,
    /// Seed for capability seeds; derived from the session seed when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl EntityConfig {
    /// # Errors
    ///
    /// Returns a validation error if `path` is not a valid entity path.
    pub fn new(path: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            path: EntityPath::parse(path)?,
            capabilities: Vec::new(),
            settings: HashMap::new(),
            seed: None,
        })
    }

    /// Adds a capability to resolve for the entity.
    #[must_use]
    pub fn capability(mut self, spec: CapabilitySpec) -> Self {
        self.capabilities.push(spec);
        self
    }

    /// Settings for the capability named `capability`.
    #[must_use]
    pub fn setting(mut self, capability: impl Into<String>, settings: serde_json::Value) -> Self {
        self.settings.insert(capability.into(), settings);
        self
    }

    /// Seed for this entity's capabilities, overriding the session seed.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// What a capability knows about the entity that owns it.
///
/// A lookup handle, not an owner: it carries the entity's identity and the
/// session's identifier source, nothing else.
#[derive(Debug, Clone)]
pub struct EntityHandle {
    id: EntityId,
    path: EntityPath,
    uuid: Uuid,
    ids: Arc<IdSource>,
}

impl EntityHandle {
    /// A handle for the entity `id` at `path`, drawing sequence numbers from `ids`.
    #[must_use]
    pub fn new(id: EntityId, path: EntityPath, ids: Arc<IdSource>) -> Self {
        Self {
            id,
            path,
            uuid: Uuid::new_v4(),
            ids,
        }
    }

    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    #[must_use]
    pub const fn path(&self) -> &EntityPath {
        &self.path
    }

    /// Unique identity of this entity instance, stable across the session.
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The entity as a whole.
    #[must_use]
    pub const fn address(&self) -> Address {
        Address::external(self.id)
    }

    /// A named capability of this entity, reachable from outside it.
    #[must_use]
    pub fn capability_address(&self, label: &str) -> Address {
        Address::capability(self.id, label)
    }

    /// Sequence number for a message the framework originates.
    ///
    /// Drawn from the same space as client sequence numbers, so a reply
    /// correlated by sequence can never be mistaken for a framework report.
    ///
    /// # Errors
    ///
    /// Returns `IdSpaceExhausted` once the whole `u64` range is used up.
    pub fn next_sequence(&self) -> Result<u64, SchedulingError> {
        self.ids.next_sequence()
    }
}

/// Pending messages of one entity.
///
/// Actions come out in arrival order, followed by due events ordered by
/// scheduled time and then arrival. Events scheduled later stay queued.
#[derive(Debug, Default)]
struct Mailbox {
    actions: VecDeque<Message>,
    events: BTreeMap<(SimTime, u64), Message>,
    arrivals: u64,
}

impl Mailbox {
    fn push(&mut self, message: Message) {
        if message.kind() == MessageKind::Event {
            self.arrivals += 1;
            self.events.insert((message.scheduled_time(), self.arrivals), message);
        } else {
            self.actions.push_back(message);
        }
    }

    fn take_ready(&mut self, now: SimTime) -> Vec<Message> {
        let mut ready: Vec<Message> = self.actions.drain(..).collect();
        // Arrival numbers never reach u64::MAX, so every event at `now` is due.
        let later = self.events.split_off(&(now, u64::MAX));
        let due = std::mem::replace(&mut self.events, later);
        ready.extend(due.into_values());
        ready
    }

    fn next_event_time(&self) -> Option<SimTime> {
        self.events.keys().next().map(|(time, _)| *time)
    }

    fn len(&self) -> usize {
        self.actions.len() + self.events.len()
    }
}

/// An addressable bundle of capability instances.
#[derive(Debug)]
pub struct Entity {
    handle: EntityHandle,
    capabilities: Vec<CapabilityRef>,
    routes: HashMap<PayloadType, usize>,
    tick_set: Vec<usize>,
    mailbox: Mailbox,
}

impl Entity {
    /// Resolves, initializes and wires every capability `config` asks for.
    ///
    /// # Errors
    ///
    /// Returns any resolution or initialization error, and
    /// `DuplicateHandler` if two capabilities claim the same payload type.
    pub fn build(
        config: &EntityConfig,
        registry: &Registry,
        ids: Arc<IdSource>,
        default_seed: u64,
    ) -> TickworkResult<Self> {
        let mut resolver = Resolver::new(registry, config.seed.unwrap_or(default_seed))
            .with_settings(config.settings.clone());
        for spec in &config.capabilities {
            resolver.resolve(spec)?;
        }
        let capabilities = resolver.into_resolved();

        let id = EntityId::new(ids.next_user()?);
        let handle = EntityHandle::new(id, config.path.clone(), ids);

        let mut routes: HashMap<PayloadType, usize> = HashMap::new();
        for (idx, capability) in capabilities.iter().enumerate() {
            for payload in capability.handled_payloads() {
                if let Some(&first) = routes.get(&payload) {
                    return Err(ResolutionError::DuplicateHandler {
                        payload: payload.to_string(),
                        first: capabilities[first].name().to_string(),
                        second: capability.name().to_string(),
                    }
                    .into());
                }
                routes.insert(payload, idx);
            }
        }

        for capability in &capabilities {
            capability.init(&handle)?;
        }

        let tick_set = capabilities
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_time_driven())
            .map(|(idx, _)| idx)
            .collect();

        debug!(
            entity = %handle.path(),
            id = %id,
            capabilities = capabilities.len(),
            "entity constructed"
        );

        Ok(Self {
            handle,
            capabilities,
            routes,
            tick_set,
            mailbox: Mailbox::default(),
        })
    }

    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.handle.id
    }

    #[must_use]
    pub const fn path(&self) -> &EntityPath {
        &self.handle.path
    }

    /// The handle given to the entity's capabilities.
    #[must_use]
    pub const fn handle(&self) -> &EntityHandle {
        &self.handle
    }

    /// Capability instances in resolution order.
    #[must_use]
    pub fn capabilities(&self) -> &[CapabilityRef] {
        &self.capabilities
    }

    /// The instance resolved under `name`.
    #[must_use]
    pub fn capability(&self, name: &str) -> Option<&CapabilityRef> {
        self.capabilities.iter().find(|c| c.name() == name)
    }

    /// The capability that handles `payload`, if any.
    #[must_use]
    pub fn handler_for(&self, payload: PayloadType) -> Option<&CapabilityRef> {
        self.routes.get(&payload).map(|&idx| &self.capabilities[idx])
    }

    /// Time-driven capabilities, in the order they are ticked.
    pub fn tick_set(&self) -> impl Iterator<Item = &CapabilityRef> {
        self.tick_set.iter().map(|&idx| &self.capabilities[idx])
    }

    /// Moves every capability to `Active`.
    ///
    /// # Errors
    ///
    /// Returns a lifecycle error if an instance was not initialized.
    pub fn activate(&self) -> TickworkResult<()> {
        for capability in &self.capabilities {
            capability.activate()?;
        }
        Ok(())
    }

    /// Disposes every capability.
    pub fn dispose(&self) {
        for capability in &self.capabilities {
            capability.dispose();
        }
    }

    /// Queues `message` for the next delivery round.
    pub fn deliver(&mut self, message: Message) {
        trace!(entity = %self.handle.path, class = message.payload().class(), "queued");
        self.mailbox.push(message);
    }

    /// Messages waiting in the mailbox, held events included.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.mailbox.len()
    }

    /// Earliest scheduled time of a held event.
    #[must_use]
    pub fn next_event_time(&self) -> Option<SimTime> {
        self.mailbox.next_event_time()
    }

    /// Delivers every due message, including messages the entity sends to
    /// itself while doing so. Returns the messages addressed elsewhere.
    pub fn process_messages(&mut self, now: SimTime) -> ProcessingResult {
        let mut outbound = ProcessingResult::empty();
        for _ in 0..MAX_LOCAL_PASSES {
            let ready = self.mailbox.take_ready(now);
            if ready.is_empty() {
                return outbound;
            }
            for message in ready {
                let produced = self.dispatch(&message, now);
                self.split_local(produced, &mut outbound);
            }
        }
        warn!(
            entity = %self.handle.path,
            pending = self.mailbox.len(),
            "local message loop did not settle; remaining messages wait for the next round"
        );
        outbound
    }

    /// Invites every time-driven capability to act at `now`, then delivers
    /// whatever they sent to this entity. Returns the messages addressed
    /// elsewhere.
    pub fn run_agents(&mut self, now: SimTime) -> ProcessingResult {
        let mut outbound = ProcessingResult::empty();
        for pos in 0..self.tick_set.len() {
            let capability = self.capabilities[self.tick_set[pos]].clone();
            let produced = match guarded(&capability, || capability.tick(now)) {
                Ok(result) => result,
                Err(failure) => self.agent_failure(&capability, failure, now),
            };
            self.split_local(produced, &mut outbound);
        }
        outbound.merge(self.process_messages(now));
        outbound
    }

    fn split_local(&mut self, produced: ProcessingResult, outbound: &mut ProcessingResult) {
        for message in produced {
            if message.destination().is_local_to(self.handle.id) {
                self.mailbox.push(message);
            } else {
                outbound.push(message);
            }
        }
    }

    fn dispatch(&self, message: &Message, now: SimTime) -> ProcessingResult {
        let payload = message.payload_type();
        let Some(capability) = self.handler_for(payload) else {
            if matches!(message.kind(), MessageKind::Action | MessageKind::Event) {
                debug!(entity = %self.handle.path, class = payload.name(), "unsupported payload");
                return ProcessingResult::of(message.unsupported_reply(now));
            }
            debug!(entity = %self.handle.path, class = payload.name(), "dropping unhandled reply");
            return ProcessingResult::empty();
        };

        trace!(
            entity = %self.handle.path,
            capability = capability.name(),
            class = payload.name(),
            sequence = message.sequence(),
            "dispatch"
        );
        match guarded(capability, || capability.process(message, now)) {
            Ok(result) => result,
            Err(failure) => {
                warn!(
                    entity = %self.handle.path,
                    capability = capability.name(),
                    sequence = message.sequence(),
                    failure = %failure,
                    "capability failed"
                );
                if message.is_error() {
                    return ProcessingResult::empty();
                }
                let failure = Failure {
                    class: Some(payload.name().to_string()),
                    ..failure
                };
                ProcessingResult::of(message.error_reply(failure, now))
            }
        }
    }

    fn agent_failure(&self, capability: &CapabilityRef, failure: Failure, now: SimTime) -> ProcessingResult {
        warn!(
            entity = %self.handle.path,
            capability = capability.name(),
            failure = %failure,
            "time-driven capability failed"
        );
        match self.failure_report(capability, failure, now) {
            Ok(report) => ProcessingResult::of(report),
            Err(err) => {
                error!(
                    entity = %self.handle.path,
                    capability = capability.name(),
                    error = %err,
                    "could not report time-driven failure"
                );
                ProcessingResult::empty()
            }
        }
    }

    fn failure_report(&self, capability: &CapabilityRef, failure: Failure, now: SimTime) -> TickworkResult<Message> {
        Ok(Message::builder()
            .source(self.handle.capability_address(capability.name()))
            .destination(Address::client())
            .sequence(self.handle.next_sequence()?)
            .scheduled_time(now)
            .kind(MessageKind::Error)
            .payload(failure)
            .build()?)
    }
}

/// Runs a capability call, turning both errors and panics into a [`Failure`].
fn guarded(
    capability: &CapabilityRef,
    call: impl FnOnce() -> TickworkResult<ProcessingResult>,
) -> Result<ProcessingResult, Failure> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(Failure::from_error(&err, None)),
        Err(panic) => {
            let text = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            Err(Failure::panicked(capability.name(), None, &text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Capability, Provider, Version};
    use crate::error::{TickworkError, TickworkResult};
    use crate::message::FailureKind;
    use crate::blackboard::{AddEntryRequest, AddEntryResponse, Blackboard};

    #[derive(Debug)]
    struct Ping;

    #[derive(Debug)]
    struct Boom;

    #[derive(Debug, Default)]
    struct Pinger;

    impl Capability for Pinger {
        fn handled_payloads(&self) -> Vec<PayloadType> {
            vec![PayloadType::of::<Ping>(), PayloadType::of::<Boom>()]
        }

        fn process(&mut self, message: &Message, now: SimTime) -> TickworkResult<ProcessingResult> {
            if message.payload_as::<Boom>().is_some() {
                return Err(TickworkError::capability_failed("Pinger", "boom"));
            }
            Ok(ProcessingResult::of(message.reply("pong".to_string(), now)))
        }
    }

    /// Fails every other tick, alternating between an error and a panic.
    #[derive(Debug, Default)]
    struct Flaky {
        ticks: u32,
    }

    impl Capability for Flaky {
        fn handled_payloads(&self) -> Vec<PayloadType> {
            Vec::new()
        }

        fn is_time_driven(&self) -> bool {
            true
        }

        fn tick(&mut self, _now: SimTime) -> TickworkResult<ProcessingResult> {
            self.ticks += 1;
            match self.ticks % 3 {
                1 => Err(TickworkError::capability_failed("Flaky", "sensor offline")),
                2 => panic!("sensor on fire"),
                _ => Ok(ProcessingResult::empty()),
            }
        }
    }

    #[derive(Debug, Default)]
    struct AlsoPing;

    impl Capability for AlsoPing {
        fn handled_payloads(&self) -> Vec<PayloadType> {
            vec![PayloadType::of::<Ping>()]
        }
    }

    fn v1() -> Version {
        Version::new(1, 0, 0)
    }

    fn registry() -> Registry {
        Registry::with_builtins()
            .with(Provider::builder("Pinger", v1()).factory(Pinger::default))
            .unwrap()
            .with(Provider::builder("AlsoPing", v1()).factory(AlsoPing::default))
            .unwrap()
            .with(Provider::builder("Flaky", v1()).factory(Flaky::default))
            .unwrap()
    }

    fn build(specs: &[&str]) -> TickworkResult<Entity> {
        let mut config = EntityConfig::new("BLUE:1st Squad:Alice").unwrap();
        for name in specs {
            config = config.capability(CapabilitySpec::at_least(*name, v1()));
        }
        Entity::build(&config, &registry(), Arc::new(IdSource::default()), 0)
    }

    fn to_entity(entity: &Entity, sequence: u64, payload: impl crate::message::Payload) -> Message {
        Message::builder()
            .source(Address::client())
            .destination(entity.handle().address())
            .sequence(sequence)
            .payload(payload)
            .build()
            .unwrap()
    }

    #[test]
    fn test_path_segments() {
        let path = EntityPath::parse("BLUE : 1st Squad:Alice").unwrap();
        assert_eq!(path.as_str(), "BLUE:1st Squad:Alice");
        assert_eq!(path.name(), "Alice");
        assert_eq!(path.parent().unwrap().as_str(), "BLUE:1st Squad");
        assert_eq!(path.segments().count(), 3);
        assert!(EntityPath::parse("a::b").is_err());
        assert!(EntityPath::parse("  ").is_err());
    }

    #[test]
    fn test_build_initializes_and_routes() {
        let entity = build(&["Pinger", "Blackboard"]).unwrap();
        assert!(entity.id().as_u64() >= crate::address::USER_BLOCK_BEGIN);
        assert!(entity.capabilities().iter().all(|c| c.state().is_ready()));
        assert_eq!(
            entity.handler_for(PayloadType::of::<Ping>()).unwrap().name(),
            "Pinger"
        );
        assert_eq!(
            entity.handler_for(PayloadType::of::<AddEntryRequest>()).unwrap().name(),
            Blackboard::NAME
        );
    }

    #[test]
    fn test_duplicate_handler_rejected_at_construction() {
        let err = build(&["Pinger", "AlsoPing"]).unwrap_err();
        assert!(matches!(
            err,
            TickworkError::Resolution(ResolutionError::DuplicateHandler { .. })
        ));
    }

    #[test]
    fn test_failure_is_isolated_per_message() {
        let mut entity = build(&["Pinger", "Blackboard"]).unwrap();
        entity.deliver(to_entity(&entity, 10_001, Boom));
        entity.deliver(to_entity(&entity, 10_002, AddEntryRequest::new("k", 1_i64, SimTime::ZERO)));

        let out = entity.process_messages(SimTime::ZERO);
        assert_eq!(out.len(), 2);

        let error = &out.messages()[0];
        assert!(error.is_error());
        assert_eq!(error.sequence(), 10_001);
        assert_eq!(error.destination(), &Address::client());
        let failure = error.payload_as::<Failure>().unwrap();
        assert_eq!(failure.kind, FailureKind::CapabilityFailed);
        assert_eq!(failure.class.as_deref(), Some("Boom"));

        let ok = &out.messages()[1];
        assert_eq!(ok.sequence(), 10_002);
        assert!(ok.payload_as::<AddEntryResponse>().is_some());
    }

    #[test]
    fn test_unsupported_payload_becomes_error_reply() {
        let mut entity = build(&["Blackboard"]).unwrap();
        entity.deliver(to_entity(&entity, 10_005, Ping));
        let out = entity.process_messages(SimTime::ZERO);
        let failure = out.messages()[0].payload_as::<Failure>().unwrap();
        assert_eq!(failure.kind, FailureKind::UnsupportedPayload);
        assert_eq!(out.messages()[0].sequence(), 10_005);
    }

    #[test]
    fn test_future_events_are_held() {
        let mut entity = build(&["Pinger"]).unwrap();
        let event = Message::builder()
            .source(Address::client())
            .destination(entity.handle().address())
            .kind(MessageKind::Event)
            .scheduled_time(SimTime::from_millis(100))
            .payload(Ping)
            .build()
            .unwrap();
        entity.deliver(event);

        assert!(entity.process_messages(SimTime::from_millis(99)).is_empty());
        assert_eq!(entity.next_event_time(), Some(SimTime::from_millis(100)));
        assert_eq!(entity.process_messages(SimTime::from_millis(100)).len(), 1);
        assert_eq!(entity.pending(), 0);
    }

    #[test]
    fn test_mailbox_orders_actions_then_events_by_time() {
        let mut mailbox = Mailbox::default();
        let make = |kind, at: i64, seq| {
            Message::builder()
                .source(Address::client())
                .destination(Address::client())
                .kind(kind)
                .scheduled_time(SimTime::from_millis(at))
                .sequence(seq)
                .payload(Ping)
                .build()
                .unwrap()
        };
        mailbox.push(make(MessageKind::Event, 30, 1));
        mailbox.push(make(MessageKind::Action, 0, 2));
        mailbox.push(make(MessageKind::Event, 10, 3));
        mailbox.push(make(MessageKind::Event, 10, 4));
        mailbox.push(make(MessageKind::Event, 50, 5));

        let order: Vec<u64> = mailbox
            .take_ready(SimTime::from_millis(30))
            .iter()
            .map(Message::sequence)
            .collect();
        assert_eq!(order, vec![2, 3, 4, 1]);
        assert_eq!(mailbox.len(), 1);
    }

    #[test]
    fn test_events_at_forever_are_delivered_at_forever() {
        let mut mailbox = Mailbox::default();
        let event = Message::builder()
            .source(Address::client())
            .destination(Address::client())
            .kind(MessageKind::Event)
            .scheduled_time(SimTime::FOREVER)
            .payload(Ping)
            .build()
            .unwrap();
        mailbox.push(event);

        assert!(mailbox.take_ready(SimTime::from_millis(1_000)).is_empty());
        assert_eq!(mailbox.take_ready(SimTime::FOREVER).len(), 1);
        assert_eq!(mailbox.len(), 0);
    }

    #[test]
    fn test_agent_errors_and_panics_are_reported_to_client() {
        let mut entity = build(&["Flaky"]).unwrap();

        let errored = entity.run_agents(SimTime::from_millis(1));
        assert_eq!(errored.len(), 1);
        let report = &errored.messages()[0];
        assert!(report.is_error());
        assert!(report.destination().is_client());
        assert!(report.sequence() >= crate::address::USER_BLOCK_BEGIN);
        assert_eq!(
            report.payload_as::<Failure>().unwrap().kind,
            FailureKind::CapabilityFailed
        );

        let panicked = entity.run_agents(SimTime::from_millis(2));
        let report = &panicked.messages()[0];
        assert_eq!(
            report.payload_as::<Failure>().unwrap().kind,
            FailureKind::CapabilityPanicked
        );
        assert!(report.sequence() > errored.messages()[0].sequence());

        assert!(entity.run_agents(SimTime::from_millis(3)).is_empty());
    }
}
