//! Built-in time-driven reporter.
//!
//! The telemetry agent watches a configured set of Blackboard keys and,
//! on every tick, reports the value each key holds at that time to the
//! client. Keys that hold nothing, or hold something other than a
//! [`Value`], are skipped.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::address::Address;
use crate::blackboard::Blackboard;
use crate::capability::{
    Capability, CapabilityConfig, CapabilityRef, CapabilitySpec, Provider, Requirement, Version,
};
use crate::entity::EntityHandle;
use crate::error::{TickworkError, TickworkResult};
use crate::message::{Message, MessageKind, PayloadType};
use crate::processing::ProcessingResult;
use crate::time::SimTime;
use crate::value::Value;

/// Slot the Blackboard is injected into.
pub const BLACKBOARD_SLOT: &str = "blackboard";

/// One observed Blackboard value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySample {
    /// Blackboard key the value was read from.
    pub key: String,
    /// Time the value was read at.
    pub time: SimTime,
    pub value: Value,
}

/// Settings accepted by [`TelemetryAgent`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Blackboard keys to report, in reporting order.
    pub keys: Vec<String>,
}

/// Samples Blackboard keys once per tick.
#[derive(Debug, Default)]
pub struct TelemetryAgent {
    keys: Vec<String>,
    blackboard: Option<Arc<Mutex<Blackboard>>>,
    entity: Option<EntityHandle>,
}

impl TelemetryAgent {
    /// Capability name the agent is registered under.
    pub const NAME: &'static str = "Telemetry";
    /// Version of the built-in provider.
    pub const VERSION: Version = Version::new(1, 0, 0);

    /// An agent reporting no keys until configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry entry creating a fresh agent per requirer.
    #[must_use]
    pub fn provider() -> Provider {
        Provider::builder(Self::NAME, Self::VERSION)
            .implementation("BlackboardTelemetry")
            .description("Reports configured Blackboard keys to the client every tick")
            .factory(Self::new)
    }

    /// Keys being reported.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    fn sample(&self, now: SimTime) -> Vec<TelemetrySample> {
        let Some(board) = &self.blackboard else {
            return Vec::new();
        };
        let mut board = board.lock().unwrap_or_else(PoisonError::into_inner);
        self.keys
            .iter()
            .filter_map(|key| {
                board.get_as::<Value>(key, now).map(|value| TelemetrySample {
                    key: key.clone(),
                    time: now,
                    value: (*value).clone(),
                })
            })
            .collect()
    }
}

impl Capability for TelemetryAgent {
    fn requirements(&self) -> Vec<Requirement> {
        vec![Requirement::new(
            BLACKBOARD_SLOT,
            CapabilitySpec::at_least(Blackboard::NAME, Blackboard::VERSION),
        )]
    }

    fn inject(&mut self, slot: &str, collaborator: &CapabilityRef) -> TickworkResult<()> {
        if slot != BLACKBOARD_SLOT {
            return Err(TickworkError::internal(format!("no slot named '{slot}'")));
        }
        let board = collaborator.downcast::<Blackboard>().ok_or_else(|| {
            TickworkError::internal(format!("'{}' is not an in-memory Blackboard", collaborator.descriptor()))
        })?;
        self.blackboard = Some(board);
        Ok(())
    }

    fn configure(&mut self, config: &CapabilityConfig) -> TickworkResult<()> {
        let settings: TelemetrySettings = config.settings_or_default()?;
        self.keys = settings.keys;
        Ok(())
    }

    fn init(&mut self, entity: &EntityHandle) -> TickworkResult<()> {
        self.entity = Some(entity.clone());
        Ok(())
    }

    fn handled_payloads(&self) -> Vec<PayloadType> {
        Vec::new()
    }

    fn is_time_driven(&self) -> bool {
        true
    }

    fn tick(&mut self, now: SimTime) -> TickworkResult<ProcessingResult> {
        let Some(entity) = &self.entity else {
            return Ok(ProcessingResult::empty());
        };
        let mut out = ProcessingResult::empty();
        for sample in self.sample(now) {
            trace!(entity = %entity.path(), key = %sample.key, "telemetry sample");
            out.push(
                Message::builder()
                    .source(entity.capability_address(Self::NAME))
                    .destination(Address::client())
                    .sequence(entity.next_sequence()?)
                    .scheduled_time(now)
                    .kind(MessageKind::Event)
                    .payload(sample)
                    .build()?,
            );
        }
        Ok(out)
    }

    fn dispose(&mut self) {
        self.blackboard = None;
    }
}
