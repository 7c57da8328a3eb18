//! # satrx-common
//!
//! Common types and traits for the satrx receive-path simulator.
//!
//! This crate provides core simulation primitives including:
//! - Time representation ([`SimTime`])
//! - Entity identification ([`EntityId`], [`Address`])
//! - The signal parameters record carried by every transmission ([`SignalParameters`])
//! - Event system ([`Event`], [`EventPayload`])
//! - Simulation context ([`SimContext`])
//! - Entity traits ([`Entity`]) and the [`EntityRegistry`]
//! - Carrier settings shared between the scenario model and the receivers ([`CarrierSettings`])

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Simulation errors.
#[derive(Debug, Error)]
pub enum SimError {
    /// Entity not found.
    #[error("Entity not found: {0:?}")]
    EntityNotFound(EntityId),

    /// Invalid event target.
    #[error("Invalid event target: {0:?}")]
    InvalidTarget(EntityId),

    /// Simulation time overflow.
    #[error("Simulation time overflow")]
    TimeOverflow,

    /// Event handler error.
    #[error("Event handler error in entity {entity:?}: {message}")]
    HandlerError {
        /// Entity that had the error.
        entity: EntityId,
        /// Error message.
        message: String,
    },

    /// An entity's internal invariant no longer holds.
    #[error("Invariant violated in entity {entity:?}: {message}")]
    InvariantViolation {
        /// Entity whose state is inconsistent.
        entity: EntityId,
        /// What was found.
        message: String,
    },
}

// ============================================================================
// Time Types
// ============================================================================

/// Simulation time in microseconds since simulation start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SimTime(u64);

impl SimTime {
    /// Zero time.
    pub const ZERO: SimTime = SimTime(0);

    /// Largest representable time.
    pub const MAX: SimTime = SimTime(u64::MAX);

    /// Create from microseconds.
    pub fn from_micros(us: u64) -> Self {
        SimTime(us)
    }

    /// Create from milliseconds.
    pub fn from_millis(ms: u64) -> Self {
        SimTime(ms * 1000)
    }

    /// Create from seconds (float), rounded to the nearest microsecond.
    ///
    /// Negative and NaN inputs map to zero.
    pub fn from_secs(s: f64) -> Self {
        if !(s > 0.0) {
            return SimTime::ZERO;
        }
        SimTime((s * 1_000_000.0).round() as u64)
    }

    /// Get as microseconds.
    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Get as milliseconds.
    pub fn as_millis(&self) -> u64 {
        self.0 / 1000
    }

    /// Get as seconds (float).
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Add duration to time.
    pub fn checked_add(&self, duration: SimTime) -> Option<SimTime> {
        self.0.checked_add(duration.0).map(SimTime)
    }

    /// Subtract duration from time.
    pub fn checked_sub(&self, duration: SimTime) -> Option<SimTime> {
        self.0.checked_sub(duration.0).map(SimTime)
    }

    /// Subtract, stopping at zero.
    pub fn saturating_sub(&self, duration: SimTime) -> SimTime {
        SimTime(self.0.saturating_sub(duration.0))
    }
}

impl std::ops::Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Self) -> Self::Output {
        SimTime(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::Sub for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: Self) -> Self::Output {
        SimTime(self.0.saturating_sub(rhs.0))
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

// ============================================================================
// Identity Types
// ============================================================================

/// Unique identifier for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Create a new entity ID.
    pub fn new(id: u64) -> Self {
        EntityId(id)
    }
}

/// Link-layer address of a terminal or gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub u32);

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b = self.0.to_be_bytes();
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}", b[0], b[1], b[2], b[3])
    }
}

/// Intended receiver(s) of a transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// A single receiver.
    Unicast(Address),
    /// Every receiver on the carrier.
    Broadcast,
}

impl Destination {
    /// Check whether a receiver with the given address is targeted.
    ///
    /// A receiver without an address listens to everything.
    pub fn targets(&self, receiver: Option<Address>) -> bool {
        match (self, receiver) {
            (_, None) => true,
            (Destination::Broadcast, Some(_)) => true,
            (Destination::Unicast(addr), Some(own)) => *addr == own,
        }
    }
}

// ============================================================================
// Signal Parameters
// ============================================================================

/// Access scheme a burst was sent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketKind {
    /// Scheduled (DAMA or forward link) transmission.
    #[default]
    Dedicated,
    /// Random access in a slotted ALOHA slot.
    SlottedAloha,
}

impl PacketKind {
    /// Short label used in metrics and traces.
    pub fn label(&self) -> &'static str {
        match self {
            PacketKind::Dedicated => "dedicated",
            PacketKind::SlottedAloha => "slotted_aloha",
        }
    }
}

/// The record carried with every in-flight transmission.
///
/// Constructed once by the transmitter and then shared read-only (behind an
/// [`Arc`]) by the channel and every receiving carrier.
#[derive(Debug, Clone)]
pub struct SignalParameters {
    /// Unique transmission id.
    pub tx_id: u64,
    /// Transmitting entity.
    pub sender: EntityId,
    /// Address of the transmitter.
    pub source_address: Address,
    /// Intended receiver(s).
    pub destination: Destination,
    /// Carrier index within the transmitter's band plan.
    pub carrier_id: u32,
    /// Carrier centre frequency in Hz.
    pub frequency_hz: f64,
    /// Occupied bandwidth in Hz.
    pub bandwidth_hz: f64,
    /// Beam the burst was sent in.
    pub beam_id: u32,
    /// Modulation and coding identifier (key into the link-quality table).
    pub modcod: String,
    /// Transmit power in watts.
    pub tx_power_w: f64,
    /// Time the transmitter started sending.
    pub start: SimTime,
    /// Burst duration.
    pub duration: SimTime,
    /// Access scheme.
    pub kind: PacketKind,
    /// Slot index for slotted access, if the transmitter assigned one.
    pub slot: Option<u64>,
    /// CRDSA packet this burst is a replica of. Replicas of one packet share
    /// the sender and this id, which is the tx id of the first replica.
    pub replica_group: Option<u64>,
    /// Opaque payload.
    pub payload: Arc<[u8]>,
}

impl SignalParameters {
    /// Time the transmitter stops sending.
    pub fn end(&self) -> SimTime {
        self.start + self.duration
    }

    /// Whether `other` carries the same CRDSA packet.
    pub fn is_replica_of(&self, other: &SignalParameters) -> bool {
        self.tx_id != other.tx_id
            && self.sender == other.sender
            && self.replica_group.is_some()
            && self.replica_group == other.replica_group
    }
}

/// Power budget of a bent-pipe uplink, measured at the satellite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UplinkBudget {
    /// Wanted signal power received by the satellite (W).
    pub rx_power_w: f64,
    /// Noise power at the satellite receiver (W).
    pub noise_w: f64,
}

// ============================================================================
// Carrier Settings
// ============================================================================

fn default_sic_iterations() -> u32 {
    4
}

fn default_sampling_error() -> f64 {
    0.99
}

/// How slotted random-access collisions are judged.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CollisionModel {
    /// Decide from the composite SINR and the link-quality table.
    #[default]
    CheckAgainstSinr,
    /// Any time overlap destroys the burst.
    AlwaysDropColliding,
    /// Fail with a fixed probability.
    ConstantProbability {
        /// Failure probability in [0, 1].
        probability: f64,
    },
}

/// Time-structuring policy of a receive carrier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisciplineConfig {
    /// Each burst resolved at its own end; different slots never interfere.
    PerSlot {
        /// Slot length used to derive slot indices when the record has none.
        #[serde(default)]
        slot_duration_s: Option<f64>,
        /// Collision judgement.
        #[serde(default)]
        collision_model: CollisionModel,
    },
    /// All bursts of a frame resolved together at the frame boundary.
    PerFrame {
        /// Frame length in seconds.
        frame_duration_s: f64,
        /// Maximum SIC passes per frame.
        #[serde(default = "default_sic_iterations")]
        max_sic_iterations: u32,
    },
    /// Bursts buffered in a sliding window and decoded progressively.
    PerWindow {
        /// Window length in seconds.
        window_s: f64,
        /// Interval between window evaluations in seconds.
        step_s: f64,
        /// Maximum SIC passes per step.
        #[serde(default = "default_sic_iterations")]
        max_sic_iterations: u32,
    },
}

impl Default for DisciplineConfig {
    fn default() -> Self {
        DisciplineConfig::PerSlot {
            slot_duration_s: None,
            collision_model: CollisionModel::CheckAgainstSinr,
        }
    }
}

/// Interference elimination strategy selector.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EliminationConfig {
    /// Interference is treated as noise.
    #[default]
    #[serde(rename = "none")]
    Off,
    /// Interferers are removed exactly.
    Perfect,
    /// A constant fraction of each interferer's power remains.
    Residual {
        /// Remaining fraction in [0, 1].
        fraction: f64,
    },
    /// Remaining power follows the amplitude/phase estimation error model.
    ResidualSampling {
        /// Sampling error coefficient.
        #[serde(default = "default_sampling_error")]
        sampling_error: f64,
        /// Burst length in symbols.
        burst_length_symbols: u32,
    },
}

/// Settings a carrier can be (re)configured with at run time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CarrierSettings {
    /// Centre frequency in Hz.
    pub frequency_hz: f64,
    /// Bandwidth in Hz.
    pub bandwidth_hz: f64,
    /// Scheduling discipline.
    #[serde(default)]
    pub discipline: DisciplineConfig,
    /// Elimination strategy.
    #[serde(default)]
    pub elimination: EliminationConfig,
}

// ============================================================================
// Event Types
// ============================================================================

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

/// A simulation event.
#[derive(Debug, Clone)]
pub struct Event {
    /// Unique event ID.
    pub id: EventId,
    /// Time when the event occurs.
    pub time: SimTime,
    /// Entity that created the event.
    pub source: EntityId,
    /// Target entities for the event.
    pub targets: Vec<EntityId>,
    /// Event payload.
    pub payload: EventPayload,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap (earliest time first, then insertion order)
        other.time.cmp(&self.time).then_with(|| other.id.0.cmp(&self.id.0))
    }
}

/// A record arriving at a receive carrier.
#[derive(Debug, Clone)]
pub struct BeginReceptionEvent {
    /// The shared transmission record.
    pub params: Arc<SignalParameters>,
    /// Power received by this carrier (W), before fading.
    pub rx_power_w: f64,
    /// Satellite-side budget for bent-pipe links.
    pub uplink: Option<UplinkBudget>,
}

/// Why a reception failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Effective SINR below the table's usable range (error probability 1).
    SnrBelowThreshold,
    /// Random decoding error at a usable SINR.
    ChannelError,
    /// Destroyed by a slotted random-access collision model.
    Collision,
}

impl FailureReason {
    /// Short label used in metrics and traces.
    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::SnrBelowThreshold => "snr_below_threshold",
            FailureReason::ChannelError => "channel_error",
            FailureReason::Collision => "collision",
        }
    }
}

/// Final result of one reception.
#[derive(Debug, Clone)]
pub enum ReceptionOutcome {
    /// Decoded; payload handed upward.
    Success {
        /// The received payload.
        payload: Arc<[u8]>,
    },
    /// Not decoded.
    Failure {
        /// Distinguishes SINR-bound from stochastic failures.
        reason: FailureReason,
    },
}

impl ReceptionOutcome {
    /// Whether the reception succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, ReceptionOutcome::Success { .. })
    }

    /// Short label used in metrics and traces.
    pub fn label(&self) -> &'static str {
        match self {
            ReceptionOutcome::Success { .. } => "ok",
            ReceptionOutcome::Failure { reason } => reason.label(),
        }
    }
}

/// Signal quality observed for one reception.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SinrReport {
    /// Es/No before any elimination (dB).
    pub raw_db: f64,
    /// Es/No after elimination (dB).
    pub effective_db: f64,
    /// Interference power behind the decision after elimination (W).
    pub interference_w: f64,
}

/// Completion notice sent to the upper layer.
#[derive(Debug, Clone)]
pub struct ReceptionCompleteEvent {
    /// Carrier entity that received the burst.
    pub carrier: EntityId,
    /// Carrier index.
    pub carrier_id: u32,
    /// The record that was received.
    pub params: Arc<SignalParameters>,
    /// Success or failure.
    pub outcome: ReceptionOutcome,
    /// Signal quality used for the decision.
    pub sinr: SinrReport,
    /// Time the burst started arriving.
    pub start: SimTime,
    /// Time the burst finished arriving.
    pub end: SimTime,
}

/// Observation-only SINR sample.
#[derive(Debug, Clone)]
pub struct SinrSample {
    /// Carrier entity.
    pub carrier: EntityId,
    /// Transmission the sample belongs to.
    pub tx_id: u64,
    /// Sender address.
    pub source_address: Address,
    /// Effective Es/No (dB).
    pub effective_db: f64,
}

/// Event payload variants.
#[derive(Debug, Clone)]
pub enum EventPayload {
    // =========== Channel ===========
    /// A terminal starts sending a burst (directed to the channel entity).
    Transmit(Arc<SignalParameters>),
    /// A burst starts arriving at a carrier (from the channel entity).
    BeginReception(BeginReceptionEvent),

    // =========== Carrier → Upper Layer ===========
    /// A reception finished.
    ReceptionComplete(ReceptionCompleteEvent),
    /// Effective SINR was computed (no targets; observed by the runner).
    SinrComputed(SinrSample),

    // =========== Carrier Control ===========
    /// Abort every pending reception without reporting outcomes.
    ClearCarrier,
    /// Apply new carrier settings.
    ConfigureCarrier(CarrierSettings),

    // =========== Scheduling ===========
    /// A delayed callback.
    Timer {
        /// User-defined timer ID.
        timer_id: u64,
    },

    // =========== Simulation Control ===========
    /// End the simulation.
    SimulationEnd,
}

// ============================================================================
// Simulation Context
// ============================================================================

/// Context passed to entities during event handling.
pub struct SimContext {
    time: SimTime,
    rng: ChaCha8Rng,
    pending_events: Vec<Event>,
    next_event_id: u64,
    source_entity: EntityId,
}

impl SimContext {
    /// Create a new simulation context.
    pub fn new(seed: u64) -> Self {
        SimContext {
            time: SimTime::ZERO,
            rng: ChaCha8Rng::seed_from_u64(seed),
            pending_events: Vec::new(),
            next_event_id: 0,
            source_entity: EntityId(0),
        }
    }

    /// Get the current simulation time.
    pub fn time(&self) -> SimTime {
        self.time
    }

    /// Get mutable access to the random number generator.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// Set the current time (used by event loop).
    pub fn set_time(&mut self, time: SimTime) {
        self.time = time;
    }

    /// Set the source entity (used by event loop).
    pub fn set_source(&mut self, entity: EntityId) {
        self.source_entity = entity;
    }

    /// Post an event to occur after a delay.
    pub fn post_event(&mut self, delay: SimTime, targets: Vec<EntityId>, payload: EventPayload) {
        let event = Event {
            id: EventId(self.next_event_id),
            time: self.time + delay,
            source: self.source_entity,
            targets,
            payload,
        };
        self.next_event_id += 1;
        self.pending_events.push(event);
    }

    /// Post an event to occur immediately (at current time).
    pub fn post_immediate(&mut self, targets: Vec<EntityId>, payload: EventPayload) {
        self.post_event(SimTime::ZERO, targets, payload);
    }

    /// Take all pending events (used by event loop).
    pub fn take_pending_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.pending_events)
    }

    /// Get the next event ID (used by event loop for external event creation).
    pub fn next_event_id(&mut self) -> u64 {
        let id = self.next_event_id;
        self.next_event_id += 1;
        id
    }

    /// Make sure ids handed out from now on do not collide with pre-built events.
    pub fn reserve_event_ids(&mut self, upto: u64) {
        self.next_event_id = self.next_event_id.max(upto);
    }
}

// ============================================================================
// Entity Trait
// ============================================================================

/// Base trait for all simulation entities.
pub trait Entity: Send {
    /// Get the entity's unique ID.
    fn entity_id(&self) -> EntityId;

    /// Handle an event.
    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError>;

    /// Verify internal consistency after the clock reached `now`.
    fn check_invariants(&self, _now: SimTime) -> Result<(), SimError> {
        Ok(())
    }
}

// ============================================================================
// Entity Registry
// ============================================================================

/// Registry for managing simulation entities.
pub struct EntityRegistry {
    entities: HashMap<EntityId, Box<dyn Entity>>,
}

impl EntityRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        EntityRegistry {
            entities: HashMap::new(),
        }
    }

    /// Register an entity.
    pub fn register(&mut self, entity: Box<dyn Entity>) {
        let id = entity.entity_id();
        self.entities.insert(id, entity);
    }

    /// Get an entity by ID.
    pub fn get(&self, id: EntityId) -> Option<&dyn Entity> {
        self.entities.get(&id).map(|e| e.as_ref())
    }

    /// Get a mutable reference to an entity by ID.
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Box<dyn Entity>> {
        self.entities.get_mut(&id)
    }

    /// Dispatch an event to its target entities.
    pub fn dispatch_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        for target in &event.targets {
            let entity = self
                .entities
                .get_mut(target)
                .ok_or(SimError::EntityNotFound(*target))?;
            ctx.set_source(*target);
            entity.handle_event(event, ctx)?;
        }
        Ok(())
    }

    /// Run every entity's invariant check.
    pub fn check_invariants(&self, now: SimTime) -> Result<(), SimError> {
        let mut ids: Vec<EntityId> = self.entities.keys().copied().collect();
        ids.sort();
        for id in ids {
            if let Some(entity) = self.entities.get(&id) {
                entity.check_invariants(now)?;
            }
        }
        Ok(())
    }

    /// Get all entity IDs.
    pub fn entity_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.keys().copied()
    }

    /// Get the number of registered entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    #[test]
    fn test_sim_time_conversions() {
        let time = SimTime::from_secs(1.5);
        assert_eq!(time.as_millis(), 1500);
        assert_eq!(time.as_micros(), 1_500_000);
        assert!((time.as_secs_f64() - 1.5).abs() < 0.0001);
        assert_eq!(SimTime::from_secs(0.000_001_4).as_micros(), 1);
        assert_eq!(SimTime::from_secs(-3.0), SimTime::ZERO);
    }

    #[test]
    fn test_sim_time_arithmetic() {
        let t1 = SimTime::from_millis(100);
        let t2 = SimTime::from_millis(50);
        assert_eq!((t1 + t2).as_millis(), 150);
        assert_eq!((t1 - t2).as_millis(), 50);
        assert_eq!(t2 - t1, SimTime::ZERO);
        assert_eq!(SimTime::MAX.checked_add(t1), None);
    }

    #[test]
    fn test_event_order_is_time_then_fifo() {
        let mk = |id: u64, t: u64| Event {
            id: EventId(id),
            time: SimTime::from_micros(t),
            source: EntityId(0),
            targets: vec![],
            payload: EventPayload::Timer { timer_id: id },
        };
        let mut heap = BinaryHeap::new();
        heap.push(mk(3, 10));
        heap.push(mk(1, 10));
        heap.push(mk(2, 5));
        heap.push(mk(0, 10));
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop()).map(|e| e.id.0).collect();
        assert_eq!(order, vec![2, 0, 1, 3]);
    }

    #[test]
    fn test_destination_targets() {
        let own = Some(Address(7));
        assert!(Destination::Broadcast.targets(own));
        assert!(Destination::Unicast(Address(7)).targets(own));
        assert!(!Destination::Unicast(Address(8)).targets(own));
        assert!(Destination::Unicast(Address(8)).targets(None));
    }

    #[test]
    fn test_discipline_config_yaml() {
        let yaml = "kind: per_window\nwindow_s: 0.5\nstep_s: 0.1\n";
        let cfg: DisciplineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            cfg,
            DisciplineConfig::PerWindow {
                window_s: 0.5,
                step_s: 0.1,
                max_sic_iterations: 4
            }
        );

        let yaml = "kind: per_slot\ncollision_model:\n  kind: constant_probability\n  probability: 0.2\n";
        let cfg: DisciplineConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            cfg,
            DisciplineConfig::PerSlot {
                slot_duration_s: None,
                collision_model: CollisionModel::ConstantProbability { .. }
            }
        ));
    }

    #[test]
    fn test_elimination_config_yaml() {
        let cfg: EliminationConfig = serde_yaml::from_str("kind: none").unwrap();
        assert_eq!(cfg, EliminationConfig::Off);
        let cfg: EliminationConfig =
            serde_yaml::from_str("kind: residual_sampling\nburst_length_symbols: 536").unwrap();
        assert_eq!(
            cfg,
            EliminationConfig::ResidualSampling {
                sampling_error: 0.99,
                burst_length_symbols: 536
            }
        );
    }
}
