//! PHY receive carrier.
//!
//! One [`Carrier`] entity owns everything arriving on one frequency and
//! bandwidth. It keeps an active set of reception entries, records which
//! entries overlap, and at resolution time composes interference, applies
//! the elimination strategy, looks up the error probability and draws the
//! outcome. The scheduling [`Discipline`] decides when resolution happens.

mod discipline;

pub use discipline::Discipline;

use crate::elimination::{build_elimination, InterferenceElimination};
use crate::fading::{FadingError, MarkovConf, MarkovFading};
use crate::interference::{
    to_db, InterferenceMode, InterferenceProfile, Interferer, NoiseConfig, TimeWindow, UplinkNoiseFolding,
};
use crate::link_results::{ErrorModel, LinkResults};
use crate::metric_defs;
use rand::Rng;
use satrx_common::{
    Address, BeginReceptionEvent, CarrierSettings, CollisionModel, EliminationConfig, Entity, EntityId, Event,
    EventPayload, FailureReason, PacketKind, ReceptionCompleteEvent, ReceptionOutcome, SignalParameters, SimContext,
    SimError, SimTime, SinrReport, SinrSample, UplinkBudget,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

// ============================================================================
// Errors and Configuration
// ============================================================================

/// Carrier configuration errors.
#[derive(Debug, Error)]
pub enum CarrierError {
    /// A duration is zero, negative or not finite.
    #[error("{field} must be a positive duration, got {seconds}")]
    InvalidDuration {
        /// Configuration field.
        field: &'static str,
        /// Value in seconds.
        seconds: f64,
    },

    /// A probability or fraction is outside [0, 1].
    #[error("{field} must be within [0, 1], got {value}")]
    InvalidProbability {
        /// Configuration field.
        field: &'static str,
        /// Offending value.
        value: f64,
    },

    /// Frequency, bandwidth or noise is not a positive finite number.
    #[error("{field} must be positive and finite, got {value}")]
    InvalidValue {
        /// Configuration field.
        field: &'static str,
        /// Offending value.
        value: f64,
    },

    /// Fading configuration error.
    #[error("fading: {0}")]
    Fading(#[from] FadingError),
}

/// Direction of the link a carrier receives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Satellite to ground.
    #[default]
    Downlink,
    /// Ground to satellite; bursts in different beams never interfere.
    Uplink,
}

/// Static configuration of a receive carrier.
#[derive(Debug, Clone)]
pub struct CarrierConfig {
    /// Name used in logs, metrics and traces.
    pub name: String,
    /// Carrier index.
    pub carrier_id: u32,
    /// Centre frequency (Hz).
    pub frequency_hz: f64,
    /// Bandwidth (Hz).
    pub bandwidth_hz: f64,
    /// Allowed frequency and bandwidth mismatch (Hz).
    pub tolerance_hz: f64,
    /// Beam this carrier listens to; `None` accepts every beam.
    pub beam_id: Option<u32>,
    /// Link direction.
    pub direction: Direction,
    /// Own address; `None` accepts every destination.
    pub address: Option<Address>,
    /// On-board processing payload.
    pub regenerative: bool,
    /// Fragment reduction.
    pub interference_mode: InterferenceMode,
    /// Bent-pipe uplink noise ordering.
    pub folding: UplinkNoiseFolding,
    /// Receiver noise.
    pub noise: NoiseConfig,
    /// Error probability source.
    pub error_model: ErrorModel,
    /// Scheduling discipline.
    pub discipline: satrx_common::DisciplineConfig,
    /// Elimination strategy.
    pub elimination: EliminationConfig,
    /// Optional Markov fading.
    pub fading: Option<MarkovConf>,
    /// Elevation used to pick the fading set.
    pub elevation_deg: Option<f64>,
    /// Receiver of completion events.
    pub upper_layer: EntityId,
    /// Emit `SinrComputed` observations.
    pub trace_sinr: bool,
}

impl CarrierConfig {
    /// A downlink carrier with constant noise and default policies.
    pub fn new(name: impl Into<String>, frequency_hz: f64, bandwidth_hz: f64, upper_layer: EntityId) -> Self {
        CarrierConfig {
            name: name.into(),
            carrier_id: 0,
            frequency_hz,
            bandwidth_hz,
            tolerance_hz: 1.0,
            beam_id: None,
            direction: Direction::Downlink,
            address: None,
            regenerative: true,
            interference_mode: InterferenceMode::PerFragment,
            folding: UplinkNoiseFolding::AfterElimination,
            noise: NoiseConfig::Constant { power_w: 1.0 },
            error_model: ErrorModel::LinkResults,
            discipline: satrx_common::DisciplineConfig::default(),
            elimination: EliminationConfig::Off,
            fading: None,
            elevation_deg: None,
            upper_layer,
            trace_sinr: false,
        }
    }
}

fn check_positive(field: &'static str, value: f64) -> Result<f64, CarrierError> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(CarrierError::InvalidValue { field, value })
    }
}

fn check_unit(field: &'static str, value: f64) -> Result<(), CarrierError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(CarrierError::InvalidProbability { field, value })
    }
}

fn check_elimination(config: &EliminationConfig) -> Result<(), CarrierError> {
    match *config {
        EliminationConfig::Residual { fraction } => check_unit("elimination.fraction", fraction),
        EliminationConfig::ResidualSampling {
            sampling_error,
            burst_length_symbols,
        } => {
            check_unit("elimination.sampling_error", sampling_error)?;
            check_positive("elimination.burst_length_symbols", burst_length_symbols as f64).map(|_| ())
        }
        _ => Ok(()),
    }
}

// ============================================================================
// Reception Entries
// ============================================================================

/// Timer IDs. The type is encoded in the high bits, checked from the
/// largest base down.
const FADING_TICK_TIMER: u64 = 1;
const TIMER_RX_END_BASE: u64 = 0x1000; // entry_id is added to this
const TIMER_FRAME_END_BASE: u64 = 1 << 40; // frame index is added to this
const TIMER_WINDOW_STEP_BASE: u64 = 1 << 41; // generation is added to this

/// Observable state of a carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarrierState {
    /// Nothing in flight.
    Idle,
    /// At least one burst arriving or awaiting resolution.
    Receiving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryOutcome {
    Pending,
    Decoded,
    /// Another copy of the same CRDSA packet decoded.
    Replica,
}

#[derive(Debug, Clone)]
struct ReceptionEntry {
    entry_id: u64,
    params: Arc<SignalParameters>,
    start: SimTime,
    end: SimTime,
    rx_power_w: f64,
    uplink: Option<UplinkBudget>,
    intended: bool,
    slot: Option<u64>,
    frame: Option<u64>,
    interferers: BTreeMap<u64, Interferer>,
    cancellations: Vec<(Interferer, TimeWindow)>,
    outcome: EntryOutcome,
    draw: Option<f64>,
}

impl ReceptionEntry {
    fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start, self.end)
    }

    fn as_interferer(&self, es_no: f64) -> Interferer {
        Interferer {
            id: self.entry_id,
            start: self.start,
            end: self.end,
            rx_power_w: self.rx_power_w,
            sat_rx_power_w: self.uplink.map(|u| u.rx_power_w),
            es_no,
        }
    }

    fn record_cancellation(&mut self, decoded: &Interferer, horizon: Option<SimTime>) {
        if !self.interferers.contains_key(&decoded.id) {
            return;
        }
        let start = horizon.map_or(decoded.start, |h| h.max(decoded.start));
        self.cancellations.push((*decoded, TimeWindow::new(start, decoded.end)));
    }
}

/// Result of one SINR evaluation.
#[derive(Debug, Clone, Copy)]
struct Evaluation {
    raw_es_no: f64,
    effective_es_no: f64,
    interference_w: f64,
    error_rate: f64,
}

impl Evaluation {
    fn report(&self) -> SinrReport {
        SinrReport {
            raw_db: to_db(self.raw_es_no),
            effective_db: to_db(self.effective_es_no),
            interference_w: self.interference_w,
        }
    }

    fn failure_reason(&self) -> FailureReason {
        if self.error_rate >= 1.0 {
            FailureReason::SnrBelowThreshold
        } else {
            FailureReason::ChannelError
        }
    }
}

// ============================================================================
// Carrier Entity
// ============================================================================

/// Receive carrier entity.
pub struct Carrier {
    id: EntityId,
    config: CarrierConfig,
    link_results: Arc<LinkResults>,
    discipline: Discipline,
    elimination: Box<dyn InterferenceElimination>,
    fading: Option<MarkovFading>,
    noise_w: f64,

    /// Bursts still arriving.
    active: BTreeMap<u64, ReceptionEntry>,
    /// Ended bursts waiting for a frame boundary or window step.
    awaiting: BTreeMap<u64, ReceptionEntry>,
    next_entry_id: u64,
    /// Frames with a pending boundary timer, and that boundary.
    scheduled_frames: BTreeMap<u64, SimTime>,
    window_timer_armed: bool,
    /// Bumped on every clear; stale window timers carry an old value.
    generation: u64,

    labels: Vec<(&'static str, String)>,
}

impl Carrier {
    /// Create a carrier, validating its configuration.
    pub fn new(id: EntityId, config: CarrierConfig, link_results: Arc<LinkResults>) -> Result<Self, CarrierError> {
        check_positive("frequency_hz", config.frequency_hz)?;
        let bandwidth = check_positive("bandwidth_hz", config.bandwidth_hz)?;
        let noise_w = check_positive("noise", config.noise.power_w(bandwidth))?;
        if let ErrorModel::Constant { rate } = config.error_model {
            check_unit("error_model.rate", rate)?;
        }
        check_elimination(&config.elimination)?;
        let discipline = Discipline::from_config(&config.discipline)?;
        let elimination = build_elimination(&config.elimination);
        let fading = match &config.fading {
            Some(conf) => {
                let mut fading = MarkovFading::new(conf.clone())?;
                if let Some(elevation) = config.elevation_deg {
                    fading.select_set_for_elevation(elevation);
                }
                Some(fading)
            }
            None => None,
        };
        let labels = vec![("carrier", config.name.clone())];
        Ok(Carrier {
            id,
            config,
            link_results,
            discipline,
            elimination,
            fading,
            noise_w,
            active: BTreeMap::new(),
            awaiting: BTreeMap::new(),
            next_entry_id: 0,
            scheduled_frames: BTreeMap::new(),
            window_timer_armed: false,
            generation: 0,
            labels,
        })
    }

    /// Carrier configuration.
    pub fn config(&self) -> &CarrierConfig {
        &self.config
    }

    /// Active discipline.
    pub fn discipline(&self) -> &Discipline {
        &self.discipline
    }

    /// Idle or receiving.
    pub fn state(&self) -> CarrierState {
        if self.active.is_empty() && self.awaiting.is_empty() {
            CarrierState::Idle
        } else {
            CarrierState::Receiving
        }
    }

    /// Number of bursts still arriving.
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Number of ended bursts awaiting resolution.
    pub fn awaiting_len(&self) -> usize {
        self.awaiting.len()
    }

    /// Fading model, if configured.
    pub fn fading(&self) -> Option<&MarkovFading> {
        self.fading.as_ref()
    }

    /// Delay of the first fading tick, if fading is configured.
    pub fn fading_tick(&self) -> Option<SimTime> {
        self.fading.as_ref().map(MarkovFading::tick)
    }

    /// The timer event that drives fading.
    pub fn fading_timer() -> EventPayload {
        EventPayload::Timer {
            timer_id: FADING_TICK_TIMER,
        }
    }

    fn update_active_gauge(&self) {
        metrics::gauge!(metric_defs::CARRIER_ACTIVE_RECEPTIONS.name, &self.labels).set(self.active.len() as f64);
    }

    fn drop_record(&self, params: &SignalParameters, why: &str) {
        warn!(
            "Carrier[{}]: dropping tx {} from {}: {}",
            self.config.name, params.tx_id, params.source_address, why
        );
        metrics::counter!(metric_defs::CARRIER_RX_DROPPED.name, &self.labels).increment(1);
    }

    // ------------------------------------------------------------------------
    // Begin / end of reception
    // ------------------------------------------------------------------------

    fn handle_begin_reception(&mut self, rx: &BeginReceptionEvent, ctx: &mut SimContext) {
        let params = &rx.params;
        let tol = self.config.tolerance_hz;
        if (params.frequency_hz - self.config.frequency_hz).abs() > tol
            || (params.bandwidth_hz - self.config.bandwidth_hz).abs() > tol
        {
            self.drop_record(params, "frequency or bandwidth mismatch");
            return;
        }
        if params.duration == SimTime::ZERO {
            self.drop_record(params, "zero duration");
            return;
        }
        if !(rx.rx_power_w >= 0.0) || !rx.rx_power_w.is_finite() {
            self.drop_record(params, "invalid received power");
            return;
        }

        let beam_ok = self.config.beam_id.map_or(true, |b| b == params.beam_id);
        let intended = beam_ok && params.destination.targets(self.config.address);
        if intended && !self.config.error_model.supports(&self.link_results, &params.modcod) {
            self.drop_record(params, "unknown modcod");
            return;
        }

        let now = ctx.time();
        let gain = self.fading.as_ref().map_or(1.0, MarkovFading::gain_linear);
        let entry_id = self.next_entry_id;
        self.next_entry_id += 1;
        let mut entry = ReceptionEntry {
            entry_id,
            params: Arc::clone(params),
            start: now,
            end: now + params.duration,
            rx_power_w: rx.rx_power_w * gain,
            uplink: rx.uplink,
            intended,
            slot: self.discipline.slot_of(params.slot, now),
            frame: self.discipline.frame_of(now),
            interferers: BTreeMap::new(),
            cancellations: Vec::new(),
            outcome: EntryOutcome::Pending,
            draw: None,
        };

        let new_clean = self.clean_es_no(&entry);
        for other in self.active.values_mut() {
            if !Self::interacts(self.config.direction, &entry, other) {
                continue;
            }
            let other_clean = clean_es_no(other, self.noise_w, self.config.regenerative);
            entry.interferers.insert(other.entry_id, other.as_interferer(other_clean));
            other.interferers.insert(entry_id, entry.as_interferer(new_clean));
        }

        trace!(
            "Carrier[{}]: begin tx {} as entry {} ({} interferers, intended={})",
            self.config.name,
            params.tx_id,
            entry_id,
            entry.interferers.len(),
            intended
        );

        if let Some(frame) = entry.frame {
            if !self.scheduled_frames.contains_key(&frame) {
                let boundary = self.discipline.frame_end(frame);
                self.scheduled_frames.insert(frame, boundary);
                ctx.post_event(
                    boundary - now,
                    vec![self.id],
                    EventPayload::Timer {
                        timer_id: TIMER_FRAME_END_BASE + frame,
                    },
                );
            }
        }

        ctx.post_event(
            params.duration,
            vec![self.id],
            EventPayload::Timer {
                timer_id: TIMER_RX_END_BASE + entry_id,
            },
        );
        self.active.insert(entry_id, entry);
        metrics::counter!(metric_defs::CARRIER_RX_STARTED.name, &self.labels).increment(1);
        self.update_active_gauge();
    }

    /// Whether two entries interfere with each other.
    fn interacts(direction: Direction, a: &ReceptionEntry, b: &ReceptionEntry) -> bool {
        if !a.window().overlaps(b.window()) || a.slot != b.slot {
            return false;
        }
        direction == Direction::Downlink || a.params.beam_id == b.params.beam_id
    }

    fn clean_es_no(&self, entry: &ReceptionEntry) -> f64 {
        clean_es_no(entry, self.noise_w, self.config.regenerative)
    }

    fn handle_rx_end(&mut self, entry_id: u64, ctx: &mut SimContext) {
        let Some(mut entry) = self.active.remove(&entry_id) else {
            debug!(
                "Carrier[{}]: end of unknown entry {} ignored",
                self.config.name, entry_id
            );
            return;
        };
        self.update_active_gauge();
        if !entry.intended {
            trace!("Carrier[{}]: entry {} was not for us", self.config.name, entry_id);
            return;
        }
        entry.draw = Some(ctx.rng().gen::<f64>());
        if entry.outcome == EntryOutcome::Replica {
            self.discard_replica(&entry);
            return;
        }

        match self.discipline {
            Discipline::PerSlot { collision_model, .. } => {
                self.resolve_slotted(entry, collision_model, ctx);
            }
            Discipline::PerFrame { max_sic_iterations, .. } => {
                let pending_frame = entry.frame.map_or(false, |f| self.scheduled_frames.contains_key(&f));
                if pending_frame {
                    self.awaiting.insert(entry_id, entry);
                } else {
                    // Outlived its frame boundary.
                    self.resolve_batch(vec![entry], max_sic_iterations, None, true, ctx);
                }
            }
            Discipline::PerWindow { step, .. } => {
                self.awaiting.insert(entry_id, entry);
                if !self.window_timer_armed {
                    self.window_timer_armed = true;
                    ctx.post_event(
                        step,
                        vec![self.id],
                        EventPayload::Timer {
                            timer_id: TIMER_WINDOW_STEP_BASE + self.generation,
                        },
                    );
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------------

    /// Compose interference and apply the strategy.
    ///
    /// With `all_known` every interferer is cancelled over its whole overlap;
    /// otherwise only the cancellations recorded by SIC are applied.
    fn evaluate(&self, entry: &ReceptionEntry, all_known: bool) -> Evaluation {
        let regenerative = self.config.regenerative;
        let mut profile = InterferenceProfile::new(
            entry.window(),
            entry.rx_power_w,
            self.noise_w,
            entry.uplink,
            self.config.interference_mode,
        );
        for interferer in entry.interferers.values() {
            profile.add_interferer(interferer);
        }
        let (raw_es_no, raw_interference) = profile.evaluate(regenerative);
        if self.config.folding == UplinkNoiseFolding::BeforeElimination && !regenerative {
            profile.fold_uplink();
        }

        let effective_es_no = if all_known {
            let interferers: Vec<Interferer> = entry.interferers.values().copied().collect();
            self.elimination
                .eliminate_interferences(&mut profile, &interferers, raw_es_no, regenerative)
        } else {
            // Each SIC cancellation carries its own window.
            entry.cancellations.iter().fold(raw_es_no, |es_no, (interferer, window)| {
                self.elimination.eliminate_interferences_in_window(
                    &mut profile,
                    std::slice::from_ref(interferer),
                    es_no,
                    regenerative,
                    *window,
                )
            })
        };
        // An untouched profile hands back the raw value bit for bit.
        let interference_w = if effective_es_no.to_bits() == raw_es_no.to_bits() {
            raw_interference
        } else {
            profile.evaluate(regenerative).1
        };

        let error_rate = self
            .config
            .error_model
            .error_rate(&self.link_results, &entry.params.modcod, to_db(effective_es_no))
            .unwrap_or(1.0);
        Evaluation {
            raw_es_no,
            effective_es_no,
            interference_w,
            error_rate,
        }
    }

    // ------------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------------

    fn resolve_slotted(&mut self, entry: ReceptionEntry, model: CollisionModel, ctx: &mut SimContext) {
        let eval = self.evaluate(&entry, true);
        let draw = entry.draw.unwrap_or(0.0);
        let against_sinr = (draw < eval.error_rate).then(|| eval.failure_reason());
        // Collision models judge random access only; scheduled bursts always
        // go through the link results.
        let failure = if entry.params.kind != PacketKind::SlottedAloha {
            against_sinr
        } else {
            match model {
                CollisionModel::CheckAgainstSinr => against_sinr,
                CollisionModel::AlwaysDropColliding => {
                    (!entry.interferers.is_empty()).then_some(FailureReason::Collision)
                }
                CollisionModel::ConstantProbability { probability } => {
                    (draw < probability).then_some(FailureReason::Collision)
                }
            }
        };
        self.complete(entry, failure, eval, ctx);
    }

    /// Successive interference cancellation over a batch of ended entries.
    ///
    /// Decoded entries are reported and cancelled from every entry they
    /// overlapped. With `fail_rest` the undecoded entries fail; otherwise they
    /// are returned for a later attempt.
    fn resolve_batch(
        &mut self,
        mut batch: Vec<ReceptionEntry>,
        max_iterations: u32,
        horizon: Option<SimTime>,
        fail_rest: bool,
        ctx: &mut SimContext,
    ) -> Vec<ReceptionEntry> {
        batch.sort_by_key(|e| e.entry_id);
        let mut passes = 0u32;
        loop {
            passes += 1;
            let mut progress = false;
            for idx in 0..batch.len() {
                if batch[idx].outcome != EntryOutcome::Pending {
                    continue;
                }
                let eval = self.evaluate(&batch[idx], false);
                if batch[idx].draw.unwrap_or(0.0) < eval.error_rate {
                    continue;
                }
                progress = true;
                batch[idx].outcome = EntryOutcome::Decoded;
                let decoded = batch[idx].as_interferer(eval.effective_es_no);
                trace!(
                    "Carrier[{}]: SIC pass {} decoded entry {}",
                    self.config.name,
                    passes,
                    decoded.id
                );
                for (j, other) in batch.iter_mut().enumerate() {
                    if j != idx {
                        other.record_cancellation(&decoded, horizon);
                    }
                }
                for other in self.active.values_mut().chain(self.awaiting.values_mut()) {
                    other.record_cancellation(&decoded, horizon);
                }
                self.retire_replicas(&mut batch, idx, eval.effective_es_no, horizon);
            }
            if !progress || passes >= max_iterations {
                break;
            }
        }
        metrics::histogram!(metric_defs::CARRIER_SIC_ITERATIONS.name, &self.labels).record(passes as f64);

        let mut remaining = Vec::new();
        let mut failed_packets = BTreeSet::new();
        for entry in batch {
            match entry.outcome {
                EntryOutcome::Replica => self.discard_replica(&entry),
                EntryOutcome::Decoded => {
                    let eval = self.evaluate(&entry, false);
                    self.complete(entry, None, eval, ctx);
                }
                EntryOutcome::Pending if fail_rest => {
                    // An undecoded CRDSA packet fails once, not once per copy.
                    if let Some(group) = entry.params.replica_group {
                        if !failed_packets.insert((entry.params.sender, group)) {
                            self.discard_replica(&entry);
                            continue;
                        }
                    }
                    let eval = self.evaluate(&entry, false);
                    let reason = eval.failure_reason();
                    self.complete(entry, Some(reason), eval, ctx);
                }
                EntryOutcome::Pending => remaining.push(entry),
            }
        }
        remaining
    }

    /// Retire every other copy of the CRDSA packet decoded at `decoded_idx`.
    ///
    /// The copies are known once one of them decodes, so their power is
    /// cancelled from every entry they overlapped.
    fn retire_replicas(
        &mut self,
        batch: &mut [ReceptionEntry],
        decoded_idx: usize,
        es_no: f64,
        horizon: Option<SimTime>,
    ) {
        let decoded = Arc::clone(&batch[decoded_idx].params);
        if decoded.replica_group.is_none() {
            return;
        }
        let mut siblings = Vec::new();
        for entry in batch
            .iter_mut()
            .chain(self.active.values_mut())
            .chain(self.awaiting.values_mut())
        {
            if entry.outcome == EntryOutcome::Pending && entry.params.is_replica_of(&decoded) {
                entry.outcome = EntryOutcome::Replica;
                siblings.push(entry.as_interferer(es_no));
            }
        }
        for sibling in &siblings {
            for entry in batch
                .iter_mut()
                .chain(self.active.values_mut())
                .chain(self.awaiting.values_mut())
            {
                entry.record_cancellation(sibling, horizon);
            }
        }
        if !siblings.is_empty() {
            trace!(
                "Carrier[{}]: tx {} decoded, {} replicas cancelled",
                self.config.name,
                decoded.tx_id,
                siblings.len()
            );
        }
    }

    fn discard_replica(&self, entry: &ReceptionEntry) {
        debug!(
            "Carrier[{}]: replica tx {} of packet {:?} retired",
            self.config.name, entry.params.tx_id, entry.params.replica_group
        );
        metrics::counter!(metric_defs::CARRIER_REPLICAS_REMOVED.name, &self.labels).increment(1);
    }

    fn handle_frame_end(&mut self, frame: u64, ctx: &mut SimContext) {
        let now = ctx.time();
        if self.scheduled_frames.get(&frame) != Some(&now) {
            return;
        }
        let straggler = self
            .active
            .values()
            .any(|e| e.frame == Some(frame) && e.end <= now);
        if straggler {
            // Let ends at this instant run first.
            ctx.post_immediate(
                vec![self.id],
                EventPayload::Timer {
                    timer_id: TIMER_FRAME_END_BASE + frame,
                },
            );
            return;
        }
        self.scheduled_frames.remove(&frame);
        let ids: Vec<u64> = self
            .awaiting
            .values()
            .filter(|e| e.frame == Some(frame))
            .map(|e| e.entry_id)
            .collect();
        let batch: Vec<ReceptionEntry> = ids.iter().filter_map(|id| self.awaiting.remove(id)).collect();
        debug!(
            "Carrier[{}]: frame {} boundary, resolving {} bursts",
            self.config.name,
            frame,
            batch.len()
        );
        if let Discipline::PerFrame { max_sic_iterations, .. } = self.discipline {
            if !batch.is_empty() {
                self.resolve_batch(batch, max_sic_iterations, None, true, ctx);
            }
        }
    }

    fn handle_window_step(&mut self, generation: u64, ctx: &mut SimContext) {
        if generation != self.generation {
            return;
        }
        self.window_timer_armed = false;
        let Discipline::PerWindow {
            window,
            step,
            max_sic_iterations,
        } = self.discipline
        else {
            return;
        };
        let now = ctx.time();
        let horizon = now.saturating_sub(window);

        let expired: Vec<u64> = self
            .awaiting
            .values()
            .filter(|e| e.start < horizon)
            .map(|e| e.entry_id)
            .collect();
        for id in expired {
            if let Some(entry) = self.awaiting.remove(&id) {
                if entry.outcome == EntryOutcome::Replica {
                    self.discard_replica(&entry);
                    continue;
                }
                debug!("Carrier[{}]: entry {} left the window", self.config.name, id);
                let eval = self.evaluate(&entry, false);
                let reason = eval.failure_reason();
                self.complete(entry, Some(reason), eval, ctx);
            }
        }

        let batch: Vec<ReceptionEntry> = std::mem::take(&mut self.awaiting).into_values().collect();
        if !batch.is_empty() {
            let remaining = self.resolve_batch(batch, max_sic_iterations, Some(horizon), false, ctx);
            for entry in remaining {
                self.awaiting.insert(entry.entry_id, entry);
            }
        }

        if !self.awaiting.is_empty() {
            self.window_timer_armed = true;
            ctx.post_event(
                step,
                vec![self.id],
                EventPayload::Timer {
                    timer_id: TIMER_WINDOW_STEP_BASE + self.generation,
                },
            );
        }
    }

    fn complete(
        &mut self,
        entry: ReceptionEntry,
        failure: Option<FailureReason>,
        eval: Evaluation,
        ctx: &mut SimContext,
    ) {
        let report = eval.report();
        let outcome = match failure {
            None => ReceptionOutcome::Success {
                payload: Arc::clone(&entry.params.payload),
            },
            Some(reason) => ReceptionOutcome::Failure { reason },
        };
        debug!(
            "Carrier[{}]: tx {} from {} -> {} (raw {:.2} dB, effective {:.2} dB, per {:.3e})",
            self.config.name,
            entry.params.tx_id,
            entry.params.source_address,
            outcome.label(),
            report.raw_db,
            report.effective_db,
            eval.error_rate
        );

        let mut labels = self.labels.clone();
        match &outcome {
            ReceptionOutcome::Success { .. } => {
                labels.push(("packet_kind", entry.params.kind.label().to_string()));
                metrics::counter!(metric_defs::CARRIER_RX_SUCCESS.name, &labels).increment(1);
            }
            ReceptionOutcome::Failure { reason } => {
                labels.push(("reason", reason.label().to_string()));
                metrics::counter!(metric_defs::CARRIER_RX_FAILED.name, &labels).increment(1);
            }
        }
        if report.effective_db.is_finite() {
            metrics::histogram!(metric_defs::CARRIER_EFFECTIVE_SINR.name, &self.labels).record(report.effective_db);
            if report.raw_db.is_finite() {
                metrics::histogram!(metric_defs::CARRIER_ELIMINATION_GAIN.name, &self.labels)
                    .record(report.effective_db - report.raw_db);
            }
        }

        if self.config.trace_sinr {
            ctx.post_immediate(
                vec![],
                EventPayload::SinrComputed(SinrSample {
                    carrier: self.id,
                    tx_id: entry.params.tx_id,
                    source_address: entry.params.source_address,
                    effective_db: report.effective_db,
                }),
            );
        }
        ctx.post_immediate(
            vec![self.config.upper_layer],
            EventPayload::ReceptionComplete(ReceptionCompleteEvent {
                carrier: self.id,
                carrier_id: self.config.carrier_id,
                params: entry.params,
                outcome,
                sinr: report,
                start: entry.start,
                end: entry.end,
            }),
        );
    }

    // ------------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------------

    /// Abort everything in flight without drawing or reporting.
    fn clear(&mut self) {
        let discarded = self.active.len() + self.awaiting.len();
        self.active.clear();
        self.awaiting.clear();
        self.scheduled_frames.clear();
        self.window_timer_armed = false;
        self.generation += 1;
        info!(
            "Carrier[{}]: cleared, {} pending receptions discarded",
            self.config.name, discarded
        );
        metrics::counter!(metric_defs::CARRIER_RX_CLEARED.name, &self.labels).increment(discarded as u64);
        self.update_active_gauge();
    }

    fn configure(&mut self, settings: &CarrierSettings) -> Result<(), CarrierError> {
        check_positive("frequency_hz", settings.frequency_hz)?;
        let bandwidth = check_positive("bandwidth_hz", settings.bandwidth_hz)?;
        let noise_w = check_positive("noise", self.config.noise.power_w(bandwidth))?;
        check_elimination(&settings.elimination)?;
        let discipline = Discipline::from_config(&settings.discipline)?;

        if self.state() == CarrierState::Receiving {
            self.clear();
        } else {
            // Pending timers of the old discipline must not fire into the new one.
            self.scheduled_frames.clear();
            self.window_timer_armed = false;
            self.generation += 1;
        }
        self.config.frequency_hz = settings.frequency_hz;
        self.config.bandwidth_hz = bandwidth;
        self.config.discipline = settings.discipline.clone();
        self.config.elimination = settings.elimination.clone();
        self.discipline = discipline;
        self.elimination = build_elimination(&settings.elimination);
        self.noise_w = noise_w;
        info!(
            "Carrier[{}]: configured {:.0} Hz / {:.0} Hz, {} discipline, {} elimination",
            self.config.name,
            settings.frequency_hz,
            bandwidth,
            self.discipline.label(),
            self.elimination.name()
        );
        Ok(())
    }

    fn handle_fading_tick(&mut self, ctx: &mut SimContext) {
        let now = ctx.time();
        let Some(fading) = self.fading.as_mut() else {
            return;
        };
        if fading.evaluate_state_change(now, ctx.rng()) {
            debug!(
                "Carrier[{}]: fading state {} ({:.1} dB)",
                self.config.name,
                fading.current_state(),
                fading.fade_db()
            );
            metrics::counter!(metric_defs::FADING_TRANSITIONS.name, &self.labels).increment(1);
        }
        let tick = fading.tick();
        ctx.post_event(tick, vec![self.id], Self::fading_timer());
    }
}

fn clean_es_no(entry: &ReceptionEntry, noise_w: f64, regenerative: bool) -> f64 {
    InterferenceProfile::new(
        entry.window(),
        entry.rx_power_w,
        noise_w,
        entry.uplink,
        InterferenceMode::PerFragment,
    )
    .es_no(regenerative)
}

impl Entity for Carrier {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        match &event.payload {
            EventPayload::BeginReception(rx) => self.handle_begin_reception(rx, ctx),
            EventPayload::Timer { timer_id } => {
                let timer_id = *timer_id;
                if timer_id >= TIMER_WINDOW_STEP_BASE {
                    self.handle_window_step(timer_id - TIMER_WINDOW_STEP_BASE, ctx);
                } else if timer_id >= TIMER_FRAME_END_BASE {
                    self.handle_frame_end(timer_id - TIMER_FRAME_END_BASE, ctx);
                } else if timer_id >= TIMER_RX_END_BASE {
                    self.handle_rx_end(timer_id - TIMER_RX_END_BASE, ctx);
                } else if timer_id == FADING_TICK_TIMER {
                    self.handle_fading_tick(ctx);
                }
            }
            EventPayload::ClearCarrier => self.clear(),
            EventPayload::ConfigureCarrier(settings) => {
                if let Err(e) = self.configure(settings) {
                    warn!("Carrier[{}]: configuration rejected: {}", self.config.name, e);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn check_invariants(&self, now: SimTime) -> Result<(), SimError> {
        if let Some(e) = self.active.values().find(|e| e.end < now) {
            return Err(SimError::InvariantViolation {
                entity: self.id,
                message: format!("active entry {} ended at {} before {}", e.entry_id, e.end, now),
            });
        }
        if let Some(e) = self.awaiting.values().find(|e| e.end > now) {
            return Err(SimError::InvariantViolation {
                entity: self.id,
                message: format!("buffered entry {} still arriving until {}", e.entry_id, e.end),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
