//! # satrx-runner library
//!
//! Event loop, statistics and trace recording for satrx simulations.
//!
//! The loop pops events in time order (ties broken by event id), dispatches
//! them to their target entities and queues whatever the entities post. It
//! is single-threaded and fully deterministic for a given scenario and seed.

pub mod metrics_export;

use satrx_common::{Event, EventId, EventPayload, FailureReason, ReceptionOutcome, SimContext};
pub use satrx_common::SimTime;
use satrx_model::BuiltSimulation;
use satrx_phy::to_db;
use serde::Serialize;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::io::Write;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during simulation.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Model error.
    #[error("Model error: {0}")]
    Model(#[from] satrx_model::ModelError),

    /// Simulation error.
    #[error("Simulation error: {0}")]
    Simulation(#[from] satrx_common::SimError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

// ============================================================================
// Simulation Statistics
// ============================================================================

/// Per-carrier statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CarrierStats {
    /// Records delivered to the carrier by the channel.
    pub arrivals: u64,
    /// Successful receptions.
    pub delivered: u64,
    /// Payload bytes handed to the upper layer.
    pub delivered_bytes: u64,
    /// Failures with error probability 1.
    pub snr_below_threshold: u64,
    /// Random decoding failures.
    pub channel_error: u64,
    /// Slotted collisions.
    pub collision: u64,
    /// Clear requests handled.
    pub clears: u64,
}

/// Statistics collected during simulation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationStats {
    /// Total events processed.
    pub total_events: u64,
    /// Bursts sent by terminals.
    pub bursts_transmitted: u64,
    /// Records delivered to carriers.
    pub receptions_started: u64,
    /// Successful receptions.
    pub receptions_succeeded: u64,
    /// Failed receptions.
    pub receptions_failed: u64,
    /// Payload bytes handed to the upper layer, all carriers.
    pub delivered_bytes: u64,
    /// Per-carrier breakdown, keyed by carrier name.
    pub carriers: BTreeMap<String, CarrierStats>,
    /// Final simulation time.
    pub simulation_time_us: u64,
    /// Wall clock time in milliseconds.
    pub wall_time_ms: u64,
}

// ============================================================================
// Progress Reporting
// ============================================================================

/// Progress information passed to the progress callback.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Current simulation time.
    pub sim_time: SimTime,
    /// Target simulation time.
    pub target_time: SimTime,
    /// Elapsed wall clock time since start.
    pub wall_elapsed: Duration,
    /// Total events processed so far.
    pub events_processed: u64,
    /// Progress as a percentage (0.0 to 100.0).
    pub progress_percent: f64,
}

// ============================================================================
// Trace Recording
// ============================================================================

/// A burst leaving a terminal.
#[derive(Debug, Clone, Serialize)]
pub struct TxBurstPayload {
    /// Always "TX".
    pub direction: String,
    /// Transmission id.
    pub tx_id: u64,
    /// Sender address.
    pub source: String,
    /// Destination, "broadcast" or an address.
    pub destination: String,
    /// Carrier index.
    pub carrier_id: u32,
    /// Beam index.
    pub beam_id: u32,
    /// Modulation and coding.
    pub modcod: String,
    /// Access scheme.
    pub packet_kind: String,
    /// Transmit power.
    #[serde(rename = "POWER")]
    pub power: String,
    /// Burst start in seconds.
    pub start_time_s: f64,
    /// Burst end in seconds.
    pub end_time_s: f64,
}

/// A reception outcome at a carrier.
#[derive(Debug, Clone, Serialize)]
pub struct RxBurstPayload {
    /// Always "RX".
    pub direction: String,
    /// Transmission id.
    pub tx_id: u64,
    /// Sender address.
    pub source: String,
    /// Effective Es/No.
    #[serde(rename = "SNR")]
    pub snr: String,
    /// Es/No before elimination.
    pub raw_snr: String,
    /// Interference power behind the decision.
    pub interference: String,
    /// "ok", "snr_below_threshold", "channel_error" or "collision".
    pub reception_status: String,
    /// Burst start in seconds.
    pub start_time_s: f64,
    /// Burst end in seconds.
    pub end_time_s: f64,
}

/// An effective SINR observation.
#[derive(Debug, Clone, Serialize)]
pub struct SinrPayload {
    /// Transmission id.
    pub tx_id: u64,
    /// Sender address.
    pub source: String,
    /// Effective Es/No (dB).
    pub effective_db: f64,
}

/// A carrier control request.
#[derive(Debug, Clone, Serialize)]
pub struct ControlPayload {
    /// "clear" or "configure".
    pub action: String,
    /// New centre frequency for "configure".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_hz: Option<f64>,
}

/// Payload types for different trace events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum TracePayload {
    /// Burst sent.
    #[serde(rename = "BURST")]
    TxBurst(TxBurstPayload),
    /// Burst received or lost.
    #[serde(rename = "BURST")]
    RxBurst(RxBurstPayload),
    /// SINR sample.
    #[serde(rename = "SINR")]
    Sinr(SinrPayload),
    /// Carrier control.
    #[serde(rename = "CONTROL")]
    Control(ControlPayload),
}

/// A trace entry for output.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    /// Origin entity name.
    pub origin: String,
    /// Origin entity ID.
    pub origin_id: String,
    /// Timestamp (ISO 8601, simulation start at 2025-01-01T00:00:00Z).
    pub timestamp: String,
    /// Event-specific payload (flattened into this object).
    #[serde(flatten)]
    pub payload: TracePayload,
}

/// Trace recorder for outputting simulation events.
pub struct TraceRecorder {
    output: Option<Box<dyn Write>>,
    entries: Vec<TraceEntry>,
}

impl TraceRecorder {
    /// Create a new trace recorder. Without an output nothing is kept.
    pub fn new(output: Option<Box<dyn Write>>) -> Self {
        TraceRecorder {
            output,
            entries: Vec::new(),
        }
    }

    /// Whether entries are being kept.
    pub fn is_enabled(&self) -> bool {
        self.output.is_some()
    }

    /// Record an entry.
    pub fn record(&mut self, entry: TraceEntry) {
        if self.is_enabled() {
            self.entries.push(entry);
        }
    }

    /// Flush all entries to output.
    pub fn flush(&mut self) -> Result<(), RunnerError> {
        if let Some(ref mut output) = self.output {
            let json = serde_json::to_string_pretty(&self.entries)?;
            writeln!(output, "{}", json)?;
            output.flush()?;
        }
        Ok(())
    }
}

fn format_timestamp(time: SimTime) -> String {
    let sim_secs = time.as_secs_f64();
    format!(
        "2025-01-01T{:02}:{:02}:{:06.3}Z",
        (sim_secs / 3600.0) as u32 % 24,
        (sim_secs / 60.0) as u32 % 60,
        sim_secs % 60.0
    )
}

// ============================================================================
// Event Loop
// ============================================================================

/// The main simulation event loop.
pub struct EventLoop {
    event_queue: BinaryHeap<Event>,
    simulation: BuiltSimulation,
    context: SimContext,
    trace: TraceRecorder,
    stats: SimulationStats,
    /// Entity ID to display name.
    names: HashMap<u64, String>,
    check_invariants: bool,
}

impl EventLoop {
    /// Create a new event loop.
    pub fn new(simulation: BuiltSimulation, seed: u64, trace_output: Option<Box<dyn Write>>) -> Self {
        let mut event_queue = BinaryHeap::new();
        let mut next_id = 0;
        for event in simulation.initial_events.iter().cloned() {
            next_id = next_id.max(event.id.0 + 1);
            event_queue.push(event);
        }
        let mut context = SimContext::new(seed);
        context.reserve_event_ids(next_id);

        let mut names = HashMap::new();
        let mut carriers = BTreeMap::new();
        for c in &simulation.carriers {
            names.insert(c.entity_id.0, c.name.clone());
            carriers.insert(c.name.clone(), CarrierStats::default());
        }
        for t in &simulation.terminals {
            names.insert(t.entity_id.0, t.name.clone());
        }
        names.insert(simulation.channel_id.0, "channel".to_string());
        names.insert(simulation.sink_id.0, "sink".to_string());

        EventLoop {
            event_queue,
            simulation,
            context,
            trace: TraceRecorder::new(trace_output),
            stats: SimulationStats {
                carriers,
                ..SimulationStats::default()
            },
            names,
            check_invariants: false,
        }
    }

    /// Verify every entity's invariants after each event.
    pub fn set_check_invariants(&mut self, enabled: bool) {
        self.check_invariants = enabled;
    }

    /// The simulation being run.
    pub fn simulation(&self) -> &BuiltSimulation {
        &self.simulation
    }

    /// Statistics so far.
    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// Current simulation time.
    pub fn current_time(&self) -> SimTime {
        self.context.time()
    }

    /// Run the simulation for the specified duration.
    pub fn run(&mut self, duration: SimTime) -> Result<SimulationStats, RunnerError> {
        self.run_with_progress(duration, |_, _| {})
    }

    /// Run the simulation, reporting progress every few seconds of wall time.
    pub fn run_with_progress<F>(&mut self, duration: SimTime, mut on_progress: F) -> Result<SimulationStats, RunnerError>
    where
        F: FnMut(&ProgressInfo, bool), // bool = is_final
    {
        let start_time = Instant::now();
        let end_time = duration;
        let progress_interval = Duration::from_secs(5);
        let mut last_progress = Instant::now();

        self.event_queue.push(Event {
            id: EventId(u64::MAX),
            time: end_time,
            source: self.simulation.channel_id,
            targets: vec![],
            payload: EventPayload::SimulationEnd,
        });

        while let Some(event) = self.event_queue.pop() {
            if matches!(event.payload, EventPayload::SimulationEnd) {
                break;
            }

            self.context.set_time(event.time);
            self.simulation.entities.dispatch_event(&event, &mut self.context)?;

            for new_event in self.context.take_pending_events() {
                self.event_queue.push(new_event);
            }

            if self.check_invariants {
                self.simulation.entities.check_invariants(event.time)?;
            }

            self.stats.total_events += 1;
            self.update_stats(&event);
            self.record_trace(&event);

            if last_progress.elapsed() >= progress_interval {
                on_progress(&self.progress(start_time, end_time), false);
                last_progress = Instant::now();
            }
        }

        self.stats.simulation_time_us = self.context.time().as_micros();
        self.stats.wall_time_ms = start_time.elapsed().as_millis() as u64;
        let mut progress = self.progress(start_time, end_time);
        progress.progress_percent = 100.0;
        on_progress(&progress, true);
        info!(
            "Simulation finished at {}: {} events, {} delivered, {} failed",
            self.context.time(),
            self.stats.total_events,
            self.stats.receptions_succeeded,
            self.stats.receptions_failed
        );

        self.trace.flush()?;
        Ok(self.stats.clone())
    }

    fn progress(&self, start_time: Instant, end_time: SimTime) -> ProgressInfo {
        let sim_time = self.context.time();
        let progress_percent = if end_time == SimTime::ZERO {
            100.0
        } else {
            sim_time.as_secs_f64() / end_time.as_secs_f64() * 100.0
        };
        ProgressInfo {
            sim_time,
            target_time: end_time,
            wall_elapsed: start_time.elapsed(),
            events_processed: self.stats.total_events,
            progress_percent,
        }
    }

    fn carrier_stats(&mut self, carrier: u64) -> Option<&mut CarrierStats> {
        let name = self.names.get(&carrier)?;
        self.stats.carriers.get_mut(name)
    }

    /// Update statistics based on event type.
    fn update_stats(&mut self, event: &Event) {
        match &event.payload {
            EventPayload::Transmit(_) => self.stats.bursts_transmitted += 1,
            EventPayload::BeginReception(_) => {
                self.stats.receptions_started += 1;
                for target in &event.targets {
                    if let Some(stats) = self.carrier_stats(target.0) {
                        stats.arrivals += 1;
                    }
                }
            }
            EventPayload::ReceptionComplete(done) => {
                let bytes = match &done.outcome {
                    ReceptionOutcome::Success { payload } => payload.len() as u64,
                    ReceptionOutcome::Failure { .. } => 0,
                };
                if done.outcome.is_success() {
                    self.stats.receptions_succeeded += 1;
                    self.stats.delivered_bytes += bytes;
                } else {
                    self.stats.receptions_failed += 1;
                }
                if let Some(stats) = self.carrier_stats(done.carrier.0) {
                    match done.outcome {
                        ReceptionOutcome::Success { .. } => {
                            stats.delivered += 1;
                            stats.delivered_bytes += bytes;
                        }
                        ReceptionOutcome::Failure { reason } => match reason {
                            FailureReason::SnrBelowThreshold => stats.snr_below_threshold += 1,
                            FailureReason::ChannelError => stats.channel_error += 1,
                            FailureReason::Collision => stats.collision += 1,
                        },
                    }
                }
            }
            EventPayload::ClearCarrier => {
                for target in &event.targets {
                    if let Some(stats) = self.carrier_stats(target.0) {
                        stats.clears += 1;
                    }
                }
            }
            _ => {}
        }
    }

    fn name_of(&self, id: u64) -> String {
        self.names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("Entity_{}", id))
    }

    /// Record a trace entry for an event.
    fn record_trace(&mut self, event: &Event) {
        if !self.trace.is_enabled() {
            return;
        }
        // Receptions and samples are attributed to the carrier, the rest to the sender.
        let (origin_id, payload) = match &event.payload {
            EventPayload::Transmit(params) => (
                event.source.0,
                TracePayload::TxBurst(TxBurstPayload {
                    direction: "TX".to_string(),
                    tx_id: params.tx_id,
                    source: params.source_address.to_string(),
                    destination: match params.destination {
                        satrx_common::Destination::Broadcast => "broadcast".to_string(),
                        satrx_common::Destination::Unicast(addr) => addr.to_string(),
                    },
                    carrier_id: params.carrier_id,
                    beam_id: params.beam_id,
                    modcod: params.modcod.clone(),
                    packet_kind: params.kind.label().to_string(),
                    power: format!("{:.1} dBW", to_db(params.tx_power_w)),
                    start_time_s: params.start.as_secs_f64(),
                    end_time_s: params.end().as_secs_f64(),
                }),
            ),
            EventPayload::ReceptionComplete(done) => (
                done.carrier.0,
                TracePayload::RxBurst(RxBurstPayload {
                    direction: "RX".to_string(),
                    tx_id: done.params.tx_id,
                    source: done.params.source_address.to_string(),
                    snr: format!("{:.2} dB", done.sinr.effective_db),
                    raw_snr: format!("{:.2} dB", done.sinr.raw_db),
                    interference: format!("{:.3e} W", done.sinr.interference_w),
                    reception_status: done.outcome.label().to_string(),
                    start_time_s: done.start.as_secs_f64(),
                    end_time_s: done.end.as_secs_f64(),
                }),
            ),
            EventPayload::SinrComputed(sample) => (
                sample.carrier.0,
                TracePayload::Sinr(SinrPayload {
                    tx_id: sample.tx_id,
                    source: sample.source_address.to_string(),
                    effective_db: sample.effective_db,
                }),
            ),
            EventPayload::ClearCarrier => match event.targets.first() {
                Some(target) => (
                    target.0,
                    TracePayload::Control(ControlPayload {
                        action: "clear".to_string(),
                        frequency_hz: None,
                    }),
                ),
                None => return,
            },
            EventPayload::ConfigureCarrier(settings) => match event.targets.first() {
                Some(target) => (
                    target.0,
                    TracePayload::Control(ControlPayload {
                        action: "configure".to_string(),
                        frequency_hz: Some(settings.frequency_hz),
                    }),
                ),
                None => return,
            },
            _ => return,
        };

        let entry = TraceEntry {
            origin: self.name_of(origin_id),
            origin_id: origin_id.to_string(),
            timestamp: format_timestamp(event.time),
            payload,
        };
        debug!("trace {} {}", entry.origin, entry.timestamp);
        self.trace.record(entry);
    }
}

/// Create a new event loop from a built simulation, without trace output.
pub fn create_event_loop(simulation: BuiltSimulation, seed: u64) -> EventLoop {
    EventLoop::new(simulation, seed, None)
}

// Re-export key types for convenience
pub use satrx_model::{build_simulation, load_model, load_model_from_str, Model};

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
link_results:
  modcods:
    QPSK:
      points: [[0.0, 1.0], [3.0, 0.0]]
carriers:
  - name: gw0
    frequency_hz: 1.0e9
    bandwidth_hz: 1.0e6
    noise: { kind: constant, power_w: 1.0 }
    elimination: { kind: perfect }
    trace_sinr: true
terminals:
  - name: ut1
    address: 1
    carrier: gw0
    tx_power_w: 10.0
    modcod: QPSK
    burst_duration_s: 0.01
    schedule: [{ at_s: 0.0 }, { at_s: 1.0 }]
  - name: ut2
    address: 2
    carrier: gw0
    tx_power_w: 5.0
    modcod: QPSK
    burst_duration_s: 0.01
    schedule: [{ at_s: 0.0 }]
links:
  - { terminal: ut1, carrier: gw0, gain_db: 0.0 }
  - { terminal: ut2, carrier: gw0, gain_db: 0.0 }
events:
  - { at_s: 2.0, clear: gw0 }
"#;

    fn event_loop(seed: u64) -> EventLoop {
        let model = load_model_from_str(SCENARIO).unwrap();
        let sim = build_simulation(&model).unwrap();
        let mut event_loop = create_event_loop(sim, seed);
        event_loop.set_check_invariants(true);
        event_loop
    }

    #[test]
    fn test_run_counts_outcomes() {
        let mut event_loop = event_loop(1);
        let stats = event_loop.run(SimTime::from_secs(5.0)).unwrap();
        assert_eq!(stats.bursts_transmitted, 3);
        assert_eq!(stats.receptions_started, 3);
        // With perfect elimination every burst sees only noise: 10 dB and 7 dB.
        assert_eq!(stats.receptions_succeeded, 3);
        assert_eq!(stats.receptions_failed, 0);
        let gw0 = &stats.carriers["gw0"];
        assert_eq!(gw0.arrivals, 3);
        assert_eq!(gw0.delivered, 3);
        // Scheduled bursts default to 64-byte payloads.
        assert_eq!(gw0.delivered_bytes, 192);
        assert_eq!(stats.delivered_bytes, 192);
        assert_eq!(gw0.clears, 1);
        assert_eq!(stats.simulation_time_us, 2_000_000);
    }

    #[test]
    fn test_runs_are_deterministic() {
        let a = event_loop(9).run(SimTime::from_secs(5.0)).unwrap();
        let b = event_loop(9).run(SimTime::from_secs(5.0)).unwrap();
        assert_eq!(a.total_events, b.total_events);
        assert_eq!(a.receptions_succeeded, b.receptions_succeeded);
    }

    #[test]
    fn test_stops_at_duration() {
        let mut event_loop = event_loop(1);
        let stats = event_loop.run(SimTime::from_millis(500)).unwrap();
        assert_eq!(stats.bursts_transmitted, 2);
        assert_eq!(stats.receptions_succeeded, 2);
        assert!(event_loop.current_time() <= SimTime::from_millis(500));
    }

    const CRDSA_SCENARIO: &str = r#"
link_results:
  modcods:
    QPSK:
      points: [[0.0, 1.0], [3.0, 0.0]]
carriers:
  - name: gw0
    frequency_hz: 1.0e9
    bandwidth_hz: 1.0e6
    noise: { kind: constant, power_w: 1.0 }
    elimination: { kind: perfect }
    discipline: { kind: per_frame, frame_duration_s: 0.04 }
terminals:
  - name: ut1
    address: 1
    carrier: gw0
    tx_power_w: 10.0
    modcod: QPSK
    burst_duration_s: 0.005
    traffic: { kind: crdsa, slot_duration_s: 0.01, frame_slots: 4, replicas: 2, probability: 1.0 }
  - name: ut2
    address: 2
    carrier: gw0
    tx_power_w: 10.0
    modcod: QPSK
    burst_duration_s: 0.005
    traffic: { kind: crdsa, slot_duration_s: 0.01, frame_slots: 4, replicas: 2, probability: 1.0 }
links:
  - { terminal: ut1, carrier: gw0, gain_db: 0.0 }
  - { terminal: ut2, carrier: gw0, gain_db: 0.0 }
"#;

    #[test]
    fn test_crdsa_packets_reported_once() {
        let model = load_model_from_str(CRDSA_SCENARIO).unwrap();
        let mut event_loop = create_event_loop(build_simulation(&model).unwrap(), 3);
        event_loop.set_check_invariants(true);
        // 24 full frames are resolved before the stop time.
        let stats = event_loop.run(SimTime::from_millis(980)).unwrap();
        assert!(stats.bursts_transmitted >= 96);
        assert_eq!(stats.receptions_succeeded + stats.receptions_failed, 48);
        assert_eq!(stats.delivered_bytes, stats.receptions_succeeded * 64);
    }

    #[test]
    fn test_timestamp_format() {
        assert_eq!(format_timestamp(SimTime::from_secs(3723.5)), "2025-01-01T01:02:03.500Z");
    }
}
