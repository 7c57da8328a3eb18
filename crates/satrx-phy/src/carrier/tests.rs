use super::*;
use crate::fading::MarkovSet;
use crate::link_results::{LinkPoint, LookupTable};
use rand::SeedableRng;
use satrx_common::{Destination, DisciplineConfig, EventId, PacketKind};
use std::collections::BinaryHeap;

const CARRIER: EntityId = EntityId(1);
const SINK: EntityId = EntityId(99);
const FREQ: f64 = 1.5e9;
const BW: f64 = 1e6;

/// Results where anything at or above 3 dB always decodes and anything
/// below 0 dB never does.
fn step_results() -> Arc<LinkResults> {
    let mut results = LinkResults::new();
    results.insert(
        "QPSK",
        LookupTable::new(
            "QPSK",
            vec![
                LinkPoint { snr_db: 0.0, error_rate: 1.0 },
                LinkPoint { snr_db: 3.0, error_rate: 0.0 },
            ],
        )
        .unwrap(),
    );
    Arc::new(results)
}

fn lqt_results() -> Arc<LinkResults> {
    let mut results = LinkResults::new();
    results.insert(
        "QPSK",
        LookupTable::new(
            "QPSK",
            vec![
                LinkPoint { snr_db: 0.0, error_rate: 1.0 },
                LinkPoint { snr_db: 10.0, error_rate: 0.01 },
            ],
        )
        .unwrap(),
    );
    Arc::new(results)
}

fn config() -> CarrierConfig {
    CarrierConfig::new("gw0", FREQ, BW, SINK)
}

fn burst(tx_id: u64, duration_s: f64) -> SignalParameters {
    SignalParameters {
        tx_id,
        sender: EntityId(10),
        source_address: Address(tx_id as u32),
        destination: Destination::Broadcast,
        carrier_id: 0,
        frequency_hz: FREQ,
        bandwidth_hz: BW,
        beam_id: 1,
        modcod: "QPSK".to_string(),
        tx_power_w: 1.0,
        start: SimTime::ZERO,
        duration: SimTime::from_secs(duration_s),
        kind: PacketKind::Dedicated,
        slot: None,
        replica_group: None,
        payload: Arc::from(vec![tx_id as u8]),
    }
}

struct Harness {
    ctx: SimContext,
    queue: BinaryHeap<Event>,
    carrier: Carrier,
    completions: Vec<(SimTime, ReceptionCompleteEvent)>,
    samples: Vec<SinrSample>,
}

impl Harness {
    fn new(config: CarrierConfig, results: Arc<LinkResults>, seed: u64) -> Self {
        Harness {
            ctx: SimContext::new(seed),
            queue: BinaryHeap::new(),
            carrier: Carrier::new(CARRIER, config, results).unwrap(),
            completions: Vec::new(),
            samples: Vec::new(),
        }
    }

    fn push(&mut self, at_s: f64, payload: EventPayload) {
        let id = self.ctx.next_event_id();
        self.queue.push(Event {
            id: EventId(id),
            time: SimTime::from_secs(at_s),
            source: EntityId(0),
            targets: vec![CARRIER],
            payload,
        });
    }

    fn begin(&mut self, at_s: f64, params: SignalParameters, power_w: f64) {
        self.push(
            at_s,
            EventPayload::BeginReception(BeginReceptionEvent {
                params: Arc::new(params),
                rx_power_w: power_w,
                uplink: None,
            }),
        );
    }

    fn run_until(&mut self, end_s: f64) {
        let end = SimTime::from_secs(end_s);
        while self.queue.peek().map_or(false, |e| e.time <= end) {
            let Some(event) = self.queue.pop() else { break };
            self.ctx.set_time(event.time);
            if event.targets.contains(&CARRIER) {
                self.ctx.set_source(CARRIER);
                self.carrier.handle_event(&event, &mut self.ctx).unwrap();
                self.carrier.check_invariants(event.time).unwrap();
            }
            match event.payload {
                EventPayload::ReceptionComplete(done) => self.completions.push((event.time, done)),
                EventPayload::SinrComputed(sample) => self.samples.push(sample),
                _ => {}
            }
            for e in self.ctx.take_pending_events() {
                self.queue.push(e);
            }
        }
    }

    fn run(&mut self) {
        self.run_until(1e6);
    }

    fn completion(&self, tx_id: u64) -> &(SimTime, ReceptionCompleteEvent) {
        self.completions
            .iter()
            .find(|(_, c)| c.params.tx_id == tx_id)
            .unwrap()
    }
}

fn two_record_scenario(elimination: EliminationConfig) -> SinrReport {
    let mut cfg = config();
    cfg.elimination = elimination;
    let mut h = Harness::new(cfg, step_results(), 42);
    h.begin(0.0, burst(1, 10.0), 10.0);
    h.begin(5.0, burst(2, 10.0), 2.0);
    h.run();
    assert_eq!(h.completions.len(), 2);
    let (at, a) = h.completion(1);
    assert_eq!(*at, SimTime::from_secs(10.0));
    assert!(a.outcome.is_success());
    a.sinr
}

#[test]
fn test_two_record_scenario_no_elimination() {
    let sinr = two_record_scenario(EliminationConfig::Off);
    assert_eq!(sinr.interference_w, 2.0);
    assert!((sinr.effective_db - to_db(10.0 / 3.0)).abs() < 1e-9);
    assert_eq!(sinr.effective_db, sinr.raw_db);
}

#[test]
fn test_two_record_scenario_perfect() {
    let sinr = two_record_scenario(EliminationConfig::Perfect);
    assert_eq!(sinr.interference_w, 0.0);
    assert!((sinr.effective_db - 10.0).abs() < 1e-9);
    assert!((sinr.raw_db - to_db(10.0 / 3.0)).abs() < 1e-9);
}

#[test]
fn test_two_record_scenario_residual() {
    let sinr = two_record_scenario(EliminationConfig::Residual { fraction: 0.5 });
    assert!((sinr.interference_w - 1.0).abs() < 1e-12);
    assert!((sinr.effective_db - to_db(5.0)).abs() < 1e-9);
}

#[test]
fn test_below_table_always_fails() {
    let mut h = Harness::new(config(), lqt_results(), 42);
    // 0.5 W over 1 W noise is -3 dB.
    for i in 0..1000 {
        h.begin(i as f64, burst(i, 0.5), 0.5);
    }
    h.run();
    assert_eq!(h.completions.len(), 1000);
    assert!(h.completions.iter().all(|(_, c)| matches!(
        c.outcome,
        ReceptionOutcome::Failure {
            reason: FailureReason::SnrBelowThreshold
        }
    )));
}

#[test]
fn test_above_table_failure_rate() {
    let mut h = Harness::new(config(), lqt_results(), 42);
    let trials = 20_000u64;
    // 20 W over 1 W noise is 13 dB.
    for i in 0..trials {
        h.begin(i as f64, burst(i, 0.5), 20.0);
    }
    h.run();
    let failures = h.completions.iter().filter(|(_, c)| !c.outcome.is_success()).count();
    assert!((failures as f64 / trials as f64) <= 0.015);
    assert!(h.completions.iter().all(|(_, c)| match c.outcome {
        ReceptionOutcome::Failure { reason } => reason == FailureReason::ChannelError,
        ReceptionOutcome::Success { .. } => true,
    }));
}

#[test]
fn test_seeded_runs_are_identical() {
    let run = |seed: u64| {
        let mut cfg = config();
        cfg.elimination = EliminationConfig::Residual { fraction: 0.2 };
        cfg.trace_sinr = true;
        let mut h = Harness::new(cfg, lqt_results(), seed);
        for i in 0..300u64 {
            h.begin(i as f64 * 0.3, burst(i, 1.0), 5.0 + (i % 7) as f64);
        }
        h.run();
        let outcomes: Vec<(u64, &'static str, u64)> = h
            .completions
            .iter()
            .map(|(_, c)| (c.params.tx_id, c.outcome.label(), c.sinr.effective_db.to_bits()))
            .collect();
        let samples: Vec<u64> = h.samples.iter().map(|s| s.effective_db.to_bits()).collect();
        (outcomes, samples)
    };
    let (a, sa) = run(7);
    let (b, sb) = run(7);
    assert_eq!(a, b);
    assert_eq!(sa, sb);
    assert_eq!(sa.len(), 300);
}

#[test]
fn test_clear_discards_without_outcomes() {
    let mut h = Harness::new(config(), step_results(), 42);
    h.begin(0.0, burst(1, 10.0), 10.0);
    h.begin(2.0, burst(2, 10.0), 10.0);
    h.push(5.0, EventPayload::ClearCarrier);
    h.run_until(5.0);
    assert_eq!(h.carrier.state(), CarrierState::Idle);
    h.begin(20.0, burst(3, 1.0), 10.0);
    h.run();
    assert_eq!(h.completions.len(), 1);
    assert_eq!(h.completions[0].1.params.tx_id, 3);
}

#[test]
fn test_clear_does_not_consume_draws() {
    let tail = |with_clear: bool| {
        let mut h = Harness::new(config(), lqt_results(), 3);
        h.begin(0.0, burst(1, 10.0), 5.0);
        if with_clear {
            h.push(5.0, EventPayload::ClearCarrier);
        }
        h.run_until(15.0);
        h.ctx.rng().gen::<u64>()
    };
    let mut reference = rand_chacha::ChaCha8Rng::seed_from_u64(3);
    let first_draw = reference.gen::<u64>();
    // With the clear, no draw happened, so the stream is untouched.
    assert_eq!(tail(true), first_draw);
    assert_ne!(tail(false), first_draw);
}

#[test]
fn test_end_of_missing_entry_is_noop() {
    let mut h = Harness::new(config(), step_results(), 42);
    h.push(1.0, EventPayload::Timer { timer_id: TIMER_RX_END_BASE + 42 });
    h.run();
    assert!(h.completions.is_empty());
}

#[test]
fn test_out_of_band_and_malformed_records_dropped() {
    let mut h = Harness::new(config(), step_results(), 42);
    let mut wrong_freq = burst(1, 1.0);
    wrong_freq.frequency_hz = FREQ + 1e6;
    h.begin(0.0, wrong_freq, 10.0);
    let mut wrong_bw = burst(2, 1.0);
    wrong_bw.bandwidth_hz = BW * 2.0;
    h.begin(0.0, wrong_bw, 10.0);
    h.begin(0.0, burst(3, 0.0), 10.0);
    let mut unknown = burst(4, 1.0);
    unknown.modcod = "16APSK_3_4".to_string();
    h.begin(0.0, unknown, 10.0);
    h.run_until(0.0);
    assert_eq!(h.carrier.active_len(), 0);
    h.run();
    assert!(h.completions.is_empty());
}

#[test]
fn test_unintended_records_only_interfere() {
    let mut cfg = config();
    cfg.address = Some(Address(1));
    let mut h = Harness::new(cfg, step_results(), 42);
    let mut a = burst(1, 10.0);
    a.destination = Destination::Unicast(Address(1));
    let mut b = burst(2, 10.0);
    b.destination = Destination::Unicast(Address(2));
    h.begin(0.0, a, 10.0);
    h.begin(5.0, b, 2.0);
    h.run();
    assert_eq!(h.completions.len(), 1);
    assert_eq!(h.completion(1).1.sinr.interference_w, 2.0);
}

#[test]
fn test_slots_never_interfere() {
    let mut cfg = config();
    cfg.discipline = DisciplineConfig::PerSlot {
        slot_duration_s: Some(10.0),
        collision_model: CollisionModel::CheckAgainstSinr,
    };
    let mut h = Harness::new(cfg, step_results(), 42);
    h.begin(0.0, burst(1, 10.0), 10.0);
    let mut b = burst(2, 10.0);
    b.slot = Some(1);
    h.begin(5.0, b, 2.0);
    h.run();
    assert_eq!(h.completion(1).1.sinr.interference_w, 0.0);
    assert_eq!(h.completion(2).1.sinr.interference_w, 0.0);
}

#[test]
fn test_uplink_beams_never_interfere() {
    let run = |direction: Direction| {
        let mut cfg = config();
        cfg.direction = direction;
        let mut h = Harness::new(cfg, step_results(), 42);
        h.begin(0.0, burst(1, 10.0), 10.0);
        let mut b = burst(2, 10.0);
        b.beam_id = 2;
        h.begin(5.0, b, 2.0);
        h.run();
        h.completion(1).1.sinr.interference_w
    };
    assert_eq!(run(Direction::Uplink), 0.0);
    assert_eq!(run(Direction::Downlink), 2.0);
}

#[test]
fn test_beam_filter_marks_other_beams_unintended() {
    let mut cfg = config();
    cfg.beam_id = Some(1);
    let mut h = Harness::new(cfg, step_results(), 42);
    let mut b = burst(2, 1.0);
    b.beam_id = 7;
    h.begin(0.0, b, 10.0);
    h.begin(0.0, burst(1, 1.0), 10.0);
    h.run();
    assert_eq!(h.completions.len(), 1);
    assert_eq!(h.completions[0].1.params.tx_id, 1);
}

fn aloha(tx_id: u64, duration_s: f64) -> SignalParameters {
    let mut params = burst(tx_id, duration_s);
    params.kind = PacketKind::SlottedAloha;
    params
}

fn collision_run(model: CollisionModel, make: fn(u64, f64) -> SignalParameters) -> (&'static str, &'static str) {
    let mut cfg = config();
    cfg.discipline = DisciplineConfig::PerSlot {
        slot_duration_s: None,
        collision_model: model,
    };
    cfg.elimination = EliminationConfig::Perfect;
    let mut h = Harness::new(cfg, step_results(), 42);
    h.begin(0.0, make(1, 10.0), 100.0);
    h.begin(5.0, make(2, 10.0), 100.0);
    h.begin(30.0, make(3, 1.0), 100.0);
    h.run();
    (
        h.completion(1).1.outcome.label(),
        h.completion(3).1.outcome.label(),
    )
}

#[test]
fn test_collision_models_judge_random_access() {
    assert_eq!(
        collision_run(CollisionModel::AlwaysDropColliding, aloha),
        ("collision", "ok")
    );
    // The constant model applies to every random-access burst, lone or not.
    assert_eq!(
        collision_run(CollisionModel::ConstantProbability { probability: 1.0 }, aloha),
        ("collision", "collision")
    );
    assert_eq!(
        collision_run(CollisionModel::ConstantProbability { probability: 0.0 }, aloha),
        ("ok", "ok")
    );
    assert_eq!(collision_run(CollisionModel::CheckAgainstSinr, aloha), ("ok", "ok"));
}

#[test]
fn test_collision_models_ignore_dedicated_bursts() {
    for model in [
        CollisionModel::AlwaysDropColliding,
        CollisionModel::ConstantProbability { probability: 1.0 },
        CollisionModel::CheckAgainstSinr,
    ] {
        assert_eq!(collision_run(model, burst), ("ok", "ok"), "{:?}", model);
    }
}

fn frame_run(elimination: EliminationConfig) -> Harness {
    let mut cfg = config();
    cfg.discipline = DisciplineConfig::PerFrame {
        frame_duration_s: 20.0,
        max_sic_iterations: 4,
    };
    cfg.elimination = elimination;
    let mut h = Harness::new(cfg, step_results(), 42);
    h.begin(0.0, burst(1, 10.0), 10.0);
    h.begin(0.0, burst(2, 10.0), 100.0);
    h.run();
    h
}

#[test]
fn test_frame_resolves_at_boundary_with_sic() {
    let h = frame_run(EliminationConfig::Perfect);
    assert_eq!(h.completions.len(), 2);
    assert!(h.completions.iter().all(|(t, _)| *t == SimTime::from_secs(20.0)));
    // The weak burst is only decodable once the strong one is cancelled.
    let (_, weak) = h.completion(1);
    assert!(weak.outcome.is_success());
    assert!((weak.sinr.effective_db - 10.0).abs() < 1e-9);
    assert!(weak.sinr.raw_db < -9.0);
}

#[test]
fn test_frame_without_elimination_loses_weak_burst() {
    let h = frame_run(EliminationConfig::Off);
    assert!(h.completion(2).1.outcome.is_success());
    assert_eq!(h.completion(1).1.outcome.label(), "snr_below_threshold");
}

#[test]
fn test_frame_straddler_resolved_alone() {
    let mut cfg = config();
    cfg.discipline = DisciplineConfig::PerFrame {
        frame_duration_s: 10.0,
        max_sic_iterations: 4,
    };
    let mut h = Harness::new(cfg, step_results(), 42);
    h.begin(0.0, burst(1, 5.0), 10.0);
    h.begin(5.0, burst(2, 10.0), 10.0);
    // Ends exactly on the boundary of frame 1.
    h.begin(12.0, burst(3, 8.0), 10.0);
    h.run();
    assert_eq!(h.completion(1).0, SimTime::from_secs(10.0));
    assert_eq!(h.completion(2).0, SimTime::from_secs(15.0));
    assert_eq!(h.completion(3).0, SimTime::from_secs(20.0));
}

fn replica(tx_id: u64, group: u64, sender: u64) -> SignalParameters {
    let mut params = aloha(tx_id, 1.0);
    params.sender = EntityId(sender);
    params.replica_group = Some(group);
    params
}

fn crdsa_harness() -> Harness {
    let mut cfg = config();
    cfg.discipline = DisciplineConfig::PerFrame {
        frame_duration_s: 20.0,
        max_sic_iterations: 4,
    };
    cfg.elimination = EliminationConfig::Perfect;
    Harness::new(cfg, step_results(), 42)
}

#[test]
fn test_crdsa_decoded_replica_cancels_its_siblings() {
    let mut h = crdsa_harness();
    // Packet 1 collides with tx 3 in the first slot and is clean in the second.
    h.begin(0.0, replica(1, 1, 10), 10.0);
    h.begin(0.0, burst(3, 1.0), 10.0);
    h.begin(2.0, replica(2, 1, 10), 10.0);
    h.run();

    let mut ids: Vec<u64> = h.completions.iter().map(|(_, c)| c.params.tx_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![2, 3], "packet 1 must be reported once");
    assert!(h.completions.iter().all(|(_, c)| c.outcome.is_success()));
    // Tx 3 only decodes once the first copy's power is known and removed.
    let (_, freed) = h.completion(3);
    assert!(freed.sinr.raw_db < 0.0);
    assert!((freed.sinr.effective_db - 10.0).abs() < 1e-9);
}

#[test]
fn test_crdsa_undecoded_packet_fails_once() {
    let mut h = crdsa_harness();
    // Two packets whose copies collide pairwise in both slots.
    h.begin(0.0, replica(1, 1, 10), 10.0);
    h.begin(0.0, replica(3, 3, 11), 10.0);
    h.begin(2.0, replica(2, 1, 10), 10.0);
    h.begin(2.0, replica(4, 3, 11), 10.0);
    h.run();

    let ids: Vec<u64> = h.completions.iter().map(|(_, c)| c.params.tx_id).collect();
    assert_eq!(ids, vec![1, 3]);
    assert!(h.completions.iter().all(|(_, c)| c.outcome.label() == "snr_below_threshold"));
    assert_eq!(h.carrier.state(), CarrierState::Idle);
}

fn window_run(elimination: EliminationConfig) -> Harness {
    let mut cfg = config();
    cfg.discipline = DisciplineConfig::PerWindow {
        window_s: 10.0,
        step_s: 1.0,
        max_sic_iterations: 4,
    };
    cfg.elimination = elimination;
    let mut h = Harness::new(cfg, step_results(), 42);
    h.begin(0.0, burst(1, 4.0), 100.0);
    h.begin(2.0, burst(2, 6.0), 10.0);
    h.run();
    h
}

#[test]
fn test_window_progressive_refinement() {
    let h = window_run(EliminationConfig::Perfect);
    let (t1, strong) = h.completion(1);
    assert_eq!(*t1, SimTime::from_secs(5.0));
    assert!(strong.outcome.is_success());
    // The strong burst was cancelled while the weak one was still arriving.
    let (t2, weak) = h.completion(2);
    assert_eq!(*t2, SimTime::from_secs(9.0));
    assert!(weak.outcome.is_success());
    assert!((weak.sinr.effective_db - 10.0).abs() < 1e-9);
}

#[test]
fn test_window_evicts_stale_entries() {
    let h = window_run(EliminationConfig::Off);
    let (t2, weak) = h.completion(2);
    // Started at 2 s; leaves a 10 s window at the first step after 12 s.
    assert_eq!(*t2, SimTime::from_secs(13.0));
    assert_eq!(weak.outcome.label(), "snr_below_threshold");
    assert_eq!(h.carrier.awaiting_len(), 0);
}

#[test]
fn test_configure_clears_and_retunes() {
    let mut h = Harness::new(config(), step_results(), 42);
    h.begin(0.0, burst(1, 10.0), 10.0);
    h.push(
        1.0,
        EventPayload::ConfigureCarrier(CarrierSettings {
            frequency_hz: FREQ + 5e6,
            bandwidth_hz: BW,
            discipline: DisciplineConfig::default(),
            elimination: EliminationConfig::Perfect,
        }),
    );
    h.begin(2.0, burst(2, 1.0), 10.0);
    let mut retuned = burst(3, 1.0);
    retuned.frequency_hz = FREQ + 5e6;
    h.begin(3.0, retuned, 10.0);
    h.run();
    assert_eq!(h.completions.len(), 1);
    assert_eq!(h.completions[0].1.params.tx_id, 3);
    assert_eq!(h.carrier.config().elimination, EliminationConfig::Perfect);
}

#[test]
fn test_invalid_configure_keeps_settings() {
    let mut h = Harness::new(config(), step_results(), 42);
    h.push(
        0.0,
        EventPayload::ConfigureCarrier(CarrierSettings {
            frequency_hz: -1.0,
            bandwidth_hz: BW,
            discipline: DisciplineConfig::default(),
            elimination: EliminationConfig::Off,
        }),
    );
    h.begin(1.0, burst(1, 1.0), 10.0);
    h.run();
    assert_eq!(h.completions.len(), 1);
}

#[test]
fn test_locked_fading_attenuates_arrivals() {
    let mut cfg = config();
    cfg.fading = Some(MarkovConf {
        tick_s: 1.0,
        sets: vec![MarkovSet {
            elevation_deg: 40.0,
            fade_db: vec![0.0, 10.0],
            transitions: vec![vec![0.5, 0.5], vec![0.5, 0.5]],
        }],
        initial_set: 0,
        initial_state: 1,
        locked: true,
    });
    let mut h = Harness::new(cfg, step_results(), 42);
    assert_eq!(h.carrier.fading_tick(), Some(SimTime::from_secs(1.0)));
    h.push(1.0, Carrier::fading_timer());
    h.begin(2.5, burst(1, 1.0), 100.0);
    h.run_until(10.0);
    assert!((h.completion(1).1.sinr.raw_db - 10.0).abs() < 1e-9);
    assert_eq!(h.carrier.fading().unwrap().current_state(), 1);
}

#[test]
fn test_invariant_violation_detected() {
    let mut h = Harness::new(config(), step_results(), 42);
    h.begin(0.0, burst(1, 10.0), 10.0);
    h.run_until(0.0);
    assert!(h.carrier.check_invariants(SimTime::from_secs(5.0)).is_ok());
    assert!(matches!(
        h.carrier.check_invariants(SimTime::from_secs(11.0)),
        Err(SimError::InvariantViolation { .. })
    ));
}

#[test]
fn test_rejects_invalid_configuration() {
    let mut cfg = config();
    cfg.elimination = EliminationConfig::Residual { fraction: 1.5 };
    assert!(matches!(
        Carrier::new(CARRIER, cfg, step_results()),
        Err(CarrierError::InvalidProbability { .. })
    ));
    let mut cfg = config();
    cfg.noise = NoiseConfig::Constant { power_w: 0.0 };
    assert!(Carrier::new(CARRIER, cfg, step_results()).is_err());
    let mut cfg = config();
    cfg.fading = Some(MarkovConf {
        tick_s: 1.0,
        sets: vec![],
        initial_set: 0,
        initial_state: 0,
        locked: false,
    });
    assert!(matches!(
        Carrier::new(CARRIER, cfg, step_results()),
        Err(CarrierError::Fading(FadingError::NoSets))
    ));
}
