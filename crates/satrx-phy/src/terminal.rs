//! Traffic-generating terminal entity.
//!
//! Terminals are the transmit side of a scenario. They build the signal
//! parameters record for every burst and hand it to the channel.

use rand::seq::index;
use rand::Rng;
use rand_distr::{Distribution, Exp};
use satrx_common::{
    Address, Destination, Entity, EntityId, Event, EventPayload, PacketKind, SignalParameters, SimContext, SimError,
    SimTime,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Terminal configuration errors.
#[derive(Debug, Error)]
pub enum TerminalError {
    /// Traffic parameters are out of range.
    #[error("terminal '{terminal}': {message}")]
    InvalidTraffic {
        /// Terminal name.
        terminal: String,
        /// What is wrong.
        message: String,
    },
}

fn default_payload_bytes() -> usize {
    64
}

/// Traffic pattern of a terminal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrafficConfig {
    /// Only scheduled bursts.
    #[default]
    None,
    /// Bursts with exponentially distributed gaps.
    Poisson {
        /// Mean bursts per second.
        rate_hz: f64,
        /// Payload size.
        #[serde(default = "default_payload_bytes")]
        payload_bytes: usize,
    },
    /// Random access: each slot of a frame is used with a fixed probability.
    SlottedAloha {
        /// Slot length in seconds.
        slot_duration_s: f64,
        /// Slots per frame.
        frame_slots: u32,
        /// Probability of transmitting in a slot.
        probability: f64,
        /// Payload size.
        #[serde(default = "default_payload_bytes")]
        payload_bytes: usize,
    },
    /// Contention resolution diversity slotted ALOHA: each frame, with a
    /// fixed probability, one packet is sent as `replicas` copies in distinct
    /// random slots.
    Crdsa {
        /// Slot length in seconds.
        slot_duration_s: f64,
        /// Slots per frame.
        frame_slots: u32,
        /// Copies per packet.
        replicas: u32,
        /// Probability of sending a packet in a frame.
        probability: f64,
        /// Payload size.
        #[serde(default = "default_payload_bytes")]
        payload_bytes: usize,
    },
}

impl TrafficConfig {
    /// Slot length and slots per frame of the slotted traffic kinds.
    fn frame(&self) -> Option<(SimTime, u32)> {
        match *self {
            TrafficConfig::SlottedAloha {
                slot_duration_s,
                frame_slots,
                ..
            }
            | TrafficConfig::Crdsa {
                slot_duration_s,
                frame_slots,
                ..
            } => Some((SimTime::from_secs(slot_duration_s), frame_slots)),
            _ => None,
        }
    }
}

/// One explicitly scheduled burst.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledBurst {
    /// Send time.
    pub at: SimTime,
    /// Destination override.
    pub destination: Option<Destination>,
    /// Payload size.
    pub payload_bytes: usize,
    /// Slot index for slotted carriers.
    pub slot: Option<u64>,
}

/// Static terminal configuration.
#[derive(Debug, Clone)]
pub struct TerminalConfig {
    /// Name used in logs.
    pub name: String,
    /// Own address.
    pub address: Address,
    /// Default destination.
    pub destination: Destination,
    /// Beam the terminal transmits in.
    pub beam_id: u32,
    /// Carrier index.
    pub carrier_id: u32,
    /// Carrier centre frequency (Hz).
    pub frequency_hz: f64,
    /// Carrier bandwidth (Hz).
    pub bandwidth_hz: f64,
    /// Transmit power (W).
    pub tx_power_w: f64,
    /// Modulation and coding.
    pub modcod: String,
    /// Burst duration.
    pub burst_duration: SimTime,
    /// Generated traffic.
    pub traffic: TrafficConfig,
    /// Generated traffic starts here.
    pub start: SimTime,
    /// Generated traffic stops here.
    pub stop: Option<SimTime>,
    /// Explicit bursts.
    pub schedule: Vec<ScheduledBurst>,
    /// Channel entity.
    pub channel: EntityId,
}

const TIMER_TRAFFIC_START: u64 = 1;
const TIMER_NEXT_BURST: u64 = 2;
const TIMER_FRAME_START: u64 = 3;
const TIMER_SLOT_BASE: u64 = 0x1000; // slot within frame is added to this
const TIMER_SCHEDULED_BASE: u64 = 1 << 40; // schedule index is added to this

/// Traffic source entity.
pub struct Terminal {
    id: EntityId,
    config: TerminalConfig,
    gap: Option<Exp<f64>>,
    next_seq: u64,
    /// Packet whose replicas are being sent in the current frame.
    replica_group: Option<u64>,
}

impl Terminal {
    /// Create a terminal, validating its traffic.
    pub fn new(id: EntityId, config: TerminalConfig) -> Result<Self, TerminalError> {
        let invalid = |message: String| TerminalError::InvalidTraffic {
            terminal: config.name.clone(),
            message,
        };
        if config.burst_duration == SimTime::ZERO {
            return Err(invalid("burst duration must be positive".into()));
        }
        let gap = match config.traffic {
            TrafficConfig::Poisson { rate_hz, .. } => Some(
                Exp::new(rate_hz)
                    .ok()
                    .filter(|_| rate_hz > 0.0 && rate_hz.is_finite())
                    .ok_or_else(|| invalid(format!("poisson rate must be positive, got {}", rate_hz)))?,
            ),
            TrafficConfig::SlottedAloha {
                slot_duration_s,
                frame_slots,
                probability,
                ..
            }
            | TrafficConfig::Crdsa {
                slot_duration_s,
                frame_slots,
                probability,
                ..
            } => {
                let slot = SimTime::from_secs(slot_duration_s);
                if !slot_duration_s.is_finite() || slot == SimTime::ZERO || frame_slots == 0 {
                    return Err(invalid("slotted traffic needs a positive slot length and slot count".into()));
                }
                if !(0.0..=1.0).contains(&probability) {
                    return Err(invalid(format!("slot probability must be within [0, 1], got {}", probability)));
                }
                if config.burst_duration > slot {
                    return Err(invalid("burst does not fit in a slot".into()));
                }
                if let TrafficConfig::Crdsa { replicas, .. } = config.traffic {
                    if replicas == 0 || replicas > frame_slots {
                        return Err(invalid(format!(
                            "crdsa needs between 1 and {} replicas, got {}",
                            frame_slots, replicas
                        )));
                    }
                }
                None
            }
            TrafficConfig::None => None,
        };
        Ok(Terminal {
            id,
            config,
            gap,
            next_seq: 0,
            replica_group: None,
        })
    }

    /// Terminal configuration.
    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    /// Self-addressed timers that start this terminal's traffic.
    pub fn initial_timers(&self) -> Vec<(SimTime, EventPayload)> {
        let mut timers: Vec<(SimTime, EventPayload)> = self
            .config
            .schedule
            .iter()
            .enumerate()
            .map(|(idx, burst)| {
                (
                    burst.at,
                    EventPayload::Timer {
                        timer_id: TIMER_SCHEDULED_BASE + idx as u64,
                    },
                )
            })
            .collect();
        let start = match self.config.traffic {
            TrafficConfig::Poisson { .. } => Some(TIMER_TRAFFIC_START),
            TrafficConfig::SlottedAloha { .. } | TrafficConfig::Crdsa { .. } => Some(TIMER_FRAME_START),
            TrafficConfig::None => None,
        };
        if let Some(timer_id) = start {
            timers.push((self.config.start, EventPayload::Timer { timer_id }));
        }
        timers.sort_by_key(|(at, _)| *at);
        timers
    }

    fn next_tx_id(&self) -> u64 {
        (self.id.0 << 32) | (self.next_seq & 0xffff_ffff)
    }

    fn stopped(&self, now: SimTime) -> bool {
        self.config.stop.map_or(false, |stop| now >= stop)
    }

    fn transmit(
        &mut self,
        destination: Destination,
        payload_bytes: usize,
        kind: PacketKind,
        slot: Option<u64>,
        replica_group: Option<u64>,
        ctx: &mut SimContext,
    ) {
        let tx_id = self.next_tx_id();
        self.next_seq += 1;
        // Replicas carry the payload of the first copy.
        let stamp = replica_group.unwrap_or(tx_id);
        let payload: Vec<u8> = (0..payload_bytes).map(|i| (stamp >> (8 * (i % 8))) as u8).collect();
        let params = SignalParameters {
            tx_id,
            sender: self.id,
            source_address: self.config.address,
            destination,
            carrier_id: self.config.carrier_id,
            frequency_hz: self.config.frequency_hz,
            bandwidth_hz: self.config.bandwidth_hz,
            beam_id: self.config.beam_id,
            modcod: self.config.modcod.clone(),
            tx_power_w: self.config.tx_power_w,
            start: ctx.time(),
            duration: self.config.burst_duration,
            kind,
            slot,
            replica_group,
            payload: Arc::from(payload),
        };
        trace!(
            "Terminal[{}]: tx {} ({} bytes, {})",
            self.config.name,
            params.tx_id,
            payload_bytes,
            kind.label()
        );
        ctx.post_immediate(vec![self.config.channel], EventPayload::Transmit(Arc::new(params)));
    }

    fn schedule_next_burst(&mut self, ctx: &mut SimContext) {
        if let Some(gap) = self.gap {
            let delay = SimTime::from_secs(gap.sample(ctx.rng()));
            ctx.post_event(delay, vec![self.id], EventPayload::Timer { timer_id: TIMER_NEXT_BURST });
        }
    }

    fn handle_frame_start(&mut self, ctx: &mut SimContext) {
        let Some((slot, frame_slots)) = self.config.traffic.frame() else {
            return;
        };
        let slot_timer = |s: u32| {
            (
                SimTime::from_micros(slot.as_micros() * s as u64),
                EventPayload::Timer {
                    timer_id: TIMER_SLOT_BASE + s as u64,
                },
            )
        };
        let mut timers = Vec::new();
        match self.config.traffic {
            TrafficConfig::SlottedAloha { probability, .. } => {
                for s in 0..frame_slots {
                    if ctx.rng().gen::<f64>() < probability {
                        timers.push(slot_timer(s));
                    }
                }
            }
            TrafficConfig::Crdsa {
                replicas, probability, ..
            } => {
                self.replica_group = None;
                if ctx.rng().gen::<f64>() < probability {
                    let mut slots = index::sample(ctx.rng(), frame_slots as usize, replicas as usize).into_vec();
                    slots.sort_unstable();
                    timers.extend(slots.into_iter().map(|s| slot_timer(s as u32)));
                }
            }
            _ => {}
        }
        for (delay, payload) in timers {
            ctx.post_event(delay, vec![self.id], payload);
        }
        let frame = SimTime::from_micros(slot.as_micros() * frame_slots as u64);
        ctx.post_event(frame, vec![self.id], EventPayload::Timer { timer_id: TIMER_FRAME_START });
    }

    fn handle_timer(&mut self, timer_id: u64, ctx: &mut SimContext) {
        let now = ctx.time();
        if timer_id >= TIMER_SCHEDULED_BASE {
            let idx = (timer_id - TIMER_SCHEDULED_BASE) as usize;
            if let Some(burst) = self.config.schedule.get(idx).cloned() {
                let destination = burst.destination.unwrap_or(self.config.destination);
                let kind = if burst.slot.is_some() {
                    PacketKind::SlottedAloha
                } else {
                    PacketKind::Dedicated
                };
                self.transmit(destination, burst.payload_bytes, kind, burst.slot, None, ctx);
            }
            return;
        }
        if self.stopped(now) {
            return;
        }
        match (timer_id, &self.config.traffic) {
            (TIMER_TRAFFIC_START, _) => self.schedule_next_burst(ctx),
            (TIMER_NEXT_BURST, TrafficConfig::Poisson { payload_bytes, .. }) => {
                let bytes = *payload_bytes;
                self.transmit(self.config.destination, bytes, PacketKind::Dedicated, None, None, ctx);
                self.schedule_next_burst(ctx);
            }
            (TIMER_FRAME_START, _) => self.handle_frame_start(ctx),
            (
                id,
                TrafficConfig::SlottedAloha {
                    slot_duration_s,
                    payload_bytes,
                    ..
                },
            ) if id >= TIMER_SLOT_BASE => {
                let slot_us = SimTime::from_secs(*slot_duration_s).as_micros();
                let slot = now.as_micros() / slot_us;
                let bytes = *payload_bytes;
                self.transmit(self.config.destination, bytes, PacketKind::SlottedAloha, Some(slot), None, ctx);
            }
            (
                id,
                TrafficConfig::Crdsa {
                    slot_duration_s,
                    payload_bytes,
                    ..
                },
            ) if id >= TIMER_SLOT_BASE => {
                let slot_us = SimTime::from_secs(*slot_duration_s).as_micros();
                let slot = now.as_micros() / slot_us;
                let bytes = *payload_bytes;
                let group = self.replica_group.unwrap_or_else(|| self.next_tx_id());
                self.replica_group = Some(group);
                self.transmit(self.config.destination, bytes, PacketKind::SlottedAloha, Some(slot), Some(group), ctx);
            }
            _ => {}
        }
    }
}

impl Entity for Terminal {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        if let EventPayload::Timer { timer_id } = &event.payload {
            self.handle_timer(*timer_id, ctx);
        }
        Ok(())
    }
}
