//! Metric names emitted by the receive path.
//!
//! All metrics carry a `carrier` label; outcome counters add `reason` or
//! `packet_kind` where noted.

/// Kind of instrument behind a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonic count.
    Counter,
    /// Point-in-time value.
    Gauge,
    /// Distribution of samples.
    Histogram,
}

/// Static description of one metric.
#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    /// Metric key.
    pub name: &'static str,
    /// Instrument kind.
    pub kind: MetricKind,
    /// One-line description.
    pub description: &'static str,
}

/// Receptions that started on a carrier.
pub const CARRIER_RX_STARTED: MetricDef = MetricDef {
    name: "satrx.carrier.rx_started",
    kind: MetricKind::Counter,
    description: "Bursts accepted into the active set",
};

/// Successful receptions.
pub const CARRIER_RX_SUCCESS: MetricDef = MetricDef {
    name: "satrx.carrier.rx_success",
    kind: MetricKind::Counter,
    description: "Bursts decoded successfully (labels: packet_kind)",
};

/// Failed receptions.
pub const CARRIER_RX_FAILED: MetricDef = MetricDef {
    name: "satrx.carrier.rx_failed",
    kind: MetricKind::Counter,
    description: "Bursts that failed to decode (labels: reason)",
};

/// Records dropped as out-of-band or malformed.
pub const CARRIER_RX_DROPPED: MetricDef = MetricDef {
    name: "satrx.carrier.rx_dropped",
    kind: MetricKind::Counter,
    description: "Records ignored because of frequency mismatch or malformed parameters",
};

/// Entries discarded by a clear or reconfiguration.
pub const CARRIER_RX_CLEARED: MetricDef = MetricDef {
    name: "satrx.carrier.rx_cleared",
    kind: MetricKind::Counter,
    description: "Pending receptions discarded without an outcome",
};

/// Current active-set size.
pub const CARRIER_ACTIVE_RECEPTIONS: MetricDef = MetricDef {
    name: "satrx.carrier.active_receptions",
    kind: MetricKind::Gauge,
    description: "Entries currently in the active set",
};

/// Effective SINR at decision time.
pub const CARRIER_EFFECTIVE_SINR: MetricDef = MetricDef {
    name: "satrx.carrier.effective_sinr_db",
    kind: MetricKind::Histogram,
    description: "Effective Es/No after interference elimination (dB)",
};

/// Gain from elimination.
pub const CARRIER_ELIMINATION_GAIN: MetricDef = MetricDef {
    name: "satrx.carrier.elimination_gain_db",
    kind: MetricKind::Histogram,
    description: "Effective minus raw Es/No (dB)",
};

/// SIC passes per resolution.
pub const CARRIER_SIC_ITERATIONS: MetricDef = MetricDef {
    name: "satrx.carrier.sic_iterations",
    kind: MetricKind::Histogram,
    description: "Successive interference cancellation passes per frame or window step",
};

/// CRDSA copies retired because a sibling decoded.
pub const CARRIER_REPLICAS_REMOVED: MetricDef = MetricDef {
    name: "satrx.carrier.replicas_removed",
    kind: MetricKind::Counter,
    description: "CRDSA replicas cancelled after another copy of the packet decoded",
};

/// Markov fading state changes.
pub const FADING_TRANSITIONS: MetricDef = MetricDef {
    name: "satrx.fading.transitions",
    kind: MetricKind::Counter,
    description: "Markov fading state transitions",
};

/// Bursts routed by the channel.
pub const CHANNEL_DELIVERIES: MetricDef = MetricDef {
    name: "satrx.channel.deliveries",
    kind: MetricKind::Counter,
    description: "BeginReception events produced by the channel",
};

/// Every metric defined by this crate.
pub const ALL: &[MetricDef] = &[
    CARRIER_RX_STARTED,
    CARRIER_RX_SUCCESS,
    CARRIER_RX_FAILED,
    CARRIER_RX_DROPPED,
    CARRIER_RX_CLEARED,
    CARRIER_ACTIVE_RECEPTIONS,
    CARRIER_EFFECTIVE_SINR,
    CARRIER_ELIMINATION_GAIN,
    CARRIER_SIC_ITERATIONS,
    CARRIER_REPLICAS_REMOVED,
    FADING_TRANSITIONS,
    CHANNEL_DELIVERIES,
];

/// Register descriptions with the installed recorder.
pub fn describe_metrics() {
    for def in ALL {
        match def.kind {
            MetricKind::Counter => metrics::describe_counter!(def.name, def.description),
            MetricKind::Gauge => metrics::describe_gauge!(def.name, def.description),
            MetricKind::Histogram => metrics::describe_histogram!(def.name, def.description),
        }
    }
}
