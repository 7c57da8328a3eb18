//! # satrx-phy
//!
//! Receive-path physical layer for satrx.
//!
//! This crate provides:
//! - Link-quality tables and error models ([`LinkResults`], [`ErrorModel`])
//! - Fragment-wise interference composition ([`InterferenceProfile`])
//! - Interference elimination strategies ([`InterferenceElimination`])
//! - Markov fading ([`MarkovFading`])
//! - The receive carrier entity and its disciplines ([`Carrier`], [`Discipline`])
//! - Scenario entities: [`Channel`], [`Terminal`] and [`UpperLayerSink`]
//! - Metric names ([`metric_defs`])

pub mod carrier;
pub mod channel;
pub mod elimination;
pub mod fading;
pub mod interference;
pub mod link_results;
pub mod metric_defs;
pub mod sink;
pub mod terminal;

pub use carrier::{Carrier, CarrierConfig, CarrierError, CarrierState, Direction, Discipline};
pub use channel::{Channel, LinkModel, LinkParams, UplinkParams};
pub use elimination::{
    build_elimination, InterferenceElimination, NoElimination, PerfectElimination, ResidualElimination,
    ResidualModel,
};
pub use fading::{FadingError, MarkovConf, MarkovFading, MarkovSet};
pub use interference::{
    from_db, to_db, InterferenceMode, InterferenceProfile, Interferer, NoiseConfig, TimeWindow,
    UplinkNoiseFolding,
};
pub use link_results::{ErrorModel, LinkPoint, LinkResults, LinkResultsError, LookupTable};
pub use sink::UpperLayerSink;
pub use terminal::{ScheduledBurst, Terminal, TerminalConfig, TerminalError, TrafficConfig};
