//! # satrx-model
//!
//! YAML scenario loading and simulation building for satrx.
//!
//! This crate provides:
//! - YAML schema types for scenarios (carriers, terminals, links, control events)
//! - Model loading from files and strings, with every configuration error
//!   reported before the simulation starts
//! - Simulation building: entity registry plus initial events
//!
//! ## Example
//!
//! ```yaml
//! simulation:
//!   seed: 7
//!   duration_s: 30
//! link_results:
//!   modcods:
//!     QPSK_1_3:
//!       points: [[-1.0, 1.0], [2.0, 0.001]]
//! carriers:
//!   - name: gw0
//!     frequency_hz: 29.5e9
//!     bandwidth_hz: 1.0e6
//!     noise: { kind: constant, power_w: 1.0e-13 }
//!     elimination: { kind: perfect }
//! terminals:
//!   - name: ut1
//!     address: 1
//!     carrier: gw0
//!     tx_power_w: 2.0
//!     modcod: QPSK_1_3
//!     burst_duration_s: 0.01
//!     traffic: { kind: poisson, rate_hz: 2.0 }
//! links:
//!   - { terminal: ut1, carrier: gw0, gain_db: -125.0, delay_s: 0.25 }
//! ```

use satrx_common::{
    Address, CarrierSettings, Destination, DisciplineConfig, EliminationConfig, EntityId, EntityRegistry, Event,
    EventId, EventPayload, SimTime,
};
use satrx_phy::{
    Carrier, CarrierConfig, CarrierError, Channel, Direction, ErrorModel, InterferenceMode, LinkModel, LinkParams,
    LinkResults, LinkResultsError, LookupTable, LinkPoint, MarkovConf, NoiseConfig, ScheduledBurst, Terminal,
    TerminalConfig, TerminalError, TrafficConfig, UplinkNoiseFolding, UplinkParams, UpperLayerSink,
};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during model operations.
#[derive(Debug, Error)]
pub enum ModelError {
    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A name is defined twice.
    #[error("Duplicate {kind} name: {name}")]
    Duplicate {
        /// Carrier or terminal.
        kind: &'static str,
        /// The repeated name.
        name: String,
    },

    /// A reference to an undefined carrier or terminal.
    #[error("Unknown {kind} '{name}' referenced by {context}")]
    UnknownReference {
        /// Carrier or terminal.
        kind: &'static str,
        /// Missing name.
        name: String,
        /// Where it was referenced.
        context: String,
    },

    /// Link-quality table error.
    #[error("Link results error: {0}")]
    LinkResults(#[from] LinkResultsError),

    /// Carrier configuration error.
    #[error("Carrier '{name}': {source}")]
    Carrier {
        /// Carrier name.
        name: String,
        /// Underlying error.
        source: CarrierError,
    },

    /// Terminal configuration error.
    #[error("Terminal error: {0}")]
    Terminal(#[from] TerminalError),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

// ============================================================================
// YAML Schema Types (Internal)
// ============================================================================

fn default_tolerance() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_payload_bytes() -> usize {
    64
}

/// Simulation-wide settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SimulationYaml {
    #[serde(default)]
    seed: Option<u64>,
    #[serde(default)]
    duration_s: Option<f64>,
}

/// One link-quality table: inline points or a text file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct TableYaml {
    #[serde(default)]
    points: Option<Vec<(f64, f64)>>,
    #[serde(default)]
    file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LinkResultsYaml {
    #[serde(default)]
    quantization_db: Option<f64>,
    #[serde(default)]
    modcods: BTreeMap<String, TableYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct CarrierYaml {
    name: String,
    #[serde(default)]
    carrier_id: u32,
    frequency_hz: f64,
    bandwidth_hz: f64,
    #[serde(default = "default_tolerance")]
    tolerance_hz: f64,
    #[serde(default)]
    beam_id: Option<u32>,
    #[serde(default)]
    direction: Direction,
    #[serde(default)]
    address: Option<Address>,
    #[serde(default = "default_true")]
    regenerative: bool,
    #[serde(default)]
    interference_mode: InterferenceMode,
    #[serde(default)]
    uplink_noise_folding: UplinkNoiseFolding,
    noise: NoiseConfig,
    #[serde(default)]
    error_model: ErrorModel,
    #[serde(default)]
    discipline: DisciplineConfig,
    #[serde(default)]
    elimination: EliminationConfig,
    #[serde(default)]
    fading: Option<MarkovConf>,
    #[serde(default)]
    elevation_deg: Option<f64>,
    #[serde(default)]
    trace_sinr: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScheduledBurstYaml {
    at_s: f64,
    #[serde(default)]
    destination: Option<Destination>,
    #[serde(default = "default_payload_bytes")]
    payload_bytes: usize,
    #[serde(default)]
    slot: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct TerminalYaml {
    name: String,
    address: Address,
    #[serde(default = "default_destination")]
    destination: Destination,
    #[serde(default)]
    beam_id: u32,
    /// Carrier whose frequency plan the terminal uses.
    carrier: String,
    /// Overrides the carrier's frequency (mistuned terminal).
    #[serde(default)]
    frequency_hz: Option<f64>,
    tx_power_w: f64,
    modcod: String,
    burst_duration_s: f64,
    #[serde(default)]
    traffic: TrafficConfig,
    #[serde(default)]
    start_s: f64,
    #[serde(default)]
    stop_s: Option<f64>,
    #[serde(default)]
    schedule: Vec<ScheduledBurstYaml>,
}

fn default_destination() -> Destination {
    Destination::Broadcast
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
struct UplinkYaml {
    gain_db: f64,
    noise_w: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct LinkYaml {
    terminal: String,
    carrier: String,
    gain_db: f64,
    #[serde(default)]
    delay_s: f64,
    #[serde(default)]
    uplink: Option<UplinkYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigureYaml {
    carrier: String,
    settings: CarrierSettings,
}

/// A scheduled control action.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ControlEventYaml {
    at_s: f64,
    #[serde(default)]
    clear: Option<String>,
    #[serde(default)]
    configure: Option<ConfigureYaml>,
}

/// Root scenario structure (YAML schema).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioYaml {
    #[serde(default)]
    simulation: SimulationYaml,
    #[serde(default)]
    link_results: LinkResultsYaml,
    #[serde(default)]
    carriers: Vec<CarrierYaml>,
    #[serde(default)]
    terminals: Vec<TerminalYaml>,
    #[serde(default)]
    links: Vec<LinkYaml>,
    #[serde(default)]
    events: Vec<ControlEventYaml>,
}

// ============================================================================
// Public Model API
// ============================================================================

/// A loaded, validated scenario.
#[derive(Debug, Clone)]
pub struct Model {
    seed: Option<u64>,
    duration: Option<SimTime>,
    link_results: Arc<LinkResults>,
    carriers: Vec<CarrierYaml>,
    terminals: Vec<TerminalYaml>,
    links: Vec<LinkYaml>,
    events: Vec<ControlEventYaml>,
}

impl Model {
    /// Seed given in the scenario, if any.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Duration given in the scenario, if any.
    pub fn duration(&self) -> Option<SimTime> {
        self.duration
    }

    /// Shared link-quality tables.
    pub fn link_results(&self) -> &Arc<LinkResults> {
        &self.link_results
    }

    /// Carrier names in definition order.
    pub fn carrier_names(&self) -> impl Iterator<Item = &str> {
        self.carriers.iter().map(|c| c.name.as_str())
    }

    /// Terminal names in definition order.
    pub fn terminal_names(&self) -> impl Iterator<Item = &str> {
        self.terminals.iter().map(|t| t.name.as_str())
    }
}

// ============================================================================
// Model Loading
// ============================================================================

/// Load a scenario from a file. Table files are resolved relative to it.
pub fn load_model(path: &Path) -> Result<Model, ModelError> {
    let yaml = std::fs::read_to_string(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    load_model_with_base(&yaml, base)
}

/// Parse a scenario from a YAML string. Table files are resolved relative to
/// the working directory.
pub fn load_model_from_str(yaml_str: &str) -> Result<Model, ModelError> {
    load_model_with_base(yaml_str, Path::new("."))
}

fn load_model_with_base(yaml_str: &str, base: &Path) -> Result<Model, ModelError> {
    let scenario: ScenarioYaml = serde_yaml::from_str(yaml_str)?;
    let link_results = build_link_results(&scenario.link_results, base)?;
    validate(&scenario, &link_results)?;

    let duration = match scenario.simulation.duration_s {
        Some(d) => Some(positive_time("simulation.duration_s", d)?),
        None => None,
    };
    debug!(
        "Loaded scenario: {} carriers, {} terminals, {} links, {} control events",
        scenario.carriers.len(),
        scenario.terminals.len(),
        scenario.links.len(),
        scenario.events.len()
    );
    Ok(Model {
        seed: scenario.simulation.seed,
        duration,
        link_results: Arc::new(link_results),
        carriers: scenario.carriers,
        terminals: scenario.terminals,
        links: scenario.links,
        events: scenario.events,
    })
}

fn build_link_results(yaml: &LinkResultsYaml, base: &Path) -> Result<LinkResults, ModelError> {
    let mut results = LinkResults::new();
    if let Some(step) = yaml.quantization_db {
        results = results.with_quantization(step)?;
    }
    for (modcod, table) in &yaml.modcods {
        let table = match (&table.points, &table.file) {
            (Some(points), None) => LookupTable::new(
                modcod,
                points
                    .iter()
                    .map(|&(snr_db, error_rate)| LinkPoint { snr_db, error_rate })
                    .collect(),
            )?,
            (None, Some(file)) => LookupTable::load(modcod, &base.join(file))?,
            _ => {
                return Err(ModelError::InvalidConfig(format!(
                    "link results for '{}' need exactly one of 'points' or 'file'",
                    modcod
                )))
            }
        };
        results.insert(modcod.clone(), table);
    }
    Ok(results)
}

fn non_negative_time(field: &str, seconds: f64) -> Result<SimTime, ModelError> {
    if seconds.is_finite() && seconds >= 0.0 {
        Ok(SimTime::from_secs(seconds))
    } else {
        Err(ModelError::InvalidConfig(format!(
            "{} must be a non-negative number of seconds, got {}",
            field, seconds
        )))
    }
}

fn positive_time(field: &str, seconds: f64) -> Result<SimTime, ModelError> {
    let t = non_negative_time(field, seconds)?;
    if t == SimTime::ZERO {
        return Err(ModelError::InvalidConfig(format!("{} must be positive", field)));
    }
    Ok(t)
}

fn validate(scenario: &ScenarioYaml, link_results: &LinkResults) -> Result<(), ModelError> {
    let mut carriers: BTreeMap<&str, &CarrierYaml> = BTreeMap::new();
    for c in &scenario.carriers {
        if carriers.insert(c.name.as_str(), c).is_some() {
            return Err(ModelError::Duplicate {
                kind: "carrier",
                name: c.name.clone(),
            });
        }
    }
    let unknown_carrier = |name: &str, context: String| ModelError::UnknownReference {
        kind: "carrier",
        name: name.to_string(),
        context,
    };

    let mut terminals = BTreeSet::new();
    for t in &scenario.terminals {
        if !terminals.insert(t.name.as_str()) {
            return Err(ModelError::Duplicate {
                kind: "terminal",
                name: t.name.clone(),
            });
        }
        let carrier = carriers
            .get(t.carrier.as_str())
            .ok_or_else(|| unknown_carrier(&t.carrier, format!("terminal '{}'", t.name)))?;
        if carrier.error_model == ErrorModel::LinkResults && !link_results.contains(&t.modcod) {
            return Err(ModelError::InvalidConfig(format!(
                "terminal '{}' uses modcod '{}' which has no link results",
                t.name, t.modcod
            )));
        }
        if !(t.tx_power_w.is_finite() && t.tx_power_w >= 0.0) {
            return Err(ModelError::InvalidConfig(format!(
                "terminal '{}': tx_power_w must be non-negative",
                t.name
            )));
        }
        positive_time("burst_duration_s", t.burst_duration_s)?;
        non_negative_time("start_s", t.start_s)?;
        if let Some(stop) = t.stop_s {
            non_negative_time("stop_s", stop)?;
        }
        for burst in &t.schedule {
            non_negative_time("schedule.at_s", burst.at_s)?;
        }
    }

    for link in &scenario.links {
        if !terminals.contains(link.terminal.as_str()) {
            return Err(ModelError::UnknownReference {
                kind: "terminal",
                name: link.terminal.clone(),
                context: "links".to_string(),
            });
        }
        if !carriers.contains_key(link.carrier.as_str()) {
            return Err(unknown_carrier(&link.carrier, "links".to_string()));
        }
        non_negative_time("links.delay_s", link.delay_s)?;
    }

    for event in &scenario.events {
        non_negative_time("events.at_s", event.at_s)?;
        let target = match (&event.clear, &event.configure) {
            (Some(name), None) => name,
            (None, Some(cfg)) => &cfg.carrier,
            _ => {
                return Err(ModelError::InvalidConfig(format!(
                    "event at {} s needs exactly one of 'clear' or 'configure'",
                    event.at_s
                )))
            }
        };
        if !carriers.contains_key(target.as_str()) {
            return Err(unknown_carrier(target, format!("event at {} s", event.at_s)));
        }
    }
    Ok(())
}

// ============================================================================
// Simulation Building
// ============================================================================

/// Information about a carrier for display and tracing.
#[derive(Debug, Clone)]
pub struct CarrierInfo {
    /// Name from the scenario.
    pub name: String,
    /// Entity ID of the carrier.
    pub entity_id: EntityId,
    /// Carrier index.
    pub carrier_id: u32,
}

/// Information about a terminal for display and tracing.
#[derive(Debug, Clone)]
pub struct TerminalInfo {
    /// Name from the scenario.
    pub name: String,
    /// Entity ID of the terminal.
    pub entity_id: EntityId,
    /// Terminal address.
    pub address: Address,
}

/// Result of building a simulation from a model.
pub struct BuiltSimulation {
    /// Entity registry with all entities.
    pub entities: EntityRegistry,
    /// Initial events to seed the simulation.
    pub initial_events: Vec<Event>,
    /// Channel entity.
    pub channel_id: EntityId,
    /// Upper-layer sink entity.
    pub sink_id: EntityId,
    /// Carriers in definition order.
    pub carriers: Vec<CarrierInfo>,
    /// Terminals in definition order.
    pub terminals: Vec<TerminalInfo>,
}

impl BuiltSimulation {
    /// Name of an entity, for traces.
    pub fn entity_name(&self, id: EntityId) -> Option<&str> {
        if id == self.channel_id {
            return Some("channel");
        }
        if id == self.sink_id {
            return Some("sink");
        }
        self.carriers
            .iter()
            .find(|c| c.entity_id == id)
            .map(|c| c.name.as_str())
            .or_else(|| self.terminals.iter().find(|t| t.entity_id == id).map(|t| t.name.as_str()))
    }
}

/// Build a simulation from a model.
///
/// Entity IDs: channel 0, sink 1, then carriers and terminals in
/// definition order.
pub fn build_simulation(model: &Model) -> Result<BuiltSimulation, ModelError> {
    let mut entities = EntityRegistry::new();
    let mut initial_events = Vec::new();
    let mut event_id_counter: u64 = 0;
    let mut push_event = |time: SimTime, source: EntityId, target: EntityId, payload: EventPayload| {
        initial_events.push(Event {
            id: EventId(event_id_counter),
            time,
            source,
            targets: vec![target],
            payload,
        });
        event_id_counter += 1;
    };

    let channel_id = EntityId::new(0);
    let sink_id = EntityId::new(1);
    let mut next_entity_id: u64 = 2;

    let mut carrier_ids: BTreeMap<String, EntityId> = BTreeMap::new();
    let mut carriers = Vec::new();
    for c in &model.carriers {
        let id = EntityId::new(next_entity_id);
        next_entity_id += 1;
        let config = CarrierConfig {
            name: c.name.clone(),
            carrier_id: c.carrier_id,
            frequency_hz: c.frequency_hz,
            bandwidth_hz: c.bandwidth_hz,
            tolerance_hz: c.tolerance_hz,
            beam_id: c.beam_id,
            direction: c.direction,
            address: c.address,
            regenerative: c.regenerative,
            interference_mode: c.interference_mode,
            folding: c.uplink_noise_folding,
            noise: c.noise,
            error_model: c.error_model,
            discipline: c.discipline.clone(),
            elimination: c.elimination.clone(),
            fading: c.fading.clone(),
            elevation_deg: c.elevation_deg,
            upper_layer: sink_id,
            trace_sinr: c.trace_sinr,
        };
        let carrier = Carrier::new(id, config, Arc::clone(&model.link_results)).map_err(|source| {
            ModelError::Carrier {
                name: c.name.clone(),
                source,
            }
        })?;
        if let Some(tick) = carrier.fading_tick() {
            push_event(tick, id, id, Carrier::fading_timer());
        }
        debug!(
            "Carrier '{}' -> {:?} ({} discipline)",
            c.name,
            id,
            carrier.discipline().label()
        );
        entities.register(Box::new(carrier));
        carrier_ids.insert(c.name.clone(), id);
        carriers.push(CarrierInfo {
            name: c.name.clone(),
            entity_id: id,
            carrier_id: c.carrier_id,
        });
    }

    let mut terminal_ids: BTreeMap<String, EntityId> = BTreeMap::new();
    let mut terminals = Vec::new();
    for t in &model.terminals {
        let id = EntityId::new(next_entity_id);
        next_entity_id += 1;
        let carrier = model
            .carriers
            .iter()
            .find(|c| c.name == t.carrier)
            .ok_or_else(|| ModelError::UnknownReference {
                kind: "carrier",
                name: t.carrier.clone(),
                context: format!("terminal '{}'", t.name),
            })?;
        let config = TerminalConfig {
            name: t.name.clone(),
            address: t.address,
            destination: t.destination,
            beam_id: t.beam_id,
            carrier_id: carrier.carrier_id,
            frequency_hz: t.frequency_hz.unwrap_or(carrier.frequency_hz),
            bandwidth_hz: carrier.bandwidth_hz,
            tx_power_w: t.tx_power_w,
            modcod: t.modcod.clone(),
            burst_duration: SimTime::from_secs(t.burst_duration_s),
            traffic: t.traffic.clone(),
            start: SimTime::from_secs(t.start_s),
            stop: t.stop_s.map(SimTime::from_secs),
            schedule: t
                .schedule
                .iter()
                .map(|b| ScheduledBurst {
                    at: SimTime::from_secs(b.at_s),
                    destination: b.destination,
                    payload_bytes: b.payload_bytes,
                    slot: b.slot,
                })
                .collect(),
            channel: channel_id,
        };
        let terminal = Terminal::new(id, config)?;
        for (at, payload) in terminal.initial_timers() {
            push_event(at, id, id, payload);
        }
        entities.register(Box::new(terminal));
        terminal_ids.insert(t.name.clone(), id);
        terminals.push(TerminalInfo {
            name: t.name.clone(),
            entity_id: id,
            address: t.address,
        });
    }

    let mut link_model = LinkModel::new();
    for link in &model.links {
        let (Some(&terminal), Some(&carrier)) = (terminal_ids.get(&link.terminal), carrier_ids.get(&link.carrier))
        else {
            return Err(ModelError::InvalidConfig(format!(
                "link {} -> {} references an unknown entity",
                link.terminal, link.carrier
            )));
        };
        link_model.add_link(
            terminal,
            carrier,
            LinkParams {
                gain_db: link.gain_db,
                delay: SimTime::from_secs(link.delay_s),
                uplink: link.uplink.map(|u| UplinkParams {
                    gain_db: u.gain_db,
                    noise_w: u.noise_w,
                }),
            },
        );
    }

    for event in &model.events {
        let at = SimTime::from_secs(event.at_s);
        let (name, payload) = match (&event.clear, &event.configure) {
            (Some(name), _) => (name, EventPayload::ClearCarrier),
            (None, Some(cfg)) => (&cfg.carrier, EventPayload::ConfigureCarrier(cfg.settings.clone())),
            (None, None) => continue,
        };
        if let Some(&carrier) = carrier_ids.get(name) {
            push_event(at, channel_id, carrier, payload);
        }
    }

    let names: BTreeMap<EntityId, String> = carriers.iter().map(|c| (c.entity_id, c.name.clone())).collect();
    entities.register(Box::new(Channel::new(channel_id, link_model).with_carrier_names(names)));
    entities.register(Box::new(UpperLayerSink::new(sink_id)));

    info!(
        "Built simulation: {} entities, {} initial events",
        entities.len(),
        initial_events.len()
    );
    Ok(BuiltSimulation {
        entities,
        initial_events,
        channel_id,
        sink_id,
        carriers,
        terminals,
    })
}
