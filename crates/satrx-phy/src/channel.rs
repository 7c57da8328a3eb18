//! Channel entity: routes transmissions to the carriers that can hear them.

use crate::interference::from_db;
use crate::metric_defs;
use satrx_common::{
    BeginReceptionEvent, Entity, EntityId, Event, EventPayload, SignalParameters, SimContext, SimError, SimTime,
    UplinkBudget,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

// ============================================================================
// Link Model
// ============================================================================

/// Satellite side of a bent-pipe link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UplinkParams {
    /// Gain from the terminal to the satellite receiver (dB).
    pub gain_db: f64,
    /// Satellite receiver noise (W).
    pub noise_w: f64,
}

/// Parameters of one terminal-to-carrier link.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkParams {
    /// End-to-end gain including antennas and path loss (dB).
    pub gain_db: f64,
    /// Propagation delay.
    pub delay: SimTime,
    /// Present for bent-pipe links.
    pub uplink: Option<UplinkParams>,
}

/// Links between terminals and carriers.
///
/// BTreeMap keeps delivery order deterministic.
#[derive(Debug, Clone, Default)]
pub struct LinkModel {
    edges: BTreeMap<(EntityId, EntityId), LinkParams>,
}

impl LinkModel {
    /// Create an empty link model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a link.
    pub fn add_link(&mut self, terminal: EntityId, carrier: EntityId, params: LinkParams) {
        self.edges.insert((terminal, carrier), params);
    }

    /// Carriers that hear a terminal, sorted by entity id.
    pub fn get_receivers(&self, terminal: EntityId) -> impl Iterator<Item = (EntityId, &LinkParams)> {
        self.edges
            .range((terminal, EntityId(0))..=(terminal, EntityId(u64::MAX)))
            .map(|((_, carrier), params)| (*carrier, params))
    }

    /// Number of links.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether there are no links.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

// ============================================================================
// Channel Entity
// ============================================================================

/// Routes `Transmit` events to carriers as `BeginReception` events.
pub struct Channel {
    id: EntityId,
    link_model: LinkModel,
    carrier_names: BTreeMap<EntityId, String>,
}

impl Channel {
    /// Create a channel with the given link model.
    pub fn new(id: EntityId, link_model: LinkModel) -> Self {
        Channel {
            id,
            link_model,
            carrier_names: BTreeMap::new(),
        }
    }

    /// Name carriers for metric labels.
    pub fn with_carrier_names(mut self, names: BTreeMap<EntityId, String>) -> Self {
        self.carrier_names = names;
        self
    }

    fn route(&self, params: &Arc<SignalParameters>, ctx: &mut SimContext) {
        for (carrier, link) in self.link_model.get_receivers(params.sender) {
            let uplink = link.uplink.map(|u| UplinkBudget {
                rx_power_w: params.tx_power_w * from_db(u.gain_db),
                noise_w: u.noise_w,
            });
            trace!("Channel: tx {} -> carrier {:?} after {}", params.tx_id, carrier, link.delay);
            ctx.post_event(
                link.delay,
                vec![carrier],
                EventPayload::BeginReception(BeginReceptionEvent {
                    params: Arc::clone(params),
                    rx_power_w: params.tx_power_w * from_db(link.gain_db),
                    uplink,
                }),
            );
            let name = self
                .carrier_names
                .get(&carrier)
                .cloned()
                .unwrap_or_else(|| carrier.0.to_string());
            let labels = vec![("carrier", name)];
            metrics::counter!(metric_defs::CHANNEL_DELIVERIES.name, &labels).increment(1);
        }
    }
}

impl Entity for Channel {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        if let EventPayload::Transmit(params) = &event.payload {
            self.route(params, ctx);
        }
        Ok(())
    }
}
