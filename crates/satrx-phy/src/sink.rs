//! Upper-layer sink: the consumer of reception outcomes.

use satrx_common::{Entity, EntityId, Event, EventPayload, ReceptionOutcome, SimContext, SimError};
use tracing::debug;

/// Consumes reception outcomes. Delivery statistics are kept by the runner,
/// which sees the same events.
pub struct UpperLayerSink {
    id: EntityId,
}

impl UpperLayerSink {
    /// Create a sink.
    pub fn new(id: EntityId) -> Self {
        UpperLayerSink { id }
    }
}

impl Entity for UpperLayerSink {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn handle_event(&mut self, event: &Event, _ctx: &mut SimContext) -> Result<(), SimError> {
        if let EventPayload::ReceptionComplete(done) = &event.payload {
            match &done.outcome {
                ReceptionOutcome::Success { payload } => debug!(
                    "Sink: {} bytes from {} via carrier {}",
                    payload.len(),
                    done.params.source_address,
                    done.carrier_id
                ),
                ReceptionOutcome::Failure { reason } => debug!(
                    "Sink: lost tx {} from {} ({})",
                    done.params.tx_id,
                    done.params.source_address,
                    reason.label()
                ),
            }
        }
        Ok(())
    }
}
