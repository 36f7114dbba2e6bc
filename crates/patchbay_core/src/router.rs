//! Mapping table and dispatch buffer
//!
//! The router owns the directed channel adjacency built from configuration
//! and the per-iteration dispatch buffer. Mappings are immutable once the
//! loop runs; the buffer accumulates channel updates grouped by destination
//! instance and is flushed exactly once per iteration.

use std::collections::HashMap;
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::trace;

use crate::backend::{ChannelUpdate, ChannelValue};
use crate::error::ConfigError;
use crate::registry::{Channel, ChannelKey, Instance};

/// Updates accumulated for one destination instance during one iteration.
pub(crate) struct InstanceBatch {
    pub instance: Rc<Instance>,
    pub updates: Vec<ChannelUpdate>,
}

/// Per-iteration event accumulation, grouped by destination instance.
///
/// Instances and channels keep first-touch order; a second update for a
/// channel within the same iteration overwrites the value in place
/// (last-write-wins).
#[derive(Default)]
struct DispatchBuffer {
    batches: Vec<InstanceBatch>,
    by_instance: HashMap<u64, usize>,
}

impl DispatchBuffer {
    fn record(&mut self, channel: Rc<Channel>, value: ChannelValue) {
        let slot = match self.by_instance.get(&channel.instance().id()) {
            Some(&slot) => slot,
            None => {
                self.by_instance.insert(channel.instance().id(), self.batches.len());
                self.batches.push(InstanceBatch {
                    instance: Rc::clone(channel.instance()),
                    updates: Vec::new(),
                });
                self.batches.len() - 1
            }
        };
        let updates = &mut self.batches[slot].updates;
        match updates.iter_mut().find(|u| u.channel.ident() == channel.ident()) {
            Some(update) => update.value = value,
            None => updates.push(ChannelUpdate { channel, value }),
        }
    }

    fn take(&mut self) -> Vec<InstanceBatch> {
        self.by_instance.clear();
        std::mem::take(&mut self.batches)
    }
}

/// The glob/mapping engine's runtime form: source channel to ordered
/// destination list, plus the dispatch buffer fed from it.
#[derive(Default)]
pub struct Router {
    mappings: HashMap<ChannelKey, SmallVec<[Rc<Channel>; 4]>>,
    buffer: DispatchBuffer,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `to` to the destination list of `from`.
    ///
    /// Destinations are deliberately not deduplicated: registering the same
    /// pair twice keeps two list entries. A channel mapped onto itself is
    /// rejected here, once, at configuration time.
    pub fn add_mapping(&mut self, from: &Rc<Channel>, to: &Rc<Channel>) -> Result<(), ConfigError> {
        if from.key() == to.key() {
            return Err(ConfigError::SelfReferentialMapping {
                spec: format!("{from:?}"),
            });
        }
        self.mappings
            .entry(from.key())
            .or_default()
            .push(Rc::clone(to));
        Ok(())
    }

    /// Total number of registered source→destination edges.
    pub fn mapping_count(&self) -> usize {
        self.mappings.values().map(|dests| dests.len()).sum()
    }

    /// The ordered destination list of a channel; empty when unmapped.
    pub fn destinations(&self, channel: &Channel) -> &[Rc<Channel>] {
        self.mappings
            .get(&channel.key())
            .map(|dests| dests.as_slice())
            .unwrap_or(&[])
    }

    /// Route one reported event into the dispatch buffer.
    ///
    /// An event on a channel with no destinations is silently dropped;
    /// that is not an error. Delivery never happens here, only at flush.
    pub fn record(&mut self, channel: &Rc<Channel>, value: ChannelValue) {
        let Some(destinations) = self.mappings.get(&channel.key()) else {
            trace!(channel = ?channel, "event on unmapped channel dropped");
            return;
        };
        for destination in destinations {
            self.buffer.record(Rc::clone(destination), value);
        }
    }

    /// Take everything accumulated this iteration, leaving the buffer
    /// empty so events reported during delivery land in the next one.
    pub(crate) fn take_pending(&mut self) -> Vec<InstanceBatch> {
        self.buffer.take()
    }

    /// Whether any updates await delivery.
    pub fn has_pending(&self) -> bool {
        !self.buffer.batches.is_empty()
    }

    /// Drop the adjacency, releasing the channel handles it holds.
    pub(crate) fn clear(&mut self) {
        self.mappings.clear();
        self.buffer.take();
    }
}
