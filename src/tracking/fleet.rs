use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::location::LocationSample;

/// Last known position of every courier, whether or not it is on a delivery.
#[derive(Default)]
pub struct FleetPositions {
    latest: DashMap<Uuid, LocationSample>,
}

impl FleetPositions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the sample only if it was captured after the stored one.
    pub fn record(&self, sample: LocationSample) -> bool {
        match self.latest.entry(sample.courier_id) {
            Entry::Occupied(mut entry) => {
                if sample.is_newer_than(entry.get()) {
                    entry.insert(sample);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(sample);
                true
            }
        }
    }

    pub fn get(&self, courier_id: Uuid) -> Option<LocationSample> {
        self.latest.get(&courier_id).map(|entry| entry.value().clone())
    }
}
