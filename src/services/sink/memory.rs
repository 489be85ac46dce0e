//! In-memory store retaining recent samples per watch group, and the events
//! raised in the cycles of those samples.

use super::{CycleRecord, SampleStore};
use crate::models::{Event, Sample};
use crate::{Error, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct History {
    samples: VecDeque<Sample>,
    events: Vec<Event>,
}

#[derive(Default)]
pub struct MemoryStore {
    groups: Mutex<HashMap<String, History>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, History>>> {
        self.groups
            .lock()
            .map_err(|_| Error::Persistence("memory store lock poisoned".to_string()))
    }

    /// Retained samples for a group, oldest first.
    pub fn samples(&self, watch_group: &str) -> Result<Vec<Sample>> {
        Ok(self
            .lock()?
            .get(watch_group)
            .map(|h| h.samples.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Events of the retained cycles for a group, in arrival order.
    pub fn events(&self, watch_group: &str) -> Result<Vec<Event>> {
        Ok(self
            .lock()?
            .get(watch_group)
            .map(|h| h.events.clone())
            .unwrap_or_default())
    }
}

impl SampleStore for MemoryStore {
    fn persist(&self, record: &CycleRecord<'_>) -> Result<()> {
        let mut groups = self.lock()?;
        let history = groups
            .entry(record.sample.watch_group().to_string())
            .or_default();

        history.samples.push_back(record.sample.clone());
        while history.samples.len() > record.max_samples.max(1) {
            history.samples.pop_front();
        }
        history.events.extend_from_slice(record.events);
        let kept: HashSet<i64> = history.samples.iter().map(Sample::epoch).collect();
        history
            .events
            .retain(|event| kept.contains(&event.sample_epoch));
        Ok(())
    }

    fn load_last_sample(&self, watch_group: &str) -> Result<Option<Sample>> {
        Ok(self
            .lock()?
            .get(watch_group)
            .and_then(|h| h.samples.back().cloned()))
    }
}
