//! Step-tagged holding area for border payloads that arrive early.
//!
//! A fast fellow may send its payload for step `s + k` while this worker is
//! still on `s`.  The payload waits here, keyed by step, and is handed out
//! only once the local exchange reaches that exact step.

use std::collections::BTreeMap;

use dt_core::Step;
use dt_proto::WwTraffic;

/// Verdict of [`StepCache::admit`].
#[derive(Debug, PartialEq)]
pub enum Admit {
    /// For the current exchange; apply it now.
    Apply(WwTraffic),
    /// For a later step; held in the cache.
    Deferred,
    /// For a step already exchanged; dropped.
    Stale,
}

#[derive(Debug, Default)]
pub struct StepCache {
    inner: BTreeMap<Step, Vec<WwTraffic>>,
    total: usize,
}

impl StepCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `traffic` against the step currently being exchanged.  `None`
    /// means no exchange has started yet, so everything is deferred.
    pub fn admit(&mut self, current: Option<Step>, traffic: WwTraffic) -> Admit {
        match current {
            Some(s) if traffic.step == s => Admit::Apply(traffic),
            Some(s) if traffic.step < s => Admit::Stale,
            _ => {
                self.inner.entry(traffic.step).or_default().push(traffic);
                self.total += 1;
                Admit::Deferred
            }
        }
    }

    /// Remove and return the payloads held for exactly `step`, ordered by
    /// sender.
    pub fn take(&mut self, step: Step) -> Vec<WwTraffic> {
        let Some(mut due) = self.inner.remove(&step) else {
            return Vec::new();
        };
        self.total -= due.len();
        due.sort_by_key(|t| t.sender);
        due
    }

    /// Discard everything held for steps before `step`.
    pub fn drop_before(&mut self, step: Step) -> usize {
        let keep = self.inner.split_off(&step);
        let dropped: usize = self.inner.values().map(Vec::len).sum();
        self.inner = keep;
        self.total -= dropped;
        dropped
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Earliest step with a held payload.
    pub fn next_step(&self) -> Option<Step> {
        self.inner.keys().next().copied()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
        self.total = 0;
    }
}
