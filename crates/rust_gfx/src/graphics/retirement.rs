//! Two-phase retirement of destroyed batches
//!
//! Removal from the registry is the logical destruction and happens at once.
//! The physical release waits here until the device reports that every
//! submission made before the removal has finished. Each entry carries the
//! submitted generation observed at removal time; it becomes free once the
//! completed generation reaches that marker.

use std::collections::VecDeque;

use crate::backend::Backend;
use crate::graphics::data::GraphicsData;

struct RetiredBatch<B: Backend> {
    marker: u64,
    data: GraphicsData<B>,
}

/// Batches waiting for the device to pass their generation marker
pub struct RetirementQueue<B: Backend> {
    pending: VecDeque<RetiredBatch<B>>,
}

impl<B: Backend> Default for RetirementQueue<B> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }
}

impl<B: Backend> RetirementQueue<B> {
    /// Queue a batch that may still be referenced by submissions up to `marker`
    pub fn push(&mut self, marker: u64, data: GraphicsData<B>) {
        self.pending.push_back(RetiredBatch { marker, data });
    }

    /// Take every batch whose marker the device has passed
    ///
    /// The caller drops the returned batches after releasing whatever lock
    /// guards this queue.
    pub fn take_completed(&mut self, completed: u64) -> Vec<GraphicsData<B>> {
        let mut ready = Vec::new();
        let mut still_pending = VecDeque::with_capacity(self.pending.len());

        for batch in self.pending.drain(..) {
            if batch.marker <= completed {
                ready.push(batch.data);
            } else {
                still_pending.push_back(batch);
            }
        }

        self.pending = still_pending;
        ready
    }

    /// Take everything regardless of markers
    pub fn take_all(&mut self) -> Vec<GraphicsData<B>> {
        self.pending.drain(..).map(|batch| batch.data).collect()
    }

    /// Highest marker still pending
    pub fn newest_marker(&self) -> Option<u64> {
        self.pending.iter().map(|batch| batch.marker).max()
    }

    /// Batches still waiting
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    /// Only batches at or below the completed generation are released
    #[test]
    fn test_take_completed_respects_markers() {
        let mut queue = RetirementQueue::<HeadlessBackend>::default();
        queue.push(3, GraphicsData::new());
        queue.push(1, GraphicsData::new());
        queue.push(5, GraphicsData::new());

        assert_eq!(queue.take_completed(0).len(), 0);
        assert_eq!(queue.take_completed(3).len(), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.newest_marker(), Some(5));
        assert_eq!(queue.take_all().len(), 1);
        assert!(queue.is_empty());
    }
}
