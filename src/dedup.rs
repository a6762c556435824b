use std::collections::{HashSet, VecDeque};
use thiserror::Error;

pub const DEFAULT_HIGH_WATERMARK: usize = 1000;
pub const DEFAULT_LOW_WATERMARK: usize = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("dedup low watermark {low} must be between 1 and the high watermark {high}")]
pub struct InvalidWatermarks {
    pub high: usize,
    pub low: usize,
}

/// Bounded memory of processed post ids.
///
/// Once the set grows past the high watermark the oldest ids are dropped
/// until only `low_watermark` remain, in insertion order. An evicted id is
/// reported as unseen if it ever shows up again.
#[derive(Debug, Clone)]
pub struct DedupTracker {
    high_watermark: usize,
    low_watermark: usize,
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl Default for DedupTracker {
    fn default() -> Self {
        Self {
            high_watermark: DEFAULT_HIGH_WATERMARK,
            low_watermark: DEFAULT_LOW_WATERMARK,
            order: VecDeque::new(),
            members: HashSet::new(),
        }
    }
}

impl DedupTracker {
    pub fn new(high_watermark: usize, low_watermark: usize) -> Result<Self, InvalidWatermarks> {
        if low_watermark == 0 || low_watermark > high_watermark {
            return Err(InvalidWatermarks {
                high: high_watermark,
                low: low_watermark,
            });
        }
        Ok(Self {
            high_watermark,
            low_watermark,
            order: VecDeque::with_capacity(high_watermark + 1),
            members: HashSet::with_capacity(high_watermark + 1),
        })
    }

    pub fn seen(&self, post_id: &str) -> bool {
        self.members.contains(post_id)
    }

    /// Returns the number of ids evicted by this call
    pub fn mark_seen(&mut self, post_id: &str) -> usize {
        if !self.members.insert(post_id.to_string()) {
            return 0;
        }
        self.order.push_back(post_id.to_string());

        if self.order.len() <= self.high_watermark {
            return 0;
        }

        let excess = self.order.len() - self.low_watermark;
        for evicted in self.order.drain(..excess) {
            self.members.remove(&evicted);
        }
        excess
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
