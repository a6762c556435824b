use chrono::NaiveDate;
use std::collections::HashMap;
use thiserror::Error;

pub const DEFAULT_MAX_DAILY_REPLIES: u32 = 3;

/// Replies sent to one author on one calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaEntry {
    pub date: NaiveDate,
    pub count: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("daily reply limit of {max} already reached for author {author_id}")]
pub struct QuotaExceeded {
    pub author_id: String,
    pub max: u32,
}

/// Per-author daily reply counter.
///
/// Entries from a previous day are treated as zero on read and replaced on
/// the next recorded reply, never deleted eagerly. Callers that dispatch
/// concurrently must hold the author's lock from [`QuotaManager::can_reply`]
/// through [`QuotaManager::record_reply`].
#[derive(Debug, Clone)]
pub struct QuotaManager {
    max_daily_replies: u32,
    entries: HashMap<String, QuotaEntry>,
}

impl Default for QuotaManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DAILY_REPLIES)
    }
}

impl QuotaManager {
    pub fn new(max_daily_replies: u32) -> Self {
        Self {
            max_daily_replies,
            entries: HashMap::new(),
        }
    }

    pub fn max_daily_replies(&self) -> u32 {
        self.max_daily_replies
    }

    /// Effective count for `today`, zero when the entry is stale or missing
    pub fn replies_today(&self, author_id: &str, today: NaiveDate) -> u32 {
        self.entries
            .get(author_id)
            .filter(|entry| entry.date == today)
            .map_or(0, |entry| entry.count)
    }

    pub fn can_reply(&self, author_id: &str, today: NaiveDate) -> bool {
        self.replies_today(author_id, today) < self.max_daily_replies
    }

    /// Record a reply the transport has accepted
    pub fn record_reply(&mut self, author_id: &str, today: NaiveDate) -> Result<u32, QuotaExceeded> {
        let current = self.replies_today(author_id, today);
        if current >= self.max_daily_replies {
            return Err(QuotaExceeded {
                author_id: author_id.to_string(),
                max: self.max_daily_replies,
            });
        }

        let count = current + 1;
        self.entries
            .insert(author_id.to_string(), QuotaEntry { date: today, count });
        Ok(count)
    }

    pub fn entry(&self, author_id: &str) -> Option<&QuotaEntry> {
        self.entries.get(author_id)
    }

    /// Number of authors with an entry of any date
    pub fn tracked_authors(&self) -> usize {
        self.entries.len()
    }
}
