//! Context memory: a time-to-live queue of recent final
//! transcripts, used as a context hint by the rule corrector and the
//! confidence router.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const DEFAULT_CAPACITY: usize = 10;
const DEFAULT_TTL_SECS: u64 = 5 * 60;

struct Entry {
    text: String,
    inserted_at: Instant,
}

/// Environmental hints passed alongside a transcript through the
/// post-processing controller.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub recent_transcripts: Vec<String>,
    pub app_name: Option<String>,
    pub window_title: Option<String>,
}

impl Context {
    /// The case-insensitive OR-matched combined context string used by the
    /// rule corrector's context-dependent tier.
    pub fn combined_text(&self) -> String {
        let mut parts = self.recent_transcripts.clone();
        parts.extend(self.app_name.clone());
        parts.extend(self.window_title.clone());
        parts.join("\u{0}")
    }
}

/// Bounded, time-expiring queue of recently finalized transcripts.
pub struct ContextMemory {
    capacity: usize,
    ttl: Duration,
    entries: VecDeque<Entry>,
}

impl Default for ContextMemory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, Duration::from_secs(DEFAULT_TTL_SECS))
    }
}

impl ContextMemory {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, text: impl Into<String>) {
        self.evict_expired();
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(Entry {
            text: text.into(),
            inserted_at: Instant::now(),
        });
    }

    fn evict_expired(&mut self) {
        let ttl = self.ttl;
        while let Some(front) = self.entries.front() {
            if front.inserted_at.elapsed() > ttl {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Oldest-first snapshot of the still-live transcripts.
    pub fn recent(&mut self) -> Vec<String> {
        self.evict_expired();
        self.entries.iter().map(|e| e.text.clone()).collect()
    }

    pub fn len(&mut self) -> usize {
        self.evict_expired();
        self.entries.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_beyond_capacity() {
        let mut mem = ContextMemory::new(2, Duration::from_secs(300));
        mem.push("a");
        mem.push("b");
        mem.push("c");
        assert_eq!(mem.recent(), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn expires_entries_past_ttl() {
        let mut mem = ContextMemory::new(10, Duration::from_millis(10));
        mem.push("a");
        std::thread::sleep(Duration::from_millis(30));
        assert!(mem.is_empty());
    }

    #[test]
    fn combined_text_joins_all_hints() {
        let ctx = Context {
            recent_transcripts: vec!["你好".to_string()],
            app_name: Some("Notes".to_string()),
            window_title: Some("Untitled".to_string()),
        };
        let combined = ctx.combined_text();
        assert!(combined.contains("你好"));
        assert!(combined.contains("Notes"));
        assert!(combined.contains("Untitled"));
    }
}
