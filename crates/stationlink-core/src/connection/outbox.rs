// ── Deferred sends ──
//
// Commands issued while the socket is opening wait here and are written
// once it opens. Entries carry a deadline; anything past it when the
// socket opens is dropped. Identical frames are queued once.

use std::collections::VecDeque;

use tokio::time::Instant;

use crate::config::OutboxConfig;
use crate::error::CoreError;

#[derive(Debug)]
struct Pending {
    text: String,
    deadline: Instant,
}

#[derive(Debug)]
pub(crate) struct Outbox {
    config: OutboxConfig,
    entries: VecDeque<Pending>,
}

impl Outbox {
    pub(crate) fn new(config: OutboxConfig) -> Self {
        Self {
            config,
            entries: VecDeque::new(),
        }
    }

    /// Queue `text`. Returns `false` if an identical frame is already waiting.
    pub(crate) fn push(&mut self, text: String, now: Instant) -> Result<bool, CoreError> {
        self.expire(now);

        if self.entries.iter().any(|p| p.text == text) {
            return Ok(false);
        }
        if self.entries.len() >= self.config.capacity {
            return Err(CoreError::OutboxFull {
                capacity: self.config.capacity,
            });
        }

        self.entries.push_back(Pending {
            text,
            deadline: now + self.config.max_wait,
        });
        Ok(true)
    }

    /// Take every frame still within its deadline, oldest first.
    pub(crate) fn drain_fresh(&mut self, now: Instant) -> Vec<String> {
        self.expire(now);
        self.entries.drain(..).map(|p| p.text).collect()
    }

    /// Drop everything. Returns how many frames were discarded.
    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    fn expire(&mut self, now: Instant) {
        self.entries.retain(|p| p.deadline > now);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn outbox(capacity: usize) -> Outbox {
        Outbox::new(OutboxConfig {
            capacity,
            max_wait: Duration::from_millis(1500),
        })
    }

    #[test]
    fn identical_frames_queue_once() {
        let mut outbox = outbox(8);
        let now = Instant::now();

        assert!(outbox.push("a".into(), now).unwrap());
        assert!(!outbox.push("a".into(), now).unwrap());
        assert!(!outbox.push("a".into(), now).unwrap());
        assert!(outbox.push("b".into(), now).unwrap());

        assert_eq!(outbox.drain_fresh(now), vec!["a", "b"]);
        assert!(outbox.drain_fresh(now).is_empty());
    }

    #[test]
    fn expired_frames_are_not_sent() {
        let mut outbox = outbox(8);
        let start = Instant::now();
        outbox.push("late".into(), start).unwrap();
        outbox.push("fresh".into(), start + Duration::from_millis(1000)).unwrap();

        let drained = outbox.drain_fresh(start + Duration::from_millis(1600));
        assert_eq!(drained, vec!["fresh"]);
    }

    #[test]
    fn full_outbox_rejects() {
        let mut outbox = outbox(1);
        let now = Instant::now();
        outbox.push("a".into(), now).unwrap();

        let err = outbox.push("b".into(), now).unwrap_err();
        assert!(matches!(err, CoreError::OutboxFull { capacity: 1 }));

        // Expiry frees room.
        assert!(outbox.push("b".into(), now + Duration::from_secs(2)).unwrap());
        assert_eq!(outbox.clear(), 1);
    }
}
