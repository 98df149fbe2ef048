/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Quiet-period coalescing for persistence writes.
//!
//! Scheduling moves the deadline; nothing fires until a `poll` observes a
//! time past it. There is no timer thread: the owner polls from its tick.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Cancel any pending run and schedule one `delay` from now.
    pub fn schedule(&mut self) {
        self.schedule_at(Instant::now());
    }

    pub fn schedule_at(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// True exactly once when the quiet period has elapsed.
    pub fn poll(&mut self, now: Instant) -> bool {
        if let Some(deadline) = self.deadline
            && now >= deadline
        {
            self.deadline = None;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_once_after_quiet_period() {
        let start = Instant::now();
        let mut debounce = Debouncer::new(Duration::from_millis(350));
        debounce.schedule_at(start);
        assert!(!debounce.poll(start + Duration::from_millis(349)));
        assert!(debounce.poll(start + Duration::from_millis(350)));
        assert!(!debounce.poll(start + Duration::from_millis(1000)));
    }

    #[test]
    fn test_reschedule_pushes_deadline() {
        let start = Instant::now();
        let mut debounce = Debouncer::new(Duration::from_millis(350));
        debounce.schedule_at(start);
        debounce.schedule_at(start + Duration::from_millis(300));
        assert!(!debounce.poll(start + Duration::from_millis(400)));
        assert!(debounce.poll(start + Duration::from_millis(650)));
    }

    #[test]
    fn test_cancel_drops_pending_run() {
        let start = Instant::now();
        let mut debounce = Debouncer::new(Duration::from_millis(10));
        debounce.schedule_at(start);
        assert!(debounce.is_pending());
        debounce.cancel();
        assert!(!debounce.poll(start + Duration::from_secs(1)));
    }
}
