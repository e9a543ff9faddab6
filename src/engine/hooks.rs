//! One-shot hooks attached to the event stream.
//!
//! Both sides of the pipeline use the same table: the engine installs input
//! hooks ahead of the keymap, the emitter applies output hooks ahead of the
//! sink. An entry fires at most once, either on a matching event or when its
//! deadline passes.

use std::time::Instant;

use crate::event::KeyEvent;

/// Outcome of a hook action: `Catch` consumes the event, `NoCatch` lets it
/// continue to later hooks and up the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Catch,
    NoCatch,
}

pub type HookId = u64;

pub trait HookEntry {
    fn matches(&self, ev: &KeyEvent) -> bool;
    fn deadline(&self) -> Option<Instant>;
}

/// Ordered table of pending hooks. Registration order is firing order.
pub struct HookMap<H> {
    next_id: HookId,
    entries: Vec<(HookId, H)>,
}

impl<H: HookEntry> HookMap<H> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    pub fn register(&mut self, hook: H) -> HookId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, hook));
        id
    }

    /// Hooks registered at or past the returned mark were installed during
    /// the current offer and only observe later events.
    pub fn mark(&self) -> HookId {
        self.next_id
    }

    /// Remove and return the earliest-registered hook (below `before`) whose
    /// predicate matches `ev`.
    pub fn pop_first_match(&mut self, ev: &KeyEvent, before: HookId) -> Option<H> {
        let idx = self
            .entries
            .iter()
            .position(|(id, h)| *id < before && h.matches(ev))?;
        Some(self.entries.remove(idx).1)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().filter_map(|(_, h)| h.deadline()).min()
    }

    /// Remove and return every hook whose deadline has passed, oldest first.
    pub fn take_expired(&mut self, now: Instant) -> Vec<H> {
        let mut expired = Vec::new();
        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].1.deadline().is_some_and(|d| d <= now) {
                expired.push(self.entries.remove(i).1);
            } else {
                i += 1;
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<H: HookEntry> Default for HookMap<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{KeyCode, Switch};
    use std::time::Duration;

    struct Probe {
        key: Option<KeyCode>,
        deadline: Option<Instant>,
        tag: u32,
    }

    impl Probe {
        fn on(key: u32, tag: u32) -> Self {
            Self {
                key: Some(KeyCode(key)),
                deadline: None,
                tag,
            }
        }

        fn timed(key: u32, deadline: Instant, tag: u32) -> Self {
            Self {
                key: Some(KeyCode(key)),
                deadline: Some(deadline),
                tag,
            }
        }
    }

    impl HookEntry for Probe {
        fn matches(&self, ev: &KeyEvent) -> bool {
            self.key.is_none_or(|k| k == ev.code)
        }

        fn deadline(&self) -> Option<Instant> {
            self.deadline
        }
    }

    #[test]
    fn fires_in_registration_order() {
        let mut hooks = HookMap::new();
        hooks.register(Probe::on(30, 1));
        hooks.register(Probe::on(31, 2));
        hooks.register(Probe::on(30, 3));

        let ev = KeyEvent::new(Switch::Press, KeyCode(30));
        let mark = hooks.mark();
        assert_eq!(hooks.pop_first_match(&ev, mark).unwrap().tag, 1);
        assert_eq!(hooks.pop_first_match(&ev, mark).unwrap().tag, 3);
        assert!(hooks.pop_first_match(&ev, mark).is_none());
        assert_eq!(hooks.len(), 1);
    }

    #[test]
    fn mark_hides_hooks_registered_mid_offer() {
        let mut hooks = HookMap::new();
        hooks.register(Probe::on(30, 1));
        let mark = hooks.mark();
        hooks.register(Probe::on(30, 2));

        let ev = KeyEvent::new(Switch::Press, KeyCode(30));
        assert_eq!(hooks.pop_first_match(&ev, mark).unwrap().tag, 1);
        assert!(hooks.pop_first_match(&ev, mark).is_none());
        // The late registration is visible to the next offer.
        assert_eq!(hooks.pop_first_match(&ev, hooks.mark()).unwrap().tag, 2);
    }

    #[test]
    fn expiry_removes_only_past_deadlines() {
        let now = Instant::now();
        let mut hooks = HookMap::new();
        hooks.register(Probe::timed(30, now - Duration::from_millis(5), 1));
        hooks.register(Probe::on(31, 2));
        hooks.register(Probe::timed(32, now + Duration::from_secs(60), 3));

        let expired = hooks.take_expired(now);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].tag, 1);
        assert_eq!(hooks.len(), 2);
        assert_eq!(hooks.next_deadline(), Some(now + Duration::from_secs(60)));
    }
}
