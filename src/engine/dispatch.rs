//! Bottom of the pull chain: a replay queue in front of the key source.

use std::collections::VecDeque;
use std::time::Instant;

use crate::error::SourceError;
use crate::event::KeyEvent;
use crate::io::KeySource;

pub struct Dispatch {
    rerun: VecDeque<KeyEvent>,
    source: Box<dyn KeySource>,
}

impl Dispatch {
    pub fn new(source: Box<dyn KeySource>) -> Self {
        Self {
            rerun: VecDeque::new(),
            source,
        }
    }

    /// Next event: the replay queue first, then the source. `deadline` bounds
    /// the wait on the source; `Ok(None)` means the deadline won.
    pub fn pull(&mut self, deadline: Option<Instant>) -> Result<Option<KeyEvent>, SourceError> {
        if let Some(ev) = self.rerun.pop_front() {
            return Ok(Some(ev));
        }
        self.source.pull(deadline)
    }

    /// Queue events for replay ahead of everything already queued, preserving
    /// their relative order. Replayed events must come back before anything a
    /// later timeout pushes.
    pub fn rerun<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = KeyEvent>,
        I::IntoIter: DoubleEndedIterator,
    {
        for ev in events.into_iter().rev() {
            self.rerun.push_front(ev);
        }
    }

    /// Push a single synthetic event to the head of the queue.
    pub fn inject(&mut self, ev: KeyEvent) {
        self.rerun.push_front(ev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{KeyCode, Switch};

    struct VecSource(VecDeque<KeyEvent>);

    impl KeySource for VecSource {
        fn pull(&mut self, _deadline: Option<Instant>) -> Result<Option<KeyEvent>, SourceError> {
            match self.0.pop_front() {
                Some(ev) => Ok(Some(ev)),
                None => Err(SourceError::Closed),
            }
        }
    }

    fn press(code: u32) -> KeyEvent {
        KeyEvent::new(Switch::Press, KeyCode(code))
    }

    fn pull_code(dispatch: &mut Dispatch) -> u32 {
        dispatch.pull(None).unwrap().unwrap().code.0
    }

    #[test]
    fn replay_queue_drains_before_source() {
        let source = VecSource(VecDeque::from([press(3)]));
        let mut dispatch = Dispatch::new(Box::new(source));
        dispatch.rerun([press(1), press(2)]);

        assert_eq!(pull_code(&mut dispatch), 1);
        assert_eq!(pull_code(&mut dispatch), 2);
        assert_eq!(pull_code(&mut dispatch), 3);
        assert!(matches!(dispatch.pull(None), Err(SourceError::Closed)));
    }

    #[test]
    fn rerun_prepends_keeping_relative_order() {
        let source = VecSource(VecDeque::new());
        let mut dispatch = Dispatch::new(Box::new(source));
        dispatch.rerun([press(3), press(4)]);
        dispatch.rerun([press(1), press(2)]);

        assert_eq!(pull_code(&mut dispatch), 1);
        assert_eq!(pull_code(&mut dispatch), 2);
        assert_eq!(pull_code(&mut dispatch), 3);
        assert_eq!(pull_code(&mut dispatch), 4);
    }

    #[test]
    fn inject_lands_at_the_head() {
        let source = VecSource(VecDeque::new());
        let mut dispatch = Dispatch::new(Box::new(source));
        dispatch.rerun([press(2)]);
        dispatch.inject(press(1));

        assert_eq!(pull_code(&mut dispatch), 1);
        assert_eq!(pull_code(&mut dispatch), 2);
    }
}
