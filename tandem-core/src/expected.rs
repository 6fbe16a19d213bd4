use parking_lot::Mutex;
use std::collections::HashSet;

use crate::player::PlayerEventKind;

/// Player events the coordinator is about to provoke.
///
/// A token goes in immediately before the call that fires the event and comes
/// out when the event is observed, or when the call fails.
#[derive(Debug, Default)]
pub struct ExpectedEvents {
    tokens: Mutex<HashSet<PlayerEventKind>>,
}

impl ExpectedEvents {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect(&self, kind: PlayerEventKind) {
        self.tokens.lock().insert(kind);
    }

    /// Returns true when the observed event was one we caused
    pub fn consume(&self, kind: PlayerEventKind) -> bool {
        self.tokens.lock().remove(&kind)
    }

    /// Roll back a token whose action failed
    pub fn cancel(&self, kind: PlayerEventKind) {
        self.tokens.lock().remove(&kind);
    }

    #[must_use]
    pub fn contains(&self, kind: PlayerEventKind) -> bool {
        self.tokens.lock().contains(&kind)
    }

    pub fn clear(&self) {
        self.tokens.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_consumed_once() {
        let expected = ExpectedEvents::new();
        expected.expect(PlayerEventKind::Seeked);

        assert!(expected.consume(PlayerEventKind::Seeked));
        assert!(!expected.consume(PlayerEventKind::Seeked));
    }

    #[test]
    fn test_cancel_and_clear() {
        let expected = ExpectedEvents::new();
        expected.expect(PlayerEventKind::Play);
        expected.expect(PlayerEventKind::Pause);

        expected.cancel(PlayerEventKind::Play);
        assert!(!expected.contains(PlayerEventKind::Play));
        assert!(expected.contains(PlayerEventKind::Pause));

        expected.clear();
        assert!(!expected.consume(PlayerEventKind::Pause));
    }
}
