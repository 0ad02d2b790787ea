//! Shared ordering counter.
//!
//! There is no wall-clock time. `height` is the monotonic counter of confirmed
//! operations the platform advances; `sequence` counts committed mutating
//! calls and totally orders them within a height.

use agora_types::Height;
use serde::{Deserialize, Serialize};

/// Position of a committed call in the global order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Stamp {
    pub height: Height,
    pub sequence: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Clock {
    height: Height,
    sequence: u64,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(height: Height) -> Self {
        Self { height, sequence: 0 }
    }

    pub fn now(&self) -> Height {
        self.height
    }

    /// Stamp the next committed call would receive.
    pub fn peek(&self) -> Stamp {
        Stamp {
            height: self.height,
            sequence: self.sequence + 1,
        }
    }

    /// Claim the next stamp. Only called once a call is known to succeed.
    pub fn commit(&mut self) -> Stamp {
        self.sequence += 1;
        Stamp {
            height: self.height,
            sequence: self.sequence,
        }
    }

    pub fn advance(&mut self, blocks: u64) -> Height {
        self.height = self.height.saturating_add(blocks);
        self.height
    }

    pub fn last_sequence(&self) -> u64 {
        self.sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_is_strictly_increasing() {
        let mut clock = Clock::new();
        let a = clock.commit();
        let b = clock.commit();
        assert!(b > a);
        assert_eq!(clock.last_sequence(), 2);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut clock = Clock::starting_at(5);
        let peeked = clock.peek();
        assert_eq!(clock.commit(), peeked);
        assert_eq!(peeked.height, 5);
    }

    #[test]
    fn test_advance_orders_across_heights() {
        let mut clock = Clock::new();
        let early = clock.commit();
        clock.advance(3);
        let late = clock.commit();
        assert_eq!(late.height, 3);
        assert!(late > early);
    }
}
