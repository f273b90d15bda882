//! Injected randomness for initial sequence numbers (spec §5, RFC 6528).
//!
//! The core never calls into a global RNG: every operation that needs an
//! ISN takes `&mut dyn IssRng` (or a concrete type implementing it),
//! keeping the state machine deterministic and replayable under test.

use rand::RngCore;

use crate::seq::Seq;

/// A source of initial sequence numbers.
pub trait IssRng {
    fn next_iss(&mut self) -> Seq;
}

/// The default `rand`-backed implementation, seeded by the caller.
pub struct ThreadIssRng<R> {
    inner: R,
}

impl<R: RngCore> ThreadIssRng<R> {
    pub fn new(inner: R) -> Self {
        ThreadIssRng { inner }
    }
}

impl<R: RngCore> IssRng for ThreadIssRng<R> {
    fn next_iss(&mut self) -> Seq {
        Seq::new(self.inner.next_u32())
    }
}

/// A fixed sequence of ISNs, for deterministic tests.
#[cfg(test)]
pub struct FixedIssRng {
    pub values: std::collections::VecDeque<u32>,
}

#[cfg(test)]
impl IssRng for FixedIssRng {
    fn next_iss(&mut self) -> Seq {
        Seq::new(self.values.pop_front().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_rng_yields_values_in_order() {
        let mut rng = FixedIssRng {
            values: vec![1, 2, 3].into(),
        };
        assert_eq!(rng.next_iss(), Seq::new(1));
        assert_eq!(rng.next_iss(), Seq::new(2));
    }

    #[test]
    fn thread_rng_produces_a_value() {
        let mut rng = ThreadIssRng::new(rand::rngs::mock::StepRng::new(42, 1));
        let a = rng.next_iss();
        let b = rng.next_iss();
        assert_ne!(a, b);
    }
}
