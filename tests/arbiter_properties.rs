//! Property-based tests for the arbiter's reference count.
//!
//! Random interleavings of acquire and release are driven straight
//! through an [`ArbiterState`] backed by the mock opener, checking the
//! count/handle invariants after every step.

use std::sync::Arc;

use proptest::prelude::*;

use repogate::gate::{ArbiterError, ArbiterState, Token};
use repogate::store::mock::MockStoreOpener;

#[derive(Debug, Clone)]
enum Op {
    Acquire,
    /// Release the held token at this position (modulo the number held).
    Release(usize),
    FailNextOpen,
    FailNextClose,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Acquire),
        4 => any::<usize>().prop_map(Op::Release),
        1 => Just(Op::FailNextOpen),
        1 => Just(Op::FailNextClose),
    ]
}

proptest! {
    #[test]
    fn open_iff_holders_outstanding(ops in prop::collection::vec(op(), 1..200)) {
        let mock = MockStoreOpener::new();
        let mut state = ArbiterState::new(Arc::new(mock.clone()));
        let mut held: Vec<Token> = Vec::new();

        for op in ops {
            match op {
                Op::Acquire => match state.acquire() {
                    Ok(token) => held.push(token),
                    Err(ArbiterError::StoreOpenFailed(_)) => {
                        prop_assert!(held.is_empty());
                    }
                    Err(other) => prop_assert!(false, "unexpected acquire error: {other}"),
                },
                Op::Release(i) => {
                    if held.is_empty() {
                        continue;
                    }
                    let token = held.swap_remove(i % held.len());
                    match state.release(token) {
                        Ok(()) => {}
                        // The state is closed regardless.
                        Err(ArbiterError::StoreCloseFailed(_)) => prop_assert!(held.is_empty()),
                        Err(other) => prop_assert!(false, "unexpected release error: {other}"),
                    }
                }
                Op::FailNextOpen => mock.fail_next_opens(1),
                Op::FailNextClose => mock.fail_next_closes(1),
            }

            let status = state.status();
            prop_assert_eq!(status.ref_count, held.len());
            prop_assert_eq!(status.open, !held.is_empty());
            prop_assert_eq!(mock.is_open(), !held.is_empty());
            prop_assert_eq!(mock.stats().double_opens, 0);
        }

        for token in held.drain(..) {
            let _ = state.release(token);
        }
        prop_assert!(!state.status().open);
        prop_assert!(!mock.is_open());
    }

    #[test]
    fn opens_and_closes_stay_paired(bursts in prop::collection::vec(1usize..8, 1..30)) {
        let mock = MockStoreOpener::new();
        let mut state = ArbiterState::new(Arc::new(mock.clone()));

        for width in &bursts {
            let tokens: Vec<Token> = (0..*width).map(|_| state.acquire().unwrap()).collect();
            for token in tokens {
                state.release(token).unwrap();
            }
        }

        // One open and one close per burst, however wide.
        let stats = mock.stats();
        prop_assert_eq!(stats.opens, bursts.len() as u64);
        prop_assert_eq!(stats.closes, bursts.len() as u64);
        prop_assert_eq!(state.status().opens, bursts.len() as u64);
    }
}
