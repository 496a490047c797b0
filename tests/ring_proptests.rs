//! Property-based tests for `RingBuffer` against a `VecDeque` model.

use std::collections::VecDeque;

use proptest::prelude::*;
use taskweave::RingBuffer;

#[derive(Debug, Clone)]
enum Op {
    Push(u32),
    Pull,
    Clear,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => any::<u32>().prop_map(Op::Push),
        4 => Just(Op::Pull),
        1 => Just(Op::Clear),
    ]
}

proptest! {
    /// Single-threaded op sequences agree with a bounded FIFO model.
    #[test]
    fn matches_bounded_fifo_model(
        capacity in 1u32..=16,
        ops in prop::collection::vec(op(), 0..300),
    ) {
        let mut ring: RingBuffer<u32> = RingBuffer::with_capacity(capacity).unwrap();
        let mut model: VecDeque<u32> = VecDeque::new();

        for op in ops {
            match op {
                Op::Push(v) => {
                    let accepted = {
                        let (mut tx, _) = ring.split();
                        tx.try_push(v)
                    };
                    let fits = model.len() < capacity as usize;
                    prop_assert_eq!(accepted, fits);
                    if fits {
                        model.push_back(v);
                    }
                }
                Op::Pull => {
                    let got = {
                        let (_, mut rx) = ring.split();
                        rx.try_pull()
                    };
                    prop_assert_eq!(got, model.pop_front());
                }
                Op::Clear => {
                    ring.clear();
                    model.clear();
                }
            }

            prop_assert_eq!(ring.len() as usize, model.len());
            prop_assert_eq!(ring.is_empty(), model.is_empty());
            prop_assert_eq!(ring.free_space() as usize, capacity as usize - model.len());
        }
    }
}
