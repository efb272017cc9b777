//! Driving a [`StateMachine`] with a stream of engine inputs.

use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::config::FuzzLimits;
use crate::{StateMachine, StepInput};

/// Where a scenario failed and why.
#[derive(Debug)]
pub struct Failure<E> {
    /// Index of the failing step, `None` when teardown failed.
    pub step: Option<usize>,
    pub error: E,
}

/// Record of one scenario run.
#[derive(Debug)]
pub struct Trace<A, E> {
    /// Every action that was started, including a failing one.
    pub actions: Vec<A>,
    pub failure: Option<Failure<E>>,
}

impl<A, E> Trace<A, E> {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    pub fn into_result(self) -> Result<Vec<A>, Failure<E>> {
        match self.failure {
            Some(failure) => Err(failure),
            None => Ok(self.actions),
        }
    }
}

/// Run one scenario: a step per input until the inputs run out or a step
/// fails, then teardown.
///
/// Teardown always runs. If a step failed, its error is the scenario's
/// failure and a teardown error is only logged.
pub async fn run_scenario<M, I>(machine: &mut M, inputs: I) -> Trace<M::Action, M::Error>
where
    M: StateMachine,
    I: IntoIterator<Item = StepInput>,
{
    let mut actions = Vec::new();
    let mut failure = None;

    for (step, input) in inputs.into_iter().enumerate() {
        let legal = machine.legal_actions();
        if legal.is_empty() {
            tracing::warn!(step, "no legal action, ending scenario");
            break;
        }
        let pick = input.pick as usize % legal.len();
        let Some(&kind) = legal.iter().nth(pick) else {
            break;
        };

        let action = machine.instantiate(kind, &input);
        tracing::debug!(step, ?kind, ?action, "step");
        actions.push(action.clone());

        if let Err(error) = machine.execute(&action).await {
            tracing::info!(step, %error, "step failed");
            failure = Some(Failure {
                step: Some(step),
                error,
            });
            break;
        }
    }

    if let Err(error) = machine.teardown().await {
        match failure {
            Some(_) => tracing::warn!(%error, "teardown failed after a failed step"),
            None => {
                failure = Some(Failure { step: None, error });
            }
        }
    }

    Trace { actions, failure }
}

/// Seeded stream of random step inputs.
#[derive(Debug, Clone)]
pub struct RandomWalk {
    rng: SmallRng,
    remaining: usize,
    max_chunks: usize,
    max_chunk_len: usize,
}

impl RandomWalk {
    pub fn new(seed: u64, steps: usize) -> Self {
        let limits = FuzzLimits::default();
        Self {
            rng: SmallRng::seed_from_u64(seed),
            remaining: steps,
            max_chunks: limits.max_chunks,
            max_chunk_len: limits.max_chunk_len,
        }
    }

    pub fn with_limits(mut self, limits: &FuzzLimits) -> Self {
        self.max_chunks = limits.max_chunks;
        self.max_chunk_len = limits.max_chunk_len;
        self
    }

    fn chunk(&mut self) -> Vec<u8> {
        let len = self.rng.gen_range(0..=self.max_chunk_len);
        let mut chunk = vec![0u8; len];
        self.rng.fill_bytes(&mut chunk);
        chunk
    }
}

impl Iterator for RandomWalk {
    type Item = StepInput;

    fn next(&mut self) -> Option<StepInput> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let pick = self.rng.next_u32();
        let variant = self.rng.next_u32();
        let count = self.rng.gen_range(0..=self.max_chunks);
        let chunks = (0..count).map(|_| self.chunk()).collect();
        Some(StepInput::new(pick, variant).with_chunks(chunks))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::fmt;

    use super::*;

    /// Counter that must stay below a limit; fails on the step that reaches it.
    struct Counter {
        value: u32,
        limit: u32,
        torn_down: bool,
        teardown_fails: bool,
    }

    #[derive(Debug)]
    struct Overflow;

    impl fmt::Display for Overflow {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("overflow")
        }
    }

    impl std::error::Error for Overflow {}

    impl StateMachine for Counter {
        type Config = u32;
        type Kind = u8;
        type Action = u32;
        type Error = Overflow;

        fn initial_state(limit: u32) -> Self {
            Self {
                value: 0,
                limit,
                torn_down: false,
                teardown_fails: false,
            }
        }

        fn legal_actions(&self) -> BTreeSet<u8> {
            BTreeSet::from([1, 2])
        }

        fn instantiate(&self, kind: u8, _input: &StepInput) -> u32 {
            u32::from(kind)
        }

        async fn execute(&mut self, add: &u32) -> Result<(), Overflow> {
            self.value += add;
            if self.value >= self.limit {
                Err(Overflow)
            } else {
                Ok(())
            }
        }

        async fn teardown(&mut self) -> Result<(), Overflow> {
            self.torn_down = true;
            if self.teardown_fails { Err(Overflow) } else { Ok(()) }
        }
    }

    fn inputs(picks: &[u32]) -> Vec<StepInput> {
        picks.iter().map(|&pick| StepInput::new(pick, 0)).collect()
    }

    #[tokio::test]
    async fn test_runs_every_step_then_tears_down() {
        let mut counter = Counter::initial_state(100);
        let trace = run_scenario(&mut counter, inputs(&[0, 1, 2, 3])).await;
        assert!(trace.passed());
        assert_eq!(trace.actions, [1, 2, 1, 2]);
        assert!(counter.torn_down);
    }

    #[tokio::test]
    async fn test_stops_at_failing_step() {
        let mut counter = Counter::initial_state(4);
        let trace = run_scenario(&mut counter, inputs(&[1, 1, 1, 1])).await;
        let failure = trace.failure.as_ref().unwrap();
        assert_eq!(failure.step, Some(1));
        assert_eq!(trace.actions.len(), 2);
        assert!(counter.torn_down);
    }

    #[tokio::test]
    async fn test_step_error_wins_over_teardown_error() {
        let mut counter = Counter::initial_state(1);
        counter.teardown_fails = true;
        let trace = run_scenario(&mut counter, inputs(&[0])).await;
        assert_eq!(trace.failure.unwrap().step, Some(0));

        let mut counter = Counter::initial_state(100);
        counter.teardown_fails = true;
        let trace = run_scenario(&mut counter, inputs(&[0])).await;
        assert_eq!(trace.failure.unwrap().step, None);
    }

    #[test]
    fn test_random_walk_is_reproducible() {
        let a: Vec<_> = RandomWalk::new(7, 20).collect();
        let b: Vec<_> = RandomWalk::new(7, 20).collect();
        assert_eq!(a.len(), 20);
        assert_eq!(a, b);
        assert_ne!(a, RandomWalk::new(8, 20).collect::<Vec<_>>());
    }

    #[test]
    fn test_random_walk_respects_limits() {
        let limits = FuzzLimits {
            max_chunks: 2,
            max_chunk_len: 4,
            ..FuzzLimits::default()
        };
        for input in RandomWalk::new(1, 50).with_limits(&limits) {
            assert!(input.chunks.len() <= 2);
            assert!(input.chunks.iter().all(|chunk| chunk.len() <= 4));
        }
    }
}
