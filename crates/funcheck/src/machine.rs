//! The capability interface a search engine drives a model through.

use std::collections::BTreeSet;

use crate::StepInput;

/// A stateful model that an engine can walk through action sequences.
///
/// The engine asks for the legal kinds, picks one, lets the model fill in
/// parameters from its raw input, executes it, and always ends with
/// [`teardown`](Self::teardown).
#[allow(async_fn_in_trait)]
pub trait StateMachine {
    type Config;
    type Kind: Copy + Ord + std::fmt::Debug;
    type Action: Clone + std::fmt::Debug;
    type Error: std::error::Error;

    fn initial_state(config: Self::Config) -> Self
    where
        Self: Sized;

    fn legal_actions(&self) -> BTreeSet<Self::Kind>;

    fn instantiate(&self, kind: Self::Kind, input: &StepInput) -> Self::Action;

    async fn execute(&mut self, action: &Self::Action) -> Result<(), Self::Error>;

    /// Release everything and validate the shutdown. Safe to call at any
    /// point, including before the first action; afterwards no action is
    /// legal and a second call does nothing.
    async fn teardown(&mut self) -> Result<(), Self::Error>;
}
