//! Behaviour scenarios and the fakes they share with unit tests.

mod lifecycle_behaviour;
mod roster_behaviour;
pub(crate) mod support;
