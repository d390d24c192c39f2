//! Client interest bookkeeping.
//!
//! Clients declare interest in optional features by token. Each client keeps
//! its own count per token (add twice, remove twice); a token counts as
//! wanted while at least one client holds it.

use std::collections::{BTreeMap, BTreeSet};

use crate::transport::ClientName;

/// A token crossing between wanted and unwanted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterestTransition {
    /// The first client became interested.
    Interested(String),
    /// The last interested client went away.
    Uninterested(String),
}

/// Effect of an interest update on client liveness tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Watch {
    /// Nothing changes.
    #[default]
    Keep,
    /// Start watching the client.
    Start,
    /// Stop watching the client.
    Stop,
}

/// Outcome of one interest update.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InterestUpdate {
    /// Tokens that changed state, in request order.
    pub transitions: Vec<InterestTransition>,
    /// What to do about the client's liveness watch.
    pub watch: Watch,
}

/// Global and per-client interest counts.
#[derive(Debug, Default)]
pub struct InterestTable {
    possible: BTreeSet<String>,
    clients_per_token: BTreeMap<String, usize>,
    per_client: BTreeMap<ClientName, BTreeMap<String, usize>>,
}

impl InterestTable {
    /// Table recognising `possible` tokens; others are ignored.
    pub fn new<I, S>(possible: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            possible: possible.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Whether any client currently wants `token`.
    #[must_use]
    pub fn is_wanted(&self, token: &str) -> bool {
        self.clients_per_token.get(token).is_some_and(|count| *count > 0)
    }

    /// Number of distinct clients holding `token`.
    #[must_use]
    pub fn clients_interested(&self, token: &str) -> usize {
        self.clients_per_token.get(token).copied().unwrap_or(0)
    }

    /// Records `client`'s interest in `tokens`.
    pub fn add(&mut self, client: &ClientName, tokens: &[String]) -> InterestUpdate {
        let mut update = InterestUpdate::default();
        let first_interest = !self.per_client.contains_key(client);
        for token in tokens.iter().filter(|token| self.possible.contains(*token)) {
            let counts = self.per_client.entry(client.clone()).or_default();
            let count = counts.entry(token.clone()).or_insert(0);
            *count += 1;
            if *count > 1 {
                continue;
            }
            let clients = self.clients_per_token.entry(token.clone()).or_insert(0);
            *clients += 1;
            if *clients == 1 {
                update
                    .transitions
                    .push(InterestTransition::Interested(token.clone()));
            }
        }
        if first_interest && self.per_client.contains_key(client) {
            update.watch = Watch::Start;
        }
        update
    }

    /// Withdraws one unit of `client`'s interest in each of `tokens`.
    ///
    /// Tokens the client never declared are ignored.
    pub fn remove(&mut self, client: &ClientName, tokens: &[String]) -> InterestUpdate {
        let mut update = InterestUpdate::default();
        let Some(counts) = self.per_client.get_mut(client) else {
            return update;
        };
        let mut released = Vec::new();
        for token in tokens {
            let Some(count) = counts.get_mut(token) else {
                continue;
            };
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(token);
                released.push(token.clone());
            }
        }
        if counts.is_empty() {
            self.per_client.remove(client);
            update.watch = Watch::Stop;
        }
        update.transitions = self.release(released);
        update
    }

    /// Forgets everything `client` declared, as when it leaves the bus.
    pub fn client_vanished(&mut self, client: &ClientName) -> InterestUpdate {
        let Some(counts) = self.per_client.remove(client) else {
            return InterestUpdate::default();
        };
        InterestUpdate {
            transitions: self.release(counts.into_keys().collect()),
            watch: Watch::Stop,
        }
    }

    /// Drops every declaration, returning the clients that were watched.
    pub fn clear(&mut self) -> Vec<ClientName> {
        self.clients_per_token.clear();
        std::mem::take(&mut self.per_client).into_keys().collect()
    }

    fn release(&mut self, tokens: Vec<String>) -> Vec<InterestTransition> {
        let mut transitions = Vec::new();
        for token in tokens {
            let Some(clients) = self.clients_per_token.get_mut(&token) else {
                continue;
            };
            *clients = clients.saturating_sub(1);
            if *clients == 0 {
                self.clients_per_token.remove(&token);
                transitions.push(InterestTransition::Uninterested(token));
            }
        }
        transitions
    }
}
