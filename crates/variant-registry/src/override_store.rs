use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Operator weight pins, keyed by (function, variant).
#[derive(Clone, Debug, Default)]
pub struct WeightOverrideStore {
    entries: HashMap<(String, String), WeightOverrideEntry>,
    next_ticket: u64,
}

#[derive(Clone, Debug)]
pub struct WeightOverrideEntry {
    pub weight: f64,
    pub owner: String,
    pub expires_at: Option<Instant>,
    ticket: u64,
}

impl WeightOverrideStore {
    /// Inserts or replaces a pin and returns a ticket identifying this insertion.
    pub fn insert(
        &mut self,
        function: &str,
        variant: &str,
        weight: f64,
        owner: &str,
        ttl: Option<Duration>,
    ) -> u64 {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let expires_at = ttl.map(|dur| Instant::now() + dur);
        self.entries.insert(
            (function.to_string(), variant.to_string()),
            WeightOverrideEntry {
                weight,
                owner: owner.to_string(),
                expires_at,
                ticket,
            },
        );
        ticket
    }

    /// Removes the pin only if it is still the insertion identified by `ticket`.
    pub fn remove_ticket(&mut self, function: &str, variant: &str, ticket: u64) -> bool {
        let key = (function.to_string(), variant.to_string());
        match self.entries.get(&key) {
            Some(entry) if entry.ticket == ticket => {
                self.entries.remove(&key);
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, function: &str, variant: &str) -> bool {
        self.entries
            .remove(&(function.to_string(), variant.to_string()))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live pins sorted by key; expired entries are dropped as a side effect.
    pub fn active_entries(&mut self) -> Vec<((String, String), f64)> {
        let now = Instant::now();
        let mut result = Vec::new();
        self.entries.retain(|key, entry| {
            let active = entry
                .expires_at
                .map(|expires| expires > now)
                .unwrap_or(true);
            if active {
                result.push((key.clone(), entry.weight));
            }
            active
        });
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}
