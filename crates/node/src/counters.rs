//! Named diagnostic counters.

use std::fmt;

/// A named `u64` gauge backed by a closure.
pub struct Counter {
    name: String,
    read: Box<dyn Fn() -> u64 + Send + Sync>,
}

impl Counter {
    /// Current value.
    pub fn value(&self) -> u64 {
        (self.read)()
    }

    /// Counter label.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Registry of diagnostic counters, in registration order.
///
/// This replaces a process-wide service locator: services register their
/// counters during assembly and observers read snapshots; names survive only
/// as labels.
#[derive(Default)]
pub struct CounterRegistry {
    counters: Vec<Counter>,
}

impl CounterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a counter.
    pub fn add(&mut self, name: impl Into<String>, read: impl Fn() -> u64 + Send + Sync + 'static) {
        self.counters.push(Counter {
            name: name.into(),
            read: Box::new(read),
        });
    }

    /// Read one counter by label.
    pub fn value(&self, name: &str) -> Option<u64> {
        self.counters
            .iter()
            .find(|counter| counter.name == name)
            .map(Counter::value)
    }

    /// Read every counter.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        self.counters
            .iter()
            .map(|counter| (counter.name.clone(), counter.value()))
            .collect()
    }

    /// Number of registered counters.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether no counters are registered.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

impl fmt::Debug for CounterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.counters.iter().map(|c| (c.name(), c.value())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn counters_read_live_values() {
        let gauge = Arc::new(AtomicU64::new(7));
        let mut registry = CounterRegistry::new();
        let reader = Arc::clone(&gauge);
        registry.add("TEST GAUGE", move || reader.load(Ordering::Relaxed));

        assert_eq!(registry.value("TEST GAUGE"), Some(7));
        gauge.store(9, Ordering::Relaxed);
        assert_eq!(registry.value("TEST GAUGE"), Some(9));
        assert_eq!(registry.value("MISSING"), None);
        assert_eq!(registry.snapshot(), vec![("TEST GAUGE".to_string(), 9)]);
    }
}
