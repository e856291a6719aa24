//! C8: a single-thread cooperative event loop keyed by a named,
//! in-memory map of events (§4.5). The engine uses one instance to
//! drive scheduling ticks, child-deadline checks, and administrative
//! one-shots; tests exercise it directly against a synthetic clock.

use std::collections::HashMap;

#[derive(Debug, Clone)]
struct EventEntry {
    expires: i64,
    timeout: u64,
    repeat: bool,
}

#[derive(Default)]
pub struct EventMap {
    events: HashMap<String, EventEntry>,
    default_delay_secs: i64,
}

impl EventMap {
    pub fn new(default_delay_secs: u64) -> Self {
        Self {
            events: HashMap::new(),
            default_delay_secs: default_delay_secs as i64,
        }
    }

    /// Schedule `name` to fire `delay_secs` from `now`. Re-adding an
    /// existing name replaces it.
    pub fn add(&mut self, name: &str, now: i64, delay_secs: u64, repeat: bool) {
        self.events.insert(
            name.to_string(),
            EventEntry {
                expires: now + delay_secs as i64,
                timeout: delay_secs,
                repeat,
            },
        );
    }

    pub fn remove(&mut self, name: &str) {
        self.events.remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.events.contains_key(name)
    }

    /// Run every due event once, in `Expires` order. A handler invoked
    /// for an earlier event may add or remove events for a later one in
    /// the same snapshot; removed ones are skipped, and the snapshot is
    /// never re-sorted mid-tick (new adds are picked up next tick).
    /// Returns the delay until the next due event (minimum 1 second,
    /// default the configured safety net).
    pub fn run_events(&mut self, now: i64, mut handler: impl FnMut(&mut EventMap, &str)) -> i64 {
        let mut snapshot: Vec<(String, i64)> = self.events.iter().map(|(n, e)| (n.clone(), e.expires)).collect();
        snapshot.sort_by_key(|(_, expires)| *expires);

        for (name, expires) in snapshot {
            if !self.events.contains_key(&name) {
                continue;
            }
            if expires > now {
                break;
            }

            let entry = self.events.get(&name).cloned().unwrap();
            if entry.repeat {
                if let Some(e) = self.events.get_mut(&name) {
                    e.expires = now + entry.timeout as i64;
                }
            } else {
                self.events.remove(&name);
            }

            handler(self, &name);
        }

        self.next_delay(now)
    }

    fn next_delay(&self, now: i64) -> i64 {
        let earliest = self.events.values().map(|e| e.expires).min();
        match earliest {
            Some(expires) => (expires - now).max(1),
            None => self.default_delay_secs,
        }
    }
}
