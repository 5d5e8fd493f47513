use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

/// Callback invoked with an event's `data`.
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identifies one registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    key: String,
    handler: EventHandler,
}

/// Event name → handlers, called synchronously in registration order.
#[derive(Default)]
pub struct DispatchTable {
    listeners: HashMap<String, Vec<Listener>>,
    next_id: u64,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`. `key` records which subscription
    /// (event plus arguments) the handler belongs to.
    pub fn add(&mut self, event: &str, key: String, handler: EventHandler) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners
            .entry(event.to_string())
            .or_default()
            .push(Listener { id, key, handler });
        trace!(event, ?id, "handler added");
        id
    }

    /// Remove a handler and return its subscription key, or `None` if it
    /// was not registered.
    pub fn remove(&mut self, id: ListenerId) -> Option<String> {
        let mut removed = None;
        self.listeners.retain(|_, list| {
            if let Some(pos) = list.iter().position(|l| l.id == id) {
                removed = Some(list.remove(pos).key);
            }
            !list.is_empty()
        });
        removed
    }

    /// Deliver `data` to every handler of `event`. Returns how many ran.
    pub fn emit(&self, event: &str, data: &Value) -> usize {
        let Some(list) = self.listeners.get(event) else {
            return 0;
        };
        for listener in list {
            (listener.handler)(data);
        }
        list.len()
    }

    /// Handlers registered under a subscription key.
    pub fn count_for_key(&self, key: &str) -> usize {
        self.listeners
            .values()
            .flatten()
            .filter(|l| l.key == key)
            .count()
    }

    /// Total registered handlers.
    pub fn len(&self) -> usize {
        self.listeners.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (event, list) in &self.listeners {
            map.entry(event, &list.len());
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> EventHandler {
        let log = Arc::clone(log);
        Arc::new(move |data: &Value| log.lock().push(format!("{tag}:{data}")))
    }

    #[test]
    fn fans_out_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = DispatchTable::new();
        table.add("MESSAGE_CREATE", "k".into(), recorder(&log, "a"));
        table.add("MESSAGE_CREATE", "k".into(), recorder(&log, "b"));
        table.add("OTHER", "o".into(), recorder(&log, "c"));

        assert_eq!(table.emit("MESSAGE_CREATE", &json!(1)), 2);
        assert_eq!(*log.lock(), vec!["a:1", "b:1"]);
        assert_eq!(table.count_for_key("k"), 2);
    }

    #[test]
    fn unknown_event_reaches_nobody() {
        let table = DispatchTable::new();
        assert_eq!(table.emit("NOPE", &Value::Null), 0);
    }

    #[test]
    fn remove_only_affects_one_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = DispatchTable::new();
        let first = table.add("E", "k".into(), recorder(&log, "a"));
        table.add("E", "k".into(), recorder(&log, "b"));

        assert_eq!(table.remove(first).as_deref(), Some("k"));
        assert_eq!(table.remove(first), None);
        assert_eq!(table.count_for_key("k"), 1);
        table.emit("E", &json!("x"));
        assert_eq!(*log.lock(), vec!["b:\"x\""]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn empty_events_are_pruned() {
        let mut table = DispatchTable::new();
        let id = table.add("E", "k".into(), Arc::new(|_: &Value| {}));
        table.remove(id);
        assert!(table.is_empty());
    }
}
