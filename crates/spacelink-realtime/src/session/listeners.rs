//! Listener registry: event tag to ordered list of callbacks.

use std::collections::HashMap;
use std::sync::Arc;

use super::event::{EventKind, SessionEvent};

/// Callback invoked for each matching event.
pub type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Handle returned by registration, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<(ListenerId, Listener)>>,
    any: Vec<(ListenerId, Listener)>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("kinds", &self.by_kind.len())
            .field("any", &self.any.len())
            .finish()
    }
}

impl ListenerRegistry {
    /// Registers a listener for `kind`, or for every event when `kind` is `None`.
    pub fn add(&mut self, kind: Option<EventKind>, listener: Listener) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        match kind {
            Some(kind) => self.by_kind.entry(kind).or_default().push((id, listener)),
            None => self.any.push((id, listener)),
        }
        id
    }

    /// Removes a listener. Returns whether it was registered.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.len();
        self.any.retain(|(existing, _)| *existing != id);
        for listeners in self.by_kind.values_mut() {
            listeners.retain(|(existing, _)| *existing != id);
        }
        self.by_kind.retain(|_, listeners| !listeners.is_empty());
        self.len() < before
    }

    /// Listeners for `kind` in registration order, followed by catch-all listeners.
    pub fn matching(&self, kind: EventKind) -> Vec<Listener> {
        self.by_kind
            .get(&kind)
            .into_iter()
            .flatten()
            .chain(self.any.iter())
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.any.len() + self.by_kind.values().map(Vec::len).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_matching_preserves_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::default();
        for tag in ["a", "b"] {
            let seen = seen.clone();
            registry.add(
                Some(EventKind::Closed),
                Arc::new(move |_| seen.lock().unwrap().push(tag)),
            );
        }
        let any_seen = seen.clone();
        registry.add(None, Arc::new(move |_| any_seen.lock().unwrap().push("any")));

        for listener in registry.matching(EventKind::Closed) {
            listener(&SessionEvent::Closed);
        }
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "any"]);
        assert_eq!(registry.matching(EventKind::Connected).len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut registry = ListenerRegistry::default();
        let id = registry.add(Some(EventKind::Delta), Arc::new(|_| {}));
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.matching(EventKind::Delta).is_empty());
    }
}
