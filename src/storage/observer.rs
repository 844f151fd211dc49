//! Observer Module
//!
//! Live mutation events fanned out by a wrapper. Observers run synchronously,
//! in operation order, before the mutating call returns.

use tokio::sync::mpsc::UnboundedSender;

/// Handle returned by `add_observer`, used to remove the observer again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

// == Storage Observer ==
pub trait StorageObserver: Send + Sync {
    fn key_added(&self, _key: &[u8], _value: &[u8], _source: &str) {}

    fn key_changed(&self, _key: &[u8], _new_value: &[u8], _old_value: &[u8], _source: &str) {}

    fn key_deleted(&self, _key: &[u8], _old_value: &[u8], _source: &str) {}

    fn all_deleted(&self, _source: &str) {}

    /// A `get_all` snapshot was handed out.
    fn get_all_complete(&self, _source: &str) {}

    /// Closed observers are dropped on the next notification.
    fn is_closed(&self) -> bool {
        false
    }
}

// == Storage Event ==
/// Owned form of an observer callback, for channel-based observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
    KeyAdded {
        key: Vec<u8>,
        value: Vec<u8>,
        source: String,
    },
    KeyChanged {
        key: Vec<u8>,
        new_value: Vec<u8>,
        old_value: Vec<u8>,
        source: String,
    },
    KeyDeleted {
        key: Vec<u8>,
        old_value: Vec<u8>,
        source: String,
    },
    AllDeleted {
        source: String,
    },
    GetAllComplete {
        source: String,
    },
}

// Send errors mean the receiver is gone; `is_closed` reports it for pruning.
impl StorageObserver for UnboundedSender<StorageEvent> {
    fn key_added(&self, key: &[u8], value: &[u8], source: &str) {
        let _ = self.send(StorageEvent::KeyAdded {
            key: key.to_vec(),
            value: value.to_vec(),
            source: source.to_string(),
        });
    }

    fn key_changed(&self, key: &[u8], new_value: &[u8], old_value: &[u8], source: &str) {
        let _ = self.send(StorageEvent::KeyChanged {
            key: key.to_vec(),
            new_value: new_value.to_vec(),
            old_value: old_value.to_vec(),
            source: source.to_string(),
        });
    }

    fn key_deleted(&self, key: &[u8], old_value: &[u8], source: &str) {
        let _ = self.send(StorageEvent::KeyDeleted {
            key: key.to_vec(),
            old_value: old_value.to_vec(),
            source: source.to_string(),
        });
    }

    fn all_deleted(&self, source: &str) {
        let _ = self.send(StorageEvent::AllDeleted {
            source: source.to_string(),
        });
    }

    fn get_all_complete(&self, source: &str) {
        let _ = self.send(StorageEvent::GetAllComplete {
            source: source.to_string(),
        });
    }

    fn is_closed(&self) -> bool {
        UnboundedSender::is_closed(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_channel_observer_forwards_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.key_added(b"k", b"v", "tab-1");
        tx.all_deleted("tab-2");

        assert_eq!(
            rx.try_recv().unwrap(),
            StorageEvent::KeyAdded {
                key: b"k".to_vec(),
                value: b"v".to_vec(),
                source: "tab-1".to_string(),
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            StorageEvent::AllDeleted {
                source: "tab-2".to_string()
            }
        );
    }

    #[test]
    fn test_channel_observer_reports_closed() {
        let (tx, rx) = mpsc::unbounded_channel::<StorageEvent>();
        assert!(!StorageObserver::is_closed(&tx));
        drop(rx);
        assert!(StorageObserver::is_closed(&tx));
        // Sending to a closed channel is ignored
        tx.key_deleted(b"k", b"v", "tab");
    }
}
