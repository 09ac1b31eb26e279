//! Event system for UI decoupling.
//!
//! Front ends subscribe to hub events instead of polling the session.
//! Delivery is synchronous and in subscription order.

use std::fmt;
use std::sync::Arc;

use crate::state::DeviceMode;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Events emitted by a hub session.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    /// Connect finished (identity and storage loaded).
    Connected { name: String, firmware: String },
    /// Channel closed and session state discarded.
    Disconnected,
    /// Hub mode changed.
    ModeChanged { from: DeviceMode, to: DeviceMode },
    /// Device identity was (re)loaded.
    InfoChanged,
    /// Storage snapshot was replaced.
    StorageChanged,
    /// One upload block acknowledged.
    UploadProgress { slot: u32, current: u64, total: u64 },
    /// Log message.
    Log { level: LogLevel, message: String },
}

impl fmt::Display for HubEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubEvent::Connected { name, firmware } => write!(f, "connected to {name} ({firmware})"),
            HubEvent::Disconnected => write!(f, "disconnected"),
            HubEvent::ModeChanged { from, to } => write!(f, "mode {from} -> {to}"),
            HubEvent::InfoChanged => write!(f, "info changed"),
            HubEvent::StorageChanged => write!(f, "storage changed"),
            HubEvent::UploadProgress {
                slot,
                current,
                total,
            } => write!(f, "upload to slot {slot}: {current}/{total}"),
            HubEvent::Log { message, .. } => write!(f, "{message}"),
        }
    }
}

/// Observer trait for receiving hub events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait HubObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &HubEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl HubObserver for NullObserver {
    fn on_event(&self, _event: &HubEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl HubObserver for TracingObserver {
    fn on_event(&self, event: &HubEvent) {
        match event {
            HubEvent::Connected { name, firmware } => {
                tracing::info!(name = %name, firmware = %firmware, "Hub connected");
            }
            HubEvent::Disconnected => {
                tracing::info!("Hub disconnected");
            }
            HubEvent::ModeChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Mode changed");
            }
            HubEvent::InfoChanged | HubEvent::StorageChanged => {
                tracing::debug!(event = %event, "Snapshot updated");
            }
            HubEvent::UploadProgress {
                slot,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    100
                };
                tracing::debug!(slot, progress = %format!("{}%", pct), "Upload progress");
            }
            HubEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}

/// Handle returned by [`ObserverRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Ordered set of observers.
#[derive(Default)]
pub struct ObserverRegistry {
    next_id: u64,
    observers: Vec<(SubscriptionId, Arc<dyn HubObserver>)>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Arc<dyn HubObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, observer));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sid, _)| *sid != id);
        self.observers.len() != before
    }

    pub fn clear(&mut self) {
        self.observers.clear();
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Deliver `event` to every observer, in subscription order.
    pub fn emit(&self, event: &HubEvent) {
        for (_, observer) in &self.observers {
            observer.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl HubObserver for Recorder {
        fn on_event(&self, event: &HubEvent) {
            self.log.lock().unwrap().push(format!("{}:{}", self.tag, event));
        }
    }

    fn recorder(tag: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn HubObserver> {
        Arc::new(Recorder {
            tag,
            log: Arc::clone(log),
        })
    }

    #[test]
    fn test_delivery_in_subscription_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ObserverRegistry::new();
        registry.subscribe(recorder("a", &log));
        registry.subscribe(recorder("b", &log));

        registry.emit(&HubEvent::StorageChanged);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:storage changed".to_string(), "b:storage changed".to_string()]
        );
    }

    #[test]
    fn test_unsubscribe_one() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ObserverRegistry::new();
        let a = registry.subscribe(recorder("a", &log));
        registry.subscribe(recorder("b", &log));

        assert!(registry.unsubscribe(a));
        assert!(!registry.unsubscribe(a));
        registry.emit(&HubEvent::InfoChanged);

        assert_eq!(*log.lock().unwrap(), vec!["b:info changed".to_string()]);
    }

    #[test]
    fn test_clear_removes_everyone() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ObserverRegistry::new();
        registry.subscribe(recorder("a", &log));
        registry.subscribe(Arc::new(NullObserver));
        assert_eq!(registry.len(), 2);

        registry.clear();
        registry.emit(&HubEvent::Disconnected);

        assert!(registry.is_empty());
        assert!(log.lock().unwrap().is_empty());
    }
}
