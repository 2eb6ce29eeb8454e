//! In-process event router.
//!
//! A fixed set of [`EventKind`]s, each with an ordered list of handlers.
//! Publishing delivers the record to every handler of its kind, synchronously
//! and in registration order, before returning. A kind without handlers is a
//! no-op.
//!
//! Handlers are called on a snapshot of the list taken under the lock, so a
//! handler may itself subscribe or publish without deadlocking.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::observability::record::{EventKind, LogRecord};

/// Callback invoked for every published record of a kind.
pub type Handler = Arc<dyn Fn(&LogRecord) + Send + Sync>;

/// Publish/subscribe bus keyed by [`EventKind`].
#[derive(Default)]
pub struct EventRouter {
    handlers: RwLock<[Vec<Handler>; 5]>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for all future publishes of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&LogRecord) + Send + Sync + 'static,
    {
        self.handlers.write()[kind.index()].push(Arc::new(handler));
    }

    /// Deliver `record` to every handler registered for `kind`.
    pub fn publish(&self, kind: EventKind, record: &LogRecord) {
        let handlers = self.handlers.read()[kind.index()].clone();
        for handler in handlers {
            handler(record);
        }
    }

    /// Publish under the record's own kind. Records without a router kind
    /// (domain exceptions) are ignored.
    pub fn emit(&self, record: &LogRecord) {
        if let Some(kind) = record.kind() {
            self.publish(kind, record);
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers.read()[kind.index()].len()
    }

    /// Detach every handler of every kind.
    pub fn clear(&self) {
        let mut handlers = self.handlers.write();
        for list in handlers.iter_mut() {
            list.clear();
        }
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        let counts: Vec<(EventKind, usize)> = EventKind::ALL
            .iter()
            .map(|kind| (*kind, handlers[kind.index()].len()))
            .collect();
        f.debug_struct("EventRouter").field("subscribers", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::record::{
        Level, Payload, ResponseRecord, Scope, ServiceIdentity,
    };
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    fn response(status_code: u16) -> LogRecord {
        let identity = ServiceIdentity {
            name: "svc".to_string(),
            hostname: None,
            pid: 1,
        };
        LogRecord::new(
            &identity,
            Level::Info,
            "Response sent",
            Scope::default(),
            Payload::Response(ResponseRecord {
                status_code,
                response_time_ms: 3,
                headers: BTreeMap::new(),
                content_length: None,
            }),
        )
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let router = EventRouter::new();
        router.publish(EventKind::Response, &response(200));
        assert_eq!(router.subscriber_count(EventKind::Response), 0);
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let router = EventRouter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let seen = seen.clone();
            router.subscribe(EventKind::Response, move |record| {
                if let Payload::Response(r) = &record.payload {
                    seen.lock().push((i, r.status_code));
                }
            });
        }

        router.publish(EventKind::Response, &response(201));
        assert_eq!(*seen.lock(), vec![(0, 201), (1, 201), (2, 201)]);
    }

    #[test]
    fn test_kinds_are_isolated() {
        let router = EventRouter::new();
        let hits = Arc::new(Mutex::new(0));
        let h = hits.clone();
        router.subscribe(EventKind::Request, move |_| *h.lock() += 1);

        router.publish(EventKind::Response, &response(200));
        assert_eq!(*hits.lock(), 0);
    }

    #[test]
    fn test_many_subscribers_and_clear() {
        let router = EventRouter::new();
        let hits = Arc::new(Mutex::new(0usize));
        for _ in 0..100 {
            let h = hits.clone();
            router.subscribe(EventKind::System, move |_| *h.lock() += 1);
        }

        router.publish(EventKind::System, &response(200));
        assert_eq!(*hits.lock(), 100);

        router.clear();
        router.publish(EventKind::System, &response(200));
        assert_eq!(*hits.lock(), 100);
        assert_eq!(router.subscriber_count(EventKind::System), 0);
    }

    #[test]
    fn test_handler_may_subscribe_during_publish() {
        let router = Arc::new(EventRouter::new());
        let inner = router.clone();
        router.subscribe(EventKind::Error, move |_| {
            inner.subscribe(EventKind::Error, |_| {});
        });

        router.publish(EventKind::Error, &response(500));
        assert_eq!(router.subscriber_count(EventKind::Error), 2);
    }
}
