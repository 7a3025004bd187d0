//! Scan event notification.
//!
//! Catalogs and tooling can observe planning without being in the planning path: listeners are
//! fire-and-forget, and a panicking listener is logged and isolated rather than propagated into
//! the planner.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{OnceLock, RwLock};

use tracing::{debug, warn};

use crate::expressions::Predicate;
use crate::schema::SchemaRef;
use crate::SnapshotId;

/// Emitted once per `plan_files` call, after snapshot resolution.
#[derive(Debug, Clone)]
pub struct ScanEvent {
    pub table_name: String,
    pub snapshot_id: SnapshotId,
    pub filter: Predicate,
    pub projection: SchemaRef,
}

impl ScanEvent {
    pub fn new(
        table_name: impl Into<String>,
        snapshot_id: SnapshotId,
        filter: Predicate,
        projection: SchemaRef,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            snapshot_id,
            filter,
            projection,
        }
    }
}

type Listener = Box<dyn Fn(&ScanEvent) + Send + Sync>;

fn registry() -> &'static RwLock<Vec<Listener>> {
    static REGISTRY: OnceLock<RwLock<Vec<Listener>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(vec![]))
}

/// Process-wide listener registry.
pub struct Listeners;

impl Listeners {
    pub fn register(listener: impl Fn(&ScanEvent) + Send + Sync + 'static) {
        if let Ok(mut listeners) = registry().write() {
            listeners.push(Box::new(listener));
        }
    }

    /// Notifies every registered listener. Never returns an error and never panics into the
    /// caller.
    pub fn notify_all(event: &ScanEvent) {
        let Ok(listeners) = registry().read() else {
            warn!("Listener registry poisoned; dropping scan event");
            return;
        };
        debug!(
            "Notifying {} listener(s) of scan on table {}",
            listeners.len(),
            event.table_name
        );
        for listener in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!("Scan listener panicked; continuing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PrimitiveType, Schema, StructField};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn event() -> ScanEvent {
        ScanEvent::new(
            "db.tbl",
            7,
            Predicate::AlwaysTrue,
            Arc::new(Schema::new([StructField::required(
                1,
                "id",
                PrimitiveType::Long,
            )])),
        )
    }

    #[test]
    fn test_listeners_receive_events_and_panics_are_isolated() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        Listeners::register(move |e| {
            assert_eq!(e.snapshot_id, 7);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        Listeners::register(|_| panic!("listener bug"));

        Listeners::notify_all(&event());
        Listeners::notify_all(&event());
        assert!(seen.load(Ordering::SeqCst) >= 2);
    }
}
