//! Metrics for the write path.
//!
//! Events are recorded through the `metrics` facade; installing an exporter
//! is left to the embedding application.

pub mod events;

/// Emit an internal event.
///
/// This macro calls the `InternalEvent::emit()` method on the given event,
/// which records the corresponding metric.
///
/// # Example
///
/// ```ignore
/// use flurry::metrics::events::{DocumentsWritten, TaskRetried};
///
/// emit!(DocumentsWritten { count: 100 });
/// emit!(TaskRetried { attempt: 2 });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}
