//! Observability for the page storage engine
//!
//! - Structured JSON logging with a runtime minimum severity
//! - Typed lifecycle events
//! - Atomic counters per page database
//!
//! Observability is read-only: it never changes the outcome of a storage call.

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

/// Log a lifecycle event with fields. Fatal events log at FATAL, every other
/// event at INFO.
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    if event.is_fatal() {
        Logger::fatal(event.as_str(), fields);
    } else {
        Logger::info(event.as_str(), fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event_does_not_panic() {
        log_event_with_fields(Event::PageDbOpened, &[]);
        log_event_with_fields(Event::StoreCorruption, &[("operation", "scan")]);
    }
}
