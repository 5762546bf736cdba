//! Observability for the append log
//!
//! - Structured logging (JSON lines on stderr)
//! - Typed lifecycle events
//!
//! Observability is read-only: logging never changes the outcome of an
//! append or a read, and a failed log write is ignored.
//!
//! # Usage
//!
//! ```ignore
//! use sessionlog::observability::{log_event, Event};
//!
//! log_event(Event::SegmentSealed, &[("sealed", "session_a.log")]);
//! ```

mod events;
mod logger;

pub use events::Event;
pub use logger::{Logger, Severity};

/// Log a lifecycle event at its default severity
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event() {
        // This just verifies no panic
        log_event(Event::ReadComplete, &[]);
        log_event(Event::ConfigLoaded, &[("log_dir", "/tmp/test")]);
    }
}
