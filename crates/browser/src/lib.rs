//! Runs the vitals engine against a real Chromium tab over CDP.
//!
//! Instrumentation is injected before any page script runs and queues
//! observations in the page. Each tick the monitor refreshes a probe of
//! page state, drains that queue into the engine and sends whatever the
//! engine reports to the coordinator.

pub mod host;
pub mod monitor;
pub mod page;
pub mod shared;

pub use host::{ChromiumHost, ObserverCommand};
pub use monitor::{ChromiumMonitor, RunSummary};
pub use page::{PageBatch, PageEvent, PageProbe, dispatch};
pub use shared::MonitorConfig;
