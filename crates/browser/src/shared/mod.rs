pub mod js;
pub mod errors;
pub mod config;

pub use config::MonitorConfig;
pub use errors::{is_context_lost, to_vitals_error};
