pub mod config;
pub mod errors;
pub mod metrics;
pub mod period;
pub mod record;

pub use config::*;
pub use errors::*;
pub use metrics::*;
pub use period::*;
pub use record::*;
