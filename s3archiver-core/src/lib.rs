pub mod config;
pub mod error;
pub mod formatters;
pub mod time;

pub use config::BackendConfig;
pub use error::{Error, Result};
pub use formatters::{FormatPlain, FormatSyslog};
pub use time::{RotationInput, RotationPolicy, diff_seconds, hours_between_ms, is_same_utc_day_ms, now_ms, parse_leading_timestamp};
