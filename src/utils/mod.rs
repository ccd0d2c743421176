pub mod format;
pub mod time;

pub use format::{format_duration, DurationStyle};
pub use time::{local_date, local_day_start, local_week_start};

use log::LevelFilter;

/// Initialize logging (reads RUST_LOG env var). Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Info)
        .try_init();
}
