#![forbid(unsafe_code)]

pub mod aggregator;
pub mod error;
pub mod lesson_dates;
pub mod model;
pub mod time;
pub mod training_plan;

pub use error::Error;
pub use time::Clock;
