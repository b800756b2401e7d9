//! Shared primitives for Trident crates

mod clock;
mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::HttpError;
