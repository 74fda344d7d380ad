pub mod clock;
pub mod unicode;

pub use clock::{Clock, FixedClock, SystemClock};
