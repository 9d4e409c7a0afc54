// vigil-core/src/ports/mod.rs

pub mod clock;
pub mod source;

pub use clock::{Clock, ManualClock, SystemClock};
pub use source::{AssetSource, Record};
