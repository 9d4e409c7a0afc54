// vigil-core/src/domain/compliance/mod.rs

pub mod baseline;
pub mod detect;
pub mod signal;
pub mod zscore;

pub use baseline::{Baseline, BaselineKey};
pub use detect::{Detection, DetectorState, detect, detect_and_update};
pub use signal::{AnomalySignal, Severity, SignalScope, SyntheticObservation};
pub use zscore::{Deviation, ZScoreCheck, ZScoreError};
