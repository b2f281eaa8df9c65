//! Types shared between the benchmark drivers and the load generator.

pub mod layout;
pub mod probe;
pub mod record;
pub mod target;

pub use layout::{TableLayout, WriteMode};
pub use probe::{ProbeKind, ProbeOutput};
pub use record::{Batch, Segment, SyntheticRecord};
pub use target::TargetKind;
