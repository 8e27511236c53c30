//! The job model shared by every operation kind.

pub mod kind;
pub mod params;
pub mod record;

pub use kind::{Backend, InputArity, JobKind, KindDescriptor, OutputShape};
pub use params::{CompressionLevel, CropMargins, JobParameters, Password, StampPosition};
pub use record::{JobOutputs, JobRecord, JobStatus};
