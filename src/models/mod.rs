pub mod capture;
pub mod dataset_row;
pub mod loaders;
pub mod work_range;

pub use capture::{CaptureRecord, RequestArtifact, ScriptArtifact, ScriptMeta, StoredCapture};
pub use dataset_row::DatasetRow;
pub use loaders::{Dataset, DatasetCursor};
pub use work_range::WorkRange;
