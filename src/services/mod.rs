pub mod capture_store;

pub use capture_store::{CaptureStore, UpsertOutcome};
