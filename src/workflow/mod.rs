pub mod capture_ctx;
pub mod capture_session;

pub use capture_ctx::CaptureCtx;
pub use capture_session::{
    CaptureError, CaptureOutcome, CaptureSession, CaptureSettings, CaptureState,
};
