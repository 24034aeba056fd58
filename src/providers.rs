//! Completion client implementations.

pub mod openai;
pub mod vision;

// Re-export for convenience
pub use openai::GeneralClient;
pub use vision::{VisionClient, VISION_MODEL};
