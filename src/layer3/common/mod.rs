// Layer3 Common Module - Shared error type for the analytics layer

pub mod error;

pub use error::{AnalysisError, AnalysisResult};
