//! Inference backend implementations
//!
//! The ONNX Runtime backend is the production engine; the mock backends in
//! `test_utils` drive the pipeline deterministically in tests.

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(test)]
pub mod test_utils;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;
