//! # leadflow-provider
//!
//! Adapter for a Responses-API–shaped model provider: typed request
//! construction with the safety invariants the API demands, lenient
//! parsing of the provider's overlapping output-item shapes, the image
//! input pipeline (validation, problematic-URL conversion, dedup), and
//! recovery from provider-side image-download failures.

pub mod client;
pub mod error;
pub mod images;
pub mod process;
pub mod request;
pub mod response;
pub mod retry;
pub mod tools;

pub use client::*;
pub use error::*;
pub use process::*;
pub use request::*;
pub use response::*;
pub use retry::*;
pub use tools::*;
