//! Viewport capture and image-to-image generation pipeline.
//!
//! [`pipeline::Pipeline`] drives one render trigger: capture the renderer's
//! view through the [`capture::CaptureChain`], send it with the composed
//! prompt through [`client::GenerationClient`], and persist what comes back
//! through [`store::ArtifactStore`].

pub mod cancel;
pub mod capture;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod raster;
pub mod renderer;
pub mod store;

#[cfg(test)]
mod test_support;

pub use error::{ErrorKind, Failure};
