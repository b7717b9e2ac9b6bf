//! Reference-counted byte buffers for Strata.
//!
//! Large binary payloads (pixel data, vertex data, shader source) move
//! through the object graph as `Arc<ReferencedBuffer>` rather than being
//! copied. Access goes through a scoped [`BufferGuard`] obtained from a
//! non-blocking lock: a second lock attempt fails instead of waiting.
//!
//! # Key Types
//!
//! - [`ReferencedBuffer`]: owned, external, view or copy buffer with an atomic lock
//! - [`BufferGuard`]: exclusive accessor, released on drop
//! - [`BufferKind`]: which of the four ownership variants a buffer is

pub mod buffer;
pub mod error;

pub use buffer::{BufferGuard, BufferKind, ReferencedBuffer};
pub use error::{BufferError, BufferResult};
