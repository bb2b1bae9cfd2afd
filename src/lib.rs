#![forbid(unsafe_code)]
//! # Streaming GIF encoder
//!
//! This library turns indexed-color pixel buffers into a standards-compliant,
//! size-optimized GIF89a byte stream, written incrementally to any byte sink.
//!
//! Frames are compressed with the crate's own adaptive LZW compressor and can
//! optionally be reduced to the rectangle that changed since the previous
//! frame ([`Frame::diff_window`]) and/or have unchanged pixels replaced by a
//! reserved transparent index ([`Frame::diff_transparency`]). To resolve
//! disposal dependencies between adjacent frames, the encoder keeps a short
//! lookahead queue; a frame is only serialized once its successor is known or
//! the stream is finished.
//!
//! ## no_std support
//!
//! This crate supports `no_std` environments with an allocator. Disable the
//! default `std` feature:
//!
//! ```toml
//! [dependencies]
//! gifenc = { version = "0.1", default-features = false }
//! ```
//!
//! In `no_std` mode, the crate provides its own `Write` trait in the
//! [`io`] module. Implement this trait for your I/O types.
//!
//! ## Encoding GIF files
//!
//! The encoder can be used to save simple computer generated animations:
//!
#![cfg_attr(feature = "std", doc = "```rust")]
#![cfg_attr(not(feature = "std"), doc = "```rust,ignore")]
//! use gifenc::{Encoder, Frame, Repeat};
//! use std::borrow::Cow;
//! use std::fs::File;
//!
//! let color_map = &[0xFF, 0xFF, 0xFF, 0, 0, 0];
//! let (width, height) = (6, 6);
//! let beacon_states = [[
//!     0, 0, 0, 0, 0, 0,
//!     0, 1, 1, 0, 0, 0,
//!     0, 1, 1, 0, 0, 0,
//!     0, 0, 0, 1, 1, 0,
//!     0, 0, 0, 1, 1, 0,
//!     0, 0, 0, 0, 0, 0,
//! ], [
//!     0, 0, 0, 0, 0, 0,
//!     0, 1, 1, 0, 0, 0,
//!     0, 1, 0, 0, 0, 0,
//!     0, 0, 0, 0, 1, 0,
//!     0, 0, 0, 1, 1, 0,
//!     0, 0, 0, 0, 0, 0,
//! ]];
//! let image = File::create("target/beacon.gif").unwrap();
//! let mut encoder = Encoder::new(image, width, height, color_map).unwrap();
//! encoder.set_repeat(Repeat::Infinite).unwrap();
//! for state in &beacon_states {
//!     let mut frame = Frame::default();
//!     frame.delay = 50;
//!     frame.buffer = Cow::Borrowed(&state[..]);
//!     frame.diff_window = true;
//!     encoder.add_frame(&frame).unwrap();
//! }
//! encoder.finish().unwrap();
//! ```
//!
//! The pixel buffer of every frame covers the full logical screen; the
//! encoder itself computes the sub-rectangle that actually needs to be
//! redrawn when [`Frame::diff_window`] is set.
#![deny(missing_docs)]
#![allow(unknown_lints)] // Certain lints only apply to later versions of Rust
#![allow(clippy::manual_range_contains)]
#![allow(clippy::new_without_default)]
#![deny(clippy::alloc_instead_of_core)]
#![deny(clippy::std_instead_of_alloc)]
#![deny(clippy::std_instead_of_core)]
#![cfg_attr(not(feature = "std"), no_std)]

#[macro_use]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

mod common;
mod encoder;
/// I/O traits and types for no_std support.
pub mod io;
mod lzw;
mod optimizer;
mod traits;

pub use crate::common::{Block, DisposalMethod, Extension, Frame};

pub use crate::encoder::{Encoder, EncodingError, EncodingFormatError, ExtensionData, Repeat};
