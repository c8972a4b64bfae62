//! # CellarDB Codec
//!
//! Encoding of page bodies and the checksummed frames that carry them.
//!
//! Page bodies are CBOR produced from `serde` types. Each body is wrapped in
//! a [`Frame`] whose CRC-32 trailer lets recovery tell a complete write from
//! a torn one.
//!
//! ## Usage
//!
//! ```
//! use cellar_codec::{from_cbor, to_cbor, Frame, FrameKind};
//!
//! let body = to_cbor(&vec![1u32, 2, 3]).unwrap();
//! let bytes = Frame::new(FrameKind::Object, 1, body).encode().unwrap();
//!
//! let frame = Frame::decode(&bytes).unwrap();
//! let values: Vec<u32> = from_cbor(&frame.body).unwrap();
//! assert_eq!(values, vec![1, 2, 3]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod frame;

pub use cbor::{from_cbor, to_cbor};
pub use error::{CodecError, CodecResult};
pub use frame::{
    frame_len, Frame, FrameKind, FRAME_HEADER_SIZE, FRAME_TRAILER_SIZE, MAX_BODY_SIZE,
    MIN_FRAME_SIZE,
};
