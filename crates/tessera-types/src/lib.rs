//! Foundation value types shared across the Tessera tablet engine.
//!
//! Everything here is a plain value: cheap to copy, totally ordered where
//! it makes sense, and free of any locking or I/O concerns.

pub mod timestamp;

pub use timestamp::Timestamp;
