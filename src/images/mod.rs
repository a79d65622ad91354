//! Image storage.
//!
//! Accepted candidate bytes are written to disk as-is; the database side of
//! storing an image lives in the catalog adapter.

mod storage;

pub use storage::{ImageStorage, WrittenImage};
