//! Imagefetch-Common: Shared types, constants, and utilities.
//!
//! This crate provides common functionality used across imagefetch:
//!
//! - **Typed IDs**: Type-safe UUID wrappers for catalog items and batch runs
//! - **Core Types**: Enums for providers, image formats, job kinds and outcome statuses
//! - **Error Handling**: The error taxonomy shared by the orchestrator and its collaborators
//!
//! # Examples
//!
//! ```
//! use imagefetch_common::{Error, ItemId, ItemStatus, ProviderKind, Result};
//!
//! let item_id = ItemId::new();
//! assert_eq!(ProviderKind::Google.to_string(), "google");
//! assert!(ItemStatus::Success.is_terminal_success());
//!
//! fn example() -> Result<()> {
//!     Err(Error::configuration("no providers enabled"))
//! }
//! # let _ = item_id;
//! ```

pub mod error;
pub mod ids;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;
