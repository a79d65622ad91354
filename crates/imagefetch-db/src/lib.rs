//! Imagefetch-DB: catalog schema, migrations, and query operations
//!
//! SQLite storage for the three tables imagefetch owns or adapts:
//! catalog items, stored images (the persistent dedup index) and the
//! append-only outcome log.
//!
//! # Modules
//!
//! - `migrations` - Embedded schema migrations
//! - `pool` - Connection pool management
//! - `models` - Rust models matching database schema
//! - `queries` - Database query operations
//!
//! # Example
//!
//! ```no_run
//! use imagefetch_db::pool::{init_pool, get_conn};
//! use imagefetch_db::queries::items;
//!
//! let pool = init_pool("/var/lib/imagefetch/catalog.sqlite").unwrap();
//! let conn = get_conn(&pool).unwrap();
//!
//! let pending = items::list_items_needing_images(&conn, false, Some(50)).unwrap();
//! println!("{} items need images", pending.len());
//! ```

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
