//! Imagefetch - catalog image acquisition
//!
//! Finds product images for catalog items by walking a prioritized chain of
//! image-search providers, gating every provider call on credential quota
//! and rate budgets, validating candidates against a quality policy and
//! rejecting content already stored for another item.

pub mod audit;
pub mod batch;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod dedup;
pub mod images;
pub mod orchestrator;
pub mod providers;
pub mod quality;
pub mod rate_limit;
