//! Edition Lister: keeps an ERC-1155 edition listed on a thirdweb
//! MarketplaceV3, one unit at a time.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod engine;
pub mod error;
pub mod marketplace;
pub mod pricing;
pub mod types;
