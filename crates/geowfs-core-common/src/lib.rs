//! Common types and traits shared across `geowfs` crates.
//!
//! This crate provides the transport seam consumed by `geowfs-core` (the [`Fetcher`] trait and
//! its in-memory implementation) and the static protocol-version support table displayed by
//! the CLI, so that transports can be implemented without depending on the driver itself.

pub mod io;
pub mod memory;
pub mod versions;

// Re-export commonly used types
pub use io::{FetchRequest, FetchResponse, Fetcher, TransportError};
pub use memory::MemoryFetcher;
pub use versions::{ProtocolVersion, SupportStatus, VersionCapabilities, find_version, supported_versions};
