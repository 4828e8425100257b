//! tessera-core: shared value types and configuration.
//! All other Tessera crates depend on this one.

pub mod address;
pub mod clock;
pub mod config;
pub mod peer;

pub use address::{Address, AddressError, TransportType};
pub use peer::{Capability, Feature, NetworkLoad, Peer};
