//! tessera-services: peer group management for the overlay node.
//!
//! `PeerGroupService` owns the peer collections and capacity policy,
//! `PeerGroupManager` drives bootstrap and periodic housekeeping against a
//! transport `Node`.

pub mod ban_list;
pub mod error;
pub mod exchange;
pub mod manager;
pub mod node;
pub mod peer_group_service;
pub mod retry;
pub mod store;


pub use ban_list::{BanEntry, BanList, BanReason};
pub use error::PeerGroupError;
pub use exchange::{Lifecycle, PeerExchange};
pub use manager::{PeerGroupListener, PeerGroupManager, State};
pub use node::{CloseReason, Connection, ConnectionListener, ConnectionRef, Node};
pub use peer_group_service::PeerGroupService;
pub use retry::{RetryError, RetryPolicy};
pub use store::{JsonFilePersistence, NoPersistence, PeerGroupStore, StorePersistence};
