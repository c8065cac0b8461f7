//! Off-chain protocol core for a state channel node.
//!
//! The crate covers the channel data model, the leader/follower ledger consensus
//! protocol, the four funding and defunding objectives the node can run, and the
//! store that persists all of it. Transport, chain services and the engine that
//! drives objectives live elsewhere; everything here is pure protocol state.

pub mod channel;
pub mod consensus;
pub mod crypto;
pub mod helpers;
pub mod protocols;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;
