//! Durable node state.
//!
//! Everything the node must not lose lives behind the [`Store`] trait:
//! objectives (as envelopes), channels, consensus channels, the channel
//! ownership table, voucher balances, and the last chain block processed.
//! [`MemStore`] keeps it all in memory; [`DurableStore`] backs each table
//! with a RON file in a directory and survives a restart.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::Channel;
use crate::consensus::ConsensusChannel;
use crate::crypto::SecretKey;
use crate::protocols::{HydrationError, Objective, ObjectiveId};
use crate::types::{Address, Amount, ChannelId};

pub mod durable;
pub mod mem;
mod tables;

pub use durable::DurableStore;
pub use mem::MemStore;

/// What the node remembers about payments over a virtual channel. The
/// voucher exchange itself happens above this crate; the store only keeps
/// the running total so the channel can be closed with the right split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherInfo {
    pub channel_id: ChannelId,
    pub paid: Amount,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No objective with id {0}")]
    ObjectiveNotFound(ObjectiveId),
    #[error("No channel with id {0}")]
    ChannelNotFound(ChannelId),
    #[error("No consensus channel with id {0}")]
    ConsensusChannelNotFound(ChannelId),
    #[error("No consensus channel with counterparty {0}")]
    NoConsensusChannelWith(Address),
    #[error("No voucher recorded for channel {0}")]
    VoucherNotFound(ChannelId),
    #[error("No objective owns channel {0}")]
    NoObjectiveForChannel(ChannelId),
    #[error("Channel {channel} is owned by objective {owner}, so {claimant} cannot claim it")]
    OwnershipConflict { channel: ChannelId, owner: ObjectiveId, claimant: ObjectiveId },
    #[error("Store data is corrupt: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Hydration(#[from] HydrationError),
    #[error("Could not encode store data: {0}")]
    Encode(#[from] ron::Error),
    #[error("Could not decode store data: {0}")]
    Decode(#[from] ron::error::SpannedError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Persistent state shared by everything driving objectives.
///
/// `set_objective` is the only compound operation: it persists the
/// objective's envelope together with every channel the objective reports
/// through `related()`, and it enforces channel ownership. The first
/// approved objective persisted for a channel owns it; persisting a
/// different approved objective for the same channel fails with
/// [`StoreError::OwnershipConflict`] before anything is written.
pub trait Store {
    /// The address this node signs and participates as.
    fn my_address(&self) -> Address;

    /// The key objectives are cranked with.
    fn secret_key(&self) -> &SecretKey;

    fn get_objective_by_id(&self, id: &ObjectiveId) -> Result<Objective, StoreError>;

    fn set_objective(&self, objective: &Objective) -> Result<(), StoreError>;

    /// The objective currently owning the given channel.
    fn get_objective_by_channel_id(&self, channel: &ChannelId) -> Result<Objective, StoreError>;

    /// Drops the ownership claim on a channel. A no-op if nothing owns it.
    fn release_channel_from_ownership(&self, channel: &ChannelId) -> Result<(), StoreError>;

    fn get_channel_by_id(&self, id: &ChannelId) -> Result<Channel, StoreError>;

    /// Every requested channel, failing if any id is unknown.
    fn get_channels_by_ids(&self, ids: &[ChannelId]) -> Result<Vec<Channel>, StoreError>;

    fn get_channels_by_participant(&self, participant: &Address) -> Result<Vec<Channel>, StoreError>;

    fn get_channels_by_app_definition(&self, app_definition: &Address) -> Result<Vec<Channel>, StoreError>;

    fn set_channel(&self, channel: &Channel) -> Result<(), StoreError>;

    fn destroy_channel(&self, id: &ChannelId) -> Result<(), StoreError>;

    fn get_consensus_channel_by_id(&self, id: &ChannelId) -> Result<ConsensusChannel, StoreError>;

    /// The ledger channel shared with the given counterparty.
    fn get_consensus_channel(&self, counterparty: &Address) -> Result<ConsensusChannel, StoreError>;

    fn set_consensus_channel(&self, channel: &ConsensusChannel) -> Result<(), StoreError>;

    fn destroy_consensus_channel(&self, id: &ChannelId) -> Result<(), StoreError>;

    fn get_last_block_seen(&self) -> Result<u64, StoreError>;

    fn set_last_block_seen(&self, block: u64) -> Result<(), StoreError>;

    fn get_voucher_info(&self, channel: &ChannelId) -> Result<VoucherInfo, StoreError>;

    fn set_voucher_info(&self, info: &VoucherInfo) -> Result<(), StoreError>;

    fn remove_voucher_info(&self, channel: &ChannelId) -> Result<(), StoreError>;
}
