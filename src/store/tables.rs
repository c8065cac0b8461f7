use std::collections::BTreeMap;

use log::{error, info};
use ron::ser::PrettyConfig;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::channel::Channel;
use crate::consensus::ConsensusChannel;
use crate::protocols::{Objective, ObjectiveEnvelope, ObjectiveId, ObjectiveStatus, Storable};
use crate::store::{StoreError, VoucherInfo};
use crate::types::{Address, ChannelId};

/// The flat tables every store keeps. Keys are the display form of the id,
/// values are the RON encoding of the entry, so a table serializes as a plain
/// string map no matter what it holds.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    pub objectives: BTreeMap<String, String>,
    pub channels: BTreeMap<String, String>,
    pub consensus_channels: BTreeMap<String, String>,
    pub channel_ownership: BTreeMap<String, String>,
    pub vouchers: BTreeMap<String, String>,
    pub last_block_seen: u64,
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<String, StoreError> {
    let config = PrettyConfig::new().compact_arrays(true).compact_maps(true);
    Ok(ron::ser::to_string_pretty(value, config)?)
}

pub(crate) fn decode<T: DeserializeOwned>(text: &str) -> Result<T, StoreError> {
    Ok(ron::de::from_str(text)?)
}

impl Tables {
    // ====== Objectives ======

    pub fn get_objective(&self, id: &ObjectiveId) -> Result<Objective, StoreError> {
        let text = self.objectives.get(&id.to_string()).ok_or(StoreError::ObjectiveNotFound(*id))?;
        let envelope: ObjectiveEnvelope = decode(text)?;
        let objective =
            envelope.hydrate(|channel| self.decode_channel(channel), |ledger| self.decode_consensus_channel(ledger))?;
        Ok(objective)
    }

    pub fn set_objective(&mut self, objective: &Objective) -> Result<(), StoreError> {
        let envelope = objective.to_envelope();
        let encoded = encode(&envelope)?;
        let id = envelope.id;
        if envelope.status == ObjectiveStatus::Approved {
            self.claim_channel(id)?;
        }
        self.objectives.insert(id.to_string(), encoded);
        for storable in objective.related() {
            match storable {
                Storable::Channel(channel) => self.set_channel(channel)?,
                Storable::ConsensusChannel(channel) => self.set_consensus_channel(channel)?,
            }
        }
        Ok(())
    }

    pub fn get_objective_by_channel(&self, channel: &ChannelId) -> Result<Objective, StoreError> {
        let owner = match self.channel_ownership.get(&channel.to_string()) {
            Some(text) => parse_owner(text)?,
            None => return Err(StoreError::NoObjectiveForChannel(*channel)),
        };
        self.get_objective(&owner)
    }

    pub fn release_channel(&mut self, channel: &ChannelId) {
        self.channel_ownership.remove(&channel.to_string());
    }

    /// Records `claimant` as the channel's owner, or fails if a different
    /// objective already holds the claim. Runs before any write.
    fn claim_channel(&mut self, claimant: ObjectiveId) -> Result<(), StoreError> {
        let key = claimant.channel.to_string();
        match self.channel_ownership.get(&key) {
            Some(text) => {
                let owner = parse_owner(text)?;
                if owner != claimant {
                    return Err(StoreError::OwnershipConflict { channel: claimant.channel, owner, claimant });
                }
            }
            None => {
                info!("Objective {claimant} now owns channel {}", claimant.channel);
                self.channel_ownership.insert(key, claimant.to_string());
            }
        }
        Ok(())
    }

    // ====== Channels ======

    pub fn get_channel(&self, id: &ChannelId) -> Result<Channel, StoreError> {
        let text = self.channels.get(&id.to_string()).ok_or(StoreError::ChannelNotFound(*id))?;
        decode(text)
    }

    pub fn get_channels(&self, ids: &[ChannelId]) -> Result<Vec<Channel>, StoreError> {
        ids.iter().map(|id| self.get_channel(id)).collect()
    }

    pub fn channels_matching(&self, keep: impl Fn(&Channel) -> bool) -> Result<Vec<Channel>, StoreError> {
        let mut matching = Vec::new();
        for text in self.channels.values() {
            let channel: Channel = decode(text)?;
            if keep(&channel) {
                matching.push(channel);
            }
        }
        Ok(matching)
    }

    pub fn set_channel(&mut self, channel: &Channel) -> Result<(), StoreError> {
        let encoded = encode(channel)?;
        self.channels.insert(channel.id().to_string(), encoded);
        Ok(())
    }

    pub fn destroy_channel(&mut self, id: &ChannelId) {
        self.channels.remove(&id.to_string());
    }

    fn decode_channel(&self, id: &ChannelId) -> Option<Channel> {
        let text = self.channels.get(&id.to_string())?;
        match ron::de::from_str(text) {
            Ok(channel) => Some(channel),
            Err(err) => {
                error!("Stored channel {id} does not decode: {err}");
                None
            }
        }
    }

    // ====== Consensus channels ======

    pub fn get_consensus_channel(&self, id: &ChannelId) -> Result<ConsensusChannel, StoreError> {
        let text = self.consensus_channels.get(&id.to_string()).ok_or(StoreError::ConsensusChannelNotFound(*id))?;
        decode(text)
    }

    pub fn consensus_channel_with(&self, counterparty: &Address) -> Result<ConsensusChannel, StoreError> {
        for text in self.consensus_channels.values() {
            let channel: ConsensusChannel = decode(text)?;
            if channel.counterparty() == *counterparty {
                return Ok(channel);
            }
        }
        Err(StoreError::NoConsensusChannelWith(*counterparty))
    }

    pub fn set_consensus_channel(&mut self, channel: &ConsensusChannel) -> Result<(), StoreError> {
        let encoded = encode(channel)?;
        self.consensus_channels.insert(channel.id().to_string(), encoded);
        Ok(())
    }

    pub fn destroy_consensus_channel(&mut self, id: &ChannelId) {
        self.consensus_channels.remove(&id.to_string());
    }

    fn decode_consensus_channel(&self, id: &ChannelId) -> Option<ConsensusChannel> {
        let text = self.consensus_channels.get(&id.to_string())?;
        match ron::de::from_str(text) {
            Ok(channel) => Some(channel),
            Err(err) => {
                error!("Stored consensus channel {id} does not decode: {err}");
                None
            }
        }
    }

    // ====== Vouchers ======

    pub fn get_voucher(&self, channel: &ChannelId) -> Result<VoucherInfo, StoreError> {
        let text = self.vouchers.get(&channel.to_string()).ok_or(StoreError::VoucherNotFound(*channel))?;
        decode(text)
    }

    pub fn set_voucher(&mut self, info: &VoucherInfo) -> Result<(), StoreError> {
        let encoded = encode(info)?;
        self.vouchers.insert(info.channel_id.to_string(), encoded);
        Ok(())
    }

    pub fn remove_voucher(&mut self, channel: &ChannelId) {
        self.vouchers.remove(&channel.to_string());
    }
}

fn parse_owner(text: &str) -> Result<ObjectiveId, StoreError> {
    text.parse()
        .map_err(|_| StoreError::Corrupt(format!("ownership entry {text} is not an objective id")))
}
