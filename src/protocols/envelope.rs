//! Durable form of an objective.
//!
//! An envelope stores an objective's identity, approval status, and a small
//! record of the fields that cannot be re-derived. Channel and ledger content
//! is deliberately left out; it lives in its own tables and is looked up again
//! when the envelope is hydrated. That keeps one copy of every channel on
//! disk, no matter how many objectives reference it.

use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::consensus::ConsensusChannel;
use crate::protocols::direct_defund::DirectDefund;
use crate::protocols::direct_fund::DirectFund;
use crate::protocols::error::HydrationError;
use crate::protocols::virtual_defund::VirtualDefund;
use crate::protocols::virtual_fund::VirtualFund;
use crate::protocols::{Objective, ObjectiveId, ObjectiveKind, ObjectiveStatus};
use crate::types::{Amount, ChannelId, Funds};

/// Version written into every envelope. Bump when a record changes shape.
pub const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectiveEnvelope {
    pub version: u32,
    pub id: ObjectiveId,
    pub status: ObjectiveStatus,
    pub record: ObjectiveRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveRecord {
    DirectFund(DirectFundRecord),
    DirectDefund(DirectDefundRecord),
    VirtualFund(VirtualFundRecord),
    VirtualDefund(VirtualDefundRecord),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectFundRecord {
    pub channel: ChannelId,
    pub fully_funded_threshold: Funds,
    pub my_deposit_safety_threshold: Funds,
    pub my_deposit_target: Funds,
    pub deposit_submitted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectDefundRecord {
    pub channel: ChannelId,
    pub withdraw_submitted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualFundRecord {
    pub channel: ChannelId,
    pub my_role: usize,
    pub left_ledger: Option<ChannelId>,
    pub right_ledger: Option<ChannelId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDefundRecord {
    pub channel: ChannelId,
    pub my_role: usize,
    pub paid: Amount,
    pub left_ledger: Option<ChannelId>,
    pub right_ledger: Option<ChannelId>,
}

impl ObjectiveEnvelope {
    /// Rebuilds the objective this envelope describes, looking channels and
    /// ledgers up through the given closures.
    pub fn hydrate<FC, FL>(&self, mut channel: FC, mut ledger: FL) -> Result<Objective, HydrationError>
    where
        FC: FnMut(&ChannelId) -> Option<Channel>,
        FL: FnMut(&ChannelId) -> Option<ConsensusChannel>,
    {
        if self.version != ENVELOPE_VERSION {
            return Err(HydrationError::UnsupportedVersion(self.version));
        }
        match &self.record {
            ObjectiveRecord::DirectFund(record) => {
                self.check_identity(ObjectiveKind::DirectFund, record.channel)?;
                let channel = channel(&record.channel).ok_or(HydrationError::MissingChannel(record.channel))?;
                Ok(Objective::DirectFund(DirectFund::from_record(record, self.status, channel)))
            }
            ObjectiveRecord::DirectDefund(record) => {
                self.check_identity(ObjectiveKind::DirectDefund, record.channel)?;
                let channel = channel(&record.channel).ok_or(HydrationError::MissingChannel(record.channel))?;
                Ok(Objective::DirectDefund(DirectDefund::from_record(record, self.status, channel)))
            }
            ObjectiveRecord::VirtualFund(record) => {
                self.check_identity(ObjectiveKind::VirtualFund, record.channel)?;
                let channel = channel(&record.channel).ok_or(HydrationError::MissingChannel(record.channel))?;
                let left = fetch_ledger(&mut ledger, record.left_ledger)?;
                let right = fetch_ledger(&mut ledger, record.right_ledger)?;
                Ok(Objective::VirtualFund(VirtualFund::from_record(record, self.status, channel, left, right)?))
            }
            ObjectiveRecord::VirtualDefund(record) => {
                self.check_identity(ObjectiveKind::VirtualDefund, record.channel)?;
                let channel = channel(&record.channel).ok_or(HydrationError::MissingChannel(record.channel))?;
                let left = fetch_ledger(&mut ledger, record.left_ledger)?;
                let right = fetch_ledger(&mut ledger, record.right_ledger)?;
                Ok(Objective::VirtualDefund(VirtualDefund::from_record(record, self.status, channel, left, right)?))
            }
        }
    }

    fn check_identity(&self, kind: ObjectiveKind, channel: ChannelId) -> Result<(), HydrationError> {
        if self.id.kind != kind || self.id.channel != channel {
            return Err(HydrationError::IdMismatch { id: self.id });
        }
        Ok(())
    }
}

fn fetch_ledger<FL>(ledger: &mut FL, id: Option<ChannelId>) -> Result<Option<ConsensusChannel>, HydrationError>
where
    FL: FnMut(&ChannelId) -> Option<ConsensusChannel>,
{
    match id {
        None => Ok(None),
        Some(id) => ledger(&id).ok_or(HydrationError::MissingConsensusChannel(id)).map(Some),
    }
}
