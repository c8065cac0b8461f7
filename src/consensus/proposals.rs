use crate::consensus::Guarantee;
use crate::crypto::StateSignature;
use crate::types::{Amount, ChannelId};
use serde::{Deserialize, Serialize};

/// A single mutation of a ledger outcome. Guarantees are added while a virtual
/// channel funds and removed while it defunds; balances move accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalChange {
    AddGuarantee { guarantee: Guarantee, left_deposit: Amount },
    RemoveGuarantee { target: ChannelId, left_amount: Amount },
}

impl ProposalChange {
    /// The virtual channel this change funds or defunds.
    pub fn target(&self) -> ChannelId {
        match self {
            ProposalChange::AddGuarantee { guarantee, .. } => guarantee.target,
            ProposalChange::RemoveGuarantee { target, .. } => *target,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub ledger_id: ChannelId,
    pub change: ProposalChange,
}

impl Proposal {
    pub fn target(&self) -> ChannelId {
        self.change.target()
    }
}

/// A proposal bound to the ledger turn it produces, signed over the hash of the
/// resulting ledger state. Countersigning one of these is what commits both
/// parties to the new outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedProposal {
    pub proposal: Proposal,
    pub turn_num: u64,
    pub signature: StateSignature,
}

impl SignedProposal {
    pub fn ledger_id(&self) -> ChannelId {
        self.proposal.ledger_id
    }

    pub fn target(&self) -> ChannelId {
        self.proposal.target()
    }
}
