use crate::consensus::proposals::{ProposalChange, SignedProposal};
use crate::consensus::{ConsensusChannel, Guarantee};
use crate::protocols::error::{ConstructionError, ObjectiveError};
use crate::types::{Amount, ChannelId, Destination};

/// How one ledger funds a virtual channel: which party is on which side and
/// how much of the target each side puts in. Left is the side closer to the
/// virtual channel's first participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuaranteeInfo {
    pub left: Destination,
    pub right: Destination,
    pub left_amount: Amount,
    pub right_amount: Amount,
    pub guarantee_destination: ChannelId,
}

/// One seat at a neighbouring ledger plus the guarantee expected on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    channel: ConsensusChannel,
    guarantee_info: GuaranteeInfo,
    expected: Guarantee,
}

impl Connection {
    pub fn new(channel: ConsensusChannel, guarantee_info: GuaranteeInfo) -> Result<Self, ConstructionError> {
        let amount = guarantee_info
            .left_amount
            .checked_add(guarantee_info.right_amount)
            .ok_or(ConstructionError::AmountOverflow)?;
        let expected = Guarantee {
            amount,
            target: guarantee_info.guarantee_destination,
            left: guarantee_info.left,
            right: guarantee_info.right,
        };
        Ok(Connection { channel, guarantee_info, expected })
    }

    pub fn ledger_id(&self) -> ChannelId {
        self.channel.id()
    }

    pub fn channel(&self) -> &ConsensusChannel {
        &self.channel
    }

    pub(crate) fn channel_mut(&mut self) -> &mut ConsensusChannel {
        &mut self.channel
    }

    pub fn guarantee_info(&self) -> &GuaranteeInfo {
        &self.guarantee_info
    }

    /// The guarantee this connection wants on its ledger.
    pub fn expected_guarantee(&self) -> Guarantee {
        self.expected
    }

    /// True once the ledger's consensus outcome includes the expected guarantee.
    pub fn is_funding_target(&self) -> bool {
        self.channel.includes_guarantee(&self.expected)
    }

    /// True once no guarantee for the target remains on the ledger.
    pub fn is_defunded(&self) -> bool {
        !self.channel.has_guarantee_for(self.guarantee_info.guarantee_destination)
    }

    /// The removal reclaiming this connection's guarantee, paying `left_amount`
    /// back to the left side.
    pub fn remove_for(&self, left_amount: Amount) -> ProposalChange {
        ProposalChange::RemoveGuarantee { target: self.guarantee_info.guarantee_destination, left_amount }
    }
}

/// Hands a proposal to the connection holding its ledger: followers receive it
/// as a proposal, leaders as an ack. A proposal for a ledger no connection
/// holds is an error.
pub(crate) fn route_proposal<'a>(
    connections: impl Iterator<Item = &'a mut Connection>,
    proposal: &SignedProposal,
) -> Result<(), ObjectiveError> {
    for connection in connections {
        if connection.ledger_id() != proposal.ledger_id() {
            continue;
        }
        let ledger = connection.channel_mut();
        if ledger.is_follower() {
            ledger.receive_proposal(proposal.clone())?;
        } else {
            ledger.receive_ack(proposal.clone())?;
        }
        return Ok(());
    }
    Err(ObjectiveError::UnknownLedger(proposal.ledger_id()))
}
