use crate::channel::{ChainEvent, Channel, ChannelError};
use crate::consensus::ConsensusChannel;
use crate::crypto::SecretKey;
use crate::protocols::envelope::{DirectDefundRecord, ObjectiveEnvelope, ObjectiveRecord, ENVELOPE_VERSION};
use crate::protocols::error::{ConstructionError, ObjectiveError};
use crate::protocols::events::ObjectiveEvent;
use crate::protocols::side_effects::{ChainTransaction, MessagePayload, SideEffects};
use crate::protocols::{ObjectiveId, ObjectiveKind, ObjectiveStatus, Storable, WaitingFor};
use log::info;

/// Closes a directly funded channel: agree a final state, withdraw on chain,
/// wait for the holdings to drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectDefund {
    status: ObjectiveStatus,
    channel: Channel,
    withdraw_submitted: bool,
}

impl DirectDefund {
    /// A channel can only start closing from a settled point: its latest state
    /// must be final or fully signed.
    pub fn new(channel: Channel) -> Result<Self, ConstructionError> {
        let count = channel.participants().len();
        if count != 2 {
            return Err(ConstructionError::WrongParticipantCount { expected: 2, got: count });
        }
        let latest = channel.latest_signed_state().ok_or(ChannelError::NoStates)?;
        if !latest.state().is_final() && !latest.has_all_signatures() {
            return Err(ConstructionError::ChannelUpdateInProgress);
        }
        Ok(DirectDefund { status: ObjectiveStatus::Unapproved, channel, withdraw_submitted: false })
    }

    /// Closes a ledger that lives in consensus form. Refused while a proposal
    /// is in flight.
    pub fn from_consensus(ledger: &ConsensusChannel) -> Result<Self, ConstructionError> {
        if ledger.has_outstanding_proposal() {
            return Err(ConstructionError::ChannelUpdateInProgress);
        }
        Self::new(ledger.as_channel()?)
    }

    pub fn id(&self) -> ObjectiveId {
        ObjectiveId { kind: ObjectiveKind::DirectDefund, channel: self.channel.id() }
    }

    pub fn status(&self) -> ObjectiveStatus {
        self.status
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn approve(&self) -> Self {
        let mut approved = self.clone();
        approved.status = ObjectiveStatus::Approved;
        approved
    }

    pub fn reject(&self) -> Self {
        let mut rejected = self.clone();
        rejected.status = ObjectiveStatus::Rejected;
        rejected
    }

    pub fn update(&self, event: &ObjectiveEvent) -> Result<Self, ObjectiveError> {
        if event.objective_id != self.id() {
            return Err(ObjectiveError::WrongObjective { expected: self.id(), got: event.objective_id });
        }
        if !event.signed_proposals.is_empty() {
            return Err(ObjectiveError::ProtocolViolation("defunding exchanges no ledger proposals".into()));
        }
        let mut updated = self.clone();
        for signed in &event.signed_states {
            if !signed.state().is_final() {
                return Err(ObjectiveError::NonFinalState);
            }
            updated.channel.add_signed_state(signed.clone())?;
        }
        Ok(updated)
    }

    pub fn update_with_chain_event(&self, event: &ChainEvent) -> Result<Self, ObjectiveError> {
        if event.channel != self.channel.id() {
            return Err(ObjectiveError::WrongChannel { expected: self.channel.id(), got: event.channel });
        }
        let mut updated = self.clone();
        updated.channel.update_holdings(event);
        Ok(updated)
    }

    fn finalized(&self) -> bool {
        self.channel.latest_supported_state().map(|s| s.state().is_final()).unwrap_or(false)
    }

    pub fn crank(&self, key: &SecretKey) -> Result<(Self, SideEffects, WaitingFor), ObjectiveError> {
        if self.status != ObjectiveStatus::Approved {
            return Err(ObjectiveError::NotApproved(self.id()));
        }
        let mut updated = self.clone();
        let mut effects = SideEffects::new();
        let id = updated.id();

        let latest = updated.channel.latest_signed_state().cloned().ok_or(ChannelError::NoStates)?;
        if !latest.state().is_final() {
            // Finalize by bumping the turn on the latest agreed state
            let mut final_state = latest.state().clone();
            final_state.variable.turn_num += 1;
            final_state.variable.is_final = true;
            let signed = updated.channel.sign_state(final_state, key)?;
            effects.broadcast(
                id,
                updated.channel.participants(),
                updated.channel.my_index(),
                MessagePayload::SignedState(signed),
            );
        } else if !latest.has_signature_for(updated.channel.my_index()) {
            let signed = updated.channel.sign_state(latest.state().clone(), key)?;
            effects.broadcast(
                id,
                updated.channel.participants(),
                updated.channel.my_index(),
                MessagePayload::SignedState(signed),
            );
        }
        if !updated.finalized() {
            return Ok((updated, effects, WaitingFor::Finalization));
        }

        // Participant 0 submits the withdrawal for everyone
        if updated.channel.my_index() == 0 && !updated.withdraw_submitted {
            info!("Objective {id}: withdrawing channel {}", updated.channel.id());
            effects.transaction(ChainTransaction::WithdrawAll { channel: updated.channel.id() });
            updated.withdraw_submitted = true;
        }
        if !updated.channel.holdings().is_zero() {
            return Ok((updated, effects, WaitingFor::Withdraw));
        }
        Ok((updated, effects, WaitingFor::Nothing))
    }

    pub fn related(&self) -> Vec<Storable<'_>> {
        vec![Storable::Channel(&self.channel)]
    }

    pub fn to_envelope(&self) -> ObjectiveEnvelope {
        ObjectiveEnvelope {
            version: ENVELOPE_VERSION,
            id: self.id(),
            status: self.status,
            record: ObjectiveRecord::DirectDefund(DirectDefundRecord {
                channel: self.channel.id(),
                withdraw_submitted: self.withdraw_submitted,
            }),
        }
    }

    pub(crate) fn from_record(record: &DirectDefundRecord, status: ObjectiveStatus, channel: Channel) -> Self {
        DirectDefund { status, channel, withdraw_submitted: record.withdraw_submitted }
    }
}
