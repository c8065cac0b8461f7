use crate::channel::state::State;
use crate::channel::{ChainEvent, Channel};
use crate::consensus::ConsensusChannel;
use crate::crypto::SecretKey;
use crate::protocols::envelope::{DirectFundRecord, ObjectiveEnvelope, ObjectiveRecord, ENVELOPE_VERSION};
use crate::protocols::error::{ConstructionError, ObjectiveError};
use crate::protocols::events::ObjectiveEvent;
use crate::protocols::side_effects::{ChainTransaction, MessagePayload, SideEffects};
use crate::protocols::{ObjectiveId, ObjectiveKind, ObjectiveStatus, Storable, WaitingFor};
use crate::types::{Address, Destination, Funds};
use log::info;

/// Funds a two-party ledger channel on chain: exchange the prefund state,
/// deposit in participant order, exchange the postfund state.
///
/// The deposit thresholds are fixed at construction. A participant deposits
/// only once everything allocated ahead of it is already on chain, so no
/// deposit is ever at the counterparty's mercy, and deposits only the amount
/// its target still lacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectFund {
    status: ObjectiveStatus,
    channel: Channel,
    fully_funded_threshold: Funds,
    my_deposit_safety_threshold: Funds,
    my_deposit_target: Funds,
    deposit_submitted: bool,
}

impl DirectFund {
    pub fn new(pre_fund: State, my_address: Address) -> Result<Self, ConstructionError> {
        let count = pre_fund.fixed.participants.len();
        if count != 2 {
            return Err(ConstructionError::WrongParticipantCount { expected: 2, got: count });
        }
        let my_index = pre_fund
            .fixed
            .participant_index(&my_address)
            .ok_or(ConstructionError::MissingParticipant(my_address))?;
        let me = Destination::from(my_address);
        let outcome = pre_fund.outcome();
        let fully_funded_threshold = outcome.total().ok_or(ConstructionError::AmountOverflow)?;
        let my_deposit_safety_threshold =
            outcome.deposit_safety_threshold(&me).ok_or(ConstructionError::AmountOverflow)?;
        let my_allocation = outcome.total_for(&me).ok_or(ConstructionError::AmountOverflow)?;
        // My target is everything ahead of me plus my own allocation
        let my_deposit_target = my_deposit_safety_threshold
            .checked_add(&my_allocation)
            .ok_or(ConstructionError::AmountOverflow)?;
        let channel = Channel::new(pre_fund, my_index)?;
        Ok(DirectFund {
            status: ObjectiveStatus::Unapproved,
            channel,
            fully_funded_threshold,
            my_deposit_safety_threshold,
            my_deposit_target,
            deposit_submitted: false,
        })
    }

    pub fn id(&self) -> ObjectiveId {
        ObjectiveId { kind: ObjectiveKind::DirectFund, channel: self.channel.id() }
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
            return Err(ObjectiveError::ProtocolViolation("direct funding exchanges no ledger proposals".into()));
        }
        let mut updated = self.clone();
        for signed in &event.signed_states {
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

    pub fn crank(&self, key: &SecretKey) -> Result<(Self, SideEffects, WaitingFor), ObjectiveError> {
        if self.status != ObjectiveStatus::Approved {
            return Err(ObjectiveError::NotApproved(self.id()));
        }
        let mut updated = self.clone();
        let mut effects = SideEffects::new();
        let id = updated.id();

        if !updated.channel.pre_fund_signed_by_me() {
            let signed = updated.channel.sign_pre_fund(key)?;
            effects.broadcast(
                id,
                updated.channel.participants(),
                updated.channel.my_index(),
                MessagePayload::SignedState(signed),
            );
        }
        if !updated.channel.pre_fund_complete() {
            return Ok((updated, effects, WaitingFor::CompletePrefund));
        }

        if !updated.channel.holdings().gte(&updated.fully_funded_threshold) {
            if !updated.channel.holdings().gte(&updated.my_deposit_safety_threshold) {
                return Ok((updated, effects, WaitingFor::MyTurnToFund));
            }
            if !updated.deposit_submitted {
                let still_owed = updated.my_deposit_target.saturating_sub(updated.channel.holdings());
                if !still_owed.is_zero() {
                    info!("Objective {id}: depositing {still_owed:?} into channel {}", updated.channel.id());
                    effects.transaction(ChainTransaction::Deposit {
                        channel: updated.channel.id(),
                        deposit: still_owed,
                    });
                    updated.deposit_submitted = true;
                }
            }
            return Ok((updated, effects, WaitingFor::CompleteFunding));
        }

        if !updated.channel.post_fund_signed_by_me() {
            let signed = updated.channel.sign_post_fund(key)?;
            effects.broadcast(
                id,
                updated.channel.participants(),
                updated.channel.my_index(),
                MessagePayload::SignedState(signed),
            );
        }
        if !updated.channel.post_fund_complete() {
            return Ok((updated, effects, WaitingFor::CompletePostFund));
        }
        Ok((updated, effects, WaitingFor::Nothing))
    }

    /// The funded channel in consensus form, leader = participant 0. Only
    /// available once the postfund state carries every signature.
    pub fn create_consensus_channel(&self) -> Result<ConsensusChannel, ObjectiveError> {
        let signed = self
            .channel
            .signed_state(1)
            .filter(|s| s.has_all_signatures())
            .ok_or(ObjectiveError::FundingIncomplete(self.channel.id()))?;
        Ok(ConsensusChannel::from_post_fund(signed, self.channel.my_index(), self.channel.holdings().clone())?)
    }

    pub fn related(&self) -> Vec<Storable<'_>> {
        vec![Storable::Channel(&self.channel)]
    }

    pub fn to_envelope(&self) -> ObjectiveEnvelope {
        ObjectiveEnvelope {
            version: ENVELOPE_VERSION,
            id: self.id(),
            status: self.status,
            record: ObjectiveRecord::DirectFund(DirectFundRecord {
                channel: self.channel.id(),
                fully_funded_threshold: self.fully_funded_threshold.clone(),
                my_deposit_safety_threshold: self.my_deposit_safety_threshold.clone(),
                my_deposit_target: self.my_deposit_target.clone(),
                deposit_submitted: self.deposit_submitted,
            }),
        }
    }

    pub(crate) fn from_record(record: &DirectFundRecord, status: ObjectiveStatus, channel: Channel) -> Self {
        DirectFund {
            status,
            channel,
            fully_funded_threshold: record.fully_funded_threshold.clone(),
            my_deposit_safety_threshold: record.my_deposit_safety_threshold.clone(),
            my_deposit_target: record.my_deposit_target.clone(),
            deposit_submitted: record.deposit_submitted,
        }
    }
}
