use crate::channel::outcome::{AllocationType, Outcome};
use crate::channel::state::State;
use crate::channel::{ChainEvent, Channel};
use crate::consensus::proposals::ProposalChange;
use crate::consensus::ConsensusChannel;
use crate::crypto::SecretKey;
use crate::protocols::connection::{route_proposal, Connection, GuaranteeInfo};
use crate::protocols::envelope::{ObjectiveEnvelope, ObjectiveRecord, VirtualFundRecord, ENVELOPE_VERSION};
use crate::protocols::error::{ConstructionError, HydrationError, ObjectiveError};
use crate::protocols::events::ObjectiveEvent;
use crate::protocols::side_effects::{MessagePayload, SideEffects};
use crate::protocols::{ObjectiveId, ObjectiveKind, ObjectiveStatus, Storable, WaitingFor};
use crate::types::{Address, Amount, Destination};

/// Funds a virtual channel across a path of ledgers.
///
/// Participant 0 and participant n-1 are the end users; everyone in between
/// intermediates. No money moves on chain: each adjacent pair sets a guarantee
/// aside on the ledger between them, targeting the virtual channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualFund {
    status: ObjectiveStatus,
    v: Channel,
    asset: Address,
    a0: Amount,
    b0: Amount,
    to_my_left: Option<Connection>,
    to_my_right: Option<Connection>,
}

/// Checks the single-asset two-entry shape every virtual channel outcome has:
/// the first allocation pays the first participant, the second pays the last.
/// Returns (asset, a0, b0).
pub(crate) fn outcome_shape(
    outcome: &Outcome,
    participants: &[Address],
) -> Result<(Address, Amount, Amount), ConstructionError> {
    let asset_outcome = match outcome.assets() {
        [single] => single,
        _ => return Err(ConstructionError::BadOutcomeShape),
    };
    let first = Destination::from(participants[0]);
    let last = Destination::from(participants[participants.len() - 1]);
    match asset_outcome.allocations.as_slice() {
        [a, b]
            if a.allocation_type == AllocationType::Normal
                && b.allocation_type == AllocationType::Normal
                && a.destination == first
                && b.destination == last =>
        {
            Ok((asset_outcome.asset, a.amount, b.amount))
        }
        _ => Err(ConstructionError::BadOutcomeShape),
    }
}

/// Builds the neighbour connections for this seat of the virtual channel `v`.
/// Every seat except the first needs a ledger with its left neighbour, every
/// seat except the last one with its right neighbour. Each ledger must connect
/// this node to the right counterparty on the channel's asset.
pub(crate) fn build_connections(
    v: &Channel,
    asset: Address,
    a0: Amount,
    b0: Amount,
    left_ledger: Option<ConsensusChannel>,
    right_ledger: Option<ConsensusChannel>,
) -> Result<(Option<Connection>, Option<Connection>), ConstructionError> {
    let participants = v.participants();
    let me = v.my_index();

    let to_my_left = if me == 0 {
        None
    } else {
        let neighbour = participants[me - 1];
        let ledger = left_ledger.ok_or(ConstructionError::MissingLedger { counterparty: neighbour })?;
        // The left neighbour is closer to participant 0, so it takes the left side
        Some(connect(v, asset, a0, b0, ledger, neighbour, neighbour, v.my_address())?)
    };
    let to_my_right = if me == participants.len() - 1 {
        None
    } else {
        let neighbour = participants[me + 1];
        let ledger = right_ledger.ok_or(ConstructionError::MissingLedger { counterparty: neighbour })?;
        Some(connect(v, asset, a0, b0, ledger, neighbour, v.my_address(), neighbour)?)
    };
    Ok((to_my_left, to_my_right))
}

fn connect(
    v: &Channel,
    asset: Address,
    a0: Amount,
    b0: Amount,
    ledger: ConsensusChannel,
    neighbour: Address,
    left: Address,
    right: Address,
) -> Result<Connection, ConstructionError> {
    if ledger.my_address() != v.my_address() || ledger.counterparty() != neighbour {
        return Err(ConstructionError::LedgerMismatch { ledger: ledger.id(), counterparty: neighbour });
    }
    if ledger.asset() != asset {
        return Err(ConstructionError::AssetMismatch { expected: asset, got: ledger.asset() });
    }
    let guarantee_info = GuaranteeInfo {
        left: Destination::from(left),
        right: Destination::from(right),
        left_amount: a0,
        right_amount: b0,
        guarantee_destination: v.id(),
    };
    Connection::new(ledger, guarantee_info)
}

/// Drives one connection towards including its guarantee. Returns whether the
/// guarantee is on the ledger after this step.
pub(crate) fn crank_guarantee(
    connection: &mut Connection,
    objective_id: ObjectiveId,
    key: &SecretKey,
    effects: &mut SideEffects,
) -> Result<bool, ObjectiveError> {
    if connection.is_funding_target() {
        return Ok(true);
    }
    let expected = connection.expected_guarantee();
    let left_deposit = connection.guarantee_info().left_amount;
    let counterparty = connection.channel().counterparty();
    let ledger = connection.channel_mut();
    if ledger.is_leader() {
        if !ledger.has_outstanding_proposal() {
            let signed = ledger.propose(ProposalChange::AddGuarantee { guarantee: expected, left_deposit }, key)?;
            effects.message(counterparty, objective_id, MessagePayload::Proposal(signed));
        }
    } else if let Some(incoming) = ledger.inbox().cloned() {
        match incoming.proposal.change {
            ProposalChange::AddGuarantee { guarantee, left_deposit: proposed_deposit }
                if guarantee.target == expected.target =>
            {
                if guarantee != expected || proposed_deposit != left_deposit {
                    return Err(ObjectiveError::ProtocolViolation(
                        "proposed guarantee does not match the agreed funding".into(),
                    ));
                }
                let ack = ledger.countersign_pending(key)?;
                effects.message(counterparty, objective_id, MessagePayload::Proposal(ack));
            }
            ProposalChange::RemoveGuarantee { target, .. } if target == expected.target => {
                return Err(ObjectiveError::ProtocolViolation(
                    "counterparty proposed defunding a channel that is still funding".into(),
                ));
            }
            // A proposal for some other channel sharing this ledger; not ours to act on
            _ => {}
        }
    }
    Ok(connection.is_funding_target())
}

impl VirtualFund {
    pub fn new(
        pre_fund: State,
        my_address: Address,
        left_ledger: Option<ConsensusChannel>,
        right_ledger: Option<ConsensusChannel>,
    ) -> Result<Self, ConstructionError> {
        let count = pre_fund.fixed.participants.len();
        if count < 3 {
            return Err(ConstructionError::TooFewParticipants(count));
        }
        let my_index = pre_fund
            .fixed
            .participant_index(&my_address)
            .ok_or(ConstructionError::MissingParticipant(my_address))?;
        let (asset, a0, b0) = outcome_shape(pre_fund.outcome(), &pre_fund.fixed.participants)?;
        a0.checked_add(b0).ok_or(ConstructionError::AmountOverflow)?;
        let v = Channel::new(pre_fund, my_index)?;
        let (to_my_left, to_my_right) = build_connections(&v, asset, a0, b0, left_ledger, right_ledger)?;
        Ok(VirtualFund { status: ObjectiveStatus::Unapproved, v, asset, a0, b0, to_my_left, to_my_right })
    }

    pub fn id(&self) -> ObjectiveId {
        ObjectiveId { kind: ObjectiveKind::VirtualFund, channel: self.v.id() }
    }

    pub fn status(&self) -> ObjectiveStatus {
        self.status
    }

    pub fn channel(&self) -> &Channel {
        &self.v
    }

    pub fn to_my_left(&self) -> Option<&Connection> {
        self.to_my_left.as_ref()
    }

    pub fn to_my_right(&self) -> Option<&Connection> {
        self.to_my_right.as_ref()
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.to_my_left.iter().chain(self.to_my_right.iter())
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
        let mut updated = self.clone();
        for signed in &event.signed_states {
            updated.v.add_signed_state(signed.clone())?;
        }
        for proposal in &event.signed_proposals {
            route_proposal(updated.to_my_left.iter_mut().chain(updated.to_my_right.iter_mut()), proposal)?;
        }
        Ok(updated)
    }

    /// Virtual channels are funded by guarantees, never on chain.
    pub fn update_with_chain_event(&self, _event: &ChainEvent) -> Result<Self, ObjectiveError> {
        Err(ObjectiveError::ChainEventUnsupported(self.id()))
    }

    pub fn crank(&self, key: &SecretKey) -> Result<(Self, SideEffects, WaitingFor), ObjectiveError> {
        if self.status != ObjectiveStatus::Approved {
            return Err(ObjectiveError::NotApproved(self.id()));
        }
        let mut updated = self.clone();
        let mut effects = SideEffects::new();
        let id = updated.id();

        if !updated.v.pre_fund_signed_by_me() {
            let signed = updated.v.sign_pre_fund(key)?;
            effects.broadcast(id, updated.v.participants(), updated.v.my_index(), MessagePayload::SignedState(signed));
        }
        if !updated.v.pre_fund_complete() {
            return Ok((updated, effects, WaitingFor::CompletePrefund));
        }

        let mut funded = true;
        for connection in updated.to_my_left.iter_mut().chain(updated.to_my_right.iter_mut()) {
            funded &= crank_guarantee(connection, id, key, &mut effects)?;
        }
        if !funded {
            return Ok((updated, effects, WaitingFor::CompleteFunding));
        }

        if !updated.v.post_fund_signed_by_me() {
            let signed = updated.v.sign_post_fund(key)?;
            effects.broadcast(id, updated.v.participants(), updated.v.my_index(), MessagePayload::SignedState(signed));
        }
        if !updated.v.post_fund_complete() {
            return Ok((updated, effects, WaitingFor::CompletePostFund));
        }
        Ok((updated, effects, WaitingFor::Nothing))
    }

    pub fn related(&self) -> Vec<Storable<'_>> {
        let mut related = vec![Storable::Channel(&self.v)];
        for connection in self.connections() {
            related.push(Storable::ConsensusChannel(connection.channel()));
        }
        related
    }

    pub fn to_envelope(&self) -> ObjectiveEnvelope {
        ObjectiveEnvelope {
            version: ENVELOPE_VERSION,
            id: self.id(),
            status: self.status,
            record: ObjectiveRecord::VirtualFund(VirtualFundRecord {
                channel: self.v.id(),
                my_role: self.v.my_index(),
                left_ledger: self.to_my_left.as_ref().map(|c| c.ledger_id()),
                right_ledger: self.to_my_right.as_ref().map(|c| c.ledger_id()),
            }),
        }
    }

    pub(crate) fn from_record(
        record: &VirtualFundRecord,
        status: ObjectiveStatus,
        channel: Channel,
        left_ledger: Option<ConsensusChannel>,
        right_ledger: Option<ConsensusChannel>,
    ) -> Result<Self, HydrationError> {
        if record.my_role != channel.my_index() {
            return Err(HydrationError::RoleMismatch { recorded: record.my_role, actual: channel.my_index() });
        }
        let opening = channel.pre_fund_state().map_err(ConstructionError::from)?;
        let (asset, a0, b0) = outcome_shape(opening.outcome(), channel.participants())?;
        let (to_my_left, to_my_right) = build_connections(&channel, asset, a0, b0, left_ledger, right_ledger)?;
        Ok(VirtualFund { status, v: channel, asset, a0, b0, to_my_left, to_my_right })
    }
}
