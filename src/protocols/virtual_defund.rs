use crate::channel::outcome::{Allocation, Outcome};
use crate::channel::state::State;
use crate::channel::{ChainEvent, Channel};
use crate::consensus::proposals::ProposalChange;
use crate::consensus::ConsensusChannel;
use crate::crypto::SecretKey;
use crate::protocols::connection::{route_proposal, Connection};
use crate::protocols::envelope::{ObjectiveEnvelope, ObjectiveRecord, VirtualDefundRecord, ENVELOPE_VERSION};
use crate::protocols::error::{ConstructionError, HydrationError, ObjectiveError};
use crate::protocols::events::ObjectiveEvent;
use crate::protocols::side_effects::{MessagePayload, SideEffects};
use crate::protocols::virtual_fund::{build_connections, outcome_shape};
use crate::protocols::{ObjectiveId, ObjectiveKind, ObjectiveStatus, Storable, WaitingFor};
use crate::types::{Address, Amount, Destination};

/// Turn number of the closing state every participant signs.
pub const VIRTUAL_FINAL_TURN: u64 = 2;

/// Closes a virtual channel and reclaims the guarantees backing it.
///
/// Runs in two phases. First every participant signs a final state whose
/// outcome folds the amount paid over the channel's lifetime into the opening
/// balances. Once that state is fully signed, each adjacent pair removes the
/// guarantee from the ledger between them, splitting it the way the final
/// state says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDefund {
    status: ObjectiveStatus,
    v: Channel,
    asset: Address,
    a0: Amount,
    b0: Amount,
    paid: Amount,
    to_my_left: Option<Connection>,
    to_my_right: Option<Connection>,
}

/// Drives one connection towards removing its guarantee. Returns whether the
/// guarantee is off the ledger after this step.
fn crank_removal(
    connection: &mut Connection,
    objective_id: ObjectiveId,
    left_amount: Amount,
    key: &SecretKey,
    effects: &mut SideEffects,
) -> Result<bool, ObjectiveError> {
    if connection.is_defunded() {
        return Ok(true);
    }
    let target = connection.guarantee_info().guarantee_destination;
    let change = connection.remove_for(left_amount);
    let counterparty = connection.channel().counterparty();
    let ledger = connection.channel_mut();
    if ledger.is_leader() {
        if !ledger.has_outstanding_proposal() {
            let signed = ledger.propose(change, key)?;
            effects.message(counterparty, objective_id, MessagePayload::Proposal(signed));
        }
    } else if let Some(incoming) = ledger.inbox().cloned() {
        match incoming.proposal.change {
            ProposalChange::RemoveGuarantee { target: proposed_target, left_amount: proposed }
                if proposed_target == target =>
            {
                if proposed != left_amount {
                    return Err(ObjectiveError::ProtocolViolation(
                        "reclaim amounts do not match the final outcome".into(),
                    ));
                }
                let ack = ledger.countersign_pending(key)?;
                effects.message(counterparty, objective_id, MessagePayload::Proposal(ack));
            }
            ProposalChange::AddGuarantee { guarantee, .. } if guarantee.target == target => {
                return Err(ObjectiveError::ProtocolViolation(
                    "counterparty proposed funding a channel that is closing".into(),
                ));
            }
            // A proposal for some other channel sharing this ledger; not ours to act on
            _ => {}
        }
    }
    Ok(connection.is_defunded())
}

impl VirtualDefund {
    pub fn new(
        v: Channel,
        paid: Amount,
        left_ledger: Option<ConsensusChannel>,
        right_ledger: Option<ConsensusChannel>,
    ) -> Result<Self, ConstructionError> {
        let count = v.participants().len();
        if count < 3 {
            return Err(ConstructionError::TooFewParticipants(count));
        }
        let opening = v.pre_fund_state()?;
        let (asset, a0, b0) = outcome_shape(opening.outcome(), v.participants())?;
        if paid > a0 {
            return Err(ConstructionError::PaidExceedsDeposit { paid, deposit: a0 });
        }
        b0.checked_add(paid).ok_or(ConstructionError::AmountOverflow)?;
        let (to_my_left, to_my_right) = build_connections(&v, asset, a0, b0, left_ledger, right_ledger)?;
        Ok(VirtualDefund { status: ObjectiveStatus::Unapproved, v, asset, a0, b0, paid, to_my_left, to_my_right })
    }

    pub fn id(&self) -> ObjectiveId {
        ObjectiveId { kind: ObjectiveKind::VirtualDefund, channel: self.v.id() }
    }

    pub fn status(&self) -> ObjectiveStatus {
        self.status
    }

    pub fn channel(&self) -> &Channel {
        &self.v
    }

    pub fn paid(&self) -> Amount {
        self.paid
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

    /// The outcome of the closing state: the running balance folded into the
    /// opening deposits.
    fn final_outcome(&self) -> Outcome {
        let participants = self.v.participants();
        let first = self.a0.checked_sub(self.paid).expect("paid is bounded by a0 at construction");
        let last = self.b0.checked_add(self.paid).expect("the closing total fits in an Amount at construction");
        Outcome::single(
            self.asset,
            vec![
                Allocation::normal(Destination::from(participants[0]), first),
                Allocation::normal(Destination::from(participants[participants.len() - 1]), last),
            ],
        )
    }

    /// The closing state every participant must sign.
    pub fn final_state(&self) -> Result<State, ObjectiveError> {
        let mut state = self.v.pre_fund_state()?.clone();
        state.variable.turn_num = VIRTUAL_FINAL_TURN;
        state.variable.is_final = true;
        state.variable.outcome = self.final_outcome();
        Ok(state)
    }

    fn final_signed_by_me(&self) -> bool {
        self.v
            .signed_state(VIRTUAL_FINAL_TURN)
            .map_or(false, |signed| signed.has_signature_for(self.v.my_index()))
    }

    fn final_complete(&self) -> bool {
        self.v.signed_state(VIRTUAL_FINAL_TURN).map_or(false, |signed| signed.has_all_signatures())
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
        let expected = self.final_state()?;
        let mut updated = self.clone();
        for signed in &event.signed_states {
            if !signed.state().is_final() {
                return Err(ObjectiveError::NonFinalState);
            }
            if signed.state() != &expected {
                return Err(ObjectiveError::ProtocolViolation("final state does not match the agreed close".into()));
            }
            updated.v.add_signed_state(signed.clone())?;
        }
        for proposal in &event.signed_proposals {
            route_proposal(updated.to_my_left.iter_mut().chain(updated.to_my_right.iter_mut()), proposal)?;
        }
        Ok(updated)
    }

    /// Defunding a virtual channel never touches the chain.
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

        if !updated.final_signed_by_me() {
            let state = updated.final_state()?;
            let signed = updated.v.sign_state(state, key)?;
            effects.broadcast(id, updated.v.participants(), updated.v.my_index(), MessagePayload::SignedState(signed));
        }
        if !updated.final_complete() {
            return Ok((updated, effects, WaitingFor::CompleteFinal));
        }

        let left_amount = updated.a0.checked_sub(updated.paid).expect("paid is bounded by a0 at construction");
        let mut defunded = true;
        for connection in updated.to_my_left.iter_mut().chain(updated.to_my_right.iter_mut()) {
            defunded &= crank_removal(connection, id, left_amount, key, &mut effects)?;
        }
        if !defunded {
            return Ok((updated, effects, WaitingFor::LedgerDefunding));
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
            record: ObjectiveRecord::VirtualDefund(VirtualDefundRecord {
                channel: self.v.id(),
                my_role: self.v.my_index(),
                paid: self.paid,
                left_ledger: self.to_my_left.as_ref().map(|c| c.ledger_id()),
                right_ledger: self.to_my_right.as_ref().map(|c| c.ledger_id()),
            }),
        }
    }

    pub(crate) fn from_record(
        record: &VirtualDefundRecord,
        status: ObjectiveStatus,
        channel: Channel,
        left_ledger: Option<ConsensusChannel>,
        right_ledger: Option<ConsensusChannel>,
    ) -> Result<Self, HydrationError> {
        if record.my_role != channel.my_index() {
            return Err(HydrationError::RoleMismatch { recorded: record.my_role, actual: channel.my_index() });
        }
        let mut objective = VirtualDefund::new(channel, record.paid, left_ledger, right_ledger)?;
        objective.status = status;
        Ok(objective)
    }
}
