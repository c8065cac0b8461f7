//! Consensus ledger channels.
//!
//! A ledger channel runs a one-proposal-at-a-time update protocol between its
//! two participants. Participant 0 leads: only the leader proposes changes, the
//! follower countersigns them in turn order, and every adopted outcome carries
//! both signatures. Guarantees funding virtual channels are added and removed
//! through these proposals.

pub mod proposals;

use crate::channel::outcome::{Allocation, AllocationType, GuaranteeMetadata, Outcome};
use crate::channel::state::{FixedPart, SignedState, State, VariablePart};
use crate::channel::{Channel, ChannelError};
use crate::consensus::proposals::{Proposal, ProposalChange, SignedProposal};
use crate::crypto::{CryptoError, SecretKey, StateSignature};
use crate::types::{Address, Amount, ChannelId, Destination, Funds};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("Only the leader may propose changes")]
    NotLeader,
    #[error("Only the follower may countersign changes")]
    NotFollower,
    #[error("A proposal is already outstanding")]
    ProposalPending,
    #[error("No proposal is pending")]
    NoPendingProposal,
    #[error("Proposal is for ledger {got}, expected {expected}")]
    WrongLedger { expected: ChannelId, got: ChannelId },
    #[error("Proposal for turn {got} is stale, consensus is at turn {current}")]
    StaleProposal { current: u64, got: u64 },
    #[error("Proposal for turn {got} skips ahead, consensus is at turn {current}")]
    TurnGap { current: u64, got: u64 },
    #[error("A guarantee for {0} already exists")]
    DuplicateGuarantee(ChannelId),
    #[error("No guarantee for {0} exists")]
    UnknownGuarantee(ChannelId),
    #[error("A guarantee's left and right destinations must differ")]
    DegenerateGuarantee,
    #[error("Left deposit {deposit} exceeds the guarantee amount {amount}")]
    DepositExceedsGuarantee { deposit: Amount, amount: Amount },
    #[error("{destination} has {available} available but the change needs {required}")]
    InsufficientFunds { destination: Destination, available: Amount, required: Amount },
    #[error("Reclaiming {amount} exceeds the guarantee amount {expected}")]
    ReclaimExceedsGuarantee { amount: Amount, expected: Amount },
    #[error("The ledger holds no balance for {0}")]
    NoBalanceFor(Destination),
    #[error("Ack does not match the pending proposal")]
    AckMismatch,
    #[error("Expected a signature by {expected}, got one by {got}")]
    WrongSigner { expected: Address, got: Address },
    #[error("The signing key does not belong to this ledger seat")]
    WrongKey,
    #[error("A ledger channel has exactly two participants, got {0}")]
    NotTwoParty(usize),
    #[error("Participant index {0} is out of range for a ledger channel")]
    BadIndex(usize),
    #[error("Ledger consensus starts from the post fund state at turn {expected}, got turn {got}")]
    NotPostFund { expected: u64, got: u64 },
    #[error("A ledger outcome holds one asset with one balance per participant, in participant order")]
    BadOutcomeShape,
    #[error("The post fund state is missing participant {0}'s signature")]
    MissingSignature(usize),
    #[error("Amount arithmetic overflowed")]
    Overflow,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerRole {
    Leader,
    Follower,
}

impl LedgerRole {
    pub fn index(self) -> usize {
        match self {
            LedgerRole::Leader => 0,
            LedgerRole::Follower => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub destination: Destination,
    pub amount: Amount,
}

/// Funds set aside on a ledger for a virtual channel. When the guarantee is
/// reclaimed the target's final balances flow back to `left` and `right`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guarantee {
    pub amount: Amount,
    pub target: ChannelId,
    pub left: Destination,
    pub right: Destination,
}

impl Guarantee {
    pub fn as_allocation(&self) -> Allocation {
        Allocation::guarantee(
            Destination::from(self.target),
            self.amount,
            GuaranteeMetadata { left: self.left, right: self.right },
        )
    }
}

/// A ledger outcome: one balance per participant plus the guarantees currently
/// funding virtual channels, all in a single asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerOutcome {
    asset: Address,
    leader: Balance,
    follower: Balance,
    guarantees: BTreeMap<ChannelId, Guarantee>,
}

impl LedgerOutcome {
    pub fn new(asset: Address, leader: Balance, follower: Balance) -> Self {
        LedgerOutcome { asset, leader, follower, guarantees: BTreeMap::new() }
    }

    pub fn asset(&self) -> Address {
        self.asset
    }

    pub fn leader_balance(&self) -> Balance {
        self.leader
    }

    pub fn follower_balance(&self) -> Balance {
        self.follower
    }

    pub fn includes_guarantee(&self, guarantee: &Guarantee) -> bool {
        self.guarantees.get(&guarantee.target) == Some(guarantee)
    }

    pub fn has_guarantee_for(&self, target: ChannelId) -> bool {
        self.guarantees.contains_key(&target)
    }

    pub fn guarantees(&self) -> impl Iterator<Item = &Guarantee> {
        self.guarantees.values()
    }

    fn balance(&self, destination: &Destination) -> Option<Balance> {
        if self.leader.destination == *destination {
            Some(self.leader)
        } else if self.follower.destination == *destination {
            Some(self.follower)
        } else {
            None
        }
    }

    fn set_balance(&mut self, balance: Balance) {
        if self.leader.destination == balance.destination {
            self.leader = balance;
        } else if self.follower.destination == balance.destination {
            self.follower = balance;
        }
    }

    /// Sets a guarantee aside: `left_deposit` comes out of the left balance and
    /// the rest out of the right balance. Both debits are checked before either
    /// balance moves.
    fn add_guarantee(&mut self, guarantee: Guarantee, left_deposit: Amount) -> Result<(), ConsensusError> {
        if self.guarantees.contains_key(&guarantee.target) {
            return Err(ConsensusError::DuplicateGuarantee(guarantee.target));
        }
        if guarantee.left == guarantee.right {
            return Err(ConsensusError::DegenerateGuarantee);
        }
        let right_deposit = guarantee
            .amount
            .checked_sub(left_deposit)
            .ok_or(ConsensusError::DepositExceedsGuarantee { deposit: left_deposit, amount: guarantee.amount })?;
        let left = self.balance(&guarantee.left).ok_or(ConsensusError::NoBalanceFor(guarantee.left))?;
        let right = self.balance(&guarantee.right).ok_or(ConsensusError::NoBalanceFor(guarantee.right))?;
        let new_left = left.amount.checked_sub(left_deposit).ok_or(ConsensusError::InsufficientFunds {
            destination: left.destination,
            available: left.amount,
            required: left_deposit,
        })?;
        let new_right = right.amount.checked_sub(right_deposit).ok_or(ConsensusError::InsufficientFunds {
            destination: right.destination,
            available: right.amount,
            required: right_deposit,
        })?;
        self.set_balance(Balance { destination: guarantee.left, amount: new_left });
        self.set_balance(Balance { destination: guarantee.right, amount: new_right });
        self.guarantees.insert(guarantee.target, guarantee);
        Ok(())
    }

    /// Reclaims a guarantee: `left_amount` flows back to the left balance and
    /// the rest to the right balance.
    fn remove_guarantee(&mut self, target: ChannelId, left_amount: Amount) -> Result<(), ConsensusError> {
        let guarantee = *self.guarantees.get(&target).ok_or(ConsensusError::UnknownGuarantee(target))?;
        let right_amount = guarantee
            .amount
            .checked_sub(left_amount)
            .ok_or(ConsensusError::ReclaimExceedsGuarantee { amount: left_amount, expected: guarantee.amount })?;
        let left = self.balance(&guarantee.left).ok_or(ConsensusError::NoBalanceFor(guarantee.left))?;
        let right = self.balance(&guarantee.right).ok_or(ConsensusError::NoBalanceFor(guarantee.right))?;
        let new_left = left.amount.checked_add(left_amount).ok_or(ConsensusError::Overflow)?;
        let new_right = right.amount.checked_add(right_amount).ok_or(ConsensusError::Overflow)?;
        self.set_balance(Balance { destination: guarantee.left, amount: new_left });
        self.set_balance(Balance { destination: guarantee.right, amount: new_right });
        self.guarantees.remove(&target);
        Ok(())
    }

    pub fn as_outcome(&self) -> Outcome {
        let mut allocations = vec![
            Allocation::normal(self.leader.destination, self.leader.amount),
            Allocation::normal(self.follower.destination, self.follower.amount),
        ];
        for guarantee in self.guarantees.values() {
            allocations.push(guarantee.as_allocation());
        }
        Outcome::single(self.asset, allocations)
    }

    /// Everything the ledger holds: both balances plus every guarantee. Adds
    /// and removes leave this unchanged.
    pub fn total(&self) -> Option<Amount> {
        let mut total = self.leader.amount.checked_add(self.follower.amount)?;
        for guarantee in self.guarantees.values() {
            total = total.checked_add(guarantee.amount)?;
        }
        Some(total)
    }
}

/// The part of a ledger both parties sign over: the turn number and the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vars {
    pub turn_num: u64,
    pub outcome: LedgerOutcome,
}

impl Vars {
    pub fn apply(&mut self, change: &ProposalChange) -> Result<(), ConsensusError> {
        match change {
            ProposalChange::AddGuarantee { guarantee, left_deposit } => {
                self.outcome.add_guarantee(*guarantee, *left_deposit)?;
            }
            ProposalChange::RemoveGuarantee { target, left_amount } => {
                self.outcome.remove_guarantee(*target, *left_amount)?;
            }
        }
        self.turn_num += 1;
        Ok(())
    }

    pub fn as_state(&self, fixed: &FixedPart) -> State {
        State {
            fixed: fixed.clone(),
            variable: VariablePart {
                app_data: Vec::new(),
                outcome: self.outcome.as_outcome(),
                turn_num: self.turn_num,
                is_final: false,
            },
        }
    }
}

/// A fully countersigned ledger state, signatures in participant order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedVars {
    pub vars: Vars,
    pub signatures: [StateSignature; 2],
}

/// One party's seat at a consensus ledger channel.
///
/// `current` always holds the latest outcome both parties signed. At most one
/// proposal is in flight: the leader parks it in `pending` until the follower's
/// ack arrives, the follower parks an incoming proposal in `inbox` until it is
/// countersigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusChannel {
    id: ChannelId,
    fixed: FixedPart,
    my_role: LedgerRole,
    on_chain_funding: Funds,
    current: SignedVars,
    pending: Option<SignedProposal>,
    inbox: Option<SignedProposal>,
}

impl ConsensusChannel {
    /// Opens a consensus seat from a fully signed post fund state. The state
    /// must allocate one asset to the two participants in order, with no
    /// guarantees yet.
    pub fn from_post_fund(
        signed: &SignedState,
        my_index: usize,
        on_chain_funding: Funds,
    ) -> Result<Self, ConsensusError> {
        let state = signed.state();
        state.fixed.validate().map_err(ChannelError::from)?;
        let count = state.fixed.participants.len();
        if count != 2 {
            return Err(ConsensusError::NotTwoParty(count));
        }
        if my_index >= 2 {
            return Err(ConsensusError::BadIndex(my_index));
        }
        if signed.turn_num() != 1 {
            return Err(ConsensusError::NotPostFund { expected: 1, got: signed.turn_num() });
        }
        let asset_outcome = match state.outcome().assets() {
            [single] => single,
            _ => return Err(ConsensusError::BadOutcomeShape),
        };
        let (leader, follower) = match asset_outcome.allocations.as_slice() {
            [first, second]
                if first.allocation_type == AllocationType::Normal
                    && second.allocation_type == AllocationType::Normal
                    && first.destination == Destination::from(state.fixed.participants[0])
                    && second.destination == Destination::from(state.fixed.participants[1]) =>
            {
                (
                    Balance { destination: first.destination, amount: first.amount },
                    Balance { destination: second.destination, amount: second.amount },
                )
            }
            _ => return Err(ConsensusError::BadOutcomeShape),
        };
        let signatures = [
            signed.signature_for(0).ok_or(ConsensusError::MissingSignature(0))?.clone(),
            signed.signature_for(1).ok_or(ConsensusError::MissingSignature(1))?.clone(),
        ];
        let outcome = LedgerOutcome { asset: asset_outcome.asset, leader, follower, guarantees: BTreeMap::new() };
        let my_role = if my_index == 0 { LedgerRole::Leader } else { LedgerRole::Follower };
        Ok(ConsensusChannel {
            id: signed.channel_id(),
            fixed: state.fixed.clone(),
            my_role,
            on_chain_funding,
            current: SignedVars { vars: Vars { turn_num: signed.turn_num(), outcome }, signatures },
            pending: None,
            inbox: None,
        })
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn fixed(&self) -> &FixedPart {
        &self.fixed
    }

    pub fn my_role(&self) -> LedgerRole {
        self.my_role
    }

    pub fn is_leader(&self) -> bool {
        self.my_role == LedgerRole::Leader
    }

    pub fn is_follower(&self) -> bool {
        self.my_role == LedgerRole::Follower
    }

    pub fn leader(&self) -> Address {
        self.fixed.participants[0]
    }

    pub fn follower(&self) -> Address {
        self.fixed.participants[1]
    }

    pub fn my_index(&self) -> usize {
        self.my_role.index()
    }

    pub fn my_address(&self) -> Address {
        self.fixed.participants[self.my_index()]
    }

    pub fn counterparty(&self) -> Address {
        self.fixed.participants[1 - self.my_index()]
    }

    pub fn asset(&self) -> Address {
        self.current.vars.outcome.asset()
    }

    pub fn outcome(&self) -> &LedgerOutcome {
        &self.current.vars.outcome
    }

    pub fn consensus_turn_num(&self) -> u64 {
        self.current.vars.turn_num
    }

    pub fn leader_balance(&self) -> Balance {
        self.current.vars.outcome.leader_balance()
    }

    pub fn follower_balance(&self) -> Balance {
        self.current.vars.outcome.follower_balance()
    }

    pub fn includes_guarantee(&self, guarantee: &Guarantee) -> bool {
        self.current.vars.outcome.includes_guarantee(guarantee)
    }

    pub fn has_guarantee_for(&self, target: ChannelId) -> bool {
        self.current.vars.outcome.has_guarantee_for(target)
    }

    pub fn on_chain_funding(&self) -> &Funds {
        &self.on_chain_funding
    }

    pub fn has_outstanding_proposal(&self) -> bool {
        self.pending.is_some() || self.inbox.is_some()
    }

    /// The proposal waiting for this follower's countersignature, if any.
    pub fn inbox(&self) -> Option<&SignedProposal> {
        self.inbox.as_ref()
    }

    /// Leader only. Applies `change` to a copy of the current outcome, signs the
    /// result and parks it until the follower's ack arrives.
    pub fn propose(&mut self, change: ProposalChange, key: &SecretKey) -> Result<SignedProposal, ConsensusError> {
        if !self.is_leader() {
            return Err(ConsensusError::NotLeader);
        }
        if self.pending.is_some() {
            return Err(ConsensusError::ProposalPending);
        }
        if key.address() != self.my_address() {
            return Err(ConsensusError::WrongKey);
        }
        let mut vars = self.current.vars.clone();
        vars.apply(&change)?;
        let signature = vars.as_state(&self.fixed).sign(key);
        let signed = SignedProposal {
            proposal: Proposal { ledger_id: self.id, change },
            turn_num: vars.turn_num,
            signature,
        };
        debug!("Ledger {}: proposing turn {}: {:?}", self.id, signed.turn_num, change);
        self.pending = Some(signed.clone());
        Ok(signed)
    }

    /// Follower only. Validates an incoming proposal and parks it for
    /// countersigning. An identical resend of the parked proposal is dropped.
    pub fn receive_proposal(&mut self, signed: SignedProposal) -> Result<(), ConsensusError> {
        if !self.is_follower() {
            return Err(ConsensusError::NotFollower);
        }
        if signed.ledger_id() != self.id {
            return Err(ConsensusError::WrongLedger { expected: self.id, got: signed.ledger_id() });
        }
        if self.inbox.as_ref() == Some(&signed) {
            debug!("Ledger {}: dropping resend of proposal for turn {}", self.id, signed.turn_num);
            return Ok(());
        }
        if self.inbox.is_some() {
            return Err(ConsensusError::ProposalPending);
        }
        let current = self.current.vars.turn_num;
        if signed.turn_num <= current {
            return Err(ConsensusError::StaleProposal { current, got: signed.turn_num });
        }
        if signed.turn_num > current + 1 {
            return Err(ConsensusError::TurnGap { current, got: signed.turn_num });
        }
        let mut vars = self.current.vars.clone();
        vars.apply(&signed.proposal.change)?;
        let signer = signed.signature.recover(&vars.as_state(&self.fixed).hash())?;
        if signer != self.leader() {
            return Err(ConsensusError::WrongSigner { expected: self.leader(), got: signer });
        }
        debug!("Ledger {}: received proposal for turn {}: {:?}", self.id, signed.turn_num, signed.proposal.change);
        self.inbox = Some(signed);
        Ok(())
    }

    /// Follower only. Countersigns the parked proposal, adopts the new outcome
    /// and returns the ack to send back to the leader.
    pub fn countersign_pending(&mut self, key: &SecretKey) -> Result<SignedProposal, ConsensusError> {
        if !self.is_follower() {
            return Err(ConsensusError::NotFollower);
        }
        let incoming = self.inbox.clone().ok_or(ConsensusError::NoPendingProposal)?;
        if key.address() != self.my_address() {
            return Err(ConsensusError::WrongKey);
        }
        let mut vars = self.current.vars.clone();
        vars.apply(&incoming.proposal.change)?;
        let signature = vars.as_state(&self.fixed).sign(key);
        info!("Ledger {}: adopted turn {}: {:?}", self.id, vars.turn_num, incoming.proposal.change);
        self.current = SignedVars { vars, signatures: [incoming.signature.clone(), signature.clone()] };
        self.inbox = None;
        Ok(SignedProposal { proposal: incoming.proposal, turn_num: incoming.turn_num, signature })
    }

    /// Leader only. Verifies the follower's ack of the pending proposal and
    /// adopts the new outcome. Acks for already adopted turns are dropped.
    pub fn receive_ack(&mut self, ack: SignedProposal) -> Result<(), ConsensusError> {
        if !self.is_leader() {
            return Err(ConsensusError::NotLeader);
        }
        if ack.turn_num <= self.current.vars.turn_num {
            debug!(
                "Ledger {}: dropping ack for turn {}, consensus is at turn {}",
                self.id, ack.turn_num, self.current.vars.turn_num
            );
            return Ok(());
        }
        let pending = self.pending.clone().ok_or(ConsensusError::NoPendingProposal)?;
        if ack.proposal != pending.proposal || ack.turn_num != pending.turn_num {
            return Err(ConsensusError::AckMismatch);
        }
        let mut vars = self.current.vars.clone();
        vars.apply(&pending.proposal.change)?;
        let signer = ack.signature.recover(&vars.as_state(&self.fixed).hash())?;
        if signer != self.follower() {
            return Err(ConsensusError::WrongSigner { expected: self.follower(), got: signer });
        }
        info!("Ledger {}: adopted turn {}: {:?}", self.id, vars.turn_num, pending.proposal.change);
        self.current = SignedVars { vars, signatures: [pending.signature, ack.signature] };
        self.pending = None;
        Ok(())
    }

    /// The current consensus as a plain channel, for code that works on channels
    /// rather than ledgers. Carries both signatures and the on-chain funding.
    pub fn as_channel(&self) -> Result<Channel, ConsensusError> {
        let state = self.current.vars.as_state(&self.fixed);
        let mut signed = SignedState::new(state);
        for signature in &self.current.signatures {
            signed.add_signature(signature.clone()).map_err(ChannelError::from)?;
        }
        let mut channel = Channel::from_signed_state(signed, self.my_index())?;
        channel.set_holdings(self.on_chain_funding.clone());
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::outcome::Allocation;

    fn key(tag: u8) -> SecretKey {
        SecretKey::from_bytes([tag; 32])
    }

    fn post_fund(leader_amount: u128, follower_amount: u128) -> SignedState {
        let participants = vec![key(1).address(), key(2).address()];
        let fixed = FixedPart {
            chain_id: 1,
            participants: participants.clone(),
            channel_nonce: 3,
            app_definition: Address::default(),
            challenge_duration: 60,
        };
        let outcome = Outcome::single(
            Address::default(),
            vec![
                Allocation::normal(Destination::from(participants[0]), Amount::new(leader_amount)),
                Allocation::normal(Destination::from(participants[1]), Amount::new(follower_amount)),
            ],
        );
        let state = State {
            fixed,
            variable: VariablePart { app_data: Vec::new(), outcome, turn_num: 1, is_final: false },
        };
        let mut signed = SignedState::new(state);
        signed.sign(&key(1)).unwrap();
        signed.sign(&key(2)).unwrap();
        signed
    }

    fn seats() -> (ConsensusChannel, ConsensusChannel) {
        let signed = post_fund(10, 10);
        let leader = ConsensusChannel::from_post_fund(&signed, 0, Funds::new()).unwrap();
        let follower = ConsensusChannel::from_post_fund(&signed, 1, Funds::new()).unwrap();
        (leader, follower)
    }

    fn guarantee(target_tag: u8, amount: u128) -> Guarantee {
        Guarantee {
            amount: Amount::new(amount),
            target: ChannelId::new([target_tag; 32]),
            left: Destination::from(key(1).address()),
            right: Destination::from(key(2).address()),
        }
    }

    #[test]
    fn from_post_fund_checks_its_input() {
        let signed = post_fund(10, 10);
        assert!(matches!(
            ConsensusChannel::from_post_fund(&signed, 2, Funds::new()),
            Err(ConsensusError::BadIndex(2))
        ));

        let mut unsigned = SignedState::new(signed.state().clone());
        unsigned.sign(&key(1)).unwrap();
        assert!(matches!(
            ConsensusChannel::from_post_fund(&unsigned, 0, Funds::new()),
            Err(ConsensusError::MissingSignature(1))
        ));

        let mut pre_fund = signed.state().clone();
        pre_fund.variable.turn_num = 0;
        let mut pre_fund = SignedState::new(pre_fund);
        pre_fund.sign(&key(1)).unwrap();
        pre_fund.sign(&key(2)).unwrap();
        assert!(matches!(
            ConsensusChannel::from_post_fund(&pre_fund, 0, Funds::new()),
            Err(ConsensusError::NotPostFund { expected: 1, got: 0 })
        ));

        let mut reversed = signed.state().clone();
        reversed.variable.outcome = Outcome::single(
            Address::default(),
            vec![
                Allocation::normal(Destination::from(key(2).address()), Amount::new(10)),
                Allocation::normal(Destination::from(key(1).address()), Amount::new(10)),
            ],
        );
        let mut reversed = SignedState::new(reversed);
        reversed.sign(&key(1)).unwrap();
        reversed.sign(&key(2)).unwrap();
        assert!(matches!(
            ConsensusChannel::from_post_fund(&reversed, 0, Funds::new()),
            Err(ConsensusError::BadOutcomeShape)
        ));
    }

    #[test]
    fn add_and_remove_guarantee_roundtrip() {
        let (mut leader, mut follower) = seats();
        let g = guarantee(9, 6);

        // ====== Add ======
        let proposed = leader
            .propose(ProposalChange::AddGuarantee { guarantee: g, left_deposit: Amount::new(2) }, &key(1))
            .unwrap();
        assert!(leader.has_outstanding_proposal());
        follower.receive_proposal(proposed).unwrap();
        let ack = follower.countersign_pending(&key(2)).unwrap();
        assert!(follower.includes_guarantee(&g));
        assert_eq!(follower.leader_balance().amount, Amount::new(8));
        assert_eq!(follower.follower_balance().amount, Amount::new(6));
        assert_eq!(follower.consensus_turn_num(), 2);

        leader.receive_ack(ack).unwrap();
        assert!(!leader.has_outstanding_proposal());
        assert!(leader.includes_guarantee(&g));
        assert_eq!(leader.outcome().total().unwrap(), Amount::new(20));

        // ====== Remove ======
        let proposed = leader
            .propose(ProposalChange::RemoveGuarantee { target: g.target, left_amount: Amount::new(5) }, &key(1))
            .unwrap();
        follower.receive_proposal(proposed).unwrap();
        let ack = follower.countersign_pending(&key(2)).unwrap();
        leader.receive_ack(ack).unwrap();

        for seat in [&leader, &follower] {
            assert!(!seat.has_guarantee_for(g.target));
            assert_eq!(seat.leader_balance().amount, Amount::new(13));
            assert_eq!(seat.follower_balance().amount, Amount::new(7));
            assert_eq!(seat.consensus_turn_num(), 3);
            assert_eq!(seat.outcome().total().unwrap(), Amount::new(20));
        }
    }

    #[test]
    fn only_one_proposal_may_be_outstanding() {
        let (mut leader, _) = seats();
        leader
            .propose(ProposalChange::AddGuarantee { guarantee: guarantee(9, 2), left_deposit: Amount::new(1) }, &key(1))
            .unwrap();
        let err = leader
            .propose(ProposalChange::AddGuarantee { guarantee: guarantee(8, 2), left_deposit: Amount::new(1) }, &key(1))
            .unwrap_err();
        assert_eq!(err, ConsensusError::ProposalPending);
    }

    #[test]
    fn roles_are_enforced() {
        let (mut leader, mut follower) = seats();
        let change = ProposalChange::AddGuarantee { guarantee: guarantee(9, 2), left_deposit: Amount::new(1) };
        assert_eq!(follower.propose(change, &key(2)).unwrap_err(), ConsensusError::NotLeader);
        assert_eq!(leader.countersign_pending(&key(1)).unwrap_err(), ConsensusError::NotFollower);

        let proposed = leader.propose(change, &key(1)).unwrap();
        assert_eq!(leader.receive_proposal(proposed).unwrap_err(), ConsensusError::NotFollower);
        assert_eq!(leader.propose(change, &key(2)).unwrap_err(), ConsensusError::ProposalPending);
    }

    #[test]
    fn proposals_must_arrive_in_turn_order() {
        let (mut leader, mut follower) = seats();
        let change = ProposalChange::AddGuarantee { guarantee: guarantee(9, 2), left_deposit: Amount::new(1) };
        let proposed = leader.propose(change, &key(1)).unwrap();

        let mut skipped = proposed.clone();
        skipped.turn_num += 1;
        assert_eq!(
            follower.receive_proposal(skipped).unwrap_err(),
            ConsensusError::TurnGap { current: 1, got: 3 }
        );

        follower.receive_proposal(proposed.clone()).unwrap();
        // An identical resend is dropped without error
        follower.receive_proposal(proposed.clone()).unwrap();
        follower.countersign_pending(&key(2)).unwrap();

        // After adoption the same proposal is stale
        assert_eq!(
            follower.receive_proposal(proposed).unwrap_err(),
            ConsensusError::StaleProposal { current: 2, got: 2 }
        );
    }

    #[test]
    fn insufficient_funds_reject_the_change() {
        let (mut leader, _) = seats();
        let err = leader
            .propose(
                ProposalChange::AddGuarantee { guarantee: guarantee(9, 30), left_deposit: Amount::new(15) },
                &key(1),
            )
            .unwrap_err();
        assert_eq!(
            err,
            ConsensusError::InsufficientFunds {
                destination: Destination::from(key(1).address()),
                available: Amount::new(10),
                required: Amount::new(15),
            }
        );
        // A failed proposal leaves nothing outstanding
        assert!(!leader.has_outstanding_proposal());
    }

    #[test]
    fn left_deposit_cannot_exceed_the_guarantee() {
        let (mut leader, _) = seats();
        let err = leader
            .propose(
                ProposalChange::AddGuarantee { guarantee: guarantee(9, 4), left_deposit: Amount::new(5) },
                &key(1),
            )
            .unwrap_err();
        assert_eq!(
            err,
            ConsensusError::DepositExceedsGuarantee { deposit: Amount::new(5), amount: Amount::new(4) }
        );
    }

    #[test]
    fn acks_are_validated_against_the_pending_proposal() {
        let (mut leader, mut follower) = seats();
        let change = ProposalChange::AddGuarantee { guarantee: guarantee(9, 6), left_deposit: Amount::new(3) };
        let proposed = leader.propose(change, &key(1)).unwrap();
        follower.receive_proposal(proposed).unwrap();
        let ack = follower.countersign_pending(&key(2)).unwrap();

        let mut tampered = ack.clone();
        tampered.proposal.change =
            ProposalChange::RemoveGuarantee { target: guarantee(9, 6).target, left_amount: Amount::new(3) };
        assert_eq!(leader.receive_ack(tampered).unwrap_err(), ConsensusError::AckMismatch);

        leader.receive_ack(ack.clone()).unwrap();
        assert_eq!(leader.consensus_turn_num(), 2);
        // A redelivered ack is dropped
        leader.receive_ack(ack).unwrap();
        assert_eq!(leader.consensus_turn_num(), 2);
    }

    #[test]
    fn as_channel_carries_consensus_and_funding() {
        let signed = post_fund(10, 10);
        let mut funding = Funds::new();
        funding.set(Address::default(), Amount::new(20));
        let leader = ConsensusChannel::from_post_fund(&signed, 0, funding.clone()).unwrap();

        let channel = leader.as_channel().unwrap();
        assert_eq!(channel.id(), leader.id());
        assert_eq!(channel.my_index(), 0);
        assert_eq!(channel.holdings(), &funding);
        let supported = channel.latest_supported_state().unwrap();
        assert_eq!(supported.turn_num(), 1);
        assert!(supported.has_all_signatures());
    }
}
