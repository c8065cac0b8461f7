pub mod outcome;
pub mod state;

use crate::channel::state::{SignedState, State, StateError};
use crate::crypto::SecretKey;
use crate::types::{Address, ChannelId, Funds};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("An opening state must have turn number 0, got {0}")]
    NonZeroTurnNum(u64),
    #[error("An opening state cannot be final")]
    FinalOpeningState,
    #[error("Participant index {index} is out of range for {count} participants")]
    BadParticipantIndex { index: usize, count: usize },
    #[error("The channel holds no states")]
    NoStates,
    #[error("The channel holds no opening state")]
    NoOpeningState,
    #[error("Expected a signature by {expected}, got one by {got}")]
    WrongSigner { expected: Address, got: Address },
    #[error(transparent)]
    State(#[from] StateError),
}

/// What this node has observed on chain for a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainData {
    pub holdings: Funds,
    pub last_block_seen: u64,
}

/// A holdings update for one channel, emitted by the chain service once per block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub channel: ChannelId,
    pub holdings: Funds,
    pub block_number: u64,
}

/// One participant's view of a channel: the fixed part, every signed state seen
/// so far keyed by turn number, and the on-chain holdings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    id: ChannelId,
    fixed: state::FixedPart,
    my_index: usize,
    on_chain: OnChainData,
    signed_states: BTreeMap<u64, SignedState>,
}

impl Channel {
    /// Opens a channel from its unsigned opening state.
    pub fn new(pre_fund: State, my_index: usize) -> Result<Self, ChannelError> {
        if pre_fund.turn_num() != 0 {
            return Err(ChannelError::NonZeroTurnNum(pre_fund.turn_num()));
        }
        if pre_fund.is_final() {
            return Err(ChannelError::FinalOpeningState);
        }
        Self::from_signed_state(SignedState::new(pre_fund), my_index)
    }

    /// Builds a channel view around an existing signed state, at any turn.
    pub fn from_signed_state(signed: SignedState, my_index: usize) -> Result<Self, ChannelError> {
        signed.state().fixed.validate()?;
        let count = signed.state().fixed.participants.len();
        if my_index >= count {
            return Err(ChannelError::BadParticipantIndex { index: my_index, count });
        }
        let id = signed.channel_id();
        let fixed = signed.state().fixed.clone();
        let mut signed_states = BTreeMap::new();
        signed_states.insert(signed.turn_num(), signed);
        Ok(Channel { id, fixed, my_index, on_chain: OnChainData::default(), signed_states })
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn fixed(&self) -> &state::FixedPart {
        &self.fixed
    }

    pub fn participants(&self) -> &[Address] {
        &self.fixed.participants
    }

    pub fn my_index(&self) -> usize {
        self.my_index
    }

    pub fn my_address(&self) -> Address {
        self.fixed.participants[self.my_index]
    }

    pub fn on_chain(&self) -> &OnChainData {
        &self.on_chain
    }

    pub fn holdings(&self) -> &Funds {
        &self.on_chain.holdings
    }

    pub fn set_holdings(&mut self, holdings: Funds) {
        self.on_chain.holdings = holdings;
    }

    pub fn pre_fund_state(&self) -> Result<&State, ChannelError> {
        self.signed_states.get(&0).map(|s| s.state()).ok_or(ChannelError::NoOpeningState)
    }

    /// The post fund state is the opening state at turn 1.
    pub fn post_fund_state(&self) -> Result<State, ChannelError> {
        let mut state = self.pre_fund_state()?.clone();
        state.variable.turn_num = 1;
        Ok(state)
    }

    /// Signs `state` with `key`, which must belong to this channel's own
    /// participant seat, records the signature and returns the full signed
    /// state as known so far.
    pub fn sign_state(&mut self, state: State, key: &SecretKey) -> Result<SignedState, ChannelError> {
        if state.channel_id() != self.id {
            return Err(StateError::ChannelMismatch { expected: self.id, got: state.channel_id() }.into());
        }
        let turn = state.turn_num();
        let mut signed = SignedState::new(state);
        let index = signed.sign(key)?;
        if index != self.my_index {
            return Err(ChannelError::WrongSigner { expected: self.my_address(), got: key.address() });
        }
        match self.signed_states.entry(turn) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().merge(&signed)?;
                Ok(entry.get().clone())
            }
            Entry::Vacant(entry) => Ok(entry.insert(signed).clone()),
        }
    }

    pub fn sign_pre_fund(&mut self, key: &SecretKey) -> Result<SignedState, ChannelError> {
        let state = self.pre_fund_state()?.clone();
        self.sign_state(state, key)
    }

    pub fn sign_post_fund(&mut self, key: &SecretKey) -> Result<SignedState, ChannelError> {
        let state = self.post_fund_state()?;
        self.sign_state(state, key)
    }

    /// Folds a signed state received from a peer into the channel. Every
    /// signature is re-verified before it is recorded.
    pub fn add_signed_state(&mut self, signed: SignedState) -> Result<(), ChannelError> {
        if signed.channel_id() != self.id {
            return Err(StateError::ChannelMismatch { expected: self.id, got: signed.channel_id() }.into());
        }
        match self.signed_states.entry(signed.turn_num()) {
            Entry::Occupied(mut entry) => entry.get_mut().merge(&signed)?,
            Entry::Vacant(entry) => {
                let fresh = entry.insert(SignedState::new(signed.state().clone()));
                fresh.merge(&signed)?;
            }
        }
        Ok(())
    }

    fn state_signed_by_me(&self, turn: u64) -> bool {
        self.signed_states.get(&turn).map(|s| s.has_signature_for(self.my_index)).unwrap_or(false)
    }

    fn state_complete(&self, turn: u64) -> bool {
        self.signed_states.get(&turn).map(|s| s.has_all_signatures()).unwrap_or(false)
    }

    pub fn pre_fund_signed_by_me(&self) -> bool {
        self.state_signed_by_me(0)
    }

    pub fn post_fund_signed_by_me(&self) -> bool {
        self.state_signed_by_me(1)
    }

    pub fn pre_fund_complete(&self) -> bool {
        self.state_complete(0)
    }

    pub fn post_fund_complete(&self) -> bool {
        self.state_complete(1)
    }

    pub fn signed_state(&self, turn: u64) -> Option<&SignedState> {
        self.signed_states.get(&turn)
    }

    pub fn latest_signed_state(&self) -> Option<&SignedState> {
        self.signed_states.values().next_back()
    }

    /// The highest-turn state carrying every participant's signature.
    pub fn latest_supported_state(&self) -> Option<&SignedState> {
        self.signed_states.values().rev().find(|s| s.has_all_signatures())
    }

    pub fn total_allocated(&self) -> Option<Funds> {
        self.latest_signed_state().and_then(|s| s.state().outcome().total())
    }

    /// Applies a chain event. The event carries the full on-chain snapshot,
    /// so it replaces the recorded holdings; an asset the event omits has
    /// nothing left on chain. Events are only applied in block order; an
    /// event at or before the last block seen is dropped.
    pub fn update_holdings(&mut self, event: &ChainEvent) {
        if event.block_number <= self.on_chain.last_block_seen {
            debug!(
                "Channel {}: dropping chain event for block {}, already at block {}",
                self.id, event.block_number, self.on_chain.last_block_seen
            );
            return;
        }
        self.on_chain.holdings = event.holdings.clone();
        self.on_chain.last_block_seen = event.block_number;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::outcome::{Allocation, Outcome};
    use crate::channel::state::{FixedPart, VariablePart};
    use crate::types::{Amount, Destination};

    fn key(tag: u8) -> SecretKey {
        SecretKey::from_bytes([tag; 32])
    }

    fn pre_fund() -> State {
        let fixed = FixedPart {
            chain_id: 1,
            participants: vec![key(1).address(), key(2).address()],
            channel_nonce: 11,
            app_definition: Address::default(),
            challenge_duration: 60,
        };
        let outcome = Outcome::single(
            Address::default(),
            vec![
                Allocation::normal(Destination::from(fixed.participants[0]), Amount::new(4)),
                Allocation::normal(Destination::from(fixed.participants[1]), Amount::new(6)),
            ],
        );
        State { fixed, variable: VariablePart { app_data: Vec::new(), outcome, turn_num: 0, is_final: false } }
    }

    #[test]
    fn rejects_bad_opening_states() {
        let mut turned = pre_fund();
        turned.variable.turn_num = 3;
        assert_eq!(Channel::new(turned, 0).unwrap_err(), ChannelError::NonZeroTurnNum(3));

        let mut finalized = pre_fund();
        finalized.variable.is_final = true;
        assert_eq!(Channel::new(finalized, 0).unwrap_err(), ChannelError::FinalOpeningState);

        assert_eq!(
            Channel::new(pre_fund(), 5).unwrap_err(),
            ChannelError::BadParticipantIndex { index: 5, count: 2 }
        );
    }

    #[test]
    fn pre_and_post_fund_exchange() {
        let mut alice = Channel::new(pre_fund(), 0).unwrap();
        let mut bob = Channel::new(pre_fund(), 1).unwrap();
        assert!(!alice.pre_fund_signed_by_me());

        // ====== Prefund ======
        let from_alice = alice.sign_pre_fund(&key(1)).unwrap();
        let from_bob = bob.sign_pre_fund(&key(2)).unwrap();
        assert!(alice.pre_fund_signed_by_me());
        assert!(!alice.pre_fund_complete());

        alice.add_signed_state(from_bob).unwrap();
        bob.add_signed_state(from_alice).unwrap();
        assert!(alice.pre_fund_complete());
        assert!(bob.pre_fund_complete());

        // ====== Postfund ======
        assert_eq!(alice.post_fund_state().unwrap().turn_num(), 1);
        let from_alice = alice.sign_post_fund(&key(1)).unwrap();
        bob.add_signed_state(from_alice).unwrap();
        let from_bob = bob.sign_post_fund(&key(2)).unwrap();
        // Bob's copy now carries both signatures
        assert!(from_bob.has_all_signatures());
        alice.add_signed_state(from_bob).unwrap();
        assert!(alice.post_fund_complete());
        assert!(bob.post_fund_complete());
    }

    #[test]
    fn sign_state_rejects_the_wrong_key() {
        let mut alice = Channel::new(pre_fund(), 0).unwrap();
        let err = alice.sign_pre_fund(&key(2)).unwrap_err();
        assert_eq!(err, ChannelError::WrongSigner { expected: key(1).address(), got: key(2).address() });
        assert!(!alice.pre_fund_signed_by_me());

        let stranger = alice.sign_pre_fund(&key(9)).unwrap_err();
        assert!(matches!(stranger, ChannelError::State(StateError::NotAParticipant(_))));
    }

    #[test]
    fn add_signed_state_rejects_foreign_channels() {
        let mut alice = Channel::new(pre_fund(), 0).unwrap();
        let mut foreign = pre_fund();
        foreign.fixed.channel_nonce += 1;
        let foreign = SignedState::new(foreign);
        assert!(matches!(
            alice.add_signed_state(foreign),
            Err(ChannelError::State(StateError::ChannelMismatch { .. }))
        ));
    }

    #[test]
    fn latest_supported_state_needs_every_signature() {
        let mut alice = Channel::new(pre_fund(), 0).unwrap();
        assert!(alice.latest_supported_state().is_none());

        let mut bob = Channel::new(pre_fund(), 1).unwrap();
        alice.add_signed_state(bob.sign_pre_fund(&key(2)).unwrap()).unwrap();
        alice.sign_pre_fund(&key(1)).unwrap();
        // Turn 1 is signed only by Alice, so turn 0 stays the supported state
        alice.sign_post_fund(&key(1)).unwrap();
        assert_eq!(alice.latest_signed_state().unwrap().turn_num(), 1);
        assert_eq!(alice.latest_supported_state().unwrap().turn_num(), 0);
    }

    #[test]
    fn chain_events_apply_in_block_order() {
        let mut alice = Channel::new(pre_fund(), 0).unwrap();
        let asset = Address::default();
        let mut holdings = Funds::new();
        holdings.set(asset, Amount::new(4));
        alice.update_holdings(&ChainEvent { channel: alice.id(), holdings: holdings.clone(), block_number: 2 });
        assert_eq!(alice.holdings().get(&asset), Amount::new(4));

        // A late event for an earlier block must not roll holdings back
        let mut stale = Funds::new();
        stale.set(asset, Amount::new(1));
        alice.update_holdings(&ChainEvent { channel: alice.id(), holdings: stale, block_number: 1 });
        assert_eq!(alice.holdings().get(&asset), Amount::new(4));
        assert_eq!(alice.on_chain().last_block_seen, 2);

        holdings.set(asset, Amount::new(10));
        alice.update_holdings(&ChainEvent { channel: alice.id(), holdings, block_number: 3 });
        assert_eq!(alice.holdings().get(&asset), Amount::new(10));
    }

    #[test]
    fn a_chain_event_replaces_the_holdings_snapshot() {
        let mut alice = Channel::new(pre_fund(), 0).unwrap();
        let asset = Address::default();
        let mut holdings = Funds::new();
        holdings.set(asset, Amount::new(10));
        alice.update_holdings(&ChainEvent { channel: alice.id(), holdings, block_number: 1 });
        assert_eq!(alice.holdings().get(&asset), Amount::new(10));

        // After a withdrawal the chain reports nothing for this channel at all
        alice.update_holdings(&ChainEvent { channel: alice.id(), holdings: Funds::new(), block_number: 2 });
        assert!(alice.holdings().is_zero());
        assert_eq!(alice.on_chain().last_block_seen, 2);
    }

    #[test]
    fn channel_serde_roundtrip() {
        let mut alice = Channel::new(pre_fund(), 0).unwrap();
        alice.sign_pre_fund(&key(1)).unwrap();
        let encoded = ron::to_string(&alice).unwrap();
        let decoded: Channel = ron::from_str(&encoded).unwrap();
        assert_eq!(decoded, alice);
    }
}
