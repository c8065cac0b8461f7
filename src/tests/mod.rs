//! Cross-module flows: several participants, message delivery in between,
//! driven from each seat the way a node driver would.


use crate::channel::outcome::{Allocation, Outcome};
use crate::channel::state::{FixedPart, SignedState, State, VariablePart};
use crate::consensus::ConsensusChannel;
use crate::crypto::SecretKey;
use crate::types::{Address, Amount, Destination, Funds};

pub fn key(tag: u8) -> SecretKey {
    SecretKey::from_bytes([tag; 32])
}

pub fn asset() -> Address {
    Address::default()
}

pub fn two_party_pre_fund(left: &SecretKey, right: &SecretKey, amounts: (u128, u128), nonce: u64) -> State {
    let participants = vec![left.address(), right.address()];
    let fixed = FixedPart {
        chain_id: 1,
        participants: participants.clone(),
        channel_nonce: nonce,
        app_definition: Address::default(),
        challenge_duration: 60,
    };
    let outcome = Outcome::single(
        asset(),
        vec![
            Allocation::normal(Destination::from(participants[0]), Amount::new(amounts.0)),
            Allocation::normal(Destination::from(participants[1]), Amount::new(amounts.1)),
        ],
    );
    State { fixed, variable: VariablePart { app_data: Vec::new(), outcome, turn_num: 0, is_final: false } }
}

/// A funded two-party ledger as seen from `my`'s seat: the post-fund state is
/// signed by both participants and the full deposit is on chain.
pub fn ledger_between(
    left: &SecretKey,
    right: &SecretKey,
    amounts: (u128, u128),
    nonce: u64,
    my: &SecretKey,
) -> ConsensusChannel {
    let mut post_fund = two_party_pre_fund(left, right, amounts, nonce);
    post_fund.variable.turn_num = 1;
    let mut signed = SignedState::new(post_fund);
    signed.sign(left).unwrap();
    signed.sign(right).unwrap();
    let my_index = if my.address() == left.address() { 0 } else { 1 };
    let funding = Funds::from_iter([(asset(), Amount::new(amounts.0 + amounts.1))]);
    ConsensusChannel::from_post_fund(&signed, my_index, funding).unwrap()
}

/// The opening state of a virtual channel from Alice (key 1) through Irene
/// (key 2) to Bob (key 3), with Alice putting in 6 and Bob 4.
pub fn virtual_pre_fund() -> State {
    let participants = vec![key(1).address(), key(2).address(), key(3).address()];
    let fixed = FixedPart {
        chain_id: 1,
        participants: participants.clone(),
        channel_nonce: 41,
        app_definition: Address::default(),
        challenge_duration: 60,
    };
    let outcome = Outcome::single(
        asset(),
        vec![
            Allocation::normal(Destination::from(participants[0]), Amount::new(6)),
            Allocation::normal(Destination::from(participants[2]), Amount::new(4)),
        ],
    );
    State { fixed, variable: VariablePart { app_data: Vec::new(), outcome, turn_num: 0, is_final: false } }
}
