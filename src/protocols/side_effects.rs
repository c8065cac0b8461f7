use crate::channel::state::SignedState;
use crate::consensus::proposals::SignedProposal;
use crate::protocols::ObjectiveId;
use crate::types::{Address, ChannelId, Funds};
use serde::{Deserialize, Serialize};

/// The protocol payloads peers exchange on behalf of an objective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessagePayload {
    SignedState(SignedState),
    Proposal(SignedProposal),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub to: Address,
    pub objective_id: ObjectiveId,
    pub payload: MessagePayload,
}

/// A request for the chain service. Objectives never touch the chain
/// themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainTransaction {
    Deposit { channel: ChannelId, deposit: Funds },
    WithdrawAll { channel: ChannelId },
}

/// Everything a crank asks the outside world to do. Pure data; the engine
/// dispatches messages and transactions after the objective is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideEffects {
    pub messages: Vec<Message>,
    pub transactions: Vec<ChainTransaction>,
}

impl SideEffects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.transactions.is_empty()
    }

    pub fn extend(&mut self, other: SideEffects) {
        self.messages.extend(other.messages);
        self.transactions.extend(other.transactions);
    }

    pub fn message(&mut self, to: Address, objective_id: ObjectiveId, payload: MessagePayload) {
        self.messages.push(Message { to, objective_id, payload });
    }

    pub fn transaction(&mut self, transaction: ChainTransaction) {
        self.transactions.push(transaction);
    }

    /// Queues `payload` for every participant except the sender's own seat.
    pub fn broadcast(
        &mut self,
        objective_id: ObjectiveId,
        participants: &[Address],
        my_index: usize,
        payload: MessagePayload,
    ) {
        for (index, to) in participants.iter().enumerate() {
            if index == my_index {
                continue;
            }
            self.messages.push(Message { to: *to, objective_id, payload: payload.clone() });
        }
    }
}
