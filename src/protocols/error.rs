use crate::channel::ChannelError;
use crate::consensus::ConsensusError;
use crate::protocols::ObjectiveId;
use crate::types::{Address, Amount, ChannelId};
use thiserror::Error;

/// Failures while building an objective from its inputs. Nothing is mutated
/// when construction fails.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConstructionError {
    #[error("{0} is not a participant of the channel")]
    MissingParticipant(Address),
    #[error("Expected {expected} participants, got {got}")]
    WrongParticipantCount { expected: usize, got: usize },
    #[error("A virtual channel needs at least three participants, got {0}")]
    TooFewParticipants(usize),
    #[error("The outcome must allocate a single asset to the two end participants")]
    BadOutcomeShape,
    #[error("The channel has an update in progress")]
    ChannelUpdateInProgress,
    #[error("No ledger channel with {counterparty} was supplied")]
    MissingLedger { counterparty: Address },
    #[error("Ledger {ledger} does not connect this node to {counterparty}")]
    LedgerMismatch { ledger: ChannelId, counterparty: Address },
    #[error("Ledger asset {got} does not match the channel asset {expected}")]
    AssetMismatch { expected: Address, got: Address },
    #[error("Paid amount {paid} exceeds the payer's deposit {deposit}")]
    PaidExceedsDeposit { paid: Amount, deposit: Amount },
    #[error("Amount arithmetic overflowed")]
    AmountOverflow,
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
}

/// Failures while updating or cranking an objective. The objective the caller
/// holds is untouched when one of these comes back.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ObjectiveError {
    #[error("Objective {0} is not approved")]
    NotApproved(ObjectiveId),
    #[error("Event is for objective {got}, expected {expected}")]
    WrongObjective { expected: ObjectiveId, got: ObjectiveId },
    #[error("Event is for channel {got}, expected {expected}")]
    WrongChannel { expected: ChannelId, got: ChannelId },
    #[error("Objective {0} does not react to chain events")]
    ChainEventUnsupported(ObjectiveId),
    #[error("Only final states are accepted while closing")]
    NonFinalState,
    #[error("No connection uses ledger {0}")]
    UnknownLedger(ChannelId),
    #[error("Channel {0} is not fully funded yet")]
    FundingIncomplete(ChannelId),
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
}

/// Failures while rebuilding an objective from its persisted envelope and the
/// channel tables.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HydrationError {
    #[error("Unsupported objective envelope version {0}")]
    UnsupportedVersion(u32),
    #[error("Channel {0} is referenced by an objective but not stored")]
    MissingChannel(ChannelId),
    #[error("Consensus channel {0} is referenced by an objective but not stored")]
    MissingConsensusChannel(ChannelId),
    #[error("Objective {id} does not match its stored record")]
    IdMismatch { id: ObjectiveId },
    #[error("Stored role {recorded} does not match the channel's participant index {actual}")]
    RoleMismatch { recorded: usize, actual: usize },
    #[error(transparent)]
    Construction(#[from] ConstructionError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid objective id: {0}")]
pub struct InvalidObjectiveId(pub String);
