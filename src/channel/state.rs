use crate::channel::outcome::Outcome;
use crate::crypto::{CryptoError, SecretKey, StateSignature, Transcript};
use crate::types::{Address, ChannelId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("A channel needs at least one participant")]
    NoParticipants,
    #[error("Participant {0} appears more than once")]
    DuplicateParticipant(Address),
    #[error("State belongs to channel {got}, expected {expected}")]
    ChannelMismatch { expected: ChannelId, got: ChannelId },
    #[error("Signed states carry different states and cannot be merged")]
    StateMismatch,
    #[error("{0} is not a participant of this channel")]
    NotAParticipant(Address),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// The immutable half of a channel state. Every state of a channel shares the
/// same fixed part, and the channel id is derived from it alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPart {
    pub chain_id: u64,
    pub participants: Vec<Address>,
    pub channel_nonce: u64,
    pub app_definition: Address,
    pub challenge_duration: u32,
}

impl FixedPart {
    pub fn validate(&self) -> Result<(), StateError> {
        if self.participants.is_empty() {
            return Err(StateError::NoParticipants);
        }
        for (index, participant) in self.participants.iter().enumerate() {
            if self.participants[..index].contains(participant) {
                return Err(StateError::DuplicateParticipant(*participant));
            }
        }
        Ok(())
    }

    pub fn channel_id(&self) -> ChannelId {
        let mut transcript = Transcript::new(b"Penstock ChannelId v1");
        transcript.append(b"chain_id", self.chain_id.to_le_bytes());
        transcript.append(b"participant_count", (self.participants.len() as u64).to_le_bytes());
        for participant in &self.participants {
            transcript.append(b"participant", participant.as_bytes());
        }
        transcript.append(b"channel_nonce", self.channel_nonce.to_le_bytes());
        transcript.append(b"app_definition", self.app_definition.as_bytes());
        transcript.append(b"challenge_duration", self.challenge_duration.to_le_bytes());
        ChannelId::new(transcript.finalize())
    }

    pub fn participant_index(&self, address: &Address) -> Option<usize> {
        self.participants.iter().position(|p| p == address)
    }
}

/// The half of a channel state that changes from turn to turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariablePart {
    #[serde(serialize_with = "crate::helpers::to_hex", deserialize_with = "crate::helpers::from_hex")]
    pub app_data: Vec<u8>,
    pub outcome: Outcome,
    pub turn_num: u64,
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub fixed: FixedPart,
    pub variable: VariablePart,
}

impl State {
    pub fn channel_id(&self) -> ChannelId {
        self.fixed.channel_id()
    }

    pub fn turn_num(&self) -> u64 {
        self.variable.turn_num
    }

    pub fn is_final(&self) -> bool {
        self.variable.is_final
    }

    pub fn outcome(&self) -> &Outcome {
        &self.variable.outcome
    }

    /// The digest participants sign. Binds the channel id, so two channels can
    /// never share a signable state.
    pub fn hash(&self) -> [u8; 32] {
        let mut transcript = Transcript::new(b"Penstock State v1");
        transcript.append(b"channel_id", self.channel_id().as_bytes());
        transcript.append(b"app_data", &self.variable.app_data);
        transcript.append(b"turn_num", self.variable.turn_num.to_le_bytes());
        transcript.append(b"is_final", [self.variable.is_final as u8]);
        self.variable.outcome.append_to(&mut transcript);
        transcript.finalize()
    }

    pub fn sign(&self, key: &SecretKey) -> StateSignature {
        StateSignature::sign(key, &self.hash())
    }
}

/// A state together with the participant signatures collected for it, keyed by
/// participant index. Signatures are verified on the way in, so every entry is
/// known to be a valid signature by that participant over this exact state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedState {
    state: State,
    signatures: BTreeMap<usize, StateSignature>,
}

impl SignedState {
    pub fn new(state: State) -> Self {
        SignedState { state, signatures: BTreeMap::new() }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn channel_id(&self) -> ChannelId {
        self.state.channel_id()
    }

    pub fn turn_num(&self) -> u64 {
        self.state.turn_num()
    }

    /// Verifies the signature, resolves the signer to a participant index and
    /// records it. Rejects signers who are not participants.
    pub fn add_signature(&mut self, signature: StateSignature) -> Result<usize, StateError> {
        let signer = signature.recover(&self.state.hash())?;
        let index = self
            .state
            .fixed
            .participant_index(&signer)
            .ok_or(StateError::NotAParticipant(signer))?;
        self.signatures.insert(index, signature);
        Ok(index)
    }

    pub fn sign(&mut self, key: &SecretKey) -> Result<usize, StateError> {
        let signature = self.state.sign(key);
        self.add_signature(signature)
    }

    pub fn has_signature_for(&self, index: usize) -> bool {
        self.signatures.contains_key(&index)
    }

    pub fn signature_for(&self, index: usize) -> Option<&StateSignature> {
        self.signatures.get(&index)
    }

    pub fn has_all_signatures(&self) -> bool {
        self.signatures.len() == self.state.fixed.participants.len()
    }

    pub fn signatures(&self) -> impl Iterator<Item = (usize, &StateSignature)> {
        self.signatures.iter().map(|(index, signature)| (*index, signature))
    }

    /// Folds the signatures of `other` into `self`. Both must carry the same
    /// state; every incoming signature is re-verified.
    pub fn merge(&mut self, other: &SignedState) -> Result<(), StateError> {
        if self.state != other.state {
            return Err(StateError::StateMismatch);
        }
        for (_, signature) in other.signatures() {
            self.add_signature(signature.clone())?;
        }
        Ok(())
    }
}
