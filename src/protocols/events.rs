use crate::channel::state::SignedState;
use crate::consensus::proposals::SignedProposal;
use crate::protocols::ObjectiveId;
use serde::{Deserialize, Serialize};

/// Everything a peer delivered for one objective: signed states for its
/// channels and signed proposals for its ledgers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectiveEvent {
    pub objective_id: ObjectiveId,
    pub signed_states: Vec<SignedState>,
    pub signed_proposals: Vec<SignedProposal>,
}

impl ObjectiveEvent {
    pub fn new(objective_id: ObjectiveId) -> Self {
        ObjectiveEvent { objective_id, signed_states: Vec::new(), signed_proposals: Vec::new() }
    }

    pub fn with_signed_state(mut self, signed: SignedState) -> Self {
        self.signed_states.push(signed);
        self
    }

    pub fn with_proposal(mut self, signed: SignedProposal) -> Self {
        self.signed_proposals.push(signed);
        self
    }
}
