//! The objective protocols.
//!
//! An objective is one multi-party goal the node is working towards: funding
//! a channel, closing one, or doing either for a virtual channel across
//! intermediaries. Objectives are pure state machines. [`Objective::update`]
//! folds peer input in, [`Objective::crank`] computes the next local steps,
//! and both return a new value instead of mutating the receiver, so a failed
//! step never leaves a half-applied objective behind. Everything an objective
//! wants done to the outside world comes back as [`SideEffects`] for the
//! caller to deliver.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::channel::{ChainEvent, Channel};
use crate::consensus::ConsensusChannel;
use crate::crypto::SecretKey;
use crate::types::ChannelId;

pub mod connection;
pub mod direct_defund;
pub mod direct_fund;
pub mod envelope;
pub mod error;
pub mod events;
pub mod side_effects;
pub mod virtual_defund;
pub mod virtual_fund;

pub use connection::{Connection, GuaranteeInfo};
pub use direct_defund::DirectDefund;
pub use direct_fund::DirectFund;
pub use envelope::{ObjectiveEnvelope, ObjectiveRecord, ENVELOPE_VERSION};
pub use error::{ConstructionError, HydrationError, InvalidObjectiveId, ObjectiveError};
pub use events::ObjectiveEvent;
pub use side_effects::{ChainTransaction, Message, MessagePayload, SideEffects};
pub use virtual_defund::{VirtualDefund, VIRTUAL_FINAL_TURN};
pub use virtual_fund::VirtualFund;

/// The four things a node can set out to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectiveKind {
    DirectFund,
    DirectDefund,
    VirtualFund,
    VirtualDefund,
}

impl ObjectiveKind {
    /// The wire tag, shared with every implementation of this protocol.
    pub fn tag(self) -> &'static str {
        match self {
            ObjectiveKind::DirectFund => "DirectFunding",
            ObjectiveKind::DirectDefund => "DirectDefunding",
            ObjectiveKind::VirtualFund => "VirtualFund",
            ObjectiveKind::VirtualDefund => "VirtualDefund",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "DirectFunding" => Some(ObjectiveKind::DirectFund),
            "DirectDefunding" => Some(ObjectiveKind::DirectDefund),
            "VirtualFund" => Some(ObjectiveKind::VirtualFund),
            "VirtualDefund" => Some(ObjectiveKind::VirtualDefund),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Identifies an objective: what it is doing, and to which channel.
///
/// Renders as `<tag>-<channel id>`, e.g.
/// `DirectFunding-0x01…`, which is also its serialized form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectiveId {
    pub kind: ObjectiveKind,
    pub channel: ChannelId,
}

impl fmt::Display for ObjectiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind, self.channel)
    }
}

impl FromStr for ObjectiveId {
    type Err = InvalidObjectiveId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tag, channel) = s.split_once('-').ok_or_else(|| InvalidObjectiveId(s.to_string()))?;
        let kind = ObjectiveKind::from_tag(tag).ok_or_else(|| InvalidObjectiveId(s.to_string()))?;
        let channel = channel.parse().map_err(|_| InvalidObjectiveId(s.to_string()))?;
        Ok(ObjectiveId { kind, channel })
    }
}

impl Serialize for ObjectiveId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ObjectiveId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Approval state of an objective. Only approved objectives may be cranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveStatus {
    Unapproved,
    Approved,
    Rejected,
}

/// What an objective reported waiting on after its last crank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitingFor {
    CompletePrefund,
    MyTurnToFund,
    CompleteFunding,
    CompletePostFund,
    Finalization,
    Withdraw,
    CompleteFinal,
    LedgerDefunding,
    Nothing,
}

impl WaitingFor {
    /// True once the objective has nothing left to do.
    pub fn is_nothing(self) -> bool {
        self == WaitingFor::Nothing
    }
}

impl fmt::Display for WaitingFor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WaitingFor::CompletePrefund => "CompletePrefund",
            WaitingFor::MyTurnToFund => "MyTurnToFund",
            WaitingFor::CompleteFunding => "CompleteFunding",
            WaitingFor::CompletePostFund => "CompletePostFund",
            WaitingFor::Finalization => "Finalization",
            WaitingFor::Withdraw => "Withdraw",
            WaitingFor::CompleteFinal => "CompleteFinal",
            WaitingFor::LedgerDefunding => "LedgerDefunding",
            WaitingFor::Nothing => "Nothing",
        };
        write!(f, "WaitingFor{name}")
    }
}

/// A piece of channel data an objective wants persisted alongside itself.
#[derive(Debug, Clone, Copy)]
pub enum Storable<'a> {
    Channel(&'a Channel),
    ConsensusChannel(&'a ConsensusChannel),
}

/// Any of the four objectives, for code that handles them uniformly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Objective {
    DirectFund(DirectFund),
    DirectDefund(DirectDefund),
    VirtualFund(VirtualFund),
    VirtualDefund(VirtualDefund),
}

impl Objective {
    pub fn id(&self) -> ObjectiveId {
        match self {
            Objective::DirectFund(objective) => objective.id(),
            Objective::DirectDefund(objective) => objective.id(),
            Objective::VirtualFund(objective) => objective.id(),
            Objective::VirtualDefund(objective) => objective.id(),
        }
    }

    pub fn kind(&self) -> ObjectiveKind {
        self.id().kind
    }

    /// The channel whose consensus this objective drives, and which no other
    /// objective may touch while this one is approved.
    pub fn owns_channel(&self) -> ChannelId {
        self.id().channel
    }

    pub fn status(&self) -> ObjectiveStatus {
        match self {
            Objective::DirectFund(objective) => objective.status(),
            Objective::DirectDefund(objective) => objective.status(),
            Objective::VirtualFund(objective) => objective.status(),
            Objective::VirtualDefund(objective) => objective.status(),
        }
    }

    pub fn approve(&self) -> Self {
        match self {
            Objective::DirectFund(objective) => Objective::DirectFund(objective.approve()),
            Objective::DirectDefund(objective) => Objective::DirectDefund(objective.approve()),
            Objective::VirtualFund(objective) => Objective::VirtualFund(objective.approve()),
            Objective::VirtualDefund(objective) => Objective::VirtualDefund(objective.approve()),
        }
    }

    pub fn reject(&self) -> Self {
        match self {
            Objective::DirectFund(objective) => Objective::DirectFund(objective.reject()),
            Objective::DirectDefund(objective) => Objective::DirectDefund(objective.reject()),
            Objective::VirtualFund(objective) => Objective::VirtualFund(objective.reject()),
            Objective::VirtualDefund(objective) => Objective::VirtualDefund(objective.reject()),
        }
    }

    pub fn update(&self, event: &ObjectiveEvent) -> Result<Self, ObjectiveError> {
        match self {
            Objective::DirectFund(objective) => objective.update(event).map(Objective::DirectFund),
            Objective::DirectDefund(objective) => objective.update(event).map(Objective::DirectDefund),
            Objective::VirtualFund(objective) => objective.update(event).map(Objective::VirtualFund),
            Objective::VirtualDefund(objective) => objective.update(event).map(Objective::VirtualDefund),
        }
    }

    pub fn update_with_chain_event(&self, event: &ChainEvent) -> Result<Self, ObjectiveError> {
        match self {
            Objective::DirectFund(objective) => objective.update_with_chain_event(event).map(Objective::DirectFund),
            Objective::DirectDefund(objective) => {
                objective.update_with_chain_event(event).map(Objective::DirectDefund)
            }
            Objective::VirtualFund(objective) => objective.update_with_chain_event(event).map(Objective::VirtualFund),
            Objective::VirtualDefund(objective) => {
                objective.update_with_chain_event(event).map(Objective::VirtualDefund)
            }
        }
    }

    pub fn crank(&self, key: &SecretKey) -> Result<(Self, SideEffects, WaitingFor), ObjectiveError> {
        match self {
            Objective::DirectFund(objective) => {
                objective.crank(key).map(|(next, effects, waiting)| (Objective::DirectFund(next), effects, waiting))
            }
            Objective::DirectDefund(objective) => {
                objective.crank(key).map(|(next, effects, waiting)| (Objective::DirectDefund(next), effects, waiting))
            }
            Objective::VirtualFund(objective) => {
                objective.crank(key).map(|(next, effects, waiting)| (Objective::VirtualFund(next), effects, waiting))
            }
            Objective::VirtualDefund(objective) => {
                objective.crank(key).map(|(next, effects, waiting)| (Objective::VirtualDefund(next), effects, waiting))
            }
        }
    }

    pub fn related(&self) -> Vec<Storable<'_>> {
        match self {
            Objective::DirectFund(objective) => objective.related(),
            Objective::DirectDefund(objective) => objective.related(),
            Objective::VirtualFund(objective) => objective.related(),
            Objective::VirtualDefund(objective) => objective.related(),
        }
    }

    pub fn to_envelope(&self) -> ObjectiveEnvelope {
        match self {
            Objective::DirectFund(objective) => objective.to_envelope(),
            Objective::DirectDefund(objective) => objective.to_envelope(),
            Objective::VirtualFund(objective) => objective.to_envelope(),
            Objective::VirtualDefund(objective) => objective.to_envelope(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> ObjectiveId {
        ObjectiveId { kind: ObjectiveKind::DirectFund, channel: ChannelId::new([0xab; 32]) }
    }

    #[test]
    fn objective_ids_roundtrip_through_their_display_form() {
        let id = id();
        let text = id.to_string();
        assert_eq!(text, format!("DirectFunding-{}", id.channel));
        assert_eq!(text.parse::<ObjectiveId>().unwrap(), id);

        let virtual_id = ObjectiveId { kind: ObjectiveKind::VirtualDefund, channel: ChannelId::new([1; 32]) };
        assert_eq!(virtual_id.to_string().parse::<ObjectiveId>().unwrap(), virtual_id);
    }

    #[test]
    fn malformed_objective_ids_are_rejected() {
        assert!("nodash".parse::<ObjectiveId>().is_err());
        assert!("Unknown-0x0101".parse::<ObjectiveId>().is_err());
        assert!(format!("DirectFunding-{}", "zz".repeat(32)).parse::<ObjectiveId>().is_err());
    }

    #[test]
    fn objective_ids_serialize_as_strings() {
        let id = id();
        let encoded = ron::to_string(&id).unwrap();
        assert_eq!(encoded, format!("\"{id}\""));
        let decoded: ObjectiveId = ron::from_str(&encoded).unwrap();
        assert_eq!(decoded, id);
    }

    #[test]
    fn waiting_for_names_itself() {
        assert_eq!(WaitingFor::CompletePrefund.to_string(), "WaitingForCompletePrefund");
        assert_eq!(WaitingFor::Nothing.to_string(), "WaitingForNothing");
        assert!(WaitingFor::Nothing.is_nothing());
        assert!(!WaitingFor::LedgerDefunding.is_nothing());
    }
}
