use crate::crypto::Transcript;
use crate::types::{Address, Amount, Destination, Funds};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OutcomeError {
    #[error("No allocation at index {0}")]
    NoSuchAllocation(usize),
    #[error("The allocation at index {0} is not a guarantee")]
    NotAGuarantee(usize),
    #[error("Guarantee metadata must be exactly 64 bytes, got {0}")]
    BadMetadata(usize),
    #[error("A reclaim target needs exactly two allocations, got {0}")]
    BadTargetShape(usize),
    #[error("No allocation for the guarantee's left destination {0}")]
    LeftNotFound(Destination),
    #[error("No allocation for the guarantee's right destination {0}")]
    RightNotFound(Destination),
    #[error("Reclaimed total {got} does not match the guarantee amount {expected}")]
    ConservationViolation { expected: Amount, got: Amount },
    #[error("Amount arithmetic overflowed")]
    Overflow,
}

/// The discriminants mirror the on-chain encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum AllocationType {
    Normal = 0,
    Guarantee = 2,
}

/// Names the two ledger parties a guarantee's funds flow back to when the target
/// channel is reclaimed. Left is the party closer to the channel's first participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuaranteeMetadata {
    pub left: Destination,
    pub right: Destination,
}

impl GuaranteeMetadata {
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(self.left.as_bytes());
        bytes.extend_from_slice(self.right.as_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, OutcomeError> {
        if bytes.len() != 64 {
            return Err(OutcomeError::BadMetadata(bytes.len()));
        }
        let mut left = [0u8; 32];
        let mut right = [0u8; 32];
        left.copy_from_slice(&bytes[..32]);
        right.copy_from_slice(&bytes[32..]);
        Ok(GuaranteeMetadata { left: Destination::new(left), right: Destination::new(right) })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub destination: Destination,
    pub amount: Amount,
    pub allocation_type: AllocationType,
    #[serde(serialize_with = "crate::helpers::to_hex", deserialize_with = "crate::helpers::from_hex")]
    pub metadata: Vec<u8>,
}

impl Allocation {
    pub fn normal(destination: Destination, amount: Amount) -> Self {
        Allocation { destination, amount, allocation_type: AllocationType::Normal, metadata: Vec::new() }
    }

    pub fn guarantee(destination: Destination, amount: Amount, metadata: GuaranteeMetadata) -> Self {
        Allocation { destination, amount, allocation_type: AllocationType::Guarantee, metadata: metadata.encode() }
    }

    pub fn is_guarantee(&self) -> bool {
        self.allocation_type == AllocationType::Guarantee
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleAssetOutcome {
    pub asset: Address,
    pub allocations: Vec<Allocation>,
}

impl SingleAssetOutcome {
    /// Checked sum of every allocation for this asset.
    pub fn total(&self) -> Option<Amount> {
        self.allocations.iter().try_fold(Amount::ZERO, |sum, a| sum.checked_add(a.amount))
    }
}

/// How a channel's funds pay out, per asset and in priority order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Outcome(Vec<SingleAssetOutcome>);

impl Outcome {
    pub fn new(assets: Vec<SingleAssetOutcome>) -> Self {
        Outcome(assets)
    }

    pub fn single(asset: Address, allocations: Vec<Allocation>) -> Self {
        Outcome(vec![SingleAssetOutcome { asset, allocations }])
    }

    pub fn assets(&self) -> &[SingleAssetOutcome] {
        &self.0
    }

    /// Total allocated per asset. `None` on overflow.
    pub fn total(&self) -> Option<Funds> {
        let mut funds = Funds::new();
        for asset_outcome in &self.0 {
            let total = funds.get(&asset_outcome.asset).checked_add(asset_outcome.total()?)?;
            funds.set(asset_outcome.asset, total);
        }
        Some(funds)
    }

    /// Total allocated to `destination` per asset.
    pub fn total_for(&self, destination: &Destination) -> Option<Funds> {
        let mut funds = Funds::new();
        for asset_outcome in &self.0 {
            let mut total = funds.get(&asset_outcome.asset);
            for allocation in &asset_outcome.allocations {
                if allocation.destination == *destination {
                    total = total.checked_add(allocation.amount)?;
                }
            }
            funds.set(asset_outcome.asset, total);
        }
        Some(funds)
    }

    /// How much must already be on chain before `destination` can safely deposit:
    /// per asset, the sum of every allocation ahead of its first entry.
    pub fn deposit_safety_threshold(&self, destination: &Destination) -> Option<Funds> {
        let mut funds = Funds::new();
        for asset_outcome in &self.0 {
            let mut threshold = funds.get(&asset_outcome.asset);
            for allocation in &asset_outcome.allocations {
                if allocation.destination == *destination {
                    break;
                }
                threshold = threshold.checked_add(allocation.amount)?;
            }
            funds.set(asset_outcome.asset, threshold);
        }
        Some(funds)
    }

    pub(crate) fn append_to(&self, transcript: &mut Transcript) {
        transcript.append(b"asset_count", (self.0.len() as u64).to_le_bytes());
        for asset_outcome in &self.0 {
            transcript.append(b"asset", asset_outcome.asset.as_bytes());
            transcript.append(b"allocation_count", (asset_outcome.allocations.len() as u64).to_le_bytes());
            for allocation in &asset_outcome.allocations {
                transcript.append(b"destination", allocation.destination.as_bytes());
                transcript.append(b"amount", allocation.amount.value().to_le_bytes());
                transcript.append(b"allocation_type", [allocation.allocation_type as u8]);
                transcript.append(b"metadata", &allocation.metadata);
            }
        }
    }
}

/// Computes the allocations left on a ledger after reclaiming the guarantee at
/// `guarantee_index`, paying the target channel's final balances back to the
/// guarantee's left and right destinations.
///
/// `target` is the target channel's final outcome for the same asset: exactly two
/// allocations, left side first. The two amounts must add up to the guarantee
/// amount; any shortfall or excess is a [`OutcomeError::ConservationViolation`],
/// never silently corrected.
pub fn compute_reclaim_effects(
    source: &[Allocation],
    target: &[Allocation],
    guarantee_index: usize,
) -> Result<Vec<Allocation>, OutcomeError> {
    let guarantee = source.get(guarantee_index).ok_or(OutcomeError::NoSuchAllocation(guarantee_index))?;
    if !guarantee.is_guarantee() {
        return Err(OutcomeError::NotAGuarantee(guarantee_index));
    }
    let metadata = GuaranteeMetadata::decode(&guarantee.metadata)?;
    if target.len() != 2 {
        return Err(OutcomeError::BadTargetShape(target.len()));
    }
    let left_amount = target[0].amount;
    let right_amount = target[1].amount;
    let reclaimed = left_amount.checked_add(right_amount).ok_or(OutcomeError::Overflow)?;
    if reclaimed != guarantee.amount {
        return Err(OutcomeError::ConservationViolation { expected: guarantee.amount, got: reclaimed });
    }

    let mut updated = Vec::with_capacity(source.len() - 1);
    let mut left_paid = false;
    let mut right_paid = false;
    for (index, allocation) in source.iter().enumerate() {
        if index == guarantee_index {
            continue;
        }
        let mut allocation = allocation.clone();
        if !left_paid && allocation.destination == metadata.left {
            allocation.amount = allocation.amount.checked_add(left_amount).ok_or(OutcomeError::Overflow)?;
            left_paid = true;
        } else if !right_paid && allocation.destination == metadata.right {
            allocation.amount = allocation.amount.checked_add(right_amount).ok_or(OutcomeError::Overflow)?;
            right_paid = true;
        }
        updated.push(allocation);
    }
    if !left_paid {
        return Err(OutcomeError::LeftNotFound(metadata.left));
    }
    if !right_paid {
        return Err(OutcomeError::RightNotFound(metadata.right));
    }
    Ok(updated)
}
