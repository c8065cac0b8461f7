use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::channel::Channel;
use crate::consensus::ConsensusChannel;
use crate::crypto::SecretKey;
use crate::protocols::{Objective, ObjectiveId};
use crate::store::tables::Tables;
use crate::store::{Store, StoreError, VoucherInfo};
use crate::types::{Address, ChannelId};

/// An in-memory [`Store`]. Nothing survives the process; useful for tests
/// and for nodes that rebuild their state from peers on startup.
pub struct MemStore {
    key: SecretKey,
    address: Address,
    tables: RwLock<Tables>,
}

impl MemStore {
    pub fn new(key: SecretKey) -> Self {
        let address = key.address();
        MemStore { key, address, tables: RwLock::new(Tables::default()) }
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().expect("no table operation panics, so the lock is never poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().expect("no table operation panics, so the lock is never poisoned")
    }
}

impl Store for MemStore {
    fn my_address(&self) -> Address {
        self.address
    }

    fn secret_key(&self) -> &SecretKey {
        &self.key
    }

    fn get_objective_by_id(&self, id: &ObjectiveId) -> Result<Objective, StoreError> {
        self.read().get_objective(id)
    }

    fn set_objective(&self, objective: &Objective) -> Result<(), StoreError> {
        self.write().set_objective(objective)
    }

    fn get_objective_by_channel_id(&self, channel: &ChannelId) -> Result<Objective, StoreError> {
        self.read().get_objective_by_channel(channel)
    }

    fn release_channel_from_ownership(&self, channel: &ChannelId) -> Result<(), StoreError> {
        self.write().release_channel(channel);
        Ok(())
    }

    fn get_channel_by_id(&self, id: &ChannelId) -> Result<Channel, StoreError> {
        self.read().get_channel(id)
    }

    fn get_channels_by_ids(&self, ids: &[ChannelId]) -> Result<Vec<Channel>, StoreError> {
        self.read().get_channels(ids)
    }

    fn get_channels_by_participant(&self, participant: &Address) -> Result<Vec<Channel>, StoreError> {
        self.read().channels_matching(|channel| channel.participants().contains(participant))
    }

    fn get_channels_by_app_definition(&self, app_definition: &Address) -> Result<Vec<Channel>, StoreError> {
        self.read().channels_matching(|channel| channel.fixed().app_definition == *app_definition)
    }

    fn set_channel(&self, channel: &Channel) -> Result<(), StoreError> {
        self.write().set_channel(channel)
    }

    fn destroy_channel(&self, id: &ChannelId) -> Result<(), StoreError> {
        self.write().destroy_channel(id);
        Ok(())
    }

    fn get_consensus_channel_by_id(&self, id: &ChannelId) -> Result<ConsensusChannel, StoreError> {
        self.read().get_consensus_channel(id)
    }

    fn get_consensus_channel(&self, counterparty: &Address) -> Result<ConsensusChannel, StoreError> {
        self.read().consensus_channel_with(counterparty)
    }

    fn set_consensus_channel(&self, channel: &ConsensusChannel) -> Result<(), StoreError> {
        self.write().set_consensus_channel(channel)
    }

    fn destroy_consensus_channel(&self, id: &ChannelId) -> Result<(), StoreError> {
        self.write().destroy_consensus_channel(id);
        Ok(())
    }

    fn get_last_block_seen(&self) -> Result<u64, StoreError> {
        Ok(self.read().last_block_seen)
    }

    fn set_last_block_seen(&self, block: u64) -> Result<(), StoreError> {
        self.write().last_block_seen = block;
        Ok(())
    }

    fn get_voucher_info(&self, channel: &ChannelId) -> Result<VoucherInfo, StoreError> {
        self.read().get_voucher(channel)
    }

    fn set_voucher_info(&self, info: &VoucherInfo) -> Result<(), StoreError> {
        self.write().set_voucher(info)
    }

    fn remove_voucher_info(&self, channel: &ChannelId) -> Result<(), StoreError> {
        self.write().remove_voucher(channel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::outcome::{Allocation, Outcome};
    use crate::channel::state::{FixedPart, SignedState, State, VariablePart};
    use crate::protocols::direct_defund::DirectDefund;
    use crate::protocols::direct_fund::DirectFund;
    use crate::types::{Amount, Destination};

    fn key(tag: u8) -> SecretKey {
        SecretKey::from_bytes([tag; 32])
    }

    fn pre_fund(nonce: u64) -> State {
        let participants = vec![key(1).address(), key(2).address()];
        let fixed = FixedPart {
            chain_id: 1,
            participants: participants.clone(),
            channel_nonce: nonce,
            app_definition: Address::default(),
            challenge_duration: 60,
        };
        let outcome = Outcome::single(
            Address::default(),
            vec![
                Allocation::normal(Destination::from(participants[0]), Amount::new(5)),
                Allocation::normal(Destination::from(participants[1]), Amount::new(5)),
            ],
        );
        State { fixed, variable: VariablePart { app_data: Vec::new(), outcome, turn_num: 0, is_final: false } }
    }

    fn funding_objective(nonce: u64) -> Objective {
        Objective::DirectFund(DirectFund::new(pre_fund(nonce), key(1).address()).unwrap())
    }

    #[test]
    fn objectives_roundtrip_through_the_store() {
        let store = MemStore::new(key(1));
        let objective = funding_objective(7).approve();
        store.set_objective(&objective).unwrap();
        let loaded = store.get_objective_by_id(&objective.id()).unwrap();
        assert_eq!(loaded, objective);
        // The channel was persisted alongside it
        store.get_channel_by_id(&objective.owns_channel()).unwrap();
        // And the ownership table points back at the objective
        let by_channel = store.get_objective_by_channel_id(&objective.owns_channel()).unwrap();
        assert_eq!(by_channel.id(), objective.id());
    }

    #[test]
    fn a_channel_has_one_owner_at_a_time() {
        let store = MemStore::new(key(1));
        let funding = funding_objective(7).approve();
        store.set_objective(&funding).unwrap();
        // Re-persisting the owner is idempotent
        store.set_objective(&funding).unwrap();

        // A different objective claiming the same channel is refused
        let mut signed = SignedState::new(pre_fund(7));
        signed.sign(&key(1)).unwrap();
        signed.sign(&key(2)).unwrap();
        let settled = Channel::from_signed_state(signed, 0).unwrap();
        let closing = Objective::DirectDefund(DirectDefund::new(settled).unwrap()).approve();
        match store.set_objective(&closing).unwrap_err() {
            StoreError::OwnershipConflict { channel, owner, claimant } => {
                assert_eq!(channel, funding.owns_channel());
                assert_eq!(owner, funding.id());
                assert_eq!(claimant, closing.id());
            }
            other => panic!("unexpected error: {other}"),
        }
        // The refused claimant was not persisted either
        assert!(matches!(store.get_objective_by_id(&closing.id()), Err(StoreError::ObjectiveNotFound(_))));

        // Releasing the channel lets the next objective claim it
        store.release_channel_from_ownership(&funding.owns_channel()).unwrap();
        store.set_objective(&closing).unwrap();
        assert_eq!(store.get_objective_by_channel_id(&funding.owns_channel()).unwrap().id(), closing.id());
    }

    #[test]
    fn unapproved_objectives_do_not_claim_channels() {
        let store = MemStore::new(key(1));
        let objective = funding_objective(7);
        store.set_objective(&objective).unwrap();
        assert!(matches!(
            store.get_objective_by_channel_id(&objective.owns_channel()),
            Err(StoreError::NoObjectiveForChannel(_))
        ));
    }

    #[test]
    fn missing_entries_are_reported_by_name() {
        let store = MemStore::new(key(1));
        let id = ChannelId::new([9; 32]);
        assert!(matches!(store.get_channel_by_id(&id), Err(StoreError::ChannelNotFound(_))));
        assert!(matches!(store.get_consensus_channel_by_id(&id), Err(StoreError::ConsensusChannelNotFound(_))));
        assert!(matches!(store.get_voucher_info(&id), Err(StoreError::VoucherNotFound(_))));
        assert!(matches!(
            store.get_consensus_channel(&key(2).address()),
            Err(StoreError::NoConsensusChannelWith(_))
        ));
    }

    #[test]
    fn channels_are_found_by_participant() {
        let store = MemStore::new(key(1));
        store.set_objective(&funding_objective(7)).unwrap();
        store.set_objective(&funding_objective(8)).unwrap();
        assert_eq!(store.get_channels_by_participant(&key(1).address()).unwrap().len(), 2);
        assert_eq!(store.get_channels_by_participant(&key(3).address()).unwrap().len(), 0);
        assert_eq!(store.get_channels_by_app_definition(&Address::default()).unwrap().len(), 2);
    }

    #[test]
    fn vouchers_and_blocks_are_tracked() {
        let store = MemStore::new(key(1));
        assert_eq!(store.get_last_block_seen().unwrap(), 0);
        store.set_last_block_seen(42).unwrap();
        assert_eq!(store.get_last_block_seen().unwrap(), 42);

        let info = VoucherInfo { channel_id: ChannelId::new([3; 32]), paid: Amount::new(2) };
        store.set_voucher_info(&info).unwrap();
        assert_eq!(store.get_voucher_info(&info.channel_id).unwrap(), info);
        store.remove_voucher_info(&info.channel_id).unwrap();
        assert!(matches!(store.get_voucher_info(&info.channel_id), Err(StoreError::VoucherNotFound(_))));
    }
}
