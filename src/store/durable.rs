use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::channel::Channel;
use crate::consensus::ConsensusChannel;
use crate::crypto::SecretKey;
use crate::protocols::{Objective, ObjectiveId};
use crate::store::tables::{decode, encode, Tables};
use crate::store::{Store, StoreError, VoucherInfo};
use crate::types::{Address, ChannelId};

const OBJECTIVES_FILE: &str = "objectives.ron";
const CHANNELS_FILE: &str = "channels.ron";
const CONSENSUS_CHANNELS_FILE: &str = "consensus_channels.ron";
const OWNERSHIP_FILE: &str = "channel_ownership.ron";
const VOUCHERS_FILE: &str = "vouchers.ron";
const LAST_BLOCK_FILE: &str = "last_block_seen.ron";

/// A directory-backed [`Store`].
///
/// Each table lives in its own RON file under the store directory and is
/// rewritten whenever it changes, so a failure while writing one table never
/// touches the others. Opening the same directory again restores everything.
pub struct DurableStore {
    key: SecretKey,
    address: Address,
    path: PathBuf,
    tables: RwLock<Tables>,
}

impl DurableStore {
    pub fn open(path: impl Into<PathBuf>, key: SecretKey) -> Result<Self, StoreError> {
        let path = path.into();
        fs::create_dir_all(&path)?;
        let tables = Tables {
            objectives: load_table(&path.join(OBJECTIVES_FILE))?,
            channels: load_table(&path.join(CHANNELS_FILE))?,
            consensus_channels: load_table(&path.join(CONSENSUS_CHANNELS_FILE))?,
            channel_ownership: load_table(&path.join(OWNERSHIP_FILE))?,
            vouchers: load_table(&path.join(VOUCHERS_FILE))?,
            last_block_seen: load_block(&path.join(LAST_BLOCK_FILE))?,
        };
        let address = key.address();
        Ok(DurableStore { key, address, path, tables: RwLock::new(tables) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().expect("no table operation panics, so the lock is never poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().expect("no table operation panics, so the lock is never poisoned")
    }

    fn save_table(&self, file: &str, table: &BTreeMap<String, String>) -> Result<(), StoreError> {
        fs::write(self.path.join(file), encode(table)?)?;
        Ok(())
    }

    fn save_objective_tables(&self, tables: &Tables) -> Result<(), StoreError> {
        self.save_table(OBJECTIVES_FILE, &tables.objectives)?;
        self.save_table(OWNERSHIP_FILE, &tables.channel_ownership)?;
        self.save_table(CHANNELS_FILE, &tables.channels)?;
        self.save_table(CONSENSUS_CHANNELS_FILE, &tables.consensus_channels)
    }
}

fn load_table(path: &Path) -> Result<BTreeMap<String, String>, StoreError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    decode(&fs::read_to_string(path)?)
}

fn load_block(path: &Path) -> Result<u64, StoreError> {
    if !path.exists() {
        return Ok(0);
    }
    decode(&fs::read_to_string(path)?)
}

impl Store for DurableStore {
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
        let mut tables = self.write();
        tables.set_objective(objective)?;
        self.save_objective_tables(&tables)
    }

    fn get_objective_by_channel_id(&self, channel: &ChannelId) -> Result<Objective, StoreError> {
        self.read().get_objective_by_channel(channel)
    }

    fn release_channel_from_ownership(&self, channel: &ChannelId) -> Result<(), StoreError> {
        let mut tables = self.write();
        tables.release_channel(channel);
        self.save_table(OWNERSHIP_FILE, &tables.channel_ownership)
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
        let mut tables = self.write();
        tables.set_channel(channel)?;
        self.save_table(CHANNELS_FILE, &tables.channels)
    }

    fn destroy_channel(&self, id: &ChannelId) -> Result<(), StoreError> {
        let mut tables = self.write();
        tables.destroy_channel(id);
        self.save_table(CHANNELS_FILE, &tables.channels)
    }

    fn get_consensus_channel_by_id(&self, id: &ChannelId) -> Result<ConsensusChannel, StoreError> {
        self.read().get_consensus_channel(id)
    }

    fn get_consensus_channel(&self, counterparty: &Address) -> Result<ConsensusChannel, StoreError> {
        self.read().consensus_channel_with(counterparty)
    }

    fn set_consensus_channel(&self, channel: &ConsensusChannel) -> Result<(), StoreError> {
        let mut tables = self.write();
        tables.set_consensus_channel(channel)?;
        self.save_table(CONSENSUS_CHANNELS_FILE, &tables.consensus_channels)
    }

    fn destroy_consensus_channel(&self, id: &ChannelId) -> Result<(), StoreError> {
        let mut tables = self.write();
        tables.destroy_consensus_channel(id);
        self.save_table(CONSENSUS_CHANNELS_FILE, &tables.consensus_channels)
    }

    fn get_last_block_seen(&self) -> Result<u64, StoreError> {
        Ok(self.read().last_block_seen)
    }

    fn set_last_block_seen(&self, block: u64) -> Result<(), StoreError> {
        let mut tables = self.write();
        tables.last_block_seen = block;
        fs::write(self.path.join(LAST_BLOCK_FILE), encode(&block)?)?;
        Ok(())
    }

    fn get_voucher_info(&self, channel: &ChannelId) -> Result<VoucherInfo, StoreError> {
        self.read().get_voucher(channel)
    }

    fn set_voucher_info(&self, info: &VoucherInfo) -> Result<(), StoreError> {
        let mut tables = self.write();
        tables.set_voucher(info)?;
        self.save_table(VOUCHERS_FILE, &tables.vouchers)
    }

    fn remove_voucher_info(&self, channel: &ChannelId) -> Result<(), StoreError> {
        let mut tables = self.write();
        tables.remove_voucher(channel);
        self.save_table(VOUCHERS_FILE, &tables.vouchers)
    }
}
