use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("Invalid hex string: {0}")]
    InvalidHex(String),
    #[error("Expected {expected} hex characters, got {got}")]
    WrongLength { expected: usize, got: usize },
    #[error("Destination does not address an external account")]
    NotExternal,
}

/// Implements the shared surface of the fixed-size byte identifiers: hex `Display`
/// (with a `0x` prefix), `FromStr` accepting the same format, and string-backed serde.
macro_rules! bytes_newtype {
    ($name:ident, $len:expr) => {
        impl $name {
            pub const LEN: usize = $len;

            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub const fn zero() -> Self {
                Self([0u8; $len])
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub const fn to_bytes(self) -> [u8; $len] {
                self.0
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(0x{})", stringify!($name), hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let digits = s.strip_prefix("0x").unwrap_or(s);
                if digits.len() != 2 * $len {
                    return Err(TypeError::WrongLength { expected: 2 * $len, got: digits.len() });
                }
                let mut bytes = [0u8; $len];
                hex::decode_to_slice(digits, &mut bytes).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
                Ok(Self(bytes))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                s.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
                let text = String::deserialize(de)?;
                text.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

/// A participant account or an asset identifier. Derived from a public key; see
/// [`crate::crypto::PublicKey::address`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; 20]);
bytes_newtype!(Address, 20);

/// The unique identifier of a channel, derived from its fixed part.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ChannelId([u8; 32]);
bytes_newtype!(ChannelId, 32);

/// Where an allocation pays out: either an external account (a left-padded
/// [`Address`]) or another channel (a [`ChannelId`]).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Destination([u8; 32]);
bytes_newtype!(Destination, 32);

impl Destination {
    /// True when the first twelve bytes are zero, i.e. the destination is a
    /// left-padded external address rather than a channel.
    pub fn is_external(&self) -> bool {
        self.0[..12].iter().all(|b| *b == 0)
    }

    pub fn to_address(&self) -> Result<Address, TypeError> {
        if !self.is_external() {
            return Err(TypeError::NotExternal);
        }
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&self.0[12..]);
        Ok(Address(bytes))
    }
}

impl From<Address> for Destination {
    fn from(address: Address) -> Self {
        let mut bytes = [0u8; 32];
        bytes[12..].copy_from_slice(address.as_bytes());
        Destination(bytes)
    }
}

impl From<ChannelId> for Destination {
    fn from(id: ChannelId) -> Self {
        Destination(id.to_bytes())
    }
}

/// A token amount. All arithmetic is checked; overflow never wraps silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn new(value: u128) -> Self {
        Amount(value)
    }

    pub const fn value(&self) -> u128 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }
}

impl From<u128> for Amount {
    fn from(value: u128) -> Self {
        Amount(value)
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Amount(value as u128)
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-asset money. Absent assets count as zero.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Funds(BTreeMap<Address, Amount>);

impl Funds {
    pub fn new() -> Self {
        Funds(BTreeMap::new())
    }

    pub fn get(&self, asset: &Address) -> Amount {
        self.0.get(asset).copied().unwrap_or(Amount::ZERO)
    }

    pub fn set(&mut self, asset: Address, amount: Amount) {
        self.0.insert(asset, amount);
    }

    /// The union of two fund vectors, added per asset. `None` on overflow.
    pub fn checked_add(&self, other: &Funds) -> Option<Funds> {
        let mut sum = self.clone();
        for (asset, amount) in &other.0 {
            let total = sum.get(asset).checked_add(*amount)?;
            sum.set(*asset, total);
        }
        Some(sum)
    }

    /// The per-asset difference `self - other`, clamped at zero.
    pub fn saturating_sub(&self, other: &Funds) -> Funds {
        self.0.iter().map(|(asset, amount)| (*asset, amount.saturating_sub(other.get(asset)))).collect()
    }

    /// True when this vector covers `other` for every asset.
    pub fn gte(&self, other: &Funds) -> bool {
        other.0.iter().all(|(asset, amount)| self.get(asset) >= *amount)
    }

    pub fn is_zero(&self) -> bool {
        self.0.values().all(|amount| amount.is_zero())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Amount)> {
        self.0.iter()
    }
}

impl FromIterator<(Address, Amount)> for Funds {
    fn from_iter<I: IntoIterator<Item = (Address, Amount)>>(iter: I) -> Self {
        Funds(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(tag: u8) -> Address {
        Address::new([tag; 20])
    }

    #[test]
    fn address_hex_roundtrip() {
        let address = Address::new([0xab; 20]);
        let text = address.to_string();
        assert_eq!(text, format!("0x{}", "ab".repeat(20)));
        assert_eq!(text.parse::<Address>().unwrap(), address);
        // FromStr also accepts the bare digits
        assert_eq!(text.trim_start_matches("0x").parse::<Address>().unwrap(), address);
    }

    #[test]
    fn address_rejects_bad_input() {
        assert!(matches!("0x1234".parse::<Address>(), Err(TypeError::WrongLength { .. })));
        let not_hex = "zz".repeat(20);
        assert!(matches!(not_hex.parse::<Address>(), Err(TypeError::InvalidHex(_))));
    }

    #[test]
    fn channel_id_serde_is_a_string() {
        let id = ChannelId::new([7; 32]);
        let encoded = ron::to_string(&id).unwrap();
        assert_eq!(encoded, format!("\"0x{}\"", "07".repeat(32)));
        let decoded: ChannelId = ron::from_str(&encoded).unwrap();
        assert_eq!(decoded, id);
    }

    #[test]
    fn destination_padding() {
        let address = Address::new([9; 20]);
        let destination = Destination::from(address);
        assert!(destination.is_external());
        assert_eq!(destination.as_bytes()[..12], [0u8; 12]);
        assert_eq!(destination.to_address().unwrap(), address);
    }

    #[test]
    fn channel_destination_is_not_external() {
        let id = ChannelId::new([1; 32]);
        let destination = Destination::from(id);
        assert!(!destination.is_external());
        assert_eq!(destination.to_address(), Err(TypeError::NotExternal));
    }

    #[test]
    fn amount_checked_arithmetic() {
        let a = Amount::new(u128::MAX);
        assert!(a.checked_add(Amount::new(1)).is_none());
        assert_eq!(Amount::new(5).checked_sub(Amount::new(7)), None);
        assert_eq!(Amount::new(5).saturating_sub(Amount::new(7)), Amount::ZERO);
        assert_eq!(Amount::new(7).checked_sub(Amount::new(5)), Some(Amount::new(2)));
        assert!(Amount::ZERO.is_zero());
    }

    #[test]
    fn funds_default_to_zero() {
        let funds = Funds::new();
        assert_eq!(funds.get(&asset(1)), Amount::ZERO);
        assert!(funds.is_zero());
        assert!(funds.is_empty());
    }

    #[test]
    fn funds_checked_add_unions_assets() {
        let a: Funds = [(asset(1), Amount::new(5))].into_iter().collect();
        let b: Funds = [(asset(1), Amount::new(3)), (asset(2), Amount::new(7))].into_iter().collect();
        let sum = a.checked_add(&b).unwrap();
        assert_eq!(sum.get(&asset(1)), Amount::new(8));
        assert_eq!(sum.get(&asset(2)), Amount::new(7));

        let overflowing: Funds = [(asset(1), Amount::new(u128::MAX))].into_iter().collect();
        assert!(a.checked_add(&overflowing).is_none());
    }

    #[test]
    fn funds_saturating_sub_clamps_at_zero() {
        let target: Funds = [(asset(1), Amount::new(10)), (asset(2), Amount::new(4))].into_iter().collect();
        let held: Funds = [(asset(1), Amount::new(7)), (asset(2), Amount::new(9))].into_iter().collect();
        let owed = target.saturating_sub(&held);
        assert_eq!(owed.get(&asset(1)), Amount::new(3));
        assert_eq!(owed.get(&asset(2)), Amount::ZERO);
        assert!(target.saturating_sub(&target).is_zero());
    }

    #[test]
    fn funds_gte_is_per_asset() {
        let have: Funds = [(asset(1), Amount::new(10)), (asset(2), Amount::new(1))].into_iter().collect();
        let need: Funds = [(asset(1), Amount::new(10))].into_iter().collect();
        assert!(have.gte(&need));
        let need_more: Funds = [(asset(1), Amount::new(10)), (asset(2), Amount::new(2))].into_iter().collect();
        assert!(!have.gte(&need_more));
        // Every vector covers the empty one
        assert!(Funds::new().gte(&Funds::new()));
        assert!(have.gte(&Funds::new()));
    }

    #[test]
    fn funds_with_zero_entries_are_zero() {
        let mut funds = Funds::new();
        funds.set(asset(1), Amount::ZERO);
        assert!(funds.is_zero());
        assert!(!funds.is_empty());
        funds.set(asset(2), Amount::new(1));
        assert!(!funds.is_zero());
    }

    #[test]
    fn funds_serde_roundtrip() {
        let funds: Funds = [(asset(1), Amount::new(5)), (asset(2), Amount::new(9))].into_iter().collect();
        let encoded = ron::to_string(&funds).unwrap();
        let decoded: Funds = ron::from_str(&encoded).unwrap();
        assert_eq!(decoded, funds);
    }
}
