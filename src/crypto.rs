use crate::types::Address;
use blake2::{Blake2b512, Digest};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Debug, Display};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Signature verification failed")]
    BadSignature,
    #[error("Invalid public key bytes")]
    BadPublicKey,
}

/// A domain-separated hash transcript over Blake2b512.
///
/// Every append is length-prefixed, so distinct field sequences can never collide
/// by concatenation. The output is the first 32 bytes of the digest.
pub struct Transcript {
    hasher: Blake2b512,
}

impl Transcript {
    pub fn new(domain: &'static [u8]) -> Self {
        let mut hasher = Blake2b512::new();
        hasher.update((domain.len() as u64).to_le_bytes());
        hasher.update(domain);
        Transcript { hasher }
    }

    pub fn append(&mut self, label: &'static [u8], message: impl AsRef<[u8]>) {
        let message = message.as_ref();
        self.hasher.update((label.len() as u64).to_le_bytes());
        self.hasher.update(label);
        self.hasher.update((message.len() as u64).to_le_bytes());
        self.hasher.update(message);
    }

    pub fn finalize(self) -> [u8; 32] {
        let digest = self.hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest[..32]);
        out
    }
}

/// A participant's Ed25519 signing key. Never serialized; stores receive it at
/// construction and keep it in memory only.
#[derive(Clone)]
pub struct SecretKey(SigningKey);

impl SecretKey {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        SecretKey(SigningKey::generate(rng))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        SecretKey(SigningKey::from_bytes(&bytes))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    pub fn address(&self) -> Address {
        self.public_key().address()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.0.sign(message))
    }
}

impl Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey(for {})", self.address())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        VerifyingKey::from_bytes(bytes).map(PublicKey).map_err(|_| CryptoError::BadPublicKey)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// The account address for this key: the last 20 bytes of a domain-separated
    /// hash of the key bytes.
    pub fn address(&self) -> Address {
        let mut transcript = Transcript::new(b"Penstock Address v1");
        transcript.append(b"public_key", self.to_bytes());
        let hash = transcript.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash[12..]);
        Address::new(bytes)
    }

    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
        self.0.verify(message, &signature.0).map_err(|_| CryptoError::BadSignature)
    }
}

impl Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        hex::encode(self.to_bytes()).serialize(s)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let hex_str = String::deserialize(de)?;
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&hex_str, &mut bytes)
            .map_err(|e| serde::de::Error::custom(format!("Invalid hex string: {e}")))?;
        PublicKey::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl Signature {
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Signature(ed25519_dalek::Signature::from_bytes(bytes))
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }
}

impl Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.to_bytes()))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        hex::encode(self.to_bytes()).serialize(s)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let hex_str = String::deserialize(de)?;
        let mut bytes = [0u8; 64];
        hex::decode_to_slice(&hex_str, &mut bytes)
            .map_err(|e| serde::de::Error::custom(format!("Invalid hex string: {e}")))?;
        Ok(Signature::from_bytes(&bytes))
    }
}

/// A signature over a state hash, carried together with the signer's public key so
/// that the signer's address can be recovered by any receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSignature {
    public_key: PublicKey,
    signature: Signature,
}

impl StateSignature {
    pub fn sign(key: &SecretKey, hash: &[u8; 32]) -> Self {
        StateSignature { public_key: key.public_key(), signature: key.sign(hash) }
    }

    /// Verifies the signature over `hash` and returns the signer's address.
    pub fn recover(&self, hash: &[u8; 32]) -> Result<Address, CryptoError> {
        self.public_key.verify(hash, &self.signature)?;
        Ok(self.public_key.address())
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(tag: u8) -> SecretKey {
        SecretKey::from_bytes([tag; 32])
    }

    #[test]
    fn sign_verify_recover() {
        let secret = key(1);
        let hash = [42u8; 32];
        let signature = StateSignature::sign(&secret, &hash);
        assert_eq!(signature.recover(&hash).unwrap(), secret.address());
    }

    #[test]
    fn recover_rejects_wrong_hash() {
        let secret = key(1);
        let signature = StateSignature::sign(&secret, &[42u8; 32]);
        assert_eq!(signature.recover(&[43u8; 32]), Err(CryptoError::BadSignature));
    }

    #[test]
    fn signing_is_deterministic() {
        let secret = key(2);
        let hash = [9u8; 32];
        let a = StateSignature::sign(&secret, &hash);
        let b = StateSignature::sign(&secret, &hash);
        assert_eq!(a, b);
    }

    #[test]
    fn addresses_are_stable_and_distinct() {
        let a = key(1).address();
        let b = key(2).address();
        assert_eq!(a, key(1).address());
        assert_ne!(a, b);
    }

    #[test]
    fn random_keys_get_distinct_addresses() {
        let mut rng = rand::thread_rng();
        let a = SecretKey::random(&mut rng);
        let b = SecretKey::random(&mut rng);
        assert_ne!(a.address(), b.address());
    }

    #[test]
    fn transcript_is_deterministic() {
        let mut a = Transcript::new(b"test");
        a.append(b"field", b"value");
        let mut b = Transcript::new(b"test");
        b.append(b"field", b"value");
        assert_eq!(a.finalize(), b.finalize());
    }

    #[test]
    fn transcript_separates_domains() {
        let mut a = Transcript::new(b"domain one");
        a.append(b"field", b"value");
        let mut b = Transcript::new(b"domain two");
        b.append(b"field", b"value");
        assert_ne!(a.finalize(), b.finalize());
    }

    #[test]
    fn transcript_length_prefixes_prevent_shifting() {
        // "ab" + "c" must hash differently from "a" + "bc"
        let mut a = Transcript::new(b"test");
        a.append(b"field", b"ab");
        a.append(b"field", b"c");
        let mut b = Transcript::new(b"test");
        b.append(b"field", b"a");
        b.append(b"field", b"bc");
        assert_ne!(a.finalize(), b.finalize());
    }

    #[test]
    fn public_key_serde_roundtrip() {
        let public = key(7).public_key();
        let encoded = ron::to_string(&public).unwrap();
        let decoded: PublicKey = ron::from_str(&encoded).unwrap();
        assert_eq!(decoded, public);
    }

    #[test]
    fn state_signature_serde_roundtrip() {
        let signature = StateSignature::sign(&key(3), &[5u8; 32]);
        let encoded = ron::to_string(&signature).unwrap();
        let decoded: StateSignature = ron::from_str(&encoded).unwrap();
        assert_eq!(decoded, signature);
        assert_eq!(decoded.recover(&[5u8; 32]).unwrap(), key(3).address());
    }
}
