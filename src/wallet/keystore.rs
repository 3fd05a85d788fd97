// Key management

use crate::core::{double_sha256, hash160, Transaction};
use crate::error::{ChainError, Result};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::path::Path;
use std::fs;
use serde::{Serialize, Deserialize};

/// Version byte prefixed to the pubkey hash before Base58Check encoding
const ADDRESS_VERSION: u8 = 0x00;
const CHECKSUM_SIZE: usize = 4;

/// Base58Check address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub String);

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let hash = double_sha256(payload);
    [hash[0], hash[1], hash[2], hash[3]]
}

impl Address {
    /// Encode `0x00 ‖ hash ‖ checksum` in Base58
    pub fn from_pubkey_hash(hash: &[u8; 20]) -> Self {
        let mut payload = Vec::with_capacity(1 + 20 + CHECKSUM_SIZE);
        payload.push(ADDRESS_VERSION);
        payload.extend_from_slice(hash);
        let check = checksum(&payload);
        payload.extend_from_slice(&check);

        Self(bs58::encode(payload).into_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode back to the pubkey hash, checking version byte and checksum
    pub fn to_pubkey_hash(&self) -> Result<[u8; 20]> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| ChainError::Wallet(format!("invalid address {}: {}", self.0, e)))?;

        if bytes.len() != 1 + 20 + CHECKSUM_SIZE {
            return Err(ChainError::Wallet(format!("invalid address length: {}", bytes.len())));
        }
        let (payload, check) = bytes.split_at(1 + 20);
        if checksum(payload) != check {
            return Err(ChainError::Wallet(format!("bad address checksum: {}", self.0)));
        }
        if payload[0] != ADDRESS_VERSION {
            return Err(ChainError::Wallet(format!("unknown address version: {}", payload[0])));
        }

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload[1..]);
        Ok(hash)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key pair
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
    pub address: Address,
}

impl KeyPair {
    /// Generate a new key pair
    pub fn generate() -> Self {
        let secret_key = SecretKey::new(&mut OsRng);
        Self::from_secret_key(secret_key)
    }

    fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = secret_key.public_key(&secp);
        let address = Address::from_pubkey_hash(&hash160(&public_key.serialize()));

        Self {
            secret_key,
            public_key,
            address,
        }
    }

    fn from_secret_hex(secret: &str) -> Result<Self> {
        let bytes = hex::decode(secret)
            .map_err(|e| ChainError::Wallet(format!("invalid secret key hex: {}", e)))?;
        let secret_key = SecretKey::from_slice(&bytes)
            .map_err(|e| ChainError::Wallet(format!("invalid secret key: {}", e)))?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Compressed public key
    pub fn pubkey_bytes(&self) -> Vec<u8> {
        self.public_key.serialize().to_vec()
    }

    pub fn pubkey_hash(&self) -> [u8; 20] {
        hash160(&self.pubkey_bytes())
    }
}

#[derive(Serialize, Deserialize)]
struct StoredKey {
    secret_key: String,
}

#[derive(Serialize, Deserialize)]
struct StoredKeystore {
    keys: HashMap<Address, StoredKey>,
    default_address: Option<Address>,
}

/// Keystore - manages multiple key pairs, keyed by address
pub struct Keystore {
    keys: HashMap<Address, KeyPair>,
    default_address: Option<Address>,
}

impl Keystore {
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
            default_address: None,
        }
    }

    /// Generate a new address; the first one becomes the default
    pub fn new_address(&mut self) -> Address {
        let keypair = KeyPair::generate();
        let address = keypair.address.clone();

        if self.default_address.is_none() {
            self.default_address = Some(address.clone());
        }

        self.keys.insert(address.clone(), keypair);
        address
    }

    pub fn get_keypair(&self, address: &Address) -> Option<&KeyPair> {
        self.keys.get(address)
    }

    /// Key pair whose pubkey hash matches `pubkey_hash`
    pub fn keypair_for_hash(&self, pubkey_hash: &[u8]) -> Option<&KeyPair> {
        self.keys
            .values()
            .find(|kp| kp.pubkey_hash().as_slice() == pubkey_hash)
    }

    /// All addresses, sorted
    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.keys.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Pubkey hashes of every key, in address order
    pub fn pubkey_hashes(&self) -> Vec<[u8; 20]> {
        self.addresses()
            .iter()
            .filter_map(|addr| self.keys.get(addr))
            .map(|kp| kp.pubkey_hash())
            .collect()
    }

    pub fn default_address(&self) -> Option<&Address> {
        self.default_address.as_ref()
    }

    /// Sign `message` with the key behind `address`.
    ///
    /// Returns a 64-byte compact ECDSA signature over the double SHA-256 of the message.
    pub fn sign(&self, message: &[u8], address: &Address) -> Result<[u8; 64]> {
        let keypair = self
            .get_keypair(address)
            .ok_or_else(|| ChainError::Wallet(format!("no key for address {}", address)))?;

        let digest = Message::from_digest(double_sha256(message));
        let signature = Secp256k1::new().sign_ecdsa(&digest, &keypair.secret_key);
        Ok(signature.serialize_compact())
    }

    /// Sign every input of `tx`. `owners[i]` is the script_pubkey of the
    /// output spent by input `i`.
    pub fn sign_transaction(&self, tx: &mut Transaction, owners: &[Vec<u8>]) -> Result<()> {
        if owners.len() != tx.inputs.len() {
            return Err(ChainError::Wallet(format!(
                "{} owners for {} inputs",
                owners.len(),
                tx.inputs.len()
            )));
        }

        let mut script_sigs = Vec::with_capacity(owners.len());
        for (i, owner) in owners.iter().enumerate() {
            let keypair = self
                .keypair_for_hash(owner)
                .ok_or_else(|| ChainError::Wallet(format!("no key owns input {}", i)))?;
            let message = tx
                .signing_message(i, owner)
                .ok_or_else(|| ChainError::Wallet(format!("no input {}", i)))?;

            let mut script_sig = self.sign(&message, &keypair.address)?.to_vec();
            script_sig.extend_from_slice(&keypair.pubkey_bytes());
            script_sigs.push(script_sig);
        }

        for (input, script_sig) in tx.inputs.iter_mut().zip(script_sigs) {
            input.script_sig = script_sig;
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.keys.len()
    }

    /// Save keystore to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let data = StoredKeystore {
            keys: self
                .keys
                .iter()
                .map(|(addr, kp)| {
                    let stored = StoredKey {
                        secret_key: hex::encode(kp.secret_key.secret_bytes()),
                    };
                    (addr.clone(), stored)
                })
                .collect(),
            default_address: self.default_address.clone(),
        };

        fs::write(path, serde_json::to_string_pretty(&data)?)?;
        Ok(())
    }

    /// Load keystore from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let data: StoredKeystore = serde_json::from_str(&json)?;

        let mut keys = HashMap::new();
        for (addr, stored) in data.keys {
            let kp = KeyPair::from_secret_hex(&stored.secret_key)?;
            if kp.address != addr {
                return Err(ChainError::Wallet(format!("key does not match address {}", addr)));
            }
            keys.insert(addr, kp);
        }

        Ok(Self {
            keys,
            default_address: data.default_address,
        })
    }
}

impl Default for Keystore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::verify_input_signature;
    use crate::core::{Hash256, TxInput, TxOutput};

    #[test]
    fn test_keypair_generation() {
        let kp = KeyPair::generate();

        assert_eq!(kp.pubkey_bytes().len(), 33); // Compressed pubkey
        assert_eq!(kp.address.to_pubkey_hash().unwrap(), kp.pubkey_hash());
    }

    #[test]
    fn test_address_encoding() {
        // 0x00 version byte encodes as a leading '1'
        let addr = Address::from_pubkey_hash(&[0; 20]);
        assert_eq!(addr.as_str(), "1111111111111111111114oLvT2");
        assert_eq!(addr.to_pubkey_hash().unwrap(), [0; 20]);

        let hash = [0x12; 20];
        assert_eq!(Address::from_pubkey_hash(&hash).to_pubkey_hash().unwrap(), hash);
    }

    #[test]
    fn test_address_bad_checksum() {
        let addr = Address::from_pubkey_hash(&[0x12; 20]);
        let mut chars: Vec<char> = addr.0.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '2' { '3' } else { '2' };
        let tampered = Address(chars.into_iter().collect());

        assert!(tampered.to_pubkey_hash().is_err());
        assert!(Address("0OIl".to_string()).to_pubkey_hash().is_err());
    }

    #[test]
    fn test_keystore() {
        let mut ks = Keystore::new();
        assert_eq!(ks.count(), 0);
        assert!(ks.default_address().is_none());

        let addr1 = ks.new_address();
        let addr2 = ks.new_address();
        assert_eq!(ks.count(), 2);
        assert_eq!(ks.default_address(), Some(&addr1));
        assert!(ks.get_keypair(&addr2).is_some());

        let hash = ks.get_keypair(&addr2).unwrap().pubkey_hash();
        assert_eq!(ks.keypair_for_hash(&hash).unwrap().address, addr2);
        assert_eq!(ks.pubkey_hashes().len(), 2);
    }

    #[test]
    fn test_sign_is_compact() {
        let mut ks = Keystore::new();
        let addr = ks.new_address();

        let signature = ks.sign(b"message", &addr).unwrap();
        assert_eq!(signature.len(), 64);
        assert!(ks.sign(b"message", &Address::from_pubkey_hash(&[1; 20])).is_err());
    }

    #[test]
    fn test_sign_transaction_verifies() {
        let mut ks = Keystore::new();
        let addr = ks.new_address();
        let owner = ks.get_keypair(&addr).unwrap().pubkey_hash().to_vec();

        let mut tx = Transaction::new(
            vec![TxInput::new(Hash256::new([1; 32]), 0, vec![])],
            vec![TxOutput::new(10, vec![2; 20])],
        );
        ks.sign_transaction(&mut tx, std::slice::from_ref(&owner)).unwrap();

        assert!(verify_input_signature(&tx, 0, &owner).is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("keystore-{}.json", rand::random::<u64>()));
        let mut ks = Keystore::new();
        let addr = ks.new_address();
        ks.save(&path).unwrap();

        let loaded = Keystore::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.addresses(), vec![addr.clone()]);
        assert_eq!(loaded.default_address(), Some(&addr));
        assert_eq!(
            loaded.get_keypair(&addr).unwrap().pubkey_hash(),
            ks.get_keypair(&addr).unwrap().pubkey_hash()
        );
    }
}
