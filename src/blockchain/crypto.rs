use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{ecdsa::Signature, All, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use std::fmt;
use std::str::FromStr;

use super::transaction::{Transaction, TransactionError};

/// Shared secp256k1 context; building one is expensive.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// Represents a wallet address (uncompressed secp256k1 public key in hex)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    /// Creates a new address from a public key
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Address(hex::encode(public_key.serialize_uncompressed()))
    }

    /// Converts the address to a public key
    pub fn to_public_key(&self) -> Result<PublicKey, CryptoError> {
        let bytes = hex::decode(&self.0).map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        PublicKey::from_slice(&bytes).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address = Address(s.to_string());
        address.to_public_key()?;
        Ok(address)
    }
}

/// Represents a DER-encoded ECDSA signature in hex
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    /// Creates a new digital signature from a signature
    pub fn from_signature(signature: &Signature) -> Self {
        DigitalSignature(hex::encode(&*signature.serialize_der()))
    }

    /// Converts the digital signature to a signature
    pub fn to_signature(&self) -> Result<Signature, CryptoError> {
        let bytes = hex::decode(&self.0).map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        Signature::from_der(&bytes).map_err(|e| CryptoError::InvalidSignature(e.to_string()))
    }
}

/// Hex-encoded key material for one wallet.
///
/// The pair is a plain value: signing and verification are free functions that
/// take the key material as a parameter, so no live curve object is carried
/// around.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub public_key: String,
    pub private_key: String,
}

impl KeyPair {
    /// Generates a fresh secp256k1 key pair from the OS random number generator
    pub fn generate() -> Self {
        let secret_key = SecretKey::new(&mut OsRng);
        Self::from_secret_key(&secret_key)
    }

    /// Rebuilds a key pair from a hex-encoded private key
    pub fn from_private_key(private_key: &str) -> Result<Self, CryptoError> {
        let secret_key = parse_secret_key(private_key)?;
        Ok(Self::from_secret_key(&secret_key))
    }

    fn from_secret_key(secret_key: &SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, secret_key);

        KeyPair {
            public_key: hex::encode(public_key.serialize_uncompressed()),
            private_key: hex::encode(secret_key.secret_bytes()),
        }
    }

    /// The address owned by this key pair
    pub fn address(&self) -> Address {
        Address(self.public_key.clone())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Generates a fresh key pair
pub fn generate() -> KeyPair {
    KeyPair::generate()
}

/// Digest signed for a transfer: SHA-256 over sender, recipient and amount.
///
/// `id` and `timestamp` are not part of the digest, so the same transfer
/// re-created later signs to the same digest.
pub fn signing_digest(transaction: &Transaction) -> [u8; 32] {
    let mut hasher = Sha256::new();

    if let Some(from) = &transaction.from_address {
        hasher.update(from.0.as_bytes());
    }
    hasher.update(transaction.to_address.0.as_bytes());
    hasher.update(transaction.amount.to_string().as_bytes());

    hasher.finalize().into()
}

/// Signs a transaction's digest with a hex-encoded private key
///
/// # Arguments
///
/// * `private_key` - The signer's private key in hex
/// * `transaction` - The transaction to sign
///
/// # Returns
///
/// The DER-encoded signature in hex
pub fn sign(private_key: &str, transaction: &Transaction) -> Result<DigitalSignature, CryptoError> {
    let secret_key = parse_secret_key(private_key)?;
    let message = Message::from_digest(signing_digest(transaction));
    let signature = SECP256K1_CONTEXT.sign_ecdsa(&message, &secret_key);

    Ok(DigitalSignature::from_signature(&signature))
}

/// Verifies a transaction signature against a hex-encoded public key
///
/// A transaction without a sender is a coinbase credit and verifies
/// unconditionally. Any decoding failure counts as a rejection.
pub fn verify(public_key: &str, transaction: &Transaction, signature: &DigitalSignature) -> bool {
    if transaction.from_address.is_none() {
        return true;
    }

    let public_key = match Address(public_key.to_string()).to_public_key() {
        Ok(key) => key,
        Err(_) => return false,
    };

    let mut signature = match signature.to_signature() {
        Ok(signature) => signature,
        Err(_) => return false,
    };
    // Signers outside this crate may emit high-S signatures.
    signature.normalize_s();

    let message = Message::from_digest(signing_digest(transaction));

    SECP256K1_CONTEXT
        .verify_ecdsa(&message, &signature, &public_key)
        .is_ok()
}

fn parse_secret_key(private_key: &str) -> Result<SecretKey, CryptoError> {
    let bytes = hex::decode(private_key).map_err(|e| CryptoError::DecodingError(e.to_string()))?;

    SecretKey::from_slice(&bytes).map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))
}

/// Represents a wallet holding one key pair
#[derive(Debug, Clone)]
pub struct Wallet {
    key_pair: KeyPair,
    address: Address,
}

impl Wallet {
    /// Creates a new wallet with a random key pair
    pub fn new() -> Self {
        Self::from_key_pair(KeyPair::generate())
    }

    /// Creates a wallet from an existing hex-encoded private key
    pub fn from_private_key(private_key: &str) -> Result<Self, CryptoError> {
        Ok(Self::from_key_pair(KeyPair::from_private_key(private_key)?))
    }

    fn from_key_pair(key_pair: KeyPair) -> Self {
        let address = key_pair.address();
        Wallet { key_pair, address }
    }

    /// Gets the wallet's address
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Gets the wallet's key material
    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// Signs a transaction sent from this wallet
    ///
    /// # Arguments
    ///
    /// * `transaction` - The transaction to sign
    ///
    /// # Returns
    ///
    /// The signature, or an error if the wallet is not the transaction's sender
    pub fn sign(&self, transaction: &Transaction) -> Result<DigitalSignature, TransactionError> {
        match &transaction.from_address {
            None => Err(TransactionError::CoinbaseNotSignable),
            Some(from) if from != &self.address => Err(TransactionError::SenderMismatch),
            Some(_) => Ok(sign(&self.key_pair.private_key, transaction)?),
        }
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}
