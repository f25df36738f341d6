//! Substrate account identifiers and SS58 address handling.
//!
//! Provides the 32-byte account id decoded from chain storage and its
//! network-specific SS58 string form.

use blake2::{Blake2b512, Digest};
use codec::{Decode, Encode};
use thiserror::Error;

/// Prefix mixed into the SS58 checksum preimage
const SS58_CHECKSUM_PREFIX: &[u8] = b"SS58PRE";

/// Number of checksum bytes appended to 32-byte account ids
const CHECKSUM_LEN: usize = 2;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid base58 in address: {0}")]
    InvalidBase58(String),

    #[error("Address has unexpected length: {0}")]
    InvalidLength(String),

    #[error("Invalid checksum for address: {0}")]
    InvalidChecksum(String),

    #[error("Unsupported SS58 prefix {0}")]
    UnsupportedPrefix(u16),
}

/// Raw 32-byte account id as stored on chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
    /// Parse an SS58 address, accepting any network prefix
    pub fn from_ss58(input: &str) -> Result<(Self, u16), AddressError> {
        let trimmed = input.trim();
        let bytes = bs58::decode(trimmed)
            .into_vec()
            .map_err(|_| AddressError::InvalidBase58(input.to_string()))?;

        let (prefix, prefix_len) = match bytes.first() {
            Some(&first) if first < 64 => (first as u16, 1),
            Some(&first) if first < 128 => {
                let second = *bytes
                    .get(1)
                    .ok_or_else(|| AddressError::InvalidLength(input.to_string()))?;
                let lower = ((first & 0b0011_1111) << 2) | (second >> 6);
                let upper = second & 0b0011_1111;
                (lower as u16 | ((upper as u16) << 8), 2)
            }
            Some(_) => return Err(AddressError::InvalidBase58(input.to_string())),
            None => return Err(AddressError::InvalidLength(input.to_string())),
        };

        if bytes.len() != prefix_len + 32 + CHECKSUM_LEN {
            return Err(AddressError::InvalidLength(input.to_string()));
        }

        let body_len = prefix_len + 32;
        let checksum = ss58_checksum(&bytes[..body_len]);
        if bytes[body_len..] != checksum {
            return Err(AddressError::InvalidChecksum(input.to_string()));
        }

        let mut raw = [0u8; 32];
        raw.copy_from_slice(&bytes[prefix_len..body_len]);
        Ok((Self(raw), prefix))
    }

    /// Encode as an SS58 address for the given network prefix
    pub fn to_ss58(&self, prefix: u16) -> Result<String, AddressError> {
        let mut body = match prefix {
            0..=63 => vec![prefix as u8],
            64..=16_383 => {
                let first = ((prefix & 0b0000_0000_1111_1100) as u8) >> 2;
                let second = ((prefix >> 8) as u8) | (((prefix & 0b0000_0000_0000_0011) as u8) << 6);
                vec![first | 0b0100_0000, second]
            }
            _ => return Err(AddressError::UnsupportedPrefix(prefix)),
        };
        body.extend_from_slice(&self.0);

        let checksum = ss58_checksum(&body);
        body.extend_from_slice(&checksum);
        Ok(bs58::encode(body).into_string())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl From<[u8; 32]> for AccountId {
    fn from(raw: [u8; 32]) -> Self {
        Self(raw)
    }
}

fn ss58_checksum(body: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut hasher = Blake2b512::new();
    hasher.update(SS58_CHECKSUM_PREFIX);
    hasher.update(body);
    let digest = hasher.finalize();

    let mut checksum = [0u8; CHECKSUM_LEN];
    checksum.copy_from_slice(&digest[..CHECKSUM_LEN]);
    checksum
}
