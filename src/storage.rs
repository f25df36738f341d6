//! Substrate storage keys and SCALE-encoded value types.
//!
//! Keys are built the way FRAME lays them out: `twox_128(pallet) ++
//! twox_128(item)` followed by one hashed segment per map key. Value types
//! mirror the on-chain layouts of the Staking and Identity pallets, decoded
//! with `parity-scale-codec`.

use crate::ss58::AccountId;
use blake2::digest::consts::U16;
use blake2::{Blake2b, Digest};
use codec::{Decode, Encode, Input};
use core::hash::Hasher as _;
use twox_hash::XxHash64;

pub const STAKING: &str = "Staking";
pub const IDENTITY: &str = "Identity";

/// Length of `twox_128(pallet) ++ twox_128(item)`
pub const PREFIX_LEN: usize = 32;

type Blake2b128 = Blake2b<U16>;

pub fn twox_64(data: &[u8]) -> [u8; 8] {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish().to_le_bytes()
}

pub fn twox_128(data: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (seed, chunk) in out.chunks_mut(8).enumerate() {
        let mut hasher = XxHash64::with_seed(seed as u64);
        hasher.write(data);
        chunk.copy_from_slice(&hasher.finish().to_le_bytes());
    }
    out
}

pub fn blake2_128(data: &[u8]) -> [u8; 16] {
    let digest = Blake2b128::digest(data);
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

/// Hashers used for map keys in the storage items we read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyHasher {
    Twox64Concat,
    Blake2_128Concat,
}

impl KeyHasher {
    fn hash_into(self, encoded: &[u8], key: &mut Vec<u8>) {
        match self {
            KeyHasher::Twox64Concat => key.extend_from_slice(&twox_64(encoded)),
            KeyHasher::Blake2_128Concat => key.extend_from_slice(&blake2_128(encoded)),
        }
        key.extend_from_slice(encoded);
    }
}

/// Key of a plain storage value, also the prefix of every entry of a map
pub fn storage_prefix(pallet: &str, item: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(PREFIX_LEN);
    key.extend_from_slice(&twox_128(pallet.as_bytes()));
    key.extend_from_slice(&twox_128(item.as_bytes()));
    key
}

/// Key (or partial-key prefix) of a map entry
pub fn map_key(pallet: &str, item: &str, segments: &[(KeyHasher, &[u8])]) -> Vec<u8> {
    let mut key = storage_prefix(pallet, item);
    for (hasher, encoded) in segments {
        hasher.hash_into(encoded, &mut key);
    }
    key
}

/// `Staking.<item>(era)` prefix shared by the era-keyed double maps
pub fn era_prefix(item: &str, era: u32) -> Vec<u8> {
    map_key(STAKING, item, &[(KeyHasher::Twox64Concat, &era.encode()[..])])
}

/// Recover `(era, account)` from a full `(Twox64Concat era, Twox64Concat
/// account)` double-map key.
pub fn decode_era_account_key(key: &[u8]) -> Option<(u32, AccountId)> {
    // prefix ++ twox64(era) ++ era ++ twox64(account) ++ account
    if key.len() != PREFIX_LEN + 8 + 4 + 8 + 32 {
        return None;
    }
    let era_start = PREFIX_LEN + 8;
    let era = u32::decode(&mut &key[era_start..era_start + 4]).ok()?;
    let account = AccountId::decode(&mut &key[key.len() - 32..]).ok()?;
    Some((era, account))
}

/// `Staking.ActiveEra`
#[derive(Debug, Clone, PartialEq, Eq, Decode)]
pub struct ActiveEraInfo {
    pub index: u32,
    pub start: Option<u64>,
}

/// `Staking.ErasRewardPoints(era)`; `individual` is a `BTreeMap` on chain,
/// which shares its encoding with a sorted vector of pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Decode)]
pub struct EraRewardPoints {
    pub total: u32,
    pub individual: Vec<(AccountId, u32)>,
}

/// `Staking.ErasValidatorPrefs(era, stash)`
#[derive(Debug, Clone, PartialEq, Eq, Decode)]
pub struct ValidatorPrefs {
    /// Perbill
    #[codec(compact)]
    pub commission: u32,
    pub blocked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Decode)]
pub struct IndividualExposure {
    pub who: AccountId,
    #[codec(compact)]
    pub value: u128,
}

/// `Staking.ErasStakers(era, stash)`
#[derive(Debug, Clone, PartialEq, Eq, Decode)]
pub struct Exposure {
    #[codec(compact)]
    pub total: u128,
    #[codec(compact)]
    pub own: u128,
    pub others: Vec<IndividualExposure>,
}

/// `Staking.ErasStakersOverview(era, stash)`
#[derive(Debug, Clone, PartialEq, Eq, Decode)]
pub struct PagedExposureMetadata {
    #[codec(compact)]
    pub total: u128,
    #[codec(compact)]
    pub own: u128,
    pub nominator_count: u32,
    pub page_count: u32,
}

/// `Staking.ErasStakersPaged(era, stash, page)`
#[derive(Debug, Clone, PartialEq, Eq, Decode)]
pub struct ExposurePage {
    #[codec(compact)]
    pub page_total: u128,
    pub others: Vec<IndividualExposure>,
}

/// `Staking.ValidatorSlashInEra(era, stash)`: slashed fraction and amount
pub type ValidatorSlash = (u32, u128);

/// Identity `Data`: raw bytes up to 32 long, or one of several hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityData {
    None,
    Raw(Vec<u8>),
    Hashed([u8; 32]),
}

impl IdentityData {
    /// UTF-8 text of a raw value; hashes and empty values yield `None`
    pub fn as_text(&self) -> Option<String> {
        match self {
            IdentityData::Raw(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            IdentityData::None | IdentityData::Hashed(_) => None,
        }
    }
}

impl Decode for IdentityData {
    fn decode<I: Input>(input: &mut I) -> Result<Self, codec::Error> {
        let tag = input.read_byte()?;
        match tag {
            0 => Ok(IdentityData::None),
            1..=33 => {
                let mut raw = vec![0u8; tag as usize - 1];
                input.read(&mut raw)?;
                Ok(IdentityData::Raw(raw))
            }
            34..=37 => {
                let mut hash = [0u8; 32];
                input.read(&mut hash)?;
                Ok(IdentityData::Hashed(hash))
            }
            _ => Err("Invalid identity Data tag".into()),
        }
    }
}

/// Registrar judgement; only decoded so the fields after it can be reached
#[derive(Debug, Clone, PartialEq, Eq, Decode)]
pub enum Judgement {
    Unknown,
    FeePaid(u128),
    Reasonable,
    KnownGood,
    OutOfDate,
    LowQuality,
    Erroneous,
}

/// Leading fields of `Identity.IdentityOf(account)` up to the display name.
///
/// Newer runtimes store `(Registration, Option<Username>)`; the registration
/// comes first either way and trailing fields are left unread.
#[derive(Debug, Clone, PartialEq, Eq, Decode)]
pub struct RegistrationHead {
    pub judgements: Vec<(u32, Judgement)>,
    pub deposit: u128,
    pub additional: Vec<(IdentityData, IdentityData)>,
    pub display: IdentityData,
}

/// `Identity.SuperOf(account)`: parent account and the name under it
pub type SuperOf = (AccountId, IdentityData);

/// Decode a value that may be followed by fields we do not model
pub fn decode_prefix<T: Decode>(bytes: &[u8]) -> Result<T, codec::Error> {
    T::decode(&mut &bytes[..])
}

/// Decode a value that must consume the whole input
pub fn decode_exact<T: Decode>(bytes: &[u8]) -> Result<T, codec::Error> {
    let mut input = bytes;
    let value = T::decode(&mut input)?;
    if !input.is_empty() {
        return Err("Trailing bytes after storage value".into());
    }
    Ok(value)
}
