//! Chain access for the exporter.
//!
//! [`ChainClient`] is the seam between the pipeline and a node: era listing,
//! era-indexed batch queries, and live per-account lookups. [`SubstrateChain`]
//! implements it over [`SubstrateRpcClient`], decoding SCALE storage into the
//! typed sets of [`crate::schemas`] exactly once.

use crate::config::{ChainConfig, ExporterConfig};
use crate::rpc::{RpcError, SubstrateRpcClient};
use crate::schemas::{
    EraExposureSet, EraIndex, EraPointsSet, EraPreferencesSet, EraSlashesSet, Exposure, Identity,
    SlashRecord, ValidatorPreferences,
};
use crate::ss58::{AccountId, AddressError};
use crate::storage::{
    self, ActiveEraInfo, EraRewardPoints, ExposurePage, IdentityData, IndividualExposure,
    KeyHasher, PagedExposureMetadata, RegistrationHead, SuperOf, ValidatorPrefs, ValidatorSlash,
    IDENTITY, STAKING,
};
use async_trait::async_trait;
use codec::{Decode, Encode};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

/// Eras whose double maps are enumerated concurrently
const ERA_QUERY_CONCURRENCY: usize = 8;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: codec::Error,
    },

    #[error("Invalid hex in storage response: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Invalid address: {0}")]
    Address(#[from] AddressError),

    #[error("Unexpected storage key {0}")]
    UnexpectedKey(String),

    #[error("Staking.ActiveEra is not set")]
    NoActiveEra,

    #[error("No {set} data returned for era {era}")]
    MissingEraData { set: &'static str, era: EraIndex },

    #[error("Lookup failed: {0}")]
    Lookup(String),
}

/// Read-only view of a staking chain used by the export pipeline.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// All eras with retained staking history, ascending, excluding the active era
    async fn eras_historic(&self) -> Result<Vec<EraIndex>, ChainError>;

    async fn eras_points(&self, eras: &[EraIndex]) -> Result<Vec<EraPointsSet>, ChainError>;

    async fn eras_preferences(
        &self,
        eras: &[EraIndex],
    ) -> Result<Vec<EraPreferencesSet>, ChainError>;

    async fn eras_slashes(&self, eras: &[EraIndex]) -> Result<Vec<EraSlashesSet>, ChainError>;

    async fn eras_exposure(&self, eras: &[EraIndex]) -> Result<Vec<EraExposureSet>, ChainError>;

    /// Current controller of `stash`, if bonded
    async fn controller(&self, stash: &str) -> Result<Option<String>, ChainError>;

    /// Current identity names of `account`
    async fn identity(&self, account: &str) -> Result<Identity, ChainError>;
}

/// [`ChainClient`] backed by a Substrate node's JSON-RPC storage API.
pub struct SubstrateChain {
    rpc: SubstrateRpcClient,
    ss58_prefix: u16,
    history_depth: u32,
    at: String,
}

impl SubstrateChain {
    /// Connect to the network's node and pin reads to its finalized head.
    pub async fn connect(chain: &ChainConfig, config: &ExporterConfig) -> Result<Self, ChainError> {
        let rpc = SubstrateRpcClient::new(chain.http_endpoint(), config.rate_limits.clone())?;

        let (name, node_name, version, at) = tokio::try_join!(
            rpc.system_chain(),
            rpc.system_name(),
            rpc.system_version(),
            rpc.finalized_head(),
        )?;

        info!(
            "Connected to chain {} using {} ({} v{})",
            name,
            rpc.url(),
            node_name,
            version
        );
        debug!("Pinned storage reads to finalized block {}", at);

        Ok(Self {
            rpc,
            ss58_prefix: chain.ss58_prefix,
            history_depth: config.history_depth,
            at,
        })
    }

    /// Block hash every storage read is made at
    pub fn at_block(&self) -> &str {
        &self.at
    }

    fn address(&self, account: &AccountId) -> Result<String, ChainError> {
        Ok(account.to_ss58(self.ss58_prefix)?)
    }

    fn account(&self, address: &str) -> Result<AccountId, ChainError> {
        let (account, _) = AccountId::from_ss58(address)?;
        Ok(account)
    }

    async fn read<T: Decode>(&self, key: &[u8], what: &'static str) -> Result<Option<T>, ChainError> {
        match self.rpc.get_storage(key, &self.at).await? {
            Some(value) => Ok(Some(decode_hex(&value, what)?)),
            None => Ok(None),
        }
    }

    /// Every `(stash, value)` of a `(era, stash)` double map for one era.
    async fn read_era_map<T: Decode>(
        &self,
        item: &'static str,
        era: EraIndex,
    ) -> Result<Vec<(AccountId, T)>, ChainError> {
        let keys = self
            .rpc
            .get_keys(&storage::era_prefix(item, era), &self.at)
            .await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let values = self.rpc.query_storage_at(&keys, &self.at).await?;
        let mut entries = Vec::with_capacity(values.len());
        for (key, value) in values {
            let Some(value) = value else { continue };
            let raw_key = hex::decode(key.trim_start_matches("0x"))?;
            let (_, account) = storage::decode_era_account_key(&raw_key)
                .ok_or_else(|| ChainError::UnexpectedKey(key.clone()))?;
            entries.push((account, decode_hex(&value, item)?));
        }

        debug!("{}({}) has {} entries", item, era, entries.len());
        Ok(entries)
    }

    /// Run `per_era` for every era concurrently. Sets are yielded in
    /// completion order, each tagged with its era.
    async fn for_each_era<'a, T, F, Fut>(
        &'a self,
        eras: &[EraIndex],
        per_era: F,
    ) -> Result<Vec<T>, ChainError>
    where
        F: Fn(EraIndex) -> Fut,
        Fut: std::future::Future<Output = Result<T, ChainError>> + 'a,
    {
        stream::iter(eras.iter().copied().map(per_era))
            .buffer_unordered(ERA_QUERY_CONCURRENCY)
            .try_collect()
            .await
    }

    fn others(&self, others: Vec<IndividualExposure>) -> Result<Vec<(String, u128)>, ChainError> {
        others
            .into_iter()
            .map(|nominator| -> Result<_, ChainError> {
                Ok((self.address(&nominator.who)?, nominator.value))
            })
            .collect()
    }

    async fn era_exposure(&self, era: EraIndex) -> Result<EraExposureSet, ChainError> {
        let mut validators = HashMap::new();

        let legacy: Vec<(AccountId, storage::Exposure)> =
            self.read_era_map("ErasStakers", era).await?;
        if !legacy.is_empty() {
            for (stash, exposure) in legacy {
                validators.insert(
                    self.address(&stash)?,
                    Exposure {
                        own: exposure.own,
                        total: exposure.total,
                        others: self.others(exposure.others)?,
                    },
                );
            }
            return Ok(EraExposureSet { era, validators });
        }

        // Paged exposures: overview per stash, nominators split across pages
        let overviews: Vec<(AccountId, PagedExposureMetadata)> =
            self.read_era_map("ErasStakersOverview", era).await?;

        let mut page_keys = Vec::new();
        let mut page_owners = Vec::new();
        for (index, (stash, overview)) in overviews.iter().enumerate() {
            for page in 0..overview.page_count {
                page_keys.push(storage::map_key(
                    STAKING,
                    "ErasStakersPaged",
                    &[
                        (KeyHasher::Twox64Concat, &era.encode()[..]),
                        (KeyHasher::Twox64Concat, &stash.as_bytes()[..]),
                        (KeyHasher::Twox64Concat, &page.encode()[..]),
                    ],
                ));
                page_owners.push(index);
            }
        }

        let pages = self
            .rpc
            .batch_get_storage(&page_keys, &self.at)
            .await?
            .into_iter()
            .map(|page| page.map(|page| decode_hex(&page, "ErasStakersPaged")).transpose())
            .collect::<Result<Vec<Option<ExposurePage>>, ChainError>>()?;
        let others_by_stash = merge_pages(overviews.len(), &page_owners, pages);

        for ((stash, overview), others) in overviews.into_iter().zip(others_by_stash) {
            validators.insert(
                self.address(&stash)?,
                Exposure {
                    own: overview.own,
                    total: overview.total,
                    others: self.others(others)?,
                },
            );
        }

        Ok(EraExposureSet { era, validators })
    }

    async fn display_of(&self, account: &AccountId) -> Result<Option<String>, ChainError> {
        let key = storage::map_key(
            IDENTITY,
            "IdentityOf",
            &[(KeyHasher::Twox64Concat, &account.as_bytes()[..])],
        );
        let Some(value) = self.rpc.get_storage(&key, &self.at).await? else {
            return Ok(None);
        };
        let bytes = hex::decode(value.trim_start_matches("0x"))?;
        let head: RegistrationHead =
            storage::decode_prefix(&bytes).map_err(|source| ChainError::Decode {
                what: "IdentityOf",
                source,
            })?;
        Ok(head.display.as_text())
    }
}

#[async_trait]
impl ChainClient for SubstrateChain {
    async fn eras_historic(&self) -> Result<Vec<EraIndex>, ChainError> {
        let active: ActiveEraInfo = self
            .read(&storage::storage_prefix(STAKING, "ActiveEra"), "ActiveEra")
            .await?
            .ok_or(ChainError::NoActiveEra)?;

        Ok(historic_eras(active.index, self.history_depth))
    }

    async fn eras_points(&self, eras: &[EraIndex]) -> Result<Vec<EraPointsSet>, ChainError> {
        let keys: Vec<Vec<u8>> = eras
            .iter()
            .map(|era| storage::era_prefix("ErasRewardPoints", *era))
            .collect();
        let values = self.rpc.batch_get_storage(&keys, &self.at).await?;

        eras.iter()
            .zip(values)
            .map(|(era, value)| -> Result<EraPointsSet, ChainError> {
                let points: EraRewardPoints = match value {
                    Some(value) => decode_hex(&value, "ErasRewardPoints")?,
                    None => EraRewardPoints::default(),
                };
                let individual = points
                    .individual
                    .iter()
                    .map(|(account, points)| -> Result<_, ChainError> {
                        Ok((self.address(account)?, *points))
                    })
                    .collect::<Result<Vec<_>, ChainError>>()?;
                Ok(EraPointsSet {
                    era: *era,
                    total: points.total,
                    individual,
                })
            })
            .collect()
    }

    async fn eras_preferences(
        &self,
        eras: &[EraIndex],
    ) -> Result<Vec<EraPreferencesSet>, ChainError> {
        self.for_each_era(eras, |era| async move {
            let entries: Vec<(AccountId, ValidatorPrefs)> =
                self.read_era_map("ErasValidatorPrefs", era).await?;
            let mut validators = HashMap::with_capacity(entries.len());
            for (stash, prefs) in entries {
                validators.insert(
                    self.address(&stash)?,
                    ValidatorPreferences {
                        commission: prefs.commission,
                        blocked: prefs.blocked,
                    },
                );
            }
            Ok(EraPreferencesSet { era, validators })
        })
        .await
    }

    async fn eras_slashes(&self, eras: &[EraIndex]) -> Result<Vec<EraSlashesSet>, ChainError> {
        self.for_each_era(eras, |era| async move {
            let entries: Vec<(AccountId, ValidatorSlash)> =
                self.read_era_map("ValidatorSlashInEra", era).await?;
            let mut validators: HashMap<String, Vec<SlashRecord>> = HashMap::new();
            for (stash, (fraction, amount)) in entries {
                validators
                    .entry(self.address(&stash)?)
                    .or_default()
                    .push(SlashRecord { fraction, amount });
            }
            Ok(EraSlashesSet { era, validators })
        })
        .await
    }

    async fn eras_exposure(&self, eras: &[EraIndex]) -> Result<Vec<EraExposureSet>, ChainError> {
        self.for_each_era(eras, |era| self.era_exposure(era)).await
    }

    async fn controller(&self, stash: &str) -> Result<Option<String>, ChainError> {
        let account = self.account(stash)?;
        let key = storage::map_key(
            STAKING,
            "Bonded",
            &[(KeyHasher::Twox64Concat, &account.as_bytes()[..])],
        );
        let controller: Option<AccountId> = self.read(&key, "Bonded").await?;
        controller.map(|c| self.address(&c)).transpose()
    }

    async fn identity(&self, address: &str) -> Result<Identity, ChainError> {
        let account = self.account(address)?;
        let super_key = storage::map_key(
            IDENTITY,
            "SuperOf",
            &[(KeyHasher::Blake2_128Concat, &account.as_bytes()[..])],
        );

        let (own_display, super_of) = tokio::try_join!(
            self.display_of(&account),
            self.read::<SuperOf>(&super_key, "SuperOf"),
        )?;

        let parent_display = match &super_of {
            Some((parent, _)) => self.display_of(parent).await?,
            None => None,
        };

        Ok(resolve_identity(
            own_display,
            super_of.map(|(_, name)| name),
            parent_display,
        ))
    }
}

/// Group nominators of paged exposures by stash. `page_owners[i]` is the
/// index of the stash `pages[i]` belongs to; missing pages are skipped.
fn merge_pages(
    stashes: usize,
    page_owners: &[usize],
    pages: Vec<Option<ExposurePage>>,
) -> Vec<Vec<IndividualExposure>> {
    let mut others_by_stash = vec![Vec::new(); stashes];
    for (&owner, page) in page_owners.iter().zip(pages) {
        if let Some(page) = page {
            others_by_stash[owner].extend(page.others);
        }
    }
    others_by_stash
}

/// A sub-identity is named by its entry under the parent, with the parent's
/// own display alongside. Otherwise the account's own display is used.
fn resolve_identity(
    own_display: Option<String>,
    sub_name: Option<IdentityData>,
    parent_display: Option<String>,
) -> Identity {
    match sub_name {
        Some(name) => Identity {
            display: name.as_text(),
            display_parent: parent_display,
        },
        None => Identity {
            display: own_display,
            display_parent: None,
        },
    }
}

/// Eras `[active - depth, active - 1]`, clamped at zero, ascending
pub fn historic_eras(active: EraIndex, history_depth: u32) -> Vec<EraIndex> {
    (active.saturating_sub(history_depth)..active).collect()
}

fn decode_hex<T: Decode>(value: &str, what: &'static str) -> Result<T, ChainError> {
    let bytes = hex::decode(value.trim_start_matches("0x"))?;
    storage::decode_exact(&bytes).map_err(|source| ChainError::Decode { what, source })
}

/// In-memory [`ChainClient`] for pipeline and fetcher tests.
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct MockChain {
        pub eras: Vec<EraIndex>,
        pub points: Vec<EraPointsSet>,
        pub preferences: Vec<EraPreferencesSet>,
        pub slashes: Vec<EraSlashesSet>,
        pub exposure: Vec<EraExposureSet>,
        pub controllers: HashMap<String, String>,
        pub identities: HashMap<String, Identity>,
        /// Accounts whose lookups fail
        pub failing: Vec<String>,
        /// Batch query (`"points"`, `"preferences"`, `"slashes"`, `"exposure"`) that fails
        pub failing_query: Option<&'static str>,
        pub lookups: AtomicUsize,
    }

    impl MockChain {
        fn check(&self, account: &str) -> Result<(), ChainError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.failing.iter().any(|a| a == account) {
                return Err(ChainError::Lookup(account.to_string()));
            }
            Ok(())
        }

        fn query<T: Clone + crate::schemas::EraScoped>(
            &self,
            name: &'static str,
            sets: &[T],
            eras: &[EraIndex],
        ) -> Result<Vec<T>, ChainError> {
            if self.failing_query == Some(name) {
                return Err(ChainError::Lookup(format!("{} query", name)));
            }
            Ok(for_eras(sets, eras))
        }
    }

    fn for_eras<T: Clone + crate::schemas::EraScoped>(sets: &[T], eras: &[EraIndex]) -> Vec<T> {
        // reversed so callers cannot rely on positional order
        sets.iter()
            .rev()
            .filter(|set| eras.contains(&set.era()))
            .cloned()
            .collect()
    }

    #[async_trait]
    impl ChainClient for MockChain {
        async fn eras_historic(&self) -> Result<Vec<EraIndex>, ChainError> {
            Ok(self.eras.clone())
        }

        async fn eras_points(&self, eras: &[EraIndex]) -> Result<Vec<EraPointsSet>, ChainError> {
            self.query("points", &self.points, eras)
        }

        async fn eras_preferences(
            &self,
            eras: &[EraIndex],
        ) -> Result<Vec<EraPreferencesSet>, ChainError> {
            self.query("preferences", &self.preferences, eras)
        }

        async fn eras_slashes(&self, eras: &[EraIndex]) -> Result<Vec<EraSlashesSet>, ChainError> {
            self.query("slashes", &self.slashes, eras)
        }

        async fn eras_exposure(
            &self,
            eras: &[EraIndex],
        ) -> Result<Vec<EraExposureSet>, ChainError> {
            self.query("exposure", &self.exposure, eras)
        }

        async fn controller(&self, stash: &str) -> Result<Option<String>, ChainError> {
            self.check(stash)?;
            Ok(self.controllers.get(stash).cloned())
        }

        async fn identity(&self, account: &str) -> Result<Identity, ChainError> {
            self.check(account)?;
            Ok(self.identities.get(account).cloned().unwrap_or_default())
        }
    }

    /// Sets for `eras` with nothing in them
    pub fn empty_sets(chain: &mut MockChain, eras: &[EraIndex]) {
        for &era in eras {
            chain.points.push(EraPointsSet { era, ..Default::default() });
            chain.preferences.push(EraPreferencesSet { era, ..Default::default() });
            chain.slashes.push(EraSlashesSet { era, ..Default::default() });
            chain.exposure.push(EraExposureSet { era, ..Default::default() });
        }
    }
}
