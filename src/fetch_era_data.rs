//! Fetch the era-indexed staking data for a set of eras.
//!
//! The four batch queries run concurrently and their responses are matched
//! back to eras by the era each set carries, never by position.

use crate::chain::{ChainClient, ChainError};
use crate::schemas::{
    EraExposureSet, EraIndex, EraPointsSet, EraPreferencesSet, EraScoped, EraSlashesSet,
};
use std::collections::HashMap;
use tracing::{debug, info};

/// Everything known about one era before per-validator enrichment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EraData {
    pub era: EraIndex,
    pub points: EraPointsSet,
    pub preferences: EraPreferencesSet,
    pub slashes: EraSlashesSet,
    pub exposure: EraExposureSet,
}

/// Fetch points, preferences, slashes and exposure for `eras`.
///
/// Returns one [`EraData`] per requested era in the order given. Fails with
/// the first query error, or [`ChainError::MissingEraData`] when a query
/// returned no set for a requested era.
pub async fn fetch_era_data<C: ChainClient + ?Sized>(
    client: &C,
    eras: &[EraIndex],
) -> Result<Vec<EraData>, ChainError> {
    if eras.is_empty() {
        return Ok(Vec::new());
    }
    info!("Fetching staking data for {} eras", eras.len());

    let (points, preferences, slashes, exposure) = tokio::try_join!(
        client.eras_points(eras),
        client.eras_preferences(eras),
        client.eras_slashes(eras),
        client.eras_exposure(eras),
    )?;

    debug!(
        "Received {} points, {} preferences, {} slashes, {} exposure sets",
        points.len(),
        preferences.len(),
        slashes.len(),
        exposure.len()
    );

    let mut points = by_era(points);
    let mut preferences = by_era(preferences);
    let mut slashes = by_era(slashes);
    let mut exposure = by_era(exposure);

    eras.iter()
        .map(|&era| -> Result<EraData, ChainError> {
            Ok(EraData {
                era,
                points: take(&mut points, era, "points")?,
                preferences: take(&mut preferences, era, "preferences")?,
                slashes: take(&mut slashes, era, "slashes")?,
                exposure: take(&mut exposure, era, "exposure")?,
            })
        })
        .collect()
}

/// Index sets by era; the first set seen for an era wins
fn by_era<T: EraScoped>(sets: Vec<T>) -> HashMap<EraIndex, T> {
    let mut indexed = HashMap::with_capacity(sets.len());
    for set in sets {
        indexed.entry(set.era()).or_insert(set);
    }
    indexed
}

fn take<T>(
    sets: &mut HashMap<EraIndex, T>,
    era: EraIndex,
    set: &'static str,
) -> Result<T, ChainError> {
    sets.remove(&era)
        .ok_or(ChainError::MissingEraData { set, era })
}
