//! Build per-validator records for one era.
//!
//! The era's points set defines which validators are reported. Each one is
//! joined with its exposure, commission and slashes, and with its current
//! controller and identity, looked up live from the chain.

use crate::chain::{ChainClient, ChainError};
use crate::config::ChainConfig;
use crate::fetch_era_data::EraData;
use crate::schemas::{Identity, ValidatorEraRecord};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info};

/// Enrich every validator in `data.points`, at most `concurrency` at a time.
/// Records come back in points order; any failed lookup fails the era.
pub async fn enrich_era<C: ChainClient + ?Sized>(
    client: &C,
    chain: &ChainConfig,
    data: &EraData,
    concurrency: usize,
) -> Result<Vec<ValidatorEraRecord>, ChainError> {
    debug!(
        "Enriching {} validators for era {}",
        data.points.individual.len(),
        data.era
    );

    let records: Vec<ValidatorEraRecord> = stream::iter(&data.points.individual)
        .map(|(validator, points)| enrich_validator(client, data, validator, *points))
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    let total_stake: u128 = records.iter().map(|r| r.exposure.total).sum();
    let slashed = records.iter().filter(|r| !r.slashes.is_empty()).count();
    info!(
        "Era {}: {} validators, {} points, {} backing stake, {} slashed",
        data.era,
        records.len(),
        data.points.total,
        chain.format_balance(total_stake),
        slashed
    );

    Ok(records)
}

async fn enrich_validator<C: ChainClient + ?Sized>(
    client: &C,
    data: &EraData,
    validator: &str,
    era_points: u32,
) -> Result<ValidatorEraRecord, ChainError> {
    let (controller, identity) =
        tokio::try_join!(client.controller(validator), client.identity(validator))?;

    Ok(ValidatorEraRecord {
        era: data.era,
        validator_address: validator.to_string(),
        controller_address: controller.unwrap_or_default(),
        display_name: display_name(&identity),
        era_points,
        exposure: data
            .exposure
            .validators
            .get(validator)
            .cloned()
            .unwrap_or_default(),
        commission: data
            .preferences
            .validators
            .get(validator)
            .map(|prefs| prefs.commission)
            .unwrap_or(0),
        slashes: data
            .slashes
            .validators
            .get(validator)
            .cloned()
            .unwrap_or_default(),
    })
}

/// `"parent / child"` for sub-identities, else the account's own name, else
/// empty. Line breaks are removed so the name fits a single CSV field.
pub fn display_name(identity: &Identity) -> String {
    let child = clean(identity.display.as_deref());
    let parent = clean(identity.display_parent.as_deref());

    if !parent.is_empty() && !child.is_empty() {
        format!("{} / {}", parent, child)
    } else {
        child
    }
}

fn clean(name: Option<&str>) -> String {
    name.unwrap_or_default()
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .collect()
}
