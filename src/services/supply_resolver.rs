//! Circulating-supply resolution for multi-chain tokens
//!
//! Picks a per-platform supply source by priority, scales raw on-chain amounts
//! by decimals and clamps the result to the coin's reference supply. The
//! reference excludes locked supply that on-chain totals still count.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{RepoError, SyncError};
use crate::models::SupplyCandidate;
use crate::providers::{ScalarSource, StablecoinRegistry, StablecoinSupplies, TokenSupply};
use crate::services::repository::Repository;

/// Pause between two multi-chain lookups.
pub const DEFAULT_LOOKUP_DELAY: Duration = Duration::from_millis(100);

/// (coin uid, platform type) pairs that always take the reference supply.
const REFERENCE_OVERRIDES: [(&str, &str); 1] = [("stepn", "spl")];

const BINANCECOIN: &str = "binancecoin";

/// Largest number of significant digits a `Decimal` mantissa holds safely.
const MAX_DIGITS: usize = 28;

/// Scale an integer amount in smallest units down by `decimals`.
///
/// Digits beyond `Decimal` precision are truncated from the right. Returns
/// `None` for malformed input or amounts too large to represent.
pub fn scale_amount(raw: &str, decimals: u32) -> Option<Decimal> {
    let integer = raw.trim().split('.').next().unwrap_or_default();
    if integer.is_empty() || !integer.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let digits = integer.trim_start_matches('0');
    if digits.is_empty() {
        return Some(Decimal::ZERO);
    }

    let scale = decimals as usize;
    let excess = digits
        .len()
        .saturating_sub(MAX_DIGITS)
        .max(scale.saturating_sub(MAX_DIGITS));

    if excess > scale {
        return None;
    }
    if excess >= digits.len() {
        return Some(Decimal::ZERO);
    }

    let mantissa: i128 = digits[..digits.len() - excess].parse().ok()?;
    Decimal::try_from_i128_with_scale(mantissa, (scale - excess) as u32)
        .ok()
        .map(|d| d.normalize())
}

/// Never report more than the reference supply.
fn clamp(supply: Option<Decimal>, reference: Option<Decimal>) -> Option<Decimal> {
    match (supply, reference) {
        (Some(supply), Some(reference)) if supply > reference => Some(reference),
        (supply, _) => supply,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupplyReport {
    pub candidates: usize,
    pub updated: usize,
    pub unresolved: usize,
}

enum Lookup {
    Value(Option<Decimal>),
    /// Raw amount from a ledger source, with catalog decimals as fallback.
    Source(Arc<dyn ScalarSource>, Option<u32>),
}

pub struct SupplyResolver {
    repo: Arc<dyn Repository>,
    registry: Arc<dyn StablecoinRegistry>,
    explorers: HashMap<String, Arc<dyn ScalarSource>>,
    tron: Option<Arc<dyn ScalarSource>>,
    solana: Option<Arc<dyn ScalarSource>>,
    delay: Duration,
}

impl SupplyResolver {
    pub fn new(repo: Arc<dyn Repository>, registry: Arc<dyn StablecoinRegistry>) -> Self {
        Self {
            repo,
            registry,
            explorers: HashMap::new(),
            tron: None,
            solana: None,
            delay: DEFAULT_LOOKUP_DELAY,
        }
    }

    /// Register the explorer serving `chain_uid`.
    pub fn with_explorer(mut self, chain_uid: impl Into<String>, source: Arc<dyn ScalarSource>) -> Self {
        self.explorers.insert(chain_uid.into(), source);
        self
    }

    pub fn with_tron(mut self, source: Arc<dyn ScalarSource>) -> Self {
        self.tron = Some(source);
        self
    }

    pub fn with_solana(mut self, source: Arc<dyn ScalarSource>) -> Self {
        self.solana = Some(source);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn select(&self, candidate: &SupplyCandidate, stablecoins: &StablecoinSupplies) -> Lookup {
        if let Some(by_chain) = stablecoins.get(&candidate.coin_uid) {
            let supply = candidate
                .chain_uid
                .as_deref()
                .and_then(|chain| by_chain.get(chain))
                .copied();
            return Lookup::Value(supply);
        }

        let overridden = REFERENCE_OVERRIDES
            .iter()
            .any(|(uid, kind)| *uid == candidate.coin_uid && *kind == candidate.entity_type);
        if overridden {
            return Lookup::Value(candidate.reference_supply);
        }

        let Some(chain) = candidate.chain_uid.as_deref() else {
            return Lookup::Value(None);
        };

        if let Some(explorer) = self.explorers.get(chain) {
            // Explorers report raw totals only; catalog decimals are required
            if candidate.decimals.is_none() {
                return Lookup::Value(None);
            }
            return Lookup::Source(explorer.clone(), candidate.decimals);
        }

        match chain {
            "tron" => self
                .tron
                .clone()
                .map_or(Lookup::Value(None), |s| Lookup::Source(s, candidate.decimals)),
            "solana" => self
                .solana
                .clone()
                .map_or(Lookup::Value(None), |s| Lookup::Source(s, candidate.decimals)),
            BINANCECOIN if candidate.coin_uid != BINANCECOIN => Lookup::Value(candidate.reference_supply),
            _ => Lookup::Value(None),
        }
    }

    /// Circulating supply of one platform, or `None` when no source knows it.
    ///
    /// Provider failures are logged and resolve to `None`.
    pub async fn resolve(&self, candidate: &SupplyCandidate, stablecoins: &StablecoinSupplies) -> Option<Decimal> {
        let supply = match self.select(candidate, stablecoins) {
            Lookup::Value(value) => value,
            Lookup::Source(source, catalog_decimals) => {
                let address = candidate.address.as_deref()?;

                match source.fetch_scalar(address).await {
                    Ok(Some(TokenSupply { raw, decimals })) => {
                        decimals.or(catalog_decimals).and_then(|d| scale_amount(&raw, d))
                    }
                    Ok(None) => None,
                    Err(e) => {
                        tracing::warn!(
                            source = source.name(),
                            coin = %candidate.coin_uid,
                            address = %address,
                            error = %e,
                            "Failed to fetch token supply"
                        );
                        None
                    }
                }
            }
        };

        clamp(supply, candidate.reference_supply)
    }

    /// Recompute and store circulating supplies, optionally for some coins only.
    pub async fn sync(&self, uids: Option<&[String]>) -> Result<SupplyReport, SyncError> {
        let candidates = self.repo.query_supply_candidates(uids).await?;

        let stablecoins = match self.registry.circulating_by_chain().await {
            Ok(stablecoins) => stablecoins,
            Err(e) => {
                tracing::warn!(error = %e, "Stablecoin registry unavailable, continuing without it");
                StablecoinSupplies::new()
            }
        };

        let mut report = SupplyReport {
            candidates: candidates.len(),
            ..Default::default()
        };

        for candidate in &candidates {
            let Some(reference) = candidate.reference_supply else {
                continue;
            };

            let supply = if candidate.multi_chain {
                let supply = self.resolve(candidate, &stablecoins).await;
                tokio::time::sleep(self.delay).await;
                supply
            } else {
                Some(reference)
            };

            let Some(supply) = supply.filter(|s| !s.is_zero()) else {
                report.unresolved += 1;
                continue;
            };

            match self.repo.update_hint(candidate.entity_id, supply).await {
                Ok(()) => report.updated += 1,
                Err(e @ RepoError::Connection(_)) => return Err(e.into()),
                Err(e) => {
                    tracing::error!(entity_id = candidate.entity_id, error = %e, "Failed to update circulating supply");
                }
            }
        }

        tracing::info!(
            candidates = report.candidates,
            updated = report.updated,
            unresolved = report.unresolved,
            "Updated platform circulating supplies"
        );

        Ok(report)
    }
}
