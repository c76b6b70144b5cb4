//! Entity resolution
//!
//! Maps provider-native identifiers (chain types, contract addresses) to
//! catalog platform ids for the duration of one sync run, and lists the
//! identifiers to request from providers.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

use crate::error::SyncError;
use crate::models::platform::is_base_chain;
use crate::models::TokenRef;
use crate::services::repository::Repository;

lazy_static! {
    static ref EVM_ADDRESS: Regex = Regex::new(r"^0[xX][0-9a-fA-F]{40}$").unwrap();
}

/// Canonical form of a provider identifier.
///
/// EVM addresses are case-insensitive and compared lowercased; other formats
/// (base58 Solana mints, chain types) are kept as-is.
pub fn normalize_identifier(identifier: &str) -> String {
    let trimmed = identifier.trim();
    if EVM_ADDRESS.is_match(trimmed) {
        trimmed.to_lowercase()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedEntities {
    map: HashMap<String, i32>,
    list: Vec<TokenRef>,
}

impl ResolvedEntities {
    /// Platform id for a provider identifier. Unmapped identifiers are not an
    /// error: the catalog may legitimately omit them.
    pub fn resolve(&self, identifier: &str) -> Option<i32> {
        self.map
            .get(identifier)
            .or_else(|| self.map.get(&normalize_identifier(identifier)))
            .copied()
    }

    /// Identifiers to request from providers.
    pub fn list(&self) -> &[TokenRef] {
        &self.list
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub(crate) fn insert(&mut self, identifier: &str, entity_id: i32) {
        self.map.insert(normalize_identifier(identifier), entity_id);
    }
}

pub struct EntityResolver;

impl EntityResolver {
    /// Build the lookup for one run from the catalog.
    ///
    /// A catalog failure aborts the run; there is no partial resolver.
    pub async fn build(
        repo: &dyn Repository,
        types: &[&str],
        with_decimals: bool,
        with_address: bool,
    ) -> Result<ResolvedEntities, SyncError> {
        let entries = repo
            .query_catalog(types, with_decimals, with_address)
            .await
            .map_err(SyncError::Resolver)?;

        let mut resolved = ResolvedEntities::default();

        for entry in entries {
            if is_base_chain(&entry.entity_type) {
                resolved.insert(&entry.entity_type, entry.id);
            }

            let Some(address) = entry.address.as_deref() else {
                continue;
            };

            resolved.insert(address, entry.id);

            let address = normalize_identifier(address);
            if !with_decimals {
                resolved.list.push(TokenRef::new(address));
            } else if let Some(decimals) = entry.decimals {
                resolved.list.push(TokenRef {
                    address,
                    decimals: Some(decimals),
                });
            }
        }

        tracing::debug!(
            types = ?types,
            mapped = resolved.len(),
            requestable = resolved.list.len(),
            "Built entity resolver"
        );

        Ok(resolved)
    }
}
