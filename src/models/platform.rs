use rust_decimal::Decimal;
use serde::Serialize;

/// Chain types keyed by type alone; every other platform is keyed by address.
pub const BASE_CHAINS: [&str; 7] = [
    "bitcoin",
    "ethereum",
    "bitcoin-cash",
    "dash",
    "dogecoin",
    "litecoin",
    "zcash",
];

pub fn is_base_chain(entity_type: &str) -> bool {
    BASE_CHAINS.contains(&entity_type)
}

/// Catalog row as seen by the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub id: i32,
    pub entity_type: String,
    pub address: Option<String>,
    pub decimals: Option<u32>,
}

/// A platform whose circulating supply may be recomputed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupplyCandidate {
    pub entity_id: i32,
    pub coin_uid: String,
    pub chain_uid: Option<String>,
    pub entity_type: String,
    pub address: Option<String>,
    pub decimals: Option<u32>,
    /// Circulating supply reported by the price source for the whole coin.
    pub reference_supply: Option<Decimal>,
    /// The coin is deployed on more than one platform.
    pub multi_chain: bool,
}

/// Group of entity types sharing one first-run backfill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityGroup {
    pub name: &'static str,
    pub types: Vec<&'static str>,
}

impl EntityGroup {
    pub fn new(name: &'static str, types: &[&'static str]) -> Self {
        Self {
            name,
            types: types.to_vec(),
        }
    }
}
