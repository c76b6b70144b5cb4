pub mod market;
pub mod metric;
pub mod platform;
pub mod sync_window;

pub use market::{MarketCoin, MarketTicker};
pub use metric::{Direction, MetricKey, MetricRecord, ProviderRow, TokenRef, TransferRow};
pub use platform::{CatalogEntry, EntityGroup, SupplyCandidate, BASE_CHAINS};
pub use sync_window::{SyncInterval, SyncWindow};
