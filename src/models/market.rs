use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Coin whose exchange tickers are synced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketCoin {
    pub id: i32,
    pub coingecko_id: String,
}

/// One exchange pair quoting a coin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTicker {
    pub base: String,
    pub target: String,
    pub price: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub volume_usd: Option<Decimal>,
    pub market_uid: String,
    pub market_name: String,
}
