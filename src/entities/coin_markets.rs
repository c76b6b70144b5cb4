//! `SeaORM` Entity for coin_markets table
//!
//! Exchange tickers of a coin. The whole set is replaced on every sync.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "coin_markets")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub coin_id: i32,
    pub base: String,
    pub target: String,
    /// Last traded price, in `target` units
    pub price: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub volume_usd: Option<Decimal>,
    /// Exchange identifier at the source, e.g. "binance"
    pub market_uid: String,
    pub market_name: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::coins::Entity",
        from = "Column::CoinId",
        to = "super::coins::Column::Id"
    )]
    Coins,
}

impl Related<super::coins::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Coins.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
