//! `SeaORM` Entity for coins table
//!
//! Read-only catalog of tracked coins; filled by the catalog sync.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "coins")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub uid: String,
    /// Circulating supply reported by the price source
    pub circulating_supply: Option<Decimal>,
    /// Ticker source id; cleared once the source reports the coin gone
    pub coingecko_id: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::platforms::Entity")]
    Platforms,
    #[sea_orm(has_many = "super::coin_markets::Entity")]
    CoinMarkets,
}

impl Related<super::platforms::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Platforms.def()
    }
}

impl Related<super::coin_markets::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CoinMarkets.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
