//! `SeaORM` Entity for platforms table
//!
//! One row per on-chain representation of a coin. `(type, address)` is unique
//! when address is set; base chains have no address.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "platforms")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub coin_id: i32,
    /// Chain or token standard, e.g. "ethereum", "erc20", "bep20"
    #[sea_orm(column_name = "type")]
    pub r#type: String,
    pub chain_uid: Option<String>,
    pub address: Option<String>,
    pub decimals: Option<i32>,
    /// Per-platform circulating supply, written by the supply sync
    pub circulating_supply: Option<Decimal>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::coins::Entity",
        from = "Column::CoinId",
        to = "super::coins::Column::Id"
    )]
    Coins,
    #[sea_orm(has_many = "super::address_stats::Entity")]
    AddressStats,
}

impl Related<super::coins::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Coins.def()
    }
}

impl Related<super::address_stats::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AddressStats.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
