use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(Coins::Table)
                    .add_column_if_not_exists(ColumnDef::new(Coins::CoingeckoId).string().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CoinMarkets::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CoinMarkets::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CoinMarkets::CoinId).integer().not_null())
                    .col(ColumnDef::new(CoinMarkets::Base).string().not_null())
                    .col(ColumnDef::new(CoinMarkets::Target).string().not_null())
                    .col(ColumnDef::new(CoinMarkets::Price).decimal().null())
                    .col(ColumnDef::new(CoinMarkets::Volume).decimal().null())
                    .col(ColumnDef::new(CoinMarkets::VolumeUsd).decimal().null())
                    .col(ColumnDef::new(CoinMarkets::MarketUid).string().not_null())
                    .col(ColumnDef::new(CoinMarkets::MarketName).string().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_coin_markets_coin_id")
                            .from(CoinMarkets::Table, CoinMarkets::CoinId)
                            .to(Coins::Table, Coins::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Rows are replaced per coin
        manager
            .create_index(
                Index::create()
                    .name("idx_coin_markets_coin_id")
                    .table(CoinMarkets::Table)
                    .col(CoinMarkets::CoinId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CoinMarkets::Table).to_owned())
            .await?;
        manager
            .alter_table(
                Table::alter()
                    .table(Coins::Table)
                    .drop_column(Coins::CoingeckoId)
                    .to_owned(),
            )
            .await
    }
}

#[derive(Iden)]
enum Coins {
    Table,
    Id,
    CoingeckoId,
}

#[derive(Iden)]
enum CoinMarkets {
    Table,
    Id,
    CoinId,
    Base,
    Target,
    Price,
    Volume,
    VolumeUsd,
    MarketUid,
    MarketName,
}
