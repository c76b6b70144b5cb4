use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Coins::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Coins::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Coins::Uid).string().not_null().unique_key())
                    .col(ColumnDef::new(Coins::CirculatingSupply).decimal().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Platforms::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Platforms::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Platforms::CoinId).integer().not_null())
                    .col(ColumnDef::new(Platforms::Type).string_len(50).not_null())
                    .col(ColumnDef::new(Platforms::ChainUid).string_len(100).null())
                    .col(ColumnDef::new(Platforms::Address).string().null())
                    .col(ColumnDef::new(Platforms::Decimals).integer().null())
                    .col(ColumnDef::new(Platforms::CirculatingSupply).decimal().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_platforms_coin_id")
                            .from(Platforms::Table, Platforms::CoinId)
                            .to(Coins::Table, Coins::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Postgres treats NULLs as distinct, so base chains (no address) never collide
        manager
            .create_index(
                Index::create()
                    .name("idx_platforms_type_address")
                    .table(Platforms::Table)
                    .col(Platforms::Type)
                    .col(Platforms::Address)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Platforms::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Coins::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Coins {
    Table,
    Id,
    Uid,
    CirculatingSupply,
}

#[derive(Iden)]
enum Platforms {
    Table,
    Id,
    CoinId,
    Type,
    ChainUid,
    Address,
    Decimals,
    CirculatingSupply,
}
