use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AddressStats::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AddressStats::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AddressStats::PlatformId).integer().not_null())
                    .col(
                        ColumnDef::new(AddressStats::Date)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AddressStats::Period).string_len(8).not_null())
                    .col(ColumnDef::new(AddressStats::Count).decimal().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_address_stats_platform_id")
                            .from(AddressStats::Table, AddressStats::PlatformId)
                            .to(Platforms::Table, Platforms::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Conflict target of the bulk upsert
        manager
            .create_index(
                Index::create()
                    .name("idx_address_stats_platform_date_period")
                    .table(AddressStats::Table)
                    .col(AddressStats::PlatformId)
                    .col(AddressStats::Date)
                    .col(AddressStats::Period)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Eviction scans by period and date
        manager
            .create_index(
                Index::create()
                    .name("idx_address_stats_period_date")
                    .table(AddressStats::Table)
                    .col(AddressStats::Period)
                    .col(AddressStats::Date)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AddressStats::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum AddressStats {
    Table,
    Id,
    PlatformId,
    Date,
    Period,
    Count,
}

#[derive(Iden)]
enum Platforms {
    Table,
    Id,
}
