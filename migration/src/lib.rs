pub use sea_orm_migration::prelude::*;

mod m20260301_000001_create_catalog;
mod m20260301_000002_create_address_stats;
mod m20260301_000003_create_sync_status;
mod m20260301_000004_create_coin_markets;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_create_catalog::Migration),
            Box::new(m20260301_000002_create_address_stats::Migration),
            Box::new(m20260301_000003_create_sync_status::Migration),
            Box::new(m20260301_000004_create_coin_markets::Migration),
        ]
    }
}
