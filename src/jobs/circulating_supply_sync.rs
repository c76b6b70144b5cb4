//! Circulating supply sync
//!
//! Refreshes the circulating-supply hint of every platform on each tick.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::SyncError;
use crate::jobs::scheduler::SyncTask;
use crate::models::SyncWindow;
use crate::services::supply_resolver::SupplyResolver;

pub const TASK_NAME: &str = "circulating_supply_sync";

pub struct CirculatingSupplySyncTask {
    resolver: Arc<SupplyResolver>,
}

impl CirculatingSupplySyncTask {
    pub fn new(resolver: Arc<SupplyResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl SyncTask for CirculatingSupplySyncTask {
    fn name(&self) -> &str {
        TASK_NAME
    }

    async fn incremental(&self, _window: &SyncWindow) -> Result<(), SyncError> {
        self.resolver.sync(None).await?;
        Ok(())
    }
}
