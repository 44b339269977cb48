//! Operator endpoints

use crate::CoordinatorClient;
use crate::error::Result;
use crawlmesh_core::dto::stats::CoordinatorStats;

impl CoordinatorClient {
    /// Check that the coordinator is up
    pub async fn health(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.check_status(response).await?;
        Ok(())
    }

    /// Snapshot of the route table
    pub async fn stats(&self) -> Result<CoordinatorStats> {
        let url = format!("{}/stats", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}
