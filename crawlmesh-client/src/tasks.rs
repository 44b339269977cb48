//! Task and result endpoints

use crate::error::{ClientError, Result};
use crate::{CoordinatorClient, rejected, reply_data};
use crawlmesh_core::dto::rpc::{ClientRequest, WorkerRequest};
use crawlmesh_core::{Dispatch, ResultCode, TaskMeta, TaskResult};

impl CoordinatorClient {
    // =============================================================================
    // Crawler Side
    // =============================================================================

    /// Submit a meta to its client's queue
    ///
    /// # Returns
    /// `SUCCESS`, or the admission code (`TASK_QUEUE_FULL`,
    /// `CLIENT_NOT_FOUND`) telling the caller to wait or re-push.
    pub async fn add_meta(&self, meta: &TaskMeta) -> Result<ResultCode> {
        let response = self
            .client
            .post(self.rpc_url("AddMeta"))
            .json(meta)
            .send()
            .await?;

        let reply = self.handle_reply(response).await?;
        match reply.code {
            ResultCode::Success | ResultCode::TaskQueueFull | ResultCode::ClientNotFound => {
                Ok(reply.code)
            }
            _ => Err(rejected(reply)),
        }
    }

    /// Fetch the oldest unread result of `client_id`, if any
    ///
    /// A session the coordinator does not know fails with a
    /// [`ClientError::Rejected`] carrying `CLIENT_NOT_FOUND`; the crawler
    /// answers it by pushing its bundle again.
    pub async fn get_result(&self, client_id: &str) -> Result<Option<TaskResult>> {
        let response = self
            .client
            .post(self.rpc_url("GetResult"))
            .json(&ClientRequest {
                client_id: client_id.to_string(),
            })
            .send()
            .await?;

        let reply = self.handle_reply(response).await?;
        match reply.code {
            ResultCode::Success => reply_data(reply).map(Some),
            ResultCode::ClientResultEmpty => Ok(None),
            _ => Err(rejected(reply)),
        }
    }

    /// Tear down the session of `client_id`
    pub async fn del_client(&self, client_id: &str) -> Result<()> {
        let response = self
            .client
            .post(self.rpc_url("DelClient"))
            .json(&ClientRequest {
                client_id: client_id.to_string(),
            })
            .send()
            .await?;

        let reply = self.handle_reply(response).await?;
        if !reply.is_success() {
            return Err(rejected(reply));
        }
        Ok(())
    }

    // =============================================================================
    // Worker Side
    // =============================================================================

    /// Ask the coordinator what `worker_id` should do next
    pub async fn get_meta(&self, worker_id: &str) -> Result<Dispatch> {
        let response = self
            .client
            .post(self.rpc_url("GetMeta"))
            .json(&WorkerRequest {
                worker_id: worker_id.to_string(),
            })
            .send()
            .await?;

        let reply = self.handle_reply(response).await?;
        match reply.code {
            ResultCode::Success => reply_data(reply).map(Dispatch::Task),
            ResultCode::TaskQueueEmpty => Ok(Dispatch::Empty),
            ResultCode::WorkerNotUpdate => reply_data(reply).map(Dispatch::NotUpdated),
            ResultCode::ClientIsClosed => reply.message.map(Dispatch::Closed).ok_or_else(|| {
                ClientError::ParseError("CLIENT_IS_CLOSED reply names no client".to_string())
            }),
            _ => Err(rejected(reply)),
        }
    }

    /// Report a finished task
    pub async fn on_result(&self, result: &TaskResult) -> Result<()> {
        let response = self
            .client
            .post(self.rpc_url("OnResult"))
            .json(result)
            .send()
            .await?;

        let reply = self.handle_reply(response).await?;
        if !reply.is_success() {
            return Err(rejected(reply));
        }
        Ok(())
    }
}
