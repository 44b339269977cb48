//! Bundle transfer endpoints

use crate::error::Result;
use crate::{CoordinatorClient, rejected, reply_data};
use crawlmesh_core::dto::rpc::{PullBundleRequest, PushBundleQuery};
use crawlmesh_core::chunk_size;
use futures::StreamExt;
use reqwest::Body;
use reqwest::header::CONTENT_TYPE;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

impl CoordinatorClient {
    // =============================================================================
    // Bundle Transfer
    // =============================================================================

    /// Upload a bundle archive for `client_id`
    ///
    /// The file is streamed in chunks sized by [`chunk_size`]. A successful
    /// push replaces any previous bundle of the client.
    ///
    /// # Returns
    /// The bundle version assigned by the coordinator
    ///
    /// # Errors
    /// `ClientError::Rejected` with `CLIENT_IS_FULL` when the coordinator has
    /// no free client slot, or `ERROR` when the archive is unusable.
    pub async fn push_bundle(&self, client_id: &str, archive: &Path) -> Result<u64> {
        let file = tokio::fs::File::open(archive).await?;
        let total = file.metadata().await?.len();
        let stream = ReaderStream::with_capacity(file, chunk_size(total));

        tracing::debug!(
            "Pushing bundle for {} ({} bytes) from {}",
            client_id,
            total,
            archive.display()
        );

        let response = self
            .client
            .post(self.rpc_url("PushBundle"))
            .query(&PushBundleQuery {
                client_id: client_id.to_string(),
            })
            .header(CONTENT_TYPE, "application/zip")
            .body(Body::wrap_stream(stream))
            .send()
            .await?;

        let reply = self.handle_reply(response).await?;
        if !reply.is_success() {
            return Err(rejected(reply));
        }

        reply_data(reply)
    }

    /// Download the current bundle of `client_id` into `dest`
    ///
    /// The archive is written to a sibling `.part` file and renamed once
    /// complete. The coordinator marks `worker_id` as synchronized when the
    /// stream finishes.
    ///
    /// # Returns
    /// The number of bytes written
    pub async fn pull_bundle(&self, client_id: &str, worker_id: &str, dest: &Path) -> Result<u64> {
        let response = self
            .client
            .post(self.rpc_url("PullBundle"))
            .json(&PullBundleRequest {
                client_id: client_id.to_string(),
                worker_id: worker_id.to_string(),
            })
            .send()
            .await?;
        let response = self.check_status(response).await?;

        let partial = dest.with_extension("part");
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        drop(file);
        tokio::fs::rename(&partial, dest).await?;

        tracing::debug!("Pulled bundle of {} ({} bytes)", client_id, written);

        Ok(written)
    }
}
