//! Blockfrost implementation of [`ChainClient`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::Deserialize;
use tracing::trace;
use url::Url;

use crate::{
    Block, ChainClient, ChainError, Epoch, EpochParameters, Genesis, Health, NetworkInfo,
    PoolInfo, PoolMetadata, PoolRelay,
};

/// Page size used when walking paginated endpoints.
const PAGE_SIZE: usize = 100;

/// Options for the Blockfrost client.
#[derive(Debug, Clone)]
pub struct BlockfrostOpts {
    /// API base URL, e.g. `https://cardano-mainnet.blockfrost.io/api/v0`.
    pub endpoint: Url,
    /// Project id sent with every request.
    pub project_id: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// Client for the Blockfrost REST API.
#[derive(Debug, Clone)]
pub struct BlockfrostClient {
    http: HttpClient,
    endpoint: Url,
    project_id: String,
}

/// Error body returned by Blockfrost on non-success statuses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl BlockfrostClient {
    /// Create a new client.
    pub fn new(opts: BlockfrostOpts) -> Result<Self, ChainError> {
        let http = HttpClient::builder().timeout(opts.timeout).build()?;
        Ok(Self { http, endpoint: opts.endpoint, project_id: opts.project_id })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.as_str().trim_end_matches('/'), path)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ChainError> {
        trace!(path, "blockfrost request");
        let resp = self
            .http
            .get(self.url(path))
            .header("project_id", &self.project_id)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ChainError::NotFound);
        }
        if !status.is_success() {
            let message = resp
                .json::<ApiErrorBody>()
                .await
                .map(|b| b.message)
                .unwrap_or_else(|_| status.to_string());
            return Err(ChainError::Api { status: status.as_u16(), message });
        }
        Ok(resp.json::<T>().await?)
    }

    /// Block hashes of `epoch`, one page, in the given order.
    async fn epoch_block_page(
        &self,
        epoch: u64,
        order: &str,
    ) -> Result<Vec<String>, ChainError> {
        self.get(&format!("/epochs/{epoch}/blocks?count=1&page=1&order={order}")).await
    }
}

#[async_trait]
impl ChainClient for BlockfrostClient {
    async fn latest_epoch(&self) -> Result<Epoch, ChainError> {
        self.get("/epochs/latest").await
    }

    async fn latest_block(&self) -> Result<Block, ChainError> {
        self.get("/blocks/latest").await
    }

    async fn epoch_parameters(&self, epoch: u64) -> Result<EpochParameters, ChainError> {
        self.get(&format!("/epochs/{epoch}/parameters")).await
    }

    async fn block_by_slot(&self, slot: u64) -> Result<Block, ChainError> {
        self.get(&format!("/blocks/slot/{slot}")).await
    }

    async fn first_block_in_epoch(&self, epoch: u64) -> Result<Block, ChainError> {
        let hashes = self.epoch_block_page(epoch, "asc").await?;
        let hash = hashes.first().ok_or(ChainError::NotFound)?;
        self.get(&format!("/blocks/{hash}")).await
    }

    async fn last_block_in_epoch(&self, epoch: u64) -> Result<Block, ChainError> {
        let hashes = self.epoch_block_page(epoch, "desc").await?;
        let hash = hashes.first().ok_or(ChainError::NotFound)?;
        self.get(&format!("/blocks/{hash}")).await
    }

    async fn pool_info(&self, pool_id: &str) -> Result<PoolInfo, ChainError> {
        self.get(&format!("/pools/{pool_id}")).await
    }

    async fn pool_metadata(&self, pool_id: &str) -> Result<PoolMetadata, ChainError> {
        self.get(&format!("/pools/{pool_id}/metadata")).await
    }

    async fn pool_relays(&self, pool_id: &str) -> Result<Vec<PoolRelay>, ChainError> {
        self.get(&format!("/pools/{pool_id}/relays")).await
    }

    async fn pool_count(&self) -> Result<u64, ChainError> {
        let mut count = 0u64;
        let mut page = 1usize;
        loop {
            let ids: Vec<String> =
                self.get(&format!("/pools?count={PAGE_SIZE}&page={page}")).await?;
            count += ids.len() as u64;
            if ids.len() < PAGE_SIZE {
                return Ok(count);
            }
            page += 1;
        }
    }

    async fn network_info(&self) -> Result<NetworkInfo, ChainError> {
        self.get("/network").await
    }

    async fn genesis(&self) -> Result<Genesis, ChainError> {
        self.get("/genesis").await
    }

    async fn health(&self) -> Result<Health, ChainError> {
        self.get("/health").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(server: &mockito::ServerGuard) -> BlockfrostClient {
        BlockfrostClient::new(BlockfrostOpts {
            endpoint: Url::parse(&server.url()).unwrap(),
            project_id: "test_project".to_owned(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn latest_block_deserializes() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "time": 1_700_000_000,
            "height": 9_000_000,
            "hash": "abc123",
            "slot": 107_000_123,
            "epoch": 450,
            "epoch_slot": 12_345,
            "slot_leader": "pool1abc",
        });
        let mock = server
            .mock("GET", "/blocks/latest")
            .match_header("project_id", "test_project")
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let block = client_for(&server).latest_block().await.unwrap();
        assert_eq!(block.slot, 107_000_123);
        assert_eq!(block.slot_leader, "pool1abc");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_block_maps_to_not_found() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/blocks/slot/42")
            .with_status(404)
            .with_body(r#"{"status_code":404,"error":"Not Found","message":"The requested component has not been found."}"#)
            .create_async()
            .await;

        let err = client_for(&server).block_by_slot(42).await.unwrap_err();
        assert!(err.is_not_found());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn api_error_carries_status_and_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/epochs/latest")
            .with_status(429)
            .with_body(r#"{"status_code":429,"error":"Too Many Requests","message":"usage is over limit"}"#)
            .create_async()
            .await;

        let err = client_for(&server).latest_epoch().await.unwrap_err();
        match err {
            ChainError::Api { status, message } => {
                assert_eq!(status, 429);
                assert_eq!(message, "usage is over limit");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn last_block_in_epoch_follows_hash() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/epochs/449/blocks?count=1&page=1&order=desc")
            .with_status(200)
            .with_body(r#"["deadbeef"]"#)
            .create_async()
            .await;
        server
            .mock("GET", "/blocks/deadbeef")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "time": 1_700_000_000,
                    "height": 8_999_999,
                    "hash": "deadbeef",
                    "slot": 106_999_000,
                    "epoch": 449,
                    "epoch_slot": 431_000,
                    "slot_leader": "pool1xyz",
                })
                .to_string(),
            )
            .create_async()
            .await;

        let block = client_for(&server).last_block_in_epoch(449).await.unwrap();
        assert_eq!(block.epoch_slot, 431_000);
    }

    #[tokio::test]
    async fn pool_count_walks_pages() {
        let mut server = mockito::Server::new_async().await;
        let full: Vec<String> = (0..PAGE_SIZE).map(|i| format!("pool{i}")).collect();
        server
            .mock("GET", "/pools?count=100&page=1")
            .with_status(200)
            .with_body(serde_json::to_string(&full).unwrap())
            .create_async()
            .await;
        server
            .mock("GET", "/pools?count=100&page=2")
            .with_status(200)
            .with_body(r#"["pool100","pool101"]"#)
            .create_async()
            .await;

        let count = client_for(&server).pool_count().await.unwrap();
        assert_eq!(count, 102);
    }
}
