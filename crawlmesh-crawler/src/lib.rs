//! Crawlmesh Crawler
//!
//! Producer side of a crawl. A [`Crawler`] stages its task scripts and data
//! files into a bundle, pushes it to the coordinator, submits deduplicated
//! task metas and drives a [`ResultHandler`] with the results until nothing
//! is left in flight.
//!
//! # Example
//!
//! ```no_run
//! use async_trait::async_trait;
//! use crawlmesh_core::TaskResult;
//! use crawlmesh_crawler::{BundleSpec, Crawler, CrawlerConfig, ResultHandler};
//! use serde_json::{Map, json};
//!
//! struct Pages;
//!
//! #[async_trait]
//! impl ResultHandler for Pages {
//!     async fn on_start(&self, crawler: &Crawler) -> anyhow::Result<()> {
//!         let mut params = Map::new();
//!         params.insert("url".to_string(), json!("https://example.com"));
//!         crawler.add_task("list", params).await?;
//!         Ok(())
//!     }
//!
//!     async fn on_success(&self, _crawler: &Crawler, result: TaskResult) -> anyhow::Result<()> {
//!         println!("{:?}", result.items());
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CrawlerConfig::from_env()?;
//!     let crawler = Crawler::new(config, &BundleSpec::new(["tasks/site.lua"]))?;
//!     crawler.run(&Pages).await?;
//!     Ok(())
//! }
//! ```

pub mod bundle;
pub mod config;
pub mod crawler;

pub use bundle::{BundleSpec, StagedBundle};
pub use config::CrawlerConfig;
pub use crawler::{CrawlStats, Crawler, Received, ResultHandler, Submission};
