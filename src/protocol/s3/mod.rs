//! S3 backend for the transfer engine
//!
//! [`S3Store`] implements [`ObjectStore`](crate::protocol::ObjectStore) with
//! the official AWS SDK and works against AWS S3 and S3-compatible services
//! such as MinIO or LocalStack (set an endpoint and path-style addressing).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use parcel::protocol::s3::{S3Config, S3Store};
//! use parcel::transfer::{TransferJob, TransferRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = S3Config::builder("my-bucket".to_string())
//!         .region("us-east-1")
//!         .build()?;
//!     let store = Arc::new(S3Store::new(config).await?);
//!
//!     let request = TransferRequest::upload("video.mp4", "media/video.mp4");
//!     let result = TransferJob::new(request, store).run().await;
//!     println!("{}: {} bytes", result.status, result.bytes_transferred);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;

pub use client::S3Store;
pub use config::{S3Config, S3ConfigBuilder};
