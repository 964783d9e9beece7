//! `fetchx` is an HTTP request execution engine for API SDKs: it layers
//! composable configuration, lifecycle hooks, retry with backoff, unified
//! cancellation, and progress-instrumented response streaming over a
//! pluggable transport capability.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use fetchx::prelude::{Client, RetryPolicy};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Item {
//!     id: String,
//! }
//!
//! # fn transport() -> impl fetchx::Transport {
//! #     fetchx::transport_fn(|_request| async {
//! #         Ok(fetchx::TransportReply::new(
//! #             http::StatusCode::NO_CONTENT,
//! #             http::HeaderMap::new(),
//! #             None,
//! #         ))
//! #     })
//! # }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .transport(transport())
//!         .prefix_url("https://api.example.com")
//!         .client_name("my-sdk")
//!         .timeout(Duration::from_secs(3))
//!         .retry_policy(
//!             RetryPolicy::standard()
//!                 .max_attempts(3)
//!                 .base_backoff(Duration::from_millis(100))
//!                 .max_backoff(Duration::from_millis(800)),
//!         )
//!         .try_build()?;
//!
//!     let item: Item = client.get("v1/items/42").send().await?.json().await?;
//!     println!("fetched id={}", item.id);
//!     Ok(())
//! }
//! ```
//!
//! # Recommended Defaults
//!
//! - Keep `RetryPolicy::standard()` unless the upstream documents otherwise.
//! - Buffered bodies retry; one-shot streamed bodies never do.
//! - Pass a [`CancelToken`] anywhere a caller may need to walk away early.

mod cancel;
mod client;
mod error;
mod hooks;
mod metrics;
mod options;
mod progress;
mod request;
mod response;
mod retry;
mod transport;
mod util;

pub use crate::cancel::CancelToken;
pub use crate::client::{Client, ClientBuilder};
pub use crate::error::{Error, ErrorCode, TransportErrorKind};
pub use crate::hooks::{
    AfterResponseHook, BeforeErrorHook, BeforeRequestAction, BeforeRequestHook, BeforeRetryAction,
    BeforeRetryHook,
};
pub use crate::metrics::MetricsSnapshot;
pub use crate::options::{EffectiveOptions, StatusPolicy};
pub use crate::progress::{Progress, ProgressFn};
pub use crate::request::{CallBuilder, Request, RequestBody};
pub use crate::response::Response;
pub use crate::retry::{ElapsedBasis, RetryPolicy, RetryState};
pub use crate::transport::{
    BodyStream, BoxError, Transport, TransportError, TransportFn, TransportReply, transport_fn,
};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        CancelToken, Client, Error, ErrorCode, MetricsSnapshot, Progress, Request, RequestBody,
        Response, Result, RetryPolicy, StatusPolicy, Transport, TransportReply, transport_fn,
    };
}

#[cfg(test)]
mod tests;
