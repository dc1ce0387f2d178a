//! # Frontline
//!
//! A client for the Front API built around one request pipeline per token.
//!
//! ```no_run
//! use std::ops::ControlFlow;
//!
//! use frontline::Client;
//! use frontline::ItemOptions;
//! use frontline::Params;
//!
//! # async fn run() -> Result<(), frontline::FrontError> {
//! let client = Client::new("api-token");
//! let contact = client.get("contacts/crd_123", &Params::new()).await?;
//! println!("{contact}");
//!
//! let seen = client
//!     .paginator()
//!     .each_item(
//!         "conversations",
//!         Params::from([("limit", "50")]),
//!         ItemOptions {
//!             max_items: Some(200),
//!             ..Default::default()
//!         },
//!         |conversation| {
//!             println!("{}", conversation["id"]);
//!             ControlFlow::Continue(())
//!         },
//!     )
//!     .await?;
//! println!("{seen} conversations");
//! # Ok(())
//! # }
//! ```
//!
//! Every request goes through the stages in [`tower_frontline`]:
//! instrumentation, a concurrency gate, a token bucket, retries and status
//! checks. Each [`Transport`] owns its own gate and bucket.

mod client;
mod config;
mod paginator;
mod params;
mod transport;

pub use client::Client;
pub use config::Config;
pub use config::ConfigError;
pub use config::DEFAULT_BASE_URL;
pub use config::RateLimitConfig;
pub use http::Method;
pub use paginator::ItemOptions;
pub use paginator::PageOptions;
pub use paginator::PaginationStyle;
pub use paginator::Paginator;
pub use params::Params;
pub use tower_frontline::ErrorKind;
pub use tower_frontline::Event;
pub use tower_frontline::FrontError;
pub use tower_frontline::Instrument;
pub use tower_frontline::RecordingInstrument;
pub use tower_frontline::RetryConfig;
pub use tower_frontline::TracingInstrument;
pub use transport::Transport;
