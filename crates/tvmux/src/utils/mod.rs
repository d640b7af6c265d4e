//! Shared utilities: fetching, compression, circuit breaking, URL and
//! timezone helpers.

pub mod circuit_breaker;
pub mod decompression;
pub mod fetch;
pub mod time;
pub mod url;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerRegistry,
    CircuitBreakerState, CircuitBreakerStats,
};
pub use decompression::{CompressionFormat, DecompressionService};
pub use fetch::{PayloadKind, ResourceFetcher, ResourceStream};
pub use url::{build_proxy_stream_url, UrlUtils};
