//! HTTP transport used by the artifact fetcher.

mod client;

pub use client::{HttpClient, HttpClientConfig, ProgressCallback};
