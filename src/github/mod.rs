//! Upstream repository host integration

mod client;

pub use client::{
    build_http_client, parse_repository_url, FetchError, GithubClient, RetryPolicy,
    StaticTokenProvider, TokenProvider,
};
