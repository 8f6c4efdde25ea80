//! Core pipeline for sieve
//!
//! This crate provides the fundamental data structures and I/O-facing
//! building blocks of the sidecar: the request and digest records, the
//! process configuration, the page fetcher, the bookmark export parser,
//! and the digest response parser. Nothing here talks to a language model.

pub mod bookmarks;
pub mod config;
pub mod digest;
pub mod fetcher;
pub mod types;

pub use bookmarks::{BookmarkError, BookmarkFilter};
pub use config::{ConfigError, Settings};
pub use digest::{DigestError, DigestSource};
pub use fetcher::{ContentFetcher, FetchError, FetchedPage, PageSource};
pub use types::*;
