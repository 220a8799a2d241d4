//! Feed retrieval and decoding.
//!
//! - [`fetcher`] - one bounded HTTP GET per feed, returning an owned body
//! - [`parser`] - charset-aware decoding of RSS (quick-xml) and Atom (`feed-rs`)
//!
//! # Example
//!
//! ```ignore
//! use newshub_rss::feed::{parse_document, FeedFetcher, FetchConfig};
//!
//! let fetcher = FeedFetcher::new(&FetchConfig::default())?;
//! let body = fetcher.fetch("https://example.com/rss.xml").await?;
//! let document = parse_document(&body.into_bytes().await?)?;
//! ```

mod fetcher;
mod parser;

pub use fetcher::{FeedBody, FeedFetcher, FetchConfig, FetchError};
pub use parser::{parse_document, ParseError, ParsedFeedDocument, ParsedItem};
