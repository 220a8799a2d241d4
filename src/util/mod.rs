//! Utility functions shared by the fetch path.
//!
//! - **URL validation**: feed URLs are checked before any request is made so
//!   that a stored URL cannot be used to reach internal services (SSRF).

mod url_validator;

pub use url_validator::{validate_feed_url, UrlValidationError};
