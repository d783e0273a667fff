//! Shared helpers.
//!
//! - **Source URL validation**: refuses URLs that would let a config file
//!   aim the poller at loopback or private network addresses

mod url_validator;

pub use url_validator::{validate_source_url, SourceUrlError};
