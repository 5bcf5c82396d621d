//! An HTTP client for PyPI-compatible package indexes, with transparent
//! retries and in-memory memoization of project listings.

pub use error::Error;
pub use registry_client::{
    RegistryClient, RegistryClientBuilder, SimpleMetadata, VersionFiles,
};

mod error;
mod html;
mod registry_client;
