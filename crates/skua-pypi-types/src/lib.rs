//! Shared types for the payloads the resolver consumes: simple-index file
//! listings, index URLs, and core metadata.

pub use index_url::{IndexUrl, IndexUrls};
pub use lenient::{LenientRequirement, LenientVersionSpecifiers};
pub use metadata::{CoreMetadata, MetadataError};
pub use simple_json::{File, Hashes, SimpleJson, Yanked};

mod index_url;
mod lenient;
mod metadata;
mod simple_json;
