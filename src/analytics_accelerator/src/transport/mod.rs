//! Transport port: the async range-fetch and metadata-fetch capability the
//! accelerator consumes.

mod client;
mod object_store_client;

pub use client::{ObjectClient, ObjectMetadata, TransportError, TransportResult};
pub use object_store_client::ObjectStoreClient;

#[cfg(test)]
pub(crate) mod mock_client;
