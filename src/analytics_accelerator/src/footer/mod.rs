//! # Footer
//!
//! Decodes the trailing structural metadata of columnar objects so the
//! planner can prefetch exact column chunk ranges.
//!
//! The footer is loaded through the object's block store as exact ranges:
//! first the configured tail prefetch, then, if the declared footer is
//! longer, exactly the bytes it needs. Once parsed, the page index region
//! below the footer is prefetched speculatively. A footer that cannot be
//! parsed never fails a read; the object is marked [`FooterState::Degraded`]
//! and planning falls back to access-pattern prefetch.

mod metadata;
mod parser;

#[cfg(test)]
pub(crate) mod test_utils;

pub use metadata::{ColumnChunkInfo, FooterMetadata, RowGroupInfo};
pub use parser::{
    FooterParse, FooterParser, ENCRYPTED_FOOTER_MAGIC, MAGIC_LEN, PARQUET_MAGIC, TRAILER_LEN,
};

use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::FooterConfig;
use crate::error::AcceleratorResult;
use crate::prefetch::Priority;
use crate::storage::BlockStore;

/// Result of loading an object's footer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FooterState {
    /// Footer parsed and validated.
    Parsed(Arc<FooterMetadata>),
    /// Footer unusable; the object is read without footer-aware planning.
    Degraded {
        /// Why the footer was rejected.
        reason: String,
    },
}

impl FooterState {
    /// Parsed metadata, if any.
    pub fn metadata(&self) -> Option<&Arc<FooterMetadata>> {
        match self {
            FooterState::Parsed(metadata) => Some(metadata),
            FooterState::Degraded { .. } => None,
        }
    }

    /// Whether footer-aware planning is disabled for the object.
    pub fn is_degraded(&self) -> bool {
        matches!(self, FooterState::Degraded { .. })
    }
}

/// Fetch and parse the footer of the object behind `store`.
///
/// Fetch errors are returned; format errors become [`FooterState::Degraded`].
pub(crate) async fn load_footer(
    store: &Arc<BlockStore>,
    config: &FooterConfig,
) -> AcceleratorResult<FooterState> {
    let key = store.handle().key();
    let size = store.handle().size();
    let initial = config.tail_prefetch_for(size);

    let tail = store.read_exact(size - initial..size, None).await?;
    let parsed = match FooterParser::parse(&tail, size) {
        Ok(FooterParse::NeedMoreBytes { required }) if required <= size => {
            debug!(key, initial, required, "footer longer than tail prefetch, widening");
            let tail = store.read_exact(size - required..size, None).await?;
            FooterParser::parse(&tail, size)
        }
        other => other,
    };

    let state = match parsed {
        Ok(FooterParse::Complete(metadata)) => {
            debug!(
                key,
                row_groups = metadata.row_groups().len(),
                columns = metadata.num_columns(),
                "footer parsed"
            );
            FooterState::Parsed(Arc::new(metadata))
        }
        Ok(FooterParse::NeedMoreBytes { required }) => FooterState::Degraded {
            reason: format!("footer needs {} bytes but object has {}", required, size),
        },
        Err(error) => {
            warn!(key, error = %error, "footer unusable, prefetching without it");
            FooterState::Degraded {
                reason: error.to_string(),
            }
        }
    };

    if let (true, FooterState::Parsed(metadata)) = (config.prefetch_page_index, &state) {
        prefetch_page_index(store, metadata, config);
    }
    Ok(state)
}

fn prefetch_page_index(store: &Arc<BlockStore>, metadata: &FooterMetadata, config: &FooterConfig) {
    let key = store.handle().key();
    let range = metadata.page_index_range(config.page_index_prefetch_for(store.handle().size()));
    if range.is_empty() {
        return;
    }
    debug!(key, start = range.start, end = range.end, "prefetching page index");
    if let Err(error) = store.ensure_exact(&[range], Priority::Speculative, None) {
        debug!(key, error = %error, "page index prefetch not scheduled");
    }
}
