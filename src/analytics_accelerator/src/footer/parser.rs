//! Parquet footer trailer grammar.
//!
//! ```text
//! ┌──────┬───────────── ... ─────────────┬──────────────────┬──────────┬──────┐
//! │ PAR1 │ row group / column chunk data │ footer (thrift)  │ len u32  │ PAR1 │
//! └──────┴───────────── ... ─────────────┴──────────────────┴──────────┴──────┘
//!   4 B                                    len bytes          4 B LE     4 B
//!
//! footer start = object_size - 4 - 4 - len
//! ```

use bytes::Buf;
use parquet::file::metadata::ParquetMetaDataReader;

use super::metadata::FooterMetadata;
use crate::error::{AcceleratorError, AcceleratorResult};

/// Trailing (and leading) magic of a plaintext parquet file.
pub const PARQUET_MAGIC: &[u8; 4] = b"PAR1";

/// Trailing magic of a file with an encrypted footer.
pub const ENCRYPTED_FOOTER_MAGIC: &[u8; 4] = b"PARE";

/// Length of the magic marker.
pub const MAGIC_LEN: u64 = 4;

/// Length of the footer length field plus the trailing magic.
pub const TRAILER_LEN: u64 = 8;

/// Outcome of a parse attempt over the tail of an object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FooterParse {
    /// The tail held the whole footer.
    Complete(FooterMetadata),
    /// The footer is longer than the tail; fetch `required` tail bytes and retry.
    NeedMoreBytes {
        /// Tail bytes needed, trailer included.
        required: u64,
    },
}

/// Stateless footer parser.
pub struct FooterParser;

impl FooterParser {
    /// Parse the footer from the final `tail.len()` bytes of an object.
    ///
    /// # Errors
    ///
    /// Returns [`AcceleratorError::Format`] if the trailing magic is wrong or
    /// encrypted, the declared footer length does not fit the object, or the
    /// decoded row group tree is inconsistent.
    pub fn parse(tail: &[u8], object_size: u64) -> AcceleratorResult<FooterParse> {
        let tail_len = tail.len() as u64;
        if tail_len > object_size {
            return Err(AcceleratorError::invalid_argument(format!(
                "tail of {} bytes is longer than the object ({} bytes)",
                tail_len, object_size
            )));
        }
        if object_size < MAGIC_LEN + TRAILER_LEN {
            return Err(AcceleratorError::invalid_format(format!(
                "object of {} bytes is too small to hold a footer",
                object_size
            )));
        }
        if tail_len < TRAILER_LEN {
            return Ok(FooterParse::NeedMoreBytes {
                required: TRAILER_LEN,
            });
        }

        let mut trailer = &tail[tail.len() - TRAILER_LEN as usize..];
        let footer_len = u64::from(trailer.get_u32_le());
        let magic = trailer;
        if magic == ENCRYPTED_FOOTER_MAGIC {
            return Err(AcceleratorError::invalid_format(
                "encrypted footers are not supported",
            ));
        }
        if magic != PARQUET_MAGIC {
            return Err(AcceleratorError::invalid_format(format!(
                "trailing magic {:?} does not match {:?}",
                magic, PARQUET_MAGIC
            )));
        }

        let required = footer_len + TRAILER_LEN;
        if required + MAGIC_LEN > object_size {
            return Err(AcceleratorError::invalid_format(format!(
                "declared footer length {} exceeds object size {}",
                footer_len, object_size
            )));
        }
        if required > tail_len {
            return Ok(FooterParse::NeedMoreBytes { required });
        }

        let footer_start = object_size - required;
        let payload_start = (tail_len - required) as usize;
        let payload_end = tail.len() - TRAILER_LEN as usize;
        let decoded = ParquetMetaDataReader::decode_metadata(&tail[payload_start..payload_end])?;
        let metadata = FooterMetadata::from_parquet(&decoded, footer_start)?
            .with_footer_range(footer_start..object_size);
        Ok(FooterParse::Complete(metadata))
    }
}
