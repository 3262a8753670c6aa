//! Synthetic parquet objects for tests.
//!
//! Footers are produced with the parquet crate's own metadata writer, so
//! they are bit-exact with what real writers emit.

use bytes::Bytes;
use parquet::basic::{Repetition, Type as PhysicalType};
use parquet::file::metadata::{
    ColumnChunkMetaData, FileMetaData, ParquetMetaDataBuilder, ParquetMetaDataWriter,
    RowGroupMetaData,
};
use parquet::schema::types::{SchemaDescriptor, Type};
use std::sync::Arc;

use super::parser::PARQUET_MAGIC;

const ROWS_PER_GROUP: i64 = 100;

/// Layout of a synthetic object: equally sized chunks laid out back to back,
/// row group by row group, columns `c0..cN` in schema order, then
/// `index_len` bytes of page index, then the footer.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct SyntheticLayout {
    pub(crate) row_groups: u64,
    pub(crate) columns: u64,
    pub(crate) chunk_len: u64,
    pub(crate) data_start: u64,
    pub(crate) index_len: u64,
    /// Record each row group's file offset, shifted by this many bytes.
    pub(crate) row_group_offset_shift: Option<u64>,
}

impl SyntheticLayout {
    /// Offset of the chunk of `column` in `row_group`.
    pub(crate) fn chunk_start(&self, row_group: u64, column: u64) -> u64 {
        self.data_start + (row_group * self.columns + column) * self.chunk_len
    }

    /// End of the last column chunk.
    pub(crate) fn data_end(&self) -> u64 {
        self.chunk_start(self.row_groups, 0)
    }

    /// Where the footer begins.
    pub(crate) fn footer_start(&self) -> u64 {
        self.data_end() + self.index_len
    }
}

/// Serialized footer (thrift payload, length, magic) describing `layout`.
pub(crate) fn synthetic_footer(layout: &SyntheticLayout) -> Vec<u8> {
    let fields = (0..layout.columns)
        .map(|column| {
            Arc::new(
                Type::primitive_type_builder(&format!("c{}", column), PhysicalType::INT64)
                    .with_repetition(Repetition::REQUIRED)
                    .build()
                    .unwrap(),
            )
        })
        .collect();
    let schema = Type::group_type_builder("schema")
        .with_fields(fields)
        .build()
        .unwrap();
    let descr = Arc::new(SchemaDescriptor::new(Arc::new(schema)));

    let row_groups = (0..layout.row_groups)
        .map(|row_group| {
            let columns = (0..layout.columns)
                .map(|column| {
                    ColumnChunkMetaData::builder(descr.column(column as usize))
                        .set_data_page_offset(layout.chunk_start(row_group, column) as i64)
                        .set_total_compressed_size(layout.chunk_len as i64)
                        .set_total_uncompressed_size(layout.chunk_len as i64)
                        .set_num_values(ROWS_PER_GROUP)
                        .build()
                        .unwrap()
                })
                .collect();
            let builder = RowGroupMetaData::builder(descr.clone());
            let builder = match layout.row_group_offset_shift {
                Some(shift) => {
                    builder.set_file_offset((layout.chunk_start(row_group, 0) + shift) as i64)
                }
                None => builder,
            };
            builder
                .set_num_rows(ROWS_PER_GROUP)
                .set_ordinal(row_group as i16)
                .set_total_byte_size((layout.chunk_len * layout.columns) as i64)
                .set_column_metadata(columns)
                .build()
                .unwrap()
        })
        .collect();

    let file_metadata = FileMetaData::new(
        1,
        ROWS_PER_GROUP * layout.row_groups as i64,
        Some("analytics-accelerator tests".to_string()),
        None,
        descr,
        None,
    );
    let metadata = ParquetMetaDataBuilder::new(file_metadata)
        .set_row_groups(row_groups)
        .build();

    let mut footer = Vec::new();
    ParquetMetaDataWriter::new(&mut footer, &metadata)
        .finish()
        .unwrap();
    footer
}

/// Whole synthetic object: leading magic, patterned data and page index, footer.
pub(crate) fn synthetic_object(layout: &SyntheticLayout) -> Bytes {
    let mut object: Vec<u8> = (0..layout.footer_start()).map(|i| (i % 251) as u8).collect();
    object[..4].copy_from_slice(PARQUET_MAGIC);
    object.extend_from_slice(&synthetic_footer(layout));
    Bytes::from(object)
}
