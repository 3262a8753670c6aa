//! Validated footer metadata: row groups and column chunk byte ranges.

use parquet::file::metadata::{ColumnChunkMetaData, ParquetMetaData, RowGroupMetaData};
use std::ops::Range;

use super::parser::MAGIC_LEN;
use crate::error::{AcceleratorError, AcceleratorResult};

/// Byte range of one column within one row group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnChunkInfo {
    /// Leaf column index in schema order.
    pub column_index: usize,
    /// Dotted column path, e.g. `address.city`.
    pub path: String,
    /// Absolute byte range of the chunk.
    pub range: Range<u64>,
}

/// One row group and its column chunks, in schema order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowGroupInfo {
    /// Row group ordinal.
    pub index: usize,
    /// Rows in the row group.
    pub num_rows: i64,
    /// Declared span of the row group, or the span of its chunks when the
    /// writer did not record an offset.
    pub range: Range<u64>,
    /// Column chunks in schema order.
    pub columns: Vec<ColumnChunkInfo>,
}

/// Footer of a columnar object, reduced to what prefetch planning needs.
///
/// Immutable after parse and shared by every stream over the object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FooterMetadata {
    row_groups: Vec<RowGroupInfo>,
    column_paths: Vec<String>,
    num_rows: i64,
    footer_range: Range<u64>,
}

fn chunk_range(column: &ColumnChunkMetaData) -> AcceleratorResult<Range<u64>> {
    let start = match column.dictionary_page_offset() {
        Some(offset) if offset > 0 => offset,
        _ => column.data_page_offset(),
    };
    let len = column.compressed_size();
    if start < 0 || len < 0 {
        return Err(AcceleratorError::invalid_format(format!(
            "column {} has negative offset {} or length {}",
            column.column_path(),
            start,
            len
        )));
    }
    let start = start as u64;
    let end = start.checked_add(len as u64).ok_or_else(|| {
        AcceleratorError::invalid_format(format!("column {} range overflows", column.column_path()))
    })?;
    Ok(start..end)
}

/// Span a row group declares through its file offset and compressed size.
fn declared_span(row_group: &RowGroupMetaData) -> AcceleratorResult<Option<Range<u64>>> {
    let Some(offset) = row_group.file_offset().filter(|offset| *offset > 0) else {
        return Ok(None);
    };
    let len = row_group.compressed_size();
    if len < 0 {
        return Err(AcceleratorError::invalid_format(format!(
            "row group at {} has negative size {}",
            offset, len
        )));
    }
    let start = offset as u64;
    let end = start.checked_add(len as u64).ok_or_else(|| {
        AcceleratorError::invalid_format(format!("row group at {} overflows", offset))
    })?;
    Ok(Some(start..end))
}

impl FooterMetadata {
    /// Build from decoded parquet metadata, validating every range against
    /// the data region `[4, footer_start)`.
    ///
    /// Rejects chunks that overlap within a row group, chunks outside their
    /// row group's declared span and row groups that overlap, go backwards
    /// or leave the data region.
    pub fn from_parquet(metadata: &ParquetMetaData, footer_start: u64) -> AcceleratorResult<Self> {
        let schema = metadata.file_metadata().schema_descr();
        let column_paths: Vec<String> = schema
            .columns()
            .iter()
            .map(|column| column.path().string())
            .collect();

        let mut row_groups = Vec::with_capacity(metadata.num_row_groups());
        let mut previous_end = MAGIC_LEN;
        for (index, row_group) in metadata.row_groups().iter().enumerate() {
            let mut columns = Vec::with_capacity(row_group.num_columns());
            for (column_index, column) in row_group.columns().iter().enumerate() {
                let range = chunk_range(column)?;
                if range.start < MAGIC_LEN || range.end > footer_start {
                    return Err(AcceleratorError::invalid_format(format!(
                        "row group {} column {} range {}-{} outside data region {}-{}",
                        index, column_index, range.start, range.end, MAGIC_LEN, footer_start
                    )));
                }
                columns.push(ColumnChunkInfo {
                    column_index,
                    path: column.column_path().string(),
                    range,
                });
            }

            let mut by_offset: Vec<&Range<u64>> = columns.iter().map(|c| &c.range).collect();
            by_offset.sort_by_key(|range| range.start);
            if let Some(pair) = by_offset
                .windows(2)
                .find(|pair| pair[0].end > pair[1].start)
            {
                return Err(AcceleratorError::invalid_format(format!(
                    "row group {} has overlapping column chunks {}-{} and {}-{}",
                    index, pair[0].start, pair[0].end, pair[1].start, pair[1].end
                )));
            }

            let chunks = match (by_offset.first(), by_offset.iter().map(|r| r.end).max()) {
                (Some(first), Some(end)) => first.start..end,
                _ => previous_end..previous_end,
            };
            let range = match declared_span(row_group)? {
                Some(declared) => {
                    if declared.start < MAGIC_LEN || declared.end > footer_start {
                        return Err(AcceleratorError::invalid_format(format!(
                            "row group {} span {}-{} outside data region {}-{}",
                            index, declared.start, declared.end, MAGIC_LEN, footer_start
                        )));
                    }
                    if !columns.is_empty()
                        && (chunks.start < declared.start || chunks.end > declared.end)
                    {
                        return Err(AcceleratorError::invalid_format(format!(
                            "row group {} chunks {}-{} outside declared span {}-{}",
                            index, chunks.start, chunks.end, declared.start, declared.end
                        )));
                    }
                    declared
                }
                None => chunks,
            };
            if range.start < previous_end {
                return Err(AcceleratorError::invalid_format(format!(
                    "row group {} starts at {} before previous row group end {}",
                    index, range.start, previous_end
                )));
            }
            previous_end = range.end;

            row_groups.push(RowGroupInfo {
                index,
                num_rows: row_group.num_rows(),
                range,
                columns,
            });
        }

        Ok(Self {
            row_groups,
            column_paths,
            num_rows: metadata.file_metadata().num_rows(),
            footer_range: footer_start..footer_start,
        })
    }

    pub(crate) fn with_footer_range(mut self, footer_range: Range<u64>) -> Self {
        self.footer_range = footer_range;
        self
    }

    /// Row groups in file order.
    pub fn row_groups(&self) -> &[RowGroupInfo] {
        &self.row_groups
    }

    /// Leaf column paths in schema order.
    pub fn column_paths(&self) -> &[String] {
        &self.column_paths
    }

    /// Number of leaf columns.
    pub fn num_columns(&self) -> usize {
        self.column_paths.len()
    }

    /// Total rows in the file.
    pub fn num_rows(&self) -> i64 {
        self.num_rows
    }

    /// Byte range of the serialized footer including its trailer.
    pub fn footer_range(&self) -> Range<u64> {
        self.footer_range.clone()
    }

    /// Bytes between the last row group and the footer, at most `limit` of
    /// them, ending at the footer. Writers place the page index here; the
    /// range is empty when the footer follows the data directly.
    pub fn page_index_range(&self, limit: u64) -> Range<u64> {
        let data_end = self
            .row_groups
            .iter()
            .map(|row_group| row_group.range.end)
            .max()
            .unwrap_or(MAGIC_LEN);
        let footer_start = self.footer_range.start;
        footer_start.saturating_sub(limit).max(data_end)..footer_start
    }

    /// Row group whose span contains `offset`.
    pub fn row_group_containing(&self, offset: u64) -> Option<&RowGroupInfo> {
        let idx = self
            .row_groups
            .partition_point(|row_group| row_group.range.end <= offset);
        self.row_groups
            .get(idx)
            .filter(|row_group| row_group.range.contains(&offset))
    }

    /// Column chunk containing `offset`.
    pub fn column_containing(&self, offset: u64) -> Option<&ColumnChunkInfo> {
        self.row_group_containing(offset)?
            .columns
            .iter()
            .find(|column| column.range.contains(&offset))
    }

    /// Leaf column index of a dotted path.
    pub fn column_index(&self, path: &str) -> Option<usize> {
        self.column_paths.iter().position(|p| p == path)
    }

    /// Byte ranges of `columns` in `row_group`, in file order. Unknown
    /// indices are skipped.
    pub fn chunk_ranges(&self, row_group: usize, columns: &[usize]) -> Vec<Range<u64>> {
        let Some(row_group) = self.row_groups.get(row_group) else {
            return Vec::new();
        };
        let mut ranges: Vec<Range<u64>> = row_group
            .columns
            .iter()
            .filter(|column| columns.contains(&column.column_index))
            .map(|column| column.range.clone())
            .collect();
        ranges.sort_by_key(|range| range.start);
        ranges
    }
}
