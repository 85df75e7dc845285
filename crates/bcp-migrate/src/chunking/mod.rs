//! Chunk planning for large tables.
//!
//! A table above the size threshold is split into independently transferable
//! chunks. Numeric keys with a known `[min, max]` are split into equal-width
//! key ranges; everything else falls back to row windows over a stable row
//! order supplied by the extraction query. Planning never fails: missing size
//! or key information simply yields [`ChunkPlan::Unchunked`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::identifier::quote_mssql;
use crate::core::schema::{KeyColumnInfo, KeyRange, RangeValue, TableId, TableSize};
use crate::error::Result;

/// Thresholds controlling when and how finely tables are split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkSettings {
    /// Tables below this size are never chunked.
    pub threshold_mb: f64,

    /// Target size of one chunk.
    pub max_chunk_mb: f64,

    /// Upper bound on chunks per table.
    pub max_chunks: usize,
}

impl Default for ChunkSettings {
    fn default() -> Self {
        Self {
            threshold_mb: 500.0,
            max_chunk_mb: 200.0,
            max_chunks: 8,
        }
    }
}

/// Row filter selecting one chunk of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChunkPredicate {
    /// `column >= lower AND column <= upper` (or `< upper` when not inclusive).
    KeyRange {
        column: String,
        lower: RangeValue,
        upper: RangeValue,
        upper_inclusive: bool,
    },

    /// 1-based inclusive row numbers under the configured row order.
    /// `end_row < start_row` denotes an empty window.
    RowWindow { start_row: i64, end_row: i64 },
}

impl ChunkPredicate {
    /// `WHERE`-clause fragment for key ranges; `None` for row windows.
    pub fn where_clause(&self) -> Result<Option<String>> {
        match self {
            ChunkPredicate::KeyRange {
                column,
                lower,
                upper,
                upper_inclusive,
            } => {
                let col = quote_mssql(column)?;
                let op = if *upper_inclusive { "<=" } else { "<" };
                Ok(Some(format!(
                    "{col} >= {lower} AND {col} {op} {upper}",
                    col = col,
                    lower = lower,
                    op = op,
                    upper = upper
                )))
            }
            ChunkPredicate::RowWindow { .. } => Ok(None),
        }
    }

    /// Full extraction query for this chunk of `table`.
    ///
    /// Row windows page over `row_order` with `OFFSET .. FETCH`, so the order
    /// expression must be stable for the duration of the run.
    pub fn extraction_query(&self, table: &TableId, row_order: &str) -> Result<String> {
        let from = table.quoted()?;
        match self {
            ChunkPredicate::KeyRange { .. } => match self.where_clause()? {
                Some(filter) => Ok(format!("SELECT * FROM {} WHERE {}", from, filter)),
                None => Ok(format!("SELECT * FROM {}", from)),
            },
            ChunkPredicate::RowWindow { start_row, end_row } => {
                let offset = (start_row - 1).max(0);
                let fetch = (end_row - start_row + 1).max(0);
                if fetch == 0 {
                    return Ok(format!("SELECT * FROM {} WHERE 1 = 0", from));
                }
                Ok(format!(
                    "SELECT * FROM {} ORDER BY {} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                    from, row_order, offset, fetch
                ))
            }
        }
    }
}

/// One chunk of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSpec {
    /// 1-based chunk id, increasing with the key/row position.
    pub chunk_id: u32,

    /// Row filter for this chunk.
    pub predicate: ChunkPredicate,

    /// Estimated rows in the chunk.
    pub estimated_rows: i64,
}

/// How a table will be transferred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", content = "chunks", rename_all = "snake_case")]
pub enum ChunkPlan {
    Unchunked,
    Chunked(Vec<ChunkSpec>),
}

impl ChunkPlan {
    /// Number of transfer units this plan produces.
    pub fn unit_count(&self) -> usize {
        match self {
            ChunkPlan::Unchunked => 1,
            ChunkPlan::Chunked(chunks) => chunks.len(),
        }
    }

    pub fn chunks(&self) -> &[ChunkSpec] {
        match self {
            ChunkPlan::Unchunked => &[],
            ChunkPlan::Chunked(chunks) => chunks,
        }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self, ChunkPlan::Chunked(_))
    }
}

/// Number of chunks a table of `size` should be split into (1 = don't split).
pub fn desired_chunks(size: &TableSize, settings: &ChunkSettings) -> usize {
    if !(size.used_space_mb >= settings.threshold_mb) || settings.max_chunk_mb <= 0.0 {
        return 1;
    }
    let desired = (size.used_space_mb / settings.max_chunk_mb).ceil();
    if !desired.is_finite() || desired < 1.0 {
        return 1;
    }
    (desired as usize).clamp(1, settings.max_chunks.max(1))
}

/// Decide whether and how to split `table`.
pub fn plan(
    table: &TableId,
    size: Option<&TableSize>,
    key: Option<&KeyColumnInfo>,
    range: Option<&KeyRange>,
    settings: &ChunkSettings,
) -> ChunkPlan {
    let Some(size) = size else {
        debug!("{}: size unknown, transferring as a single unit", table);
        return ChunkPlan::Unchunked;
    };

    let desired = desired_chunks(size, settings);
    if desired <= 1 {
        return ChunkPlan::Unchunked;
    }

    if let (Some(key), Some(range)) = (key, range) {
        if key.key_type.is_numeric() {
            match plan_key_ranges(&key.name, range, desired) {
                Some(plan) => {
                    debug!(
                        "{}: {} key-range unit(s) on {}",
                        table,
                        plan.unit_count(),
                        key.name
                    );
                    return plan;
                }
                None => debug!(
                    "{}: key range of {} overflows decimal arithmetic",
                    table, key.name
                ),
            }
        }
    }

    debug!(
        "{}: no usable numeric key range, using {} row windows",
        table, desired
    );
    plan_row_windows(size.row_count, desired)
}

/// Equal-width key ranges over `[min, max]`. `None` when the boundaries
/// cannot be computed without overflow.
fn plan_key_ranges(column: &str, range: &KeyRange, desired: usize) -> Option<ChunkPlan> {
    match (range.min, range.max) {
        (RangeValue::Int(min), RangeValue::Int(max)) => Some(plan_integer_ranges(
            column,
            min,
            max,
            range.count,
            desired,
        )),
        (RangeValue::Decimal(min), RangeValue::Decimal(max)) => {
            plan_decimal_ranges(column, min, max, range.count, desired)
        }
        (RangeValue::Int(min), RangeValue::Decimal(max)) => {
            plan_decimal_ranges(column, Decimal::from(min), max, range.count, desired)
        }
        (RangeValue::Decimal(min), RangeValue::Int(max)) => {
            plan_decimal_ranges(column, min, Decimal::from(max), range.count, desired)
        }
    }
}

/// Closed integer intervals `[lo, hi]`, the next one starting at `hi + 1`.
fn plan_integer_ranges(column: &str, min: i64, max: i64, count: i64, desired: usize) -> ChunkPlan {
    if min >= max {
        return ChunkPlan::Unchunked;
    }

    let span = max as i128 - min as i128 + 1;
    let width = (span / desired as i128).max(1);
    let count = count.max(0) as i128;

    let mut chunks = Vec::with_capacity(desired);
    for i in 0..desired as i128 {
        let lo = min as i128 + i * width;
        if lo > max as i128 {
            break;
        }
        let last = i == desired as i128 - 1 || lo + width > max as i128;
        let hi = if last { max as i128 } else { lo + width - 1 };

        chunks.push(ChunkSpec {
            chunk_id: chunks.len() as u32 + 1,
            predicate: ChunkPredicate::KeyRange {
                column: column.to_string(),
                lower: RangeValue::Int(lo as i64),
                upper: RangeValue::Int(hi as i64),
                upper_inclusive: true,
            },
            estimated_rows: (count * (hi - lo + 1) / span) as i64,
        });

        if last {
            break;
        }
    }

    ChunkPlan::Chunked(chunks)
}

/// Half-open decimal intervals `[lo, next_lo)`; the last one is closed at `max`.
fn plan_decimal_ranges(
    column: &str,
    min: Decimal,
    max: Decimal,
    count: i64,
    desired: usize,
) -> Option<ChunkPlan> {
    if min >= max {
        return Some(ChunkPlan::Unchunked);
    }

    let span = max.checked_sub(min)?;
    let width = span.checked_div(Decimal::from(desired as u64))?;
    if width.is_zero() {
        return Some(ChunkPlan::Unchunked);
    }

    let per_chunk = (count.max(0) as f64 / desired as f64).round() as i64;
    let mut chunks = Vec::with_capacity(desired);
    let mut lo = min;
    for i in 0..desired {
        let last = i == desired - 1;
        let hi = if last {
            max
        } else {
            width
                .checked_mul(Decimal::from(i as u64 + 1))
                .and_then(|offset| min.checked_add(offset))?
        };
        // Rounding can push an interior bound past max on tiny spans.
        let (hi, last) = if hi >= max { (max, true) } else { (hi, last) };

        chunks.push(ChunkSpec {
            chunk_id: i as u32 + 1,
            predicate: ChunkPredicate::KeyRange {
                column: column.to_string(),
                lower: RangeValue::Decimal(lo),
                upper: RangeValue::Decimal(hi),
                upper_inclusive: last,
            },
            estimated_rows: per_chunk,
        });

        if last {
            break;
        }
        lo = hi;
    }

    // Decimal estimates are even splits; keep the total equal to count.
    let assigned = per_chunk * (chunks.len() as i64 - 1);
    if let Some(last_chunk) = chunks.last_mut() {
        last_chunk.estimated_rows = (count.max(0) - assigned).max(0);
    }

    Some(ChunkPlan::Chunked(chunks))
}

/// Row windows `[i*rpc + 1, min((i+1)*rpc, n)]`.
fn plan_row_windows(row_count: i64, desired: usize) -> ChunkPlan {
    let n = row_count.max(0);
    if n == 0 {
        return ChunkPlan::Chunked(vec![ChunkSpec {
            chunk_id: 1,
            predicate: ChunkPredicate::RowWindow {
                start_row: 1,
                end_row: 0,
            },
            estimated_rows: 0,
        }]);
    }

    let desired = desired as i64;
    let rows_per_chunk = (n + desired - 1) / desired;

    let chunks = (0..desired)
        .map(|i| (i * rows_per_chunk + 1, ((i + 1) * rows_per_chunk).min(n)))
        .filter(|(start, _)| *start <= n)
        .enumerate()
        .map(|(idx, (start, end))| ChunkSpec {
            chunk_id: idx as u32 + 1,
            predicate: ChunkPredicate::RowWindow {
                start_row: start,
                end_row: end,
            },
            estimated_rows: end - start + 1,
        })
        .collect();

    ChunkPlan::Chunked(chunks)
}
