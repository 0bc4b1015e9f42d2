use super::schema::{normalize_date, DATE};
use super::PrepError;
use polars::prelude::*;

/// Drop exact-duplicate rows and sort by date.
///
/// The first occurrence of a duplicated row is kept and the surviving rows
/// keep their relative order. If the frame has a `date` column it is
/// normalized to `Date` and the frame is stably sorted ascending by it.
/// Empty frames come back unchanged. An absent table stays absent:
/// `table.as_ref().map(clean).transpose()`.
pub fn clean(df: &DataFrame) -> Result<DataFrame, PrepError> {
    if df.height() == 0 {
        return Ok(df.clone());
    }

    let deduped = df
        .clone()
        .lazy()
        .unique_stable(None, UniqueKeepStrategy::First)
        .collect()?;

    if deduped.column(DATE).is_err() {
        return Ok(deduped);
    }

    let dated = normalize_date(&deduped)?;
    let sorted = dated
        .lazy()
        .sort(
            [DATE],
            SortMultipleOptions::default()
                .with_order_descending(false)
                .with_nulls_last(true)
                .with_maintain_order(true),
        )
        .collect()?;
    Ok(sorted)
}
