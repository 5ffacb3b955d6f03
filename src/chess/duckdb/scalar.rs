//! Scalar invoke helper for movetext functions.
//!
//! # Safety
//! Only call this from inside a DuckDB scalar `invoke()` while the vectors are
//! valid, with input/output logical types matching the helper.

use std::error::Error;
use std::ffi::CString;

use duckdb::{
    core::{DataChunkHandle, FlatVector, Inserter, LogicalTypeId},
    vtab::arrow::WritableVector,
};
use libduckdb_sys::duckdb_string_t;

use super::string::decode_duckdb_string;

fn ensure_type(
    vec: &FlatVector,
    expected: LogicalTypeId,
    label: &str,
) -> Result<(), Box<dyn Error>> {
    let actual = vec.logical_type().id();
    if actual != expected {
        return Err(format!(
            "movetext scalar type mismatch: {label} expected {expected:?}, got {actual:?}"
        )
        .into());
    }
    Ok(())
}

/// Runs `f` over a `VARCHAR [, BIGINT]` chunk and writes a `VARCHAR` column.
///
/// A NULL movetext row is NULL in the output without calling `f`. The optional
/// second column reaches `f` as `None` when it is absent or NULL, and `f`
/// returning `None` also writes NULL.
pub fn invoke_movetext_to_optional_varchar<F>(
    input: &DataChunkHandle,
    output: &mut dyn WritableVector,
    mut f: F,
) -> Result<(), Box<dyn Error>>
where
    F: FnMut(&str, Option<i64>) -> Result<Option<String>, Box<dyn Error>>,
{
    let rows = input.len();
    let movetext = input.flat_vector(0);
    ensure_type(&movetext, LogicalTypeId::Varchar, "movetext")?;

    let depth = (input.num_columns() > 1).then(|| input.flat_vector(1));
    if let Some(depth) = &depth {
        ensure_type(depth, LogicalTypeId::Bigint, "depth")?;
    }

    let mut result = output.flat_vector();
    ensure_type(&result, LogicalTypeId::Varchar, "result")?;

    let strings = movetext.as_slice::<duckdb_string_t>();
    for (row, raw) in strings.iter().take(rows).enumerate() {
        if movetext.row_is_null(row as u64) {
            result.set_null(row);
            continue;
        }

        // SAFETY: the row is not NULL, so the string header is initialized.
        let text = unsafe { decode_duckdb_string(raw) };
        let row_depth = depth
            .as_ref()
            .filter(|depth| !depth.row_is_null(row as u64))
            .map(|depth| depth.as_slice::<i64>()[row]);

        match f(&text, row_depth)? {
            Some(value) => result.insert(row, CString::new(value)?),
            None => result.set_null(row),
        }
    }

    Ok(())
}
