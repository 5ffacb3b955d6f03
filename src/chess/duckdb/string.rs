use libduckdb_sys::duckdb_string_t;

/// Decode a DuckDB string value into a Rust-owned `String`.
///
/// Invalid UTF-8 is replaced rather than rejected; Lichess exports are not
/// always clean.
///
/// # Safety
///
/// `s` must come from a non-NULL `duckdb_string_t` vector row provided by
/// DuckDB for the active scalar invocation. Callers must perform row null checks
/// before invoking this function.
pub unsafe fn decode_duckdb_string(s: &duckdb_string_t) -> String {
    // SAFETY: Reading the inlined union field is part of DuckDB's string layout.
    let inlined_len = unsafe { s.value.inlined.length };

    let bytes = if inlined_len <= 12 {
        // SAFETY: `inlined_len <= 12`, so the inlined buffer holds the whole value.
        let inlined = unsafe { &s.value.inlined.inlined };
        // SAFETY: `inlined` contains `inlined_len` initialized bytes.
        unsafe { std::slice::from_raw_parts(inlined.as_ptr() as *const u8, inlined_len as usize) }
    } else {
        // SAFETY: Non-inlined strings use the pointer representation.
        let (ptr, len) = unsafe { (s.value.pointer.ptr, s.value.pointer.length as usize) };
        // SAFETY: DuckDB keeps `len` bytes behind `ptr` alive for this invocation.
        unsafe { std::slice::from_raw_parts(ptr as *const u8, len) }
    };
    String::from_utf8_lossy(bytes).into_owned()
}
