//! Splitting plaintext into provider-sized chunks.

use secenv_common::{Error, Result};

/// Split `bytes` into ordered slices of at most `max_payload_bytes`.
///
/// Empty input yields zero chunks. Concatenating the slices in order
/// reproduces the input, and the slice count is
/// `ceil(bytes.len() / max_payload_bytes)`.
///
/// # Errors
/// - Returns error if `max_payload_bytes` is zero
pub fn split_payload(bytes: &[u8], max_payload_bytes: usize) -> Result<Vec<&[u8]>> {
    if max_payload_bytes == 0 {
        return Err(Error::InvalidInput(
            "max payload size must be greater than zero".to_string(),
        ));
    }
    Ok(bytes.chunks(max_payload_bytes).collect())
}

/// Number of chunks `split_payload` yields for `len` bytes.
pub fn chunk_count(len: usize, max_payload_bytes: usize) -> usize {
    if max_payload_bytes == 0 {
        return 0;
    }
    len.div_ceil(max_payload_bytes)
}
