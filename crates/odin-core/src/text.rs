//! Fixed-width, NUL-padded text fields.

/// Decode bytes as text, dropping every NUL byte.
pub fn decode_nul_padded(bytes: &[u8]) -> String {
    let kept: Vec<u8> = bytes.iter().copied().filter(|&b| b != 0).collect();
    String::from_utf8_lossy(&kept).into_owned()
}

/// Encode `text` into an `N`-byte field, truncating and NUL-padding.
pub fn encode_nul_padded<const N: usize>(text: &str) -> [u8; N] {
    let mut field = [0u8; N];
    let bytes = text.as_bytes();
    let len = bytes.len().min(N);
    field[..len].copy_from_slice(&bytes[..len]);
    field
}
