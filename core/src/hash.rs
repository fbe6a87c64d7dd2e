//! Non-cryptographic string hash used to derive cache keys.

const SEED: i32 = 1_315_423_911;

/// Hash `input` into a hex string.
///
/// Walks UTF-16 code units from the end, folding each with
/// `hash ^= (hash << 5) + ch + (hash >> 2)` in 32-bit wrapping arithmetic.
/// The positive part of the result is rendered in decimal and every digit is
/// then written as its hex char code, so `12` becomes `"3132"`.
pub fn string_hash_code(input: &str, case_sensitive: bool) -> String {
    let folded;
    let input = if case_sensitive {
        input
    } else {
        folded = input.to_lowercase();
        folded.as_str()
    };

    let units: Vec<u16> = input.encode_utf16().collect();
    let mut hash = SEED;
    for &ch in units.iter().rev() {
        let mixed = (hash << 5).wrapping_add(i32::from(ch)).wrapping_add(hash >> 2);
        hash ^= mixed;
    }

    (hash & 0x7FFF_FFFF)
        .to_string()
        .bytes()
        .map(|digit| format!("{digit:x}"))
        .collect()
}
