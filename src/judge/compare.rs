/// Normalizes program output for comparison
///
/// Leading and trailing whitespace is trimmed, then every space character
/// is removed. Newlines, tabs, case and punctuation are kept, so inline
/// spacing is forgiven but line structure is not.
fn normalize_output(output: &str) -> String {
    output.trim().replace(' ', "")
}

/// Decides whether `actual` output matches `expected` output
pub fn compare(actual: &str, expected: &str) -> bool {
    normalize_output(actual) == normalize_output(expected)
}
