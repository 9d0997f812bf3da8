//! Masking for tenant identifiers in logs

use std::fmt;

/// Number of leading characters left visible
pub const VISIBLE_CHARS: usize = 4;

/// Mask an identifier as its first four characters followed by `***`
///
/// ```
/// assert_eq!(tenantgate_auth::mask::mask("1234567"), "1234***");
/// assert_eq!(tenantgate_auth::mask::mask("12"), "12***");
/// ```
pub fn mask(value: &str) -> String {
    let mut masked: String = value.chars().take(VISIBLE_CHARS).collect();
    masked.push_str("***");
    masked
}

/// Mask every value in a candidate list
pub fn mask_all<'a, I>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    values.into_iter().map(mask).collect()
}

/// Display adapter that masks on format, for use as a tracing field
#[derive(Clone, Copy)]
pub struct Masked<'a>(pub &'a str);

impl fmt::Display for Masked<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&mask(self.0))
    }
}

impl fmt::Debug for Masked<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", mask(self.0))
    }
}
