//! Color normalization
//!
//! Canonicalizes hex colors into the 8-digit alpha-RGB form used in
//! spreadsheet style parts.

/// Fully transparent black, treated as "no color".
const TRANSPARENT: &str = "00000000";

/// Opaque black, substituted for colors that cannot be interpreted.
pub const FALLBACK_ARGB: &str = "FF000000";

/// Normalize a hex color into `AARRGGBB`.
///
/// Absent, empty and fully transparent values yield `None`. A leading `#` is
/// dropped, 8-digit values pass through, 6-digit values gain an opaque alpha
/// and anything else becomes opaque black.
pub fn normalize_argb(color: Option<&str>) -> Option<String> {
    let color = color?;

    if color.is_empty() || color == TRANSPARENT {
        return None;
    }

    let hex = color.strip_prefix('#').unwrap_or(color);

    match hex.len() {
        8 => Some(hex.to_string()),
        6 => Some(format!("FF{}", hex)),
        _ => Some(FALLBACK_ARGB.to_string()),
    }
}

/// Convert a normalized `AARRGGBB` string into a 24-bit RGB value.
///
/// The alpha byte is discarded. Returns `None` when the digits are not hex.
pub fn argb_to_rgb(argb: &str) -> Option<u32> {
    let value = u32::from_str_radix(argb, 16).ok()?;
    Some(value & 0x00FF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_and_transparent() {
        assert_eq!(normalize_argb(None), None);
        assert_eq!(normalize_argb(Some("")), None);
        assert_eq!(normalize_argb(Some("00000000")), None);
    }

    #[test]
    fn test_six_digit_gains_alpha() {
        assert_eq!(normalize_argb(Some("#ABCDEF")).as_deref(), Some("FFABCDEF"));
        assert_eq!(normalize_argb(Some("FF0000")).as_deref(), Some("FFFF0000"));
    }

    #[test]
    fn test_eight_digit_passes_through() {
        assert_eq!(normalize_argb(Some("ABCDEF12")).as_deref(), Some("ABCDEF12"));
        assert_eq!(normalize_argb(Some("#00FF00FF")).as_deref(), Some("00FF00FF"));
    }

    #[test]
    fn test_unrecognized_becomes_black() {
        assert_eq!(normalize_argb(Some("ZZZ")).as_deref(), Some("FF000000"));
        assert_eq!(normalize_argb(Some("#12345")).as_deref(), Some("FF000000"));
    }

    #[test]
    fn test_idempotent() {
        for input in ["#ABCDEF", "ABCDEF12", "ZZZ"] {
            let once = normalize_argb(Some(input));
            assert_eq!(normalize_argb(once.as_deref()), once);
        }
    }

    #[test]
    fn test_argb_to_rgb() {
        assert_eq!(argb_to_rgb("FFFF0000"), Some(0xFF0000));
        assert_eq!(argb_to_rgb("00FF00FF"), Some(0xFF00FF));
        assert_eq!(argb_to_rgb("nothex!!"), None);
    }
}
