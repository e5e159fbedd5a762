//! Well-known name validation.

use crate::limits::MAX_NAME_LEN;

/// Check whether `name` is a valid well-known bus name.
///
/// A name is valid iff all of the following hold:
///
/// - it is at most [`MAX_NAME_LEN`] bytes long;
/// - it consists of two or more non-empty elements separated by single `.`
///   characters (so it contains at least one `.`, and neither starts nor
///   ends with one);
/// - every element is built from ASCII `[A-Za-z0-9_-]`;
/// - no element starts with a digit.
///
/// Never allocates.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    if name.len() > MAX_NAME_LEN {
        return false;
    }

    // `at_element_start` doubles as the "previous byte was a separator"
    // state; it starts true so a leading '.' and a leading digit are both
    // caught by the same checks as their mid-string counterparts.
    let mut at_element_start = true;
    let mut seen_dot = false;

    for &b in name.as_bytes() {
        if b == b'.' {
            if at_element_start {
                // Empty element: leading '.', or "..".
                return false;
            }
            at_element_start = true;
            seen_dot = true;
        } else {
            let good = b.is_ascii_alphabetic()
                || (!at_element_start && b.is_ascii_digit())
                || b == b'_'
                || b == b'-';
            if !good {
                return false;
            }
            at_element_start = false;
        }
    }

    // `at_element_start` here means empty input or a trailing '.'.
    !at_element_start && seen_dot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_names() {
        for name in ["a.b", "foo.bar.baz", "_x.y", "a-b.c", "org.example.Svc1"] {
            assert!(is_valid_name(name), "expected {name:?} to be valid");
        }
    }

    #[test]
    fn rejects_missing_or_misplaced_dots() {
        for name in ["", "a", ".a.b", "a.b.", "a..b", "."] {
            assert!(!is_valid_name(name), "expected {name:?} to be invalid");
        }
    }

    #[test]
    fn rejects_digit_led_elements() {
        assert!(!is_valid_name("1a.b"));
        assert!(!is_valid_name("a.1b"));
        // Digits are fine after the first byte of an element.
        assert!(is_valid_name("a1.b2"));
    }

    #[test]
    fn rejects_bad_characters() {
        for name in ["a.b c", "a.b/c", "a.b\u{e9}", "a.b\0c"] {
            assert!(!is_valid_name(name), "expected {name:?} to be invalid");
        }
    }

    #[test]
    fn enforces_length_limit() {
        // 255 bytes exactly: "a." followed by 253 'b's.
        let longest = format!("a.{}", "b".repeat(MAX_NAME_LEN - 2));
        assert_eq!(longest.len(), MAX_NAME_LEN);
        assert!(is_valid_name(&longest));

        let too_long = format!("a.{}", "b".repeat(MAX_NAME_LEN - 1));
        assert_eq!(too_long.len(), MAX_NAME_LEN + 1);
        assert!(!is_valid_name(&too_long));
    }

    #[test]
    fn dash_and_underscore_may_lead_elements() {
        assert!(is_valid_name("-a.b"));
        assert!(is_valid_name("a._b"));
        assert!(is_valid_name("a.-"));
    }
}
