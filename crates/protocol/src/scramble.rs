//! Password scrambling used by the pserver authentication block.
//!
//! The protocol does not encrypt passwords; it applies a fixed substitution
//! over printable ASCII and tags the result with a leading `A`. The table is
//! its own inverse, so the same lookup both scrambles and descrambles.

use crate::error::ProtocolError;

/// Method tag prefixed to every scrambled password.
pub const SCRAMBLE_TAG: char = 'A';

#[rustfmt::skip]
const SHIFTS: [u8; 128] = [
      0,   1,   2,   3,   4,   5,   6,   7,   8,   9,  10,  11,  12,  13,  14,  15,
     16,  17,  18,  19,  20,  21,  22,  23,  24,  25,  26,  27,  28,  29,  30,  31,
    114, 120,  53,  79,  96, 109,  72, 108,  70,  64,  76,  67, 116,  74,  68,  87,
    111,  52,  75, 119,  49,  34,  82,  81,  95,  65, 112,  86, 118, 110, 122, 105,
     41,  57,  83,  43,  46, 102,  40,  89,  38, 103,  45,  50,  42, 123,  91,  35,
    125,  55,  54,  66, 124, 126,  59,  47,  92,  71, 115,  78,  88, 107, 106,  56,
     36, 121, 117, 104, 101, 100,  69,  73,  99,  63,  94,  93,  39,  37,  61,  48,
     58, 113,  32,  90,  44,  98,  60,  51,  33,  97,  62,  77,  84,  80,  85, 127,
];

fn shift(ch: char) -> char {
    match u8::try_from(ch) {
        Ok(byte) if (32..127).contains(&byte) => char::from(SHIFTS[usize::from(byte)]),
        _ => ch,
    }
}

/// Scrambles a clear-text password into the form sent on the wire.
///
/// Characters outside printable ASCII are passed through unchanged; pserver
/// passwords are restricted to the printable range.
///
/// ```
/// assert_eq!(protocol::scramble("anonymous"), "Ay=0=a%0bZ");
/// ```
#[must_use]
pub fn scramble(plain: &str) -> String {
    let mut out = String::with_capacity(plain.len() + 1);
    out.push(SCRAMBLE_TAG);
    out.extend(plain.chars().map(shift));
    out
}

/// Recovers the clear-text password from its scrambled form.
pub fn descramble(scrambled: &str) -> Result<String, ProtocolError> {
    let Some(body) = scrambled.strip_prefix(SCRAMBLE_TAG) else {
        return Err(ProtocolError::MalformedAuth {
            expected: "password scrambled with method 'A'",
            found: String::from("<redacted>"),
        });
    };
    Ok(body.chars().map(shift).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrambles_known_passwords() {
        assert_eq!(scramble("anonymous"), "Ay=0=a%0bZ");
        assert_eq!(scramble(""), "A");
    }

    #[test]
    fn table_is_an_involution_on_printable_ascii() {
        for byte in 32u8..127 {
            let once = SHIFTS[usize::from(byte)];
            assert!((32..127).contains(&once), "{byte} maps outside printable range");
            assert_eq!(SHIFTS[usize::from(once)], byte);
        }
    }

    #[test]
    fn descramble_inverts_scramble() {
        let plain = "s3cr3t pass!~";
        assert_eq!(descramble(&scramble(plain)).unwrap(), plain);
    }

    #[test]
    fn descramble_requires_method_tag() {
        let err = descramble("y=0=a%0bZ").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedAuth { .. }));
        assert!(!err.to_string().contains("y=0"));
    }

    #[test]
    fn non_ascii_characters_pass_through() {
        assert_eq!(scramble("é"), "Aé");
    }
}
