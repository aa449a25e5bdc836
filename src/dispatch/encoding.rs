//! Normalization of the non-standard `%uXXXX` percent-encoding some legacy
//! clients still emit in query strings.

use percent_encoding::{percent_encode, NON_ALPHANUMERIC};

fn hex4(chars: &[u8]) -> Option<u16> {
    if chars.len() < 4 {
        return None;
    }
    let mut v: u16 = 0;
    for &c in &chars[..4] {
        v = v.checked_mul(16)?;
        v += (c as char).to_digit(16)? as u16;
    }
    Some(v)
}

/// Decode every `%uXXXX` run into UTF-16 code units and re-emit it as
/// standard `%XX` UTF-8 percent-encoding. Identity on strings without
/// `%uXXXX` sequences; surrogate pairs decode as one character.
pub fn fix_non_standard_percent_encoding(input: &str) -> String {
    if !input.contains("%u") && !input.contains("%U") {
        return input.to_string();
    }
    let bytes = input.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < bytes.len() {
        let is_unit = (bytes[i] == b'%')
            && i + 1 < bytes.len()
            && (bytes[i + 1] == b'u' || bytes[i + 1] == b'U')
            && hex4(&bytes[i + 2..]).is_some();
        if !is_unit {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        // gather the whole run of %uXXXX units so surrogate pairs survive
        let mut units: Vec<u16> = Vec::new();
        while i + 1 < bytes.len()
            && bytes[i] == b'%'
            && (bytes[i + 1] == b'u' || bytes[i + 1] == b'U')
        {
            match hex4(&bytes[i + 2..]) {
                Some(unit) => {
                    units.push(unit);
                    i += 6;
                }
                None => break,
            }
        }
        let decoded = String::from_utf16_lossy(&units);
        out.extend_from_slice(
            percent_encode(decoded.as_bytes(), NON_ALPHANUMERIC)
                .to_string()
                .as_bytes(),
        );
    }
    // non-unit bytes came from valid UTF-8, inserted parts are ASCII
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_without_nonstandard_sequences() {
        assert_eq!(
            fix_non_standard_percent_encoding("ap=%D0%A2&b=1"),
            "ap=%D0%A2&b=1"
        );
        assert_eq!(fix_non_standard_percent_encoding(""), "");
    }

    #[test]
    fn single_unit_becomes_utf8_percent_encoding() {
        // U+0426 CYRILLIC CAPITAL LETTER TSE → 0xD0 0xA6
        assert_eq!(fix_non_standard_percent_encoding("%u0426"), "%D0%A6");
    }

    #[test]
    fn decodes_to_the_same_text_as_the_original_denoted() {
        let fixed = fix_non_standard_percent_encoding("x=%u0422%u0435%u0441%u0442");
        let decoded: String = percent_encoding::percent_decode_str(&fixed)
            .decode_utf8()
            .unwrap()
            .into_owned();
        assert_eq!(decoded, "x=Тест");
    }

    #[test]
    fn surrogate_pairs_decode_as_one_character() {
        // U+1F600 as a surrogate pair
        let fixed = fix_non_standard_percent_encoding("%uD83D%uDE00");
        let decoded: String = percent_encoding::percent_decode_str(&fixed)
            .decode_utf8()
            .unwrap()
            .into_owned();
        assert_eq!(decoded, "😀");
    }

    #[test]
    fn malformed_unit_is_left_alone() {
        assert_eq!(fix_non_standard_percent_encoding("%u12"), "%u12");
        assert_eq!(fix_non_standard_percent_encoding("%uZZZZ"), "%uZZZZ");
    }
}
