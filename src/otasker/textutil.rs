//! Text fix-ups applied to parameter values, response buffers and headers.
//!
//! The database always hands the gateway UTF-8, but legacy PL/SQL code still
//! stamps windows-1251 charsets into content types and `<meta>` tags, emits
//! bare line feeds, and produces unencoded filenames in `Content-Disposition`
//! headers. Everything here exists to undo one of those habits.

use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};

const CR: char = '\r';
const LF: char = '\n';

/// Trim trailing CR/LF from a scalar parameter value.
pub fn trim_right_crlf(val: &str) -> &str {
    val.trim_end_matches(['\r', '\n'])
}

/// Drop every carriage return from a string parameter value.
pub fn remove_cr(val: &str) -> String {
    val.replace(CR, "")
}

/// Insert a carriage return ahead of every bare line feed.
///
/// Identity on text that already uses CRLF endings, and idempotent. CR and LF
/// are ASCII, so a byte scan is safe on UTF-8 input.
pub fn add_cr(val: &str) -> String {
    let bytes = val.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut prev = 0u8;
    for &b in bytes {
        if b == LF as u8 && prev != CR as u8 {
            out.push(CR as u8);
        }
        out.push(b);
        prev = b;
    }
    // only ASCII bytes were inserted
    String::from_utf8(out).unwrap_or_else(|_| val.to_string())
}

/// Pull the base name out of a `Content-Disposition` header value.
///
/// `filename="x/y/z"; other` yields `z`; when no `filename=` parameter is
/// present the result is empty.
pub fn extract_file_name(content_disposition: &str) -> String {
    for part in content_disposition.split("; ") {
        if let Some(raw) = part.strip_prefix("filename=") {
            let cleaned = raw.replace('"', "");
            return cleaned
                .rsplit(['/', '\\'])
                .next()
                .unwrap_or_default()
                .to_string();
        }
    }
    String::new()
}

/// Rewrite the charset parameter of textual content types to utf-8.
///
/// Returns the fixed content type, the charset that was declared before the
/// rewrite, and whether a rewrite happened.
pub fn fix_content_type(content_type: &str) -> (String, String, bool) {
    let mut parts = content_type.split(';');
    let mt = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
    if mt.starts_with("text")
        || mt.starts_with("application/json")
        || mt.starts_with("application/javascript")
        || mt.starts_with("application/x-sql")
    {
        let mut charset = String::new();
        for p in parts {
            if let Some(v) = p.trim().strip_prefix("charset=") {
                charset = v.trim().to_string();
            }
        }
        return (format!("{}; charset=utf-8", mt), charset, true);
    }
    (content_type.to_string(), String::new(), false)
}

const META_VARIANTS: [&str; 3] = [
    r#"<meta http-equiv="Content-Type" content="text/html; charset=windows-1251">"#,
    r#"<meta http-equiv=Content-Type content="text/html; charset=windows-1251">"#,
    r#"<meta http-equiv="CONTENT-TYPE content="text/html; charset=windows-1251">"#,
];
const META_UTF8: &str = r#"<meta http-equiv="Content-Type" content="text/html; charset=utf-8">"#;

/// Replace embedded windows-1251 `<meta http-equiv="Content-Type">` tags.
pub fn fix_meta(content: Vec<u8>) -> Vec<u8> {
    match String::from_utf8(content) {
        Ok(mut text) => {
            for variant in META_VARIANTS {
                if text.contains(variant) {
                    text = text.replace(variant, META_UTF8);
                }
            }
            text.into_bytes()
        }
        Err(err) => err.into_bytes(),
    }
}

/// Percent-encode a filename for `Content-Disposition`, leaving already
/// MIME-encoded (`=?utf-8?...`) names alone.
pub fn encode_filename(filename: &str) -> String {
    if filename.starts_with("=?utf-8?") {
        return filename.to_string();
    }
    let decoded = percent_decode_str(filename)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| filename.to_string());
    utf8_percent_encode(&decoded, NON_ALPHANUMERIC).to_string()
}

/// Parse the custom-header blob a wrapper block returns.
///
/// One header per line, `Name: value`. Within `Content-Disposition`, any
/// `filename=` parameter is re-quoted and percent-encoded.
pub fn parse_headers(headers: &str) -> Vec<(String, String)> {
    let mut fixed = Vec::new();
    for line in headers.split('\n') {
        if line.is_empty() {
            continue;
        }
        let (name, value) = match line.find(':') {
            Some(i) => (line[..i].trim(), line[i + 1..].trim()),
            None => (line.trim(), ""),
        };
        if name.eq_ignore_ascii_case("content-disposition") {
            let mut new_val = String::new();
            for part in value.split("; ") {
                if let Some(fname) = part.strip_prefix("filename=") {
                    new_val.push_str("filename=\"");
                    new_val.push_str(&encode_filename(&fname.replace('"', "")));
                    new_val.push_str("\";");
                } else {
                    new_val.push_str(part);
                    new_val.push(';');
                }
            }
            fixed.push((name.to_string(), new_val));
        } else {
            fixed.push((name.to_string(), value.to_string()));
        }
    }
    fixed
}

/// Double single quotes for inclusion in a PL/SQL string literal.
pub fn quote_literal(val: &str) -> String {
    val.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_cr_inserts_before_bare_lf() {
        assert_eq!(add_cr("a\nb"), "a\r\nb");
        assert_eq!(add_cr("a\nb\nc"), "a\r\nb\r\nc");
    }

    #[test]
    fn add_cr_is_identity_on_crlf_text() {
        assert_eq!(add_cr("a\r\nb\r\n"), "a\r\nb\r\n");
    }

    #[test]
    fn add_cr_is_idempotent() {
        let once = add_cr("x\ny\nz");
        assert_eq!(add_cr(&once), once);
    }

    #[test]
    fn add_cr_keeps_multibyte_text_intact() {
        assert_eq!(add_cr("привет\nмир"), "привет\r\nмир");
    }

    #[test]
    fn trim_right_crlf_only_touches_the_tail() {
        assert_eq!(trim_right_crlf("a\r\nb\r\n"), "a\r\nb");
        assert_eq!(trim_right_crlf("abc"), "abc");
    }

    #[test]
    fn extract_file_name_takes_base_name() {
        assert_eq!(
            extract_file_name("filename=\"x/y/z\"; other"),
            "z".to_string()
        );
        assert_eq!(
            extract_file_name("attachment; filename=\"c:\\dir\\report.pdf\""),
            "report.pdf".to_string()
        );
    }

    #[test]
    fn extract_file_name_without_parameter_is_empty() {
        assert_eq!(extract_file_name("attachment; size=10"), "");
    }

    #[test]
    fn fix_content_type_rewrites_textual_charsets() {
        let (ct, was, fixed) = fix_content_type("text/html; charset=windows-1251");
        assert!(fixed);
        assert_eq!(ct, "text/html; charset=utf-8");
        assert_eq!(was, "windows-1251");
    }

    #[test]
    fn fix_content_type_leaves_binary_alone() {
        let (ct, _, fixed) = fix_content_type("application/pdf");
        assert!(!fixed);
        assert_eq!(ct, "application/pdf");
    }

    #[test]
    fn fix_meta_replaces_legacy_tag() {
        let body = format!("<head>{}</head>", META_VARIANTS[0]);
        let out = fix_meta(body.into_bytes());
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("charset=utf-8"));
        assert!(!out.contains("windows-1251"));
    }

    #[test]
    fn parse_headers_splits_lines_and_trims() {
        let parsed = parse_headers("X-One: a\nX-Two:  b \n");
        assert_eq!(
            parsed,
            vec![
                ("X-One".to_string(), "a".to_string()),
                ("X-Two".to_string(), "b".to_string())
            ]
        );
    }

    #[test]
    fn parse_headers_encodes_disposition_filenames() {
        let parsed = parse_headers("Content-Disposition: attachment; filename=\"о т ч е т.txt\"");
        assert_eq!(parsed.len(), 1);
        let (name, value) = &parsed[0];
        assert_eq!(name, "Content-Disposition");
        assert!(value.starts_with("attachment;"));
        assert!(value.contains("filename=\""));
        assert!(!value.contains(' ') || value.contains("%20"));
    }

    #[test]
    fn quote_literal_doubles_quotes() {
        assert_eq!(quote_literal("o'clock"), "o''clock");
    }
}
