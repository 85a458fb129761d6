/// Longest stem we write, in bytes, leaving room for the extension.
pub const MAX_STEM_BYTES: usize = 200;
const MAX_ID_BYTES: usize = 64;
const MAX_EXTENSION_LEN: usize = 16;

/// Turn an arbitrary title into something every common filesystem accepts.
pub fn sanitize_filename(filename: &str) -> String {
    let replaced = filename.replace(
        |c: char| c.is_control() || matches!(c, '/' | '\\' | '?' | '<' | '>' | ':' | '*' | '|' | '"'),
        "_",
    );
    let trimmed = replaced.trim().trim_end_matches(['.', ' ']);

    let mut name = truncate_at_char_boundary(trimmed, MAX_STEM_BYTES).to_string();
    if name.is_empty() || name.chars().all(|c| c == '.') {
        name = "untitled".to_string();
    }
    if is_reserved_windows_name(&name) {
        name.push('_');
    }
    name
}

/// Filename stem for an item. `disambiguate` appends the item identifier for
/// titles shared by more than one item. The result never exceeds
/// [`MAX_STEM_BYTES`].
pub fn item_stem(title: &str, id: &str, disambiguate: bool) -> String {
    let stem = sanitize_filename(title);
    if !disambiguate {
        return stem;
    }
    let id = sanitize_filename(id);
    let suffix = format!(" [{}]", truncate_at_char_boundary(&id, MAX_ID_BYTES));
    let title = truncate_at_char_boundary(&stem, MAX_STEM_BYTES - suffix.len()).trim_end();
    format!("{}{}", title, suffix)
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn is_reserved_windows_name(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or_default().to_ascii_uppercase();
    matches!(stem.as_str(), "CON" | "PRN" | "AUX" | "NUL")
        || (stem.len() == 4
            && (stem.starts_with("COM") || stem.starts_with("LPT"))
            && stem.as_bytes()[3].is_ascii_digit())
}

/// Name information carried by a `content-disposition` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentName {
    /// Basename declared by the server, if any
    pub filename: Option<String>,
    /// Extension without the leading dot; the default when none was declared
    pub extension: String,
}

/// Parse a `content-disposition` header value.
///
/// `filename*` (RFC 5987) wins over `filename`. Any directory part of the
/// declared name is dropped. The extension is the text after the last dot
/// of the name, kept only if it is short and purely alphanumeric; otherwise
/// `default_extension` is used.
pub fn parse_content_disposition(header: Option<&str>, default_extension: &str) -> ContentName {
    let mut plain = None;
    let mut extended = None;

    for part in header.unwrap_or_default().split(';') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim().trim_matches('"');
        if value.is_empty() {
            continue;
        }
        match key.as_str() {
            "filename*" => {
                // charset'language'percent-encoded
                let encoded = match value.find("''") {
                    Some(idx) => &value[idx + 2..],
                    None => value,
                };
                let decoded = urlencoding::decode(encoded)
                    .map(|d| d.into_owned())
                    .unwrap_or_else(|_| encoded.to_string());
                if !decoded.is_empty() {
                    extended = Some(decoded);
                }
            }
            "filename" => plain = Some(value.to_string()),
            _ => {}
        }
    }

    let filename = extended
        .or(plain)
        .map(|name| basename(&name).to_string())
        .filter(|name| !name.is_empty());

    let extension = filename
        .as_deref()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= MAX_EXTENSION_LEN && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or(default_extension.trim_start_matches('.'))
        .to_string();

    ContentName { filename, extension }
}

fn basename(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_illegal_characters() {
        assert_eq!(sanitize_filename("Dune: Part One"), "Dune_ Part One");
        assert_eq!(sanitize_filename("a/b\\c?d*e"), "a_b_c_d_e");
        assert_eq!(sanitize_filename("test-phrase"), "test-phrase");
    }

    #[test]
    fn sanitize_handles_degenerate_names() {
        assert_eq!(sanitize_filename(""), "untitled");
        assert_eq!(sanitize_filename("..."), "untitled");
        assert_eq!(sanitize_filename("  Trailing dots.. "), "Trailing dots");
        assert_eq!(sanitize_filename("CON"), "CON_");
        assert_eq!(sanitize_filename("lpt1"), "lpt1_");
        assert_eq!(sanitize_filename("Console"), "Console");
    }

    #[test]
    fn sanitize_truncates_on_char_boundary() {
        let long = "é".repeat(300);
        let name = sanitize_filename(&long);
        assert!(name.len() <= MAX_STEM_BYTES);
        assert!(name.chars().all(|c| c == 'é'));
    }

    #[test]
    fn item_stem_disambiguates_with_id() {
        assert_eq!(item_stem("Emma", "B00A", false), "Emma");
        assert_eq!(item_stem("Emma", "B00A", true), "Emma [B00A]");
    }

    #[test]
    fn disambiguated_stem_stays_within_limit() {
        let title = "t".repeat(300);
        let id = "9".repeat(300);
        let stem = item_stem(&title, &id, true);
        assert!(stem.len() <= MAX_STEM_BYTES);
        assert!(stem.ends_with(&format!(" [{}]", "9".repeat(MAX_ID_BYTES))));

        let stem = item_stem(&"é".repeat(150), "B07", true);
        assert!(stem.len() <= MAX_STEM_BYTES);
        assert!(stem.ends_with(" [B07]"));
    }

    #[test]
    fn disposition_absent_uses_default() {
        let name = parse_content_disposition(None, "azw3");
        assert_eq!(name.filename, None);
        assert_eq!(name.extension, "azw3");

        let name = parse_content_disposition(Some(""), ".azw3");
        assert_eq!(name.extension, "azw3");
    }

    #[test]
    fn disposition_without_filename_uses_default() {
        let name = parse_content_disposition(Some("attachment"), "azw3");
        assert_eq!(name.filename, None);
        assert_eq!(name.extension, "azw3");
    }

    #[test]
    fn disposition_plain_and_quoted_filenames() {
        let name = parse_content_disposition(Some("attachment; filename=book.pdf"), "azw3");
        assert_eq!(name.filename.as_deref(), Some("book.pdf"));
        assert_eq!(name.extension, "pdf");

        let name = parse_content_disposition(
            Some("attachment; filename=\"My Book.epub\"; size=100"),
            "azw3",
        );
        assert_eq!(name.filename.as_deref(), Some("My Book.epub"));
        assert_eq!(name.extension, "epub");
    }

    #[test]
    fn disposition_key_is_case_insensitive_and_whitespace_tolerant() {
        let name = parse_content_disposition(Some("attachment;FileName = x.MOBI"), "azw3");
        assert_eq!(name.extension, "MOBI");
    }

    #[test]
    fn disposition_extended_filename_wins() {
        let name = parse_content_disposition(
            Some("attachment; filename=\"fallback.txt\"; filename*=UTF-8''caf%C3%A9.kfx"),
            "azw3",
        );
        assert_eq!(name.filename.as_deref(), Some("café.kfx"));
        assert_eq!(name.extension, "kfx");
    }

    #[test]
    fn disposition_uses_last_dot_segment() {
        let name = parse_content_disposition(Some("attachment; filename=my.book.azw"), "azw3");
        assert_eq!(name.extension, "azw");
    }

    #[test]
    fn disposition_without_usable_extension_uses_default() {
        for header in [
            "attachment; filename=README",
            "attachment; filename=trailing.",
            "attachment; filename=\"weird.ex t\"",
            "attachment; filename=\"\"",
        ] {
            let name = parse_content_disposition(Some(header), "azw3");
            assert_eq!(name.extension, "azw3", "header: {}", header);
        }
    }

    #[test]
    fn disposition_drops_directories() {
        let name = parse_content_disposition(Some("attachment; filename=\"../../etc/x.pdf\""), "azw3");
        assert_eq!(name.filename.as_deref(), Some("x.pdf"));
        assert_eq!(name.extension, "pdf");
    }

    #[test]
    fn extended_filename_decoding_edge_cases() {
        // An encoded slash is still a directory separator once decoded
        let name = parse_content_disposition(Some("attachment; filename*=UTF-8''a%2Fb.pdf"), "azw3");
        assert_eq!(name.filename.as_deref(), Some("b.pdf"));

        // Not UTF-8 once decoded: the raw value is kept
        let name = parse_content_disposition(Some("attachment; filename*=UTF-8''%FF.epub"), "azw3");
        assert_eq!(name.filename.as_deref(), Some("%FF.epub"));
        assert_eq!(name.extension, "epub");
    }

    #[test]
    fn overlong_extension_uses_default() {
        let header = format!("attachment; filename=book.{}", "x".repeat(40));
        let name = parse_content_disposition(Some(&header), "azw3");
        assert_eq!(name.extension, "azw3");
    }
}
