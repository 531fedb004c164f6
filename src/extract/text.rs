//! Text helpers shared by page extractors

/// Builds a URL slug from one or more text parts
///
/// Each part is slugified on its own and the results are joined with `-`.
/// Empty parts are skipped.
///
/// # Examples
///
/// ```
/// use pricewatch::extract::slug_of;
///
/// assert_eq!(slug_of(&["el", "TV-55", "Þráðlaus Hátalari"]), "el-tv-55-thradlaus-hatalari");
/// ```
pub fn slug_of(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| slugify(p))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Lowercases, transliterates and hyphenates a single text
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    let mut buf = [0u8; 4];
    for c in text.chars().flat_map(char::to_lowercase) {
        let mapped: &str = if c.is_ascii_alphanumeric() {
            c.encode_utf8(&mut buf)
        } else {
            transliterate(c)
        };
        if mapped.is_empty() {
            pending_dash = !slug.is_empty();
            continue;
        }
        if pending_dash {
            slug.push('-');
            pending_dash = false;
        }
        slug.push_str(mapped);
    }

    slug
}

fn transliterate(c: char) -> &'static str {
    match c {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => "a",
        'ð' => "d",
        'é' | 'è' | 'ê' | 'ë' => "e",
        'í' | 'ì' | 'î' | 'ï' => "i",
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' | 'ø' => "o",
        'ú' | 'ù' | 'û' | 'ü' => "u",
        'ý' | 'ÿ' => "y",
        'þ' => "th",
        'æ' => "ae",
        'ß' => "ss",
        'ç' => "c",
        'ñ' => "n",
        _ => "",
    }
}

/// Parses a displayed price such as `"12.990 kr."` into whole units
///
/// The first whitespace separated token is used, thousands separators are
/// removed, and anything unparseable becomes 0.
pub fn parse_price(text: &str) -> u64 {
    let normalized = text.trim().replace('\u{00A0}', " ");
    let first = normalized.split(' ').next().unwrap_or("");
    first.replace('.', "").parse().unwrap_or(0)
}

/// Absolute difference between two prices
pub fn price_diff(a: u64, b: u64) -> u64 {
    a.abs_diff(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_icelandic() {
        assert_eq!(slugify("Þvottavél Æðisleg"), "thvottavel-aedisleg");
        assert_eq!(slugify("Fartölvur & Spjaldtölvur"), "fartolvur-spjaldtolvur");
    }

    #[test]
    fn test_slugify_trims_separators() {
        assert_eq!(slugify("  --Sjónvörp-- "), "sjonvorp");
        assert_eq!(slugify("55\" 4K UHD"), "55-4k-uhd");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_slug_of_skips_empty_parts() {
        assert_eq!(slug_of(&["byk", "", "Hamar"]), "byk-hamar");
    }

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("12.990 kr."), 12990);
        assert_eq!(parse_price("  1.299.990\u{00A0}kr"), 1299990);
        assert_eq!(parse_price("990"), 990);
        assert_eq!(parse_price("Uppselt"), 0);
        assert_eq!(parse_price(""), 0);
    }

    #[test]
    fn test_price_diff() {
        assert_eq!(price_diff(100, 90), 10);
        assert_eq!(price_diff(90, 100), 10);
        assert_eq!(price_diff(5, 5), 0);
    }
}
