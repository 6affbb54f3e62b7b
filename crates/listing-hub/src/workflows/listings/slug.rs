/// Derive the canonical slug for a title, address, or explicit slug.
///
/// Lowercases the input, drops everything outside `[a-z0-9]`, whitespace, and `-`, then
/// folds runs of whitespace and hyphens into a single hyphen with no hyphen at either end.
/// An empty result means "no slug provided" and must never be used as a collision key.
pub fn normalize_slug(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());

    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            slug.push(c);
        } else if (c.is_whitespace() || c == '-') && !slug.ends_with('-') {
            slug.push('-');
        }
    }

    slug.trim_matches('-').to_string()
}

/// Slug used when the input is absent or normalizes to nothing.
pub(crate) fn non_empty_slug(text: Option<&str>) -> Option<String> {
    text.map(normalize_slug).filter(|slug| !slug.is_empty())
}

/// Base name for a stored media file derived from the uploaded filename.
pub(crate) fn file_stem_slug(filename: &str) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };

    let slug = normalize_slug(stem);
    if slug.is_empty() {
        "image".to_string()
    } else {
        slug
    }
}
