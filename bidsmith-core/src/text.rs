//! Text normalization helpers shared by the classifier and entity extractor

/// Lowercase and collapse every run of non-alphanumerics into a single `_`
///
/// Leading and trailing separators are dropped: `"T1w MPRAGE (sag)"` becomes
/// `"t1w_mprage_sag"`.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_sep = false;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Normalized text wrapped in separators so `_term_` matches whole tokens
pub fn padded(text: &str) -> String {
    format!("_{}_", normalize(text))
}

/// Lowercase alphanumerics only: `"N-Back Task"` becomes `"nbacktask"`
pub fn compact(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Make a value safe for use as an entity label
///
/// Periods become `p` (so `2.5` reads `2p5`); every other non-alphanumeric
/// character is removed.
pub fn sanitize_label(value: &str) -> String {
    value
        .chars()
        .filter_map(|c| match c {
            '.' => Some('p'),
            c if c.is_ascii_alphanumeric() => Some(c),
            _ => None,
        })
        .collect()
}
