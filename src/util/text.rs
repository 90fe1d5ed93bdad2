use std::borrow::Cow;

/// Normalizes page-supplied text for display: control characters are
/// dropped and whitespace runs collapse to a single space.
///
/// Author names come straight from the page markup and end up in
/// placeholder labels and terminal output, so escape sequences must not
/// survive. Returns `Cow::Borrowed` when the input is already clean.
///
/// # Examples
///
/// ```
/// use feedblock::util::clean_display_text;
///
/// assert_eq!(clean_display_text("  Alice \n Liddell "), "Alice Liddell");
/// assert_eq!(clean_display_text("bob\x1b[31m"), "bob[31m");
/// ```
pub fn clean_display_text(s: &str) -> Cow<'_, str> {
    let trimmed = s.trim();
    // Only lone ASCII spaces may pass untouched; NBSP and ideographic spaces
    // must be normalized like any other whitespace.
    let is_clean = !trimmed
        .chars()
        .any(|c| c.is_control() || (c.is_whitespace() && c != ' '))
        && !trimmed
            .as_bytes()
            .windows(2)
            .any(|w| w[0] == b' ' && w[1] == b' ');

    if is_clean {
        return Cow::Borrowed(trimmed);
    }

    let mut out = String::with_capacity(trimmed.len());
    let mut pending_space = false;
    for c in trimmed.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if c.is_control() {
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c);
    }

    Cow::Owned(out)
}
