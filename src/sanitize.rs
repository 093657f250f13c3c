//! Text scrubbing for stored fields.
//!
//! Feed titles and descriptions are always reduced to plain text before
//! persisting. Entry content goes through the [`Sanitizer`] seam so hosts can
//! plug a full HTML-cleaning pipeline; the built-in [`MarkupStripper`] just
//! flattens markup to text.

/// Maximum stored length of a feed or entry title, in characters.
pub const MAX_TITLE_LEN: usize = 1024;

/// Maximum stored length of a feed description, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 8 * 1024;

/// Width passed to the text renderer; wide enough that nothing wraps.
const RENDER_WIDTH: usize = 20_000;

/// Cleans an HTML fragment before it is persisted as entry content.
pub trait Sanitizer: Send + Sync {
    fn sanitize(&self, html: &str) -> String;
}

/// Default sanitizer: renders markup down to plain text.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkupStripper;

impl Sanitizer for MarkupStripper {
    fn sanitize(&self, html: &str) -> String {
        strip_markup(html)
    }
}

/// Renders an HTML fragment to plain text. Inputs without markup pass
/// through with whitespace intact.
pub fn strip_markup(html: &str) -> String {
    if !html.contains('<') && !html.contains('&') {
        return html.to_string();
    }
    html2text::from_read(html.as_bytes(), RENDER_WIDTH)
        .trim_end()
        .to_string()
}

/// Scrub pass applied to titles and descriptions: strip markup, condense
/// internal whitespace, truncate on a character boundary.
pub fn scrub_text(raw: &str, max_len: usize) -> String {
    let stripped = strip_markup(raw);
    let condensed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    if condensed.chars().count() <= max_len {
        return condensed;
    }
    condensed.chars().take(max_len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrub_strips_markup_and_condenses_whitespace() {
        let scrubbed = scrub_text("  <b>Big</b>\n\n  news   today ", MAX_TITLE_LEN);
        assert_eq!(scrubbed, "Big news today");
    }

    #[test]
    fn scrub_truncates_on_character_boundary() {
        let scrubbed = scrub_text("äbcdefgh", 3);
        assert_eq!(scrubbed, "äbc");
    }

    #[test]
    fn plain_text_passes_through_unchanged() {
        assert_eq!(strip_markup("no markup here"), "no markup here");
    }

    #[test]
    fn stripper_flattens_entry_markup() {
        let cleaned = MarkupStripper.sanitize("<p>one</p><p>two</p>");
        assert!(cleaned.contains("one"));
        assert!(cleaned.contains("two"));
        assert!(!cleaned.contains('<'));
    }
}
