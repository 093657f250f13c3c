//! Fetching and parsing of remote feeds into the normalized shape consumed
//! by the poll orchestrator and the store.

pub mod fetcher;
pub mod parser;
pub mod types;

/// Normalizes a URL into the form used for dedup keys: trimmed, with the
/// fragment dropped. Unparseable input falls back to the trimmed string so a
/// malformed URL still dedups against itself.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match url::Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_fragment() {
        assert_eq!(
            normalize_url("https://a.example/feed.xml#frag"),
            "https://a.example/feed.xml"
        );
    }

    #[test]
    fn normalize_trims_whitespace() {
        assert_eq!(
            normalize_url("  https://a.example/feed.xml "),
            "https://a.example/feed.xml"
        );
    }

    #[test]
    fn normalize_keeps_unparseable_input() {
        assert_eq!(normalize_url("not a url"), "not a url");
    }
}
