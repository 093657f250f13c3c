use feed_rs::model::Entry;
use serde::Deserialize;

use super::types::{FeedFormat, ParsedEntry, ParsedFeed};

#[derive(Debug, thiserror::Error)]
pub enum FeedParseError {
    #[error("feed payload is empty")]
    EmptyPayload,
    #[error("xml feed parse error: {0}")]
    Xml(#[from] feed_rs::parser::ParseFeedError),
    #[error("json feed parse error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
struct JsonFeed {
    title: Option<String>,
    description: Option<String>,
    home_page_url: Option<String>,
    #[serde(default)]
    items: Vec<JsonFeedItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonFeedItem {
    title: Option<String>,
    url: Option<String>,
    #[serde(default)]
    authors: Vec<JsonFeedAuthor>,
    summary: Option<String>,
    content_text: Option<String>,
    content_html: Option<String>,
    date_published: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonFeedAuthor {
    name: Option<String>,
}

/// Parses raw feed bytes into the normalized shape. A leading `{` selects
/// the JSON Feed path, anything else is handed to feed-rs.
pub fn parse_feed_bytes(raw: &[u8]) -> Result<ParsedFeed, FeedParseError> {
    let trimmed = trim_leading_ascii_whitespace(raw);
    if trimmed.is_empty() {
        return Err(FeedParseError::EmptyPayload);
    }
    if trimmed[0] == b'{' {
        return parse_json_feed(trimmed);
    }
    parse_xml_feed(trimmed)
}

fn parse_xml_feed(raw: &[u8]) -> Result<ParsedFeed, FeedParseError> {
    let feed = feed_rs::parser::parse(raw)?;
    let title = feed.title.as_ref().map(|text| text.content.clone());
    let description = feed.description.as_ref().map(|text| text.content.clone());
    let link = feed.links.first().map(|link| link.href.clone());
    let date_published = feed
        .published
        .or(feed.updated)
        .map(|timestamp| timestamp.to_rfc3339());
    let entries = feed.entries.iter().map(entry_from_xml).collect();

    Ok(ParsedFeed {
        format: FeedFormat::XmlFeed,
        title,
        description,
        link,
        date_published,
        entries,
    })
}

fn parse_json_feed(raw: &[u8]) -> Result<ParsedFeed, FeedParseError> {
    let feed: JsonFeed = serde_json::from_slice(raw)?;
    let entries = feed
        .items
        .into_iter()
        .map(|item| ParsedEntry {
            title: item.title,
            link: item.url,
            author: item.authors.into_iter().find_map(|author| author.name),
            content: item
                .content_html
                .or(item.content_text)
                .or(item.summary),
            pubdate: item.date_published,
        })
        .collect();

    Ok(ParsedFeed {
        format: FeedFormat::JsonFeed,
        title: feed.title,
        description: feed.description,
        link: feed.home_page_url,
        date_published: None,
        entries,
    })
}

fn entry_from_xml(entry: &Entry) -> ParsedEntry {
    let title = entry.title.as_ref().map(|text| text.content.clone());
    let link = entry.links.first().map(|entry_link| entry_link.href.clone());
    let author = entry
        .authors
        .first()
        .map(|person| person.name.clone())
        .filter(|name| !name.trim().is_empty());
    // Full content body when present, summary otherwise.
    let content = entry
        .content
        .as_ref()
        .and_then(|content| content.body.clone())
        .or_else(|| entry.summary.as_ref().map(|text| text.content.clone()));
    let pubdate = entry
        .published
        .or(entry.updated)
        .map(|timestamp| timestamp.to_rfc3339());

    ParsedEntry {
        title,
        link,
        author,
        content,
        pubdate,
    }
}

fn trim_leading_ascii_whitespace(raw: &[u8]) -> &[u8] {
    let mut index = 0;
    while index < raw.len() && raw[index].is_ascii_whitespace() {
        index += 1;
    }
    &raw[index..]
}
