use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FeedFormat {
    XmlFeed,
    JsonFeed,
}

impl FeedFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedFormat::XmlFeed => "xml",
            FeedFormat::JsonFeed => "json",
        }
    }
}

/// One item of a parsed feed, before coercion to the storage schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParsedEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub author: Option<String>,
    pub content: Option<String>,
    pub pubdate: Option<String>,
}

/// Normalized parser output: `{title, link, entries[]}` plus the metadata
/// the subscribe path records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParsedFeed {
    pub format: FeedFormat,
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub date_published: Option<String>,
    pub entries: Vec<ParsedEntry>,
}
