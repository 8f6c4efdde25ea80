//! Bookmark export parsing
//!
//! Decodes a Chromium `Bookmarks` JSON file into a flat, pre-ordered list of
//! [`BookmarkEntry`] values. Chromium stores `date_added` as microseconds
//! since 1601-01-01 (the Windows FILETIME epoch) encoded as a string.

use crate::types::BookmarkEntry;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Microseconds between 1601-01-01T00:00:00Z and 1970-01-01T00:00:00Z
pub const CHROME_EPOCH_OFFSET_MICROS: i64 = 11_644_473_600_000_000;

/// Chromium timestamps tick in microseconds
pub const CHROME_TICKS_PER_SECOND: i64 = 1_000_000;

#[derive(Error, Debug)]
pub enum BookmarkError {
    #[error("failed to read bookmarks file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed bookmarks JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum NodeKind {
    Folder,
    Url,
    #[serde(other)]
    Unknown,
}

/// One node of the export tree
#[derive(Debug, Deserialize)]
struct BookmarkNode {
    #[serde(rename = "type")]
    kind: NodeKind,
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    date_added: Option<String>,
    #[serde(default)]
    children: Vec<BookmarkNode>,
}

/// The root containers keyed by name, kept in file order
#[derive(Debug, Default)]
struct Roots(Vec<(String, serde_json::Value)>);

impl<'de> Deserialize<'de> for Roots {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RootsVisitor;

        impl<'de> Visitor<'de> for RootsVisitor {
            type Value = Roots;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of bookmark roots")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Roots, A::Error> {
                let mut roots = Vec::new();
                while let Some(entry) = map.next_entry::<String, serde_json::Value>()? {
                    roots.push(entry);
                }
                Ok(Roots(roots))
            }
        }

        deserializer.deserialize_map(RootsVisitor)
    }
}

#[derive(Debug, Deserialize)]
struct BookmarkFile {
    #[serde(default)]
    roots: Roots,
}

/// Convert a Chromium `date_added` value to UTC
///
/// `13303865461000000` is `2022-08-01T22:11:01Z` (Unix `1659391861`).
pub fn chrome_time_to_utc(raw: i64) -> Option<DateTime<Utc>> {
    if raw <= 0 {
        return None;
    }
    let unix_micros = raw.checked_sub(CHROME_EPOCH_OFFSET_MICROS)?;
    let secs = unix_micros.div_euclid(CHROME_TICKS_PER_SECOND);
    let micros = unix_micros.rem_euclid(CHROME_TICKS_PER_SECOND);
    DateTime::from_timestamp(secs, (micros * 1_000) as u32)
}

fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
        .and_then(chrome_time_to_utc)
}

/// Parse an export held in memory
pub fn parse_bookmarks(json: &str) -> Result<Vec<BookmarkEntry>, BookmarkError> {
    let file: BookmarkFile = serde_json::from_str(json)?;

    // Anything under `roots` that is not a node is metadata.
    let roots: Vec<(String, BookmarkNode)> = file
        .roots
        .0
        .into_iter()
        .filter_map(|(key, value)| {
            serde_json::from_value::<BookmarkNode>(value)
                .ok()
                .map(|node| (key, node))
        })
        .collect();

    let mut entries = Vec::new();
    let mut folders = Vec::new();
    for (key, root) in &roots {
        match root.kind {
            NodeKind::Folder => {
                for child in &root.children {
                    walk(child, key, &mut folders, &mut entries);
                }
            }
            _ => walk(root, key, &mut folders, &mut entries),
        }
    }
    Ok(entries)
}

/// Parse an export from disk
pub fn parse_bookmarks_file(path: &Path) -> Result<Vec<BookmarkEntry>, BookmarkError> {
    let content = std::fs::read_to_string(path).map_err(|source| BookmarkError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_bookmarks(&content)
}

fn walk(node: &BookmarkNode, root: &str, folders: &mut Vec<String>, out: &mut Vec<BookmarkEntry>) {
    match node.kind {
        NodeKind::Url => {
            let Some(raw_url) = node.url.as_deref() else {
                return;
            };
            match Url::parse(raw_url) {
                Ok(url) => out.push(BookmarkEntry {
                    url: url.to_string(),
                    title: node.name.clone(),
                    folder_path: folders.clone(),
                    created_at: parse_timestamp(node.date_added.as_deref()),
                    root: root.to_string(),
                }),
                Err(e) => tracing::debug!(url = raw_url, error = %e, "skipping bookmark with invalid URL"),
            }
        }
        NodeKind::Folder => {
            folders.push(node.name.clone());
            for child in &node.children {
                walk(child, root, folders, out);
            }
            folders.pop();
        }
        NodeKind::Unknown => {}
    }
}

/// Locate the browser's bookmark export on this machine
///
/// An explicit path wins when it exists; otherwise the usual Chrome and
/// Chromium profile locations are probed.
pub fn find_bookmarks_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    candidate_paths().into_iter().find(|p| p.exists())
}

fn candidate_paths() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if cfg!(target_os = "macos") {
        if let Some(support) = dirs::data_dir() {
            let chrome = support.join("Google").join("Chrome");
            candidates.push(chrome.join("Default").join("Bookmarks"));
            candidates.push(chrome.join("Profile 1").join("Bookmarks"));
        }
    } else if cfg!(target_os = "windows") {
        if let Some(local) = dirs::data_local_dir() {
            candidates.push(
                local
                    .join("Google")
                    .join("Chrome")
                    .join("User Data")
                    .join("Default")
                    .join("Bookmarks"),
            );
        }
    } else if let Some(config) = dirs::config_dir() {
        candidates.push(config.join("google-chrome").join("Default").join("Bookmarks"));
        candidates.push(config.join("chromium").join("Default").join("Bookmarks"));
    }
    candidates
}

/// Selection applied to parsed entries before they are returned to a caller
#[derive(Debug, Clone, Default)]
pub struct BookmarkFilter {
    /// Keep entries created at or after this instant; undated entries are dropped
    pub since: Option<DateTime<Utc>>,
    /// Case-insensitive substring matched against the joined folder path
    pub folder: Option<String>,
    pub limit: Option<usize>,
}

impl BookmarkFilter {
    /// Cutoff `days` before now; `None` when it falls outside the calendar range
    pub fn since_days_ago(days: i64) -> Option<DateTime<Utc>> {
        let window = chrono::Duration::try_days(days.max(0))?;
        Utc::now().checked_sub_signed(window)
    }

    pub fn apply(&self, entries: Vec<BookmarkEntry>) -> Vec<BookmarkEntry> {
        let folder = self
            .folder
            .as_deref()
            .map(str::to_lowercase)
            .filter(|f| !f.is_empty());

        entries
            .into_iter()
            .filter(|entry| match self.since {
                Some(cutoff) => entry.created_at.is_some_and(|at| at >= cutoff),
                None => true,
            })
            .filter(|entry| match &folder {
                Some(needle) => entry.folder().to_lowercase().contains(needle.as_str()),
                None => true,
            })
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "checksum": "abc",
        "roots": {
            "bookmark_bar": {
                "type": "folder",
                "name": "Bookmarks bar",
                "date_added": "13303865000000000",
                "children": [
                    {"type": "url", "name": "Rust", "url": "https://www.rust-lang.org/", "date_added": "13303865461000000"},
                    {"type": "folder", "name": "Reading", "children": [
                        {"type": "folder", "name": "Empty", "children": []},
                        {"type": "url", "name": "Tokio", "url": "https://tokio.rs/", "date_added": "13303865462500000"},
                        {"type": "folder", "name": "Deep", "children": [
                            {"type": "url", "name": "Axum", "url": "https://docs.rs/axum", "date_added": "bogus"}
                        ]}
                    ]},
                    {"type": "url", "name": "Broken", "url": "not a url"}
                ]
            },
            "other": {
                "type": "folder",
                "name": "Other bookmarks",
                "children": [
                    {"type": "url", "name": "Serde", "url": "https://serde.rs/", "date_added": "13303865470000000"}
                ]
            },
            "synced": {"type": "folder", "name": "Mobile bookmarks", "children": []}
        },
        "version": 1
    }"#;

    #[test]
    fn test_reference_timestamp() {
        let converted = chrome_time_to_utc(13_303_865_461_000_000).unwrap();
        assert_eq!(converted.timestamp(), 1_659_391_861);
        assert_eq!(converted, Utc.with_ymd_and_hms(2022, 8, 1, 22, 11, 1).unwrap());
    }

    #[test]
    fn test_sub_second_precision_kept() {
        let converted = chrome_time_to_utc(13_303_865_462_500_000).unwrap();
        assert_eq!(converted.timestamp(), 1_659_391_862);
        assert_eq!(converted.timestamp_subsec_micros(), 500_000);
    }

    #[test]
    fn test_non_positive_timestamp_is_none() {
        assert!(chrome_time_to_utc(0).is_none());
        assert!(chrome_time_to_utc(-5).is_none());
    }

    #[test]
    fn test_pre_order_with_folder_paths() {
        let entries = parse_bookmarks(SAMPLE).unwrap();
        let summary: Vec<(&str, String, &str)> = entries
            .iter()
            .map(|e| (e.title.as_str(), e.folder(), e.root.as_str()))
            .collect();

        assert_eq!(
            summary,
            vec![
                ("Rust", String::new(), "bookmark_bar"),
                ("Tokio", "Reading".to_string(), "bookmark_bar"),
                ("Axum", "Reading/Deep".to_string(), "bookmark_bar"),
                ("Serde", String::new(), "other"),
            ]
        );
        assert_eq!(entries[0].created_at.unwrap().timestamp(), 1_659_391_861);
        assert!(entries[2].created_at.is_none());
    }

    #[test]
    fn test_parsing_is_idempotent() {
        let first = parse_bookmarks(SAMPLE).unwrap();
        let second = parse_bookmarks(SAMPLE).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_tree_yields_empty_list() {
        let json = r#"{"roots": {"bookmark_bar": {"type": "folder", "name": "Bookmarks bar", "children": []}}}"#;
        assert!(parse_bookmarks(json).unwrap().is_empty());
        assert!(parse_bookmarks(r#"{"roots": {}}"#).unwrap().is_empty());
        assert!(parse_bookmarks("{}").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(matches!(parse_bookmarks("{"), Err(BookmarkError::Parse(_))));
    }

    #[test]
    fn test_extra_roots_are_walked() {
        let json = r#"{"roots": {
            "workspace": {"type": "folder", "name": "Workspace", "children": [
                {"type": "url", "name": "Docs", "url": "https://docs.rs/"}
            ]},
            "sync_transaction_version": "12"
        }}"#;
        let entries = parse_bookmarks(json).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].root, "workspace");
        assert!(entries[0].folder_path.is_empty());
    }

    #[test]
    fn test_roots_walked_in_file_order() {
        let json = r#"{"roots": {
            "other": {"type": "folder", "name": "Other bookmarks", "children": [
                {"type": "url", "name": "First", "url": "https://one.example/"}
            ]},
            "zeta": {"type": "folder", "name": "Zeta", "children": [
                {"type": "url", "name": "Second", "url": "https://two.example/"}
            ]},
            "bookmark_bar": {"type": "folder", "name": "Bookmarks bar", "children": [
                {"type": "url", "name": "Third", "url": "https://three.example/"}
            ]}
        }}"#;
        let entries = parse_bookmarks(json).unwrap();
        let titles: Vec<&str> = entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second", "Third"]);
        assert_eq!(entries[1].root, "zeta");
    }

    #[test]
    fn test_parse_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let entries = parse_bookmarks_file(file.path()).unwrap();
        assert_eq!(entries.len(), 4);

        let missing = parse_bookmarks_file(Path::new("/nonexistent/Bookmarks"));
        assert!(matches!(missing, Err(BookmarkError::Read { .. })));
    }

    #[test]
    fn test_find_explicit_path() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(
            find_bookmarks_file(Some(file.path())),
            Some(file.path().to_path_buf())
        );
        assert_eq!(find_bookmarks_file(Some(Path::new("/nonexistent/Bookmarks"))), None);
    }

    #[test]
    fn test_filter_since_folder_limit() {
        let entries = parse_bookmarks(SAMPLE).unwrap();

        let recent = BookmarkFilter {
            since: chrome_time_to_utc(13_303_865_462_000_000),
            ..Default::default()
        }
        .apply(entries.clone());
        let titles: Vec<&str> = recent.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Tokio", "Serde"]);

        let reading = BookmarkFilter {
            folder: Some("READING".to_string()),
            limit: Some(1),
            ..Default::default()
        }
        .apply(entries);
        assert_eq!(reading.len(), 1);
        assert_eq!(reading[0].title, "Tokio");
    }

    #[test]
    fn test_since_days_ago_out_of_range() {
        assert!(BookmarkFilter::since_days_ago(100_000_000).is_none());
        assert!(BookmarkFilter::since_days_ago(i64::MAX).is_none());

        let week = BookmarkFilter::since_days_ago(7).unwrap();
        assert!(week < Utc::now());
        assert!(BookmarkFilter::since_days_ago(-3).unwrap() <= Utc::now());
    }
}
