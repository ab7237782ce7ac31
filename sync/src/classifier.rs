//! Path-convention classification of content files
//!
//! A file's destination table is decided by the directory names on its path,
//! never by its contents. Classification is total: every input yields a
//! [`Classification`], and paths without a recognised category directory are
//! reported as unknown.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::Row;
use crate::tables::DestinationTable;

/// Tag used for both unknown tables and extension-less files
pub const UNKNOWN: &str = "unknown";

/// Result of classifying a path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub table: Option<DestinationTable>,
    pub file_type: String,
}

impl Classification {
    pub fn is_unknown(&self) -> bool {
        self.table.is_none()
    }

    /// Table name, or `unknown`
    pub fn table_name(&self) -> &'static str {
        self.table.map(|t| t.name()).unwrap_or(UNKNOWN)
    }
}

/// Split a relative path on either separator, dropping empty and `.` segments
pub fn split_segments(path: &str) -> Vec<&str> {
    path.split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect()
}

/// Classify a path into a destination table and file type
pub fn classify(path: &str) -> Classification {
    let segments = split_segments(path);
    let directories = match segments.split_last() {
        Some((_, dirs)) => dirs,
        None => &[][..],
    };

    let table = DestinationTable::ALL
        .iter()
        .copied()
        .find(|table| directories.iter().any(|dir| table.segments().contains(dir)));

    Classification {
        table,
        file_type: file_type(path),
    }
}

/// Lowercased extension of the final segment, or `unknown`
pub fn file_type(path: &str) -> String {
    let name = split_segments(path).last().copied().unwrap_or("");

    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => name[idx + 1..].to_lowercase(),
        _ => UNKNOWN.to_string(),
    }
}

/// Identity of a row in the `collections` table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionKey {
    pub language: String,
    pub doc_type: String,
    pub filename: String,
}

/// Parse `…/collections/{language}/{doc_type}/{filename…}`.
///
/// Returns `None` when the anchor or any of the three parts is missing.
pub fn parse_collection_path(path: &str) -> Option<CollectionKey> {
    let segments = split_segments(path);
    let anchor = segments.iter().position(|s| *s == "collections")?;
    let rest = &segments[anchor + 1..];

    if rest.len() < 3 {
        return None;
    }

    Some(CollectionKey {
        language: rest[0].to_string(),
        doc_type: rest[1].to_string(),
        filename: rest[2..].join("/"),
    })
}

/// Identity of a destination row, derived from the file path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowKey {
    Filename(String),
    Collection(CollectionKey),
}

impl RowKey {
    /// Derive the row key a path maps to in `table`.
    ///
    /// Single-key tables use the path remainder after the category directory,
    /// falling back to the bare file name.
    pub fn from_path(table: DestinationTable, path: &str) -> Option<Self> {
        if table.is_composite() {
            return parse_collection_path(path).map(RowKey::Collection);
        }

        let segments = split_segments(path);
        let (name, directories) = segments.split_last()?;

        let filename = directories
            .iter()
            .position(|dir| table.segments().contains(dir))
            .map(|idx| segments[idx + 1..].join("/"))
            .unwrap_or_else(|| name.to_string());

        Some(RowKey::Filename(filename))
    }

    pub fn filename(&self) -> &str {
        match self {
            RowKey::Filename(name) => name,
            RowKey::Collection(key) => &key.filename,
        }
    }

    /// Key columns and values as a backend row
    pub fn to_row(&self) -> Row {
        let mut row = Row::new();
        if let RowKey::Collection(key) = self {
            row.insert("language".into(), Value::String(key.language.clone()));
            row.insert("doc_type".into(), Value::String(key.doc_type.clone()));
        }
        row.insert("filename".into(), Value::String(self.filename().to_string()));
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("config/apiConfig.json", Some(DestinationTable::ConfigFiles), "json")]
    #[case("public/data/projects.json", Some(DestinationTable::DataFiles), "json")]
    #[case("collections/fr/data/skills.json", Some(DestinationTable::Collections), "json")]
    #[case("image/avatar.PNG", Some(DestinationTable::Images), "png")]
    #[case("images/logo.svg", Some(DestinationTable::Images), "svg")]
    #[case("resume/cv.pdf", Some(DestinationTable::Resumes), "pdf")]
    #[case("js/app.js", Some(DestinationTable::JavascriptFiles), "js")]
    #[case("files/readme.txt", Some(DestinationTable::StaticFiles), "txt")]
    #[case("files\\notes.md", Some(DestinationTable::StaticFiles), "md")]
    #[case("misc/notes.txt", None, "txt")]
    #[case("config", None, "unknown")]
    #[case("data.json", None, "json")]
    #[case("", None, "unknown")]
    fn test_classify(
        #[case] path: &str,
        #[case] table: Option<DestinationTable>,
        #[case] file_type: &str,
    ) {
        let classification = classify(path);
        assert_eq!(classification.table, table);
        assert_eq!(classification.file_type, file_type);
    }

    #[test]
    fn test_collections_wins_over_nested_category() {
        // `data` appears too, but the collections directory is more specific
        let classification = classify("collections/en/data/skills.json");
        assert_eq!(classification.table, Some(DestinationTable::Collections));
        assert_eq!(classification.table_name(), "collections");
    }

    #[test]
    fn test_unknown_table_name() {
        let classification = classify("misc/a.json");
        assert!(classification.is_unknown());
        assert_eq!(classification.table_name(), UNKNOWN);
    }

    #[rstest]
    #[case(".env", "unknown")]
    #[case("config/Makefile", "unknown")]
    #[case("config/archive.tar.GZ", "gz")]
    #[case("config/trailing.", "unknown")]
    fn test_file_type_edge_cases(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(file_type(path), expected);
    }

    #[test]
    fn test_parse_collection_path() {
        let key = parse_collection_path("collections/fr/data/skills.json").unwrap();
        assert_eq!(key.language, "fr");
        assert_eq!(key.doc_type, "data");
        assert_eq!(key.filename, "skills.json");

        let nested = parse_collection_path("site/collections/en/blog/2024/post.json").unwrap();
        assert_eq!(nested.language, "en");
        assert_eq!(nested.doc_type, "blog");
        assert_eq!(nested.filename, "2024/post.json");

        assert!(parse_collection_path("collections/fr/skills.json").is_none());
        assert!(parse_collection_path("data/fr/data/skills.json").is_none());
    }

    #[test]
    fn test_row_key_strips_category_prefix() {
        let key = RowKey::from_path(DestinationTable::ConfigFiles, "config/apiConfig.json").unwrap();
        assert_eq!(key, RowKey::Filename("apiConfig.json".into()));

        let key = RowKey::from_path(DestinationTable::DataFiles, "public/data/a/b.json").unwrap();
        assert_eq!(key.filename(), "a/b.json");

        // Category no longer on the path: fall back to the file name
        let key = RowKey::from_path(DestinationTable::DataFiles, "moved/b.json").unwrap();
        assert_eq!(key.filename(), "b.json");
    }

    #[test]
    fn test_collection_row_key_to_row() {
        let key = RowKey::from_path(DestinationTable::Collections, "collections/fr/data/skills.json").unwrap();
        let row = key.to_row();
        assert_eq!(row["language"], "fr");
        assert_eq!(row["doc_type"], "data");
        assert_eq!(row["filename"], "skills.json");

        assert!(RowKey::from_path(DestinationTable::Collections, "collections/fr").is_none());
    }
}
