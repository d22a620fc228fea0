//! Typed view over a file's flat property map (spec §3, §9 "duck-typed metadata
//! → typed record").
//!
//! The store only ever emits strings. The [`StateBuilder`](crate::state_builder)
//! keeps the raw `fileId -> propertyName -> value` map; the [`Projection`]
//! converts a file's map into a [`FileMetadata`] snapshot only at the moment a
//! file becomes complete (or changes), so the hot update path never pays for
//! more parsing than it needs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// A file's properties, keyed by dot-normalized property path (`titles/eng`
/// arrives as `titles.eng`). This is the representation both the condition
/// evaluator and the template engine operate over.
pub type PropertyMap = BTreeMap<String, String>;

/// Normalizes a property path to dot form: `/` separators become `.`, as do
/// any already-present `.` separators (a no-op in that case). Used uniformly
/// by the extractor, the evaluator, and the template engine so that
/// `titles/eng`, `titles.eng`, and a condition `field` of either spelling all
/// address the same map entry.
pub fn normalize_property_path(raw: &str) -> String {
    raw.replace('/', ".")
}

/// Extensions recognized as video per spec §6.
pub const VIDEO_EXTENSIONS: &[&str] =
    &["mkv", "mp4", "avi", "mov", "wmv", "flv", "webm", "m4v"];
/// Extensions recognized as subtitle per spec §6.
pub const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "ass", "ssa", "sub", "idx", "vtt"];

/// Infers `fileType` from a file extension when the property is absent
/// (spec §6 fileType inference table).
pub fn infer_file_type(extension: &str) -> Option<String> {
    let ext = extension.trim_start_matches('.').to_ascii_lowercase();
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some("video".to_string())
    } else if SUBTITLE_EXTENSIONS.contains(&ext.as_str()) {
        Some("subtitle".to_string())
    } else if ext == "torrent" {
        Some("torrent".to_string())
    } else {
        None
    }
}

/// Splits `fileName`/`extension` out of a `filePath` when either is absent
/// from the property map, mirroring what a path's basename naturally yields.
pub fn derive_name_and_extension(file_path: &str) -> (String, String) {
    let basename = file_path
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_path)
        .to_string();
    match basename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (basename.clone(), ext.to_string()),
        _ => (basename, String::new()),
    }
}

/// Parses a store value as an epoch (milliseconds or seconds) or an RFC 3339
/// timestamp, per spec §3 (`mtime`, `ctime`: "epoch or ISO; parsed to
/// timestamp").
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(epoch) = raw.parse::<i64>() {
        // Heuristic: values above this threshold are milliseconds, not seconds.
        const MS_THRESHOLD: i64 = 10_000_000_000;
        return if epoch.abs() >= MS_THRESHOLD {
            DateTime::from_timestamp_millis(epoch)
        } else {
            DateTime::from_timestamp(epoch, 0)
        };
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parses a store value as an unsigned byte count, accepting any of the
/// `size` | `fileSize` | `sizeByte` aliases (spec §3).
pub fn parse_size(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok()
}

/// A typed snapshot of one file's properties, derived from its raw
/// [`PropertyMap`] once `filePath` is present (spec §3 invariant: "a file
/// appears in the projection iff its property map contains `filePath`").
#[derive(Debug, Clone, PartialEq)]
pub struct FileMetadata {
    pub file_path: String,
    pub size: u64,
    pub mtime: Option<DateTime<Utc>>,
    pub ctime: Option<DateTime<Utc>>,
    pub file_name: String,
    pub extension: String,
    pub file_type: Option<String>,
    /// The complete dot-normalized property map this snapshot was derived
    /// from, including `extras` addressable by arbitrary slash/dot paths.
    /// Templates and conditions read directly from this map.
    pub properties: PropertyMap,
}

impl FileMetadata {
    /// Builds a typed snapshot from a raw property map. Returns `None` if
    /// `filePath` is absent — the file is not eligible for projection.
    pub fn from_property_map(properties: &PropertyMap) -> Option<Self> {
        let file_path = properties.get("filePath")?.clone();

        let size = properties
            .get("size")
            .or_else(|| properties.get("fileSize"))
            .or_else(|| properties.get("sizeByte"))
            .and_then(|v| parse_size(v))
            .unwrap_or(0);

        let mtime = properties.get("mtime").and_then(|v| parse_timestamp(v));
        let ctime = properties.get("ctime").and_then(|v| parse_timestamp(v));

        let (derived_name, derived_ext) = derive_name_and_extension(&file_path);
        let file_name = properties
            .get("fileName")
            .cloned()
            .unwrap_or(derived_name);
        let extension = properties
            .get("extension")
            .cloned()
            .unwrap_or(derived_ext);

        let file_type = properties
            .get("fileType")
            .cloned()
            .or_else(|| infer_file_type(&extension));

        Some(Self {
            file_path,
            size,
            mtime,
            ctime,
            file_name,
            extension,
            file_type,
            properties: properties.clone(),
        })
    }

    /// Looks up a property by dotted or slashed path, checking the typed
    /// fields first (so `size`/`fileName`/`extension`/`fileType` reflect
    /// inference even when absent from the raw map) and falling back to the
    /// raw property map for everything else.
    pub fn get(&self, path: &str) -> Option<String> {
        let normalized = normalize_property_path(path);
        match normalized.as_str() {
            "filePath" => Some(self.file_path.clone()),
            "size" | "fileSize" | "sizeByte" => Some(self.size.to_string()),
            "fileName" => Some(self.file_name.clone()),
            "extension" => Some(self.extension.clone()),
            "fileType" => self.file_type.clone(),
            _ => self.properties.get(&normalized).cloned(),
        }
    }
}

/// Uniform property lookup for the condition evaluator and template engine.
/// Implemented by both the raw [`PropertyMap`] (bootstrap-time previews,
/// where no typed snapshot exists yet) and [`FileMetadata`] (the common
/// case, once a file has completed).
pub trait PropertyLookup {
    fn lookup(&self, path: &str) -> Option<String>;
}

impl PropertyLookup for PropertyMap {
    fn lookup(&self, path: &str) -> Option<String> {
        self.get(&normalize_property_path(path)).cloned()
    }
}

impl PropertyLookup for FileMetadata {
    fn lookup(&self, path: &str) -> Option<String> {
        self.get(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_file_type_from_extension() {
        assert_eq!(infer_file_type("mkv"), Some("video".to_string()));
        assert_eq!(infer_file_type(".srt"), Some("subtitle".to_string()));
        assert_eq!(infer_file_type("torrent"), Some("torrent".to_string()));
        assert_eq!(infer_file_type("nfo"), None);
    }

    #[test]
    fn derives_name_and_extension_from_path() {
        let (name, ext) = derive_name_and_extension("Movies/Inception.mkv");
        assert_eq!(name, "Inception.mkv");
        assert_eq!(ext, "mkv");
    }

    #[test]
    fn from_property_map_requires_file_path() {
        let mut props = PropertyMap::new();
        props.insert("title".to_string(), "Inception".to_string());
        assert!(FileMetadata::from_property_map(&props).is_none());
    }

    #[test]
    fn from_property_map_synthesizes_missing_fields() {
        let mut props = PropertyMap::new();
        props.insert("filePath".to_string(), "Movies/Inception.mkv".to_string());
        let meta = FileMetadata::from_property_map(&props).unwrap();
        assert_eq!(meta.file_name, "Inception.mkv");
        assert_eq!(meta.extension, "mkv");
        assert_eq!(meta.file_type.as_deref(), Some("video"));
        assert_eq!(meta.size, 0);
    }

    #[test]
    fn get_resolves_nested_extras_by_dot_path() {
        let mut props = PropertyMap::new();
        props.insert("filePath".to_string(), "tv/bb/s01e01.mkv".to_string());
        props.insert("titles.eng".to_string(), "Breaking Bad".to_string());
        let meta = FileMetadata::from_property_map(&props).unwrap();
        assert_eq!(meta.get("titles/eng").as_deref(), Some("Breaking Bad"));
        assert_eq!(meta.get("titles.eng").as_deref(), Some("Breaking Bad"));
    }
}
