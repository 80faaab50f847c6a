//! JSONドキュメント形式の訂正ストア
//!
//! `{"誤ラベル": "正ラベル", ...}` を1ファイルに保存し、書き込みのたびに全体を置き換えます。

use std::path::{Path, PathBuf};

use super::{read_optional, write_atomic, CorrectionBackend, CorrectionMap};
use crate::error::StorageError;

#[derive(Debug, Clone)]
pub struct JsonDocumentBackend {
    path: PathBuf,
}

impl JsonDocumentBackend {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CorrectionBackend for JsonDocumentBackend {
    fn load_all(&self) -> Result<CorrectionMap, StorageError> {
        match read_optional(&self.path)? {
            Some(text) if !text.trim().is_empty() => {
                serde_json::from_str(&text).map_err(|e| StorageError::json(&self.path, e))
            }
            _ => Ok(CorrectionMap::new()),
        }
    }

    fn persist(&self, map: &CorrectionMap) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(map).map_err(|e| StorageError::json(&self.path, e))?;
        write_atomic(&self.path, json.as_bytes())
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonDocumentBackend::new(dir.path().join("corrections.json"));
        assert!(backend.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_reads_flat_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrections.json");
        fs::write(&path, r#"{"cat": "kitten", "dog": "puppy"}"#).unwrap();
        let map = JsonDocumentBackend::new(&path).load_all().unwrap();
        assert_eq!(map.get("cat").map(String::as_str), Some("kitten"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_malformed_document_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrections.json");
        fs::write(&path, "[1, 2").unwrap();
        assert!(matches!(
            JsonDocumentBackend::new(&path).load_all(),
            Err(StorageError::Json { .. })
        ));
    }

    #[test]
    fn test_persist_replaces_whole_document() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonDocumentBackend::new(dir.path().join("corrections.json"));
        let mut map = CorrectionMap::new();
        map.insert("cat".into(), "kitten".into());
        backend.persist(&map).unwrap();

        map.clear();
        map.insert("dog".into(), "puppy".into());
        backend.persist(&map).unwrap();
        assert_eq!(backend.load_all().unwrap(), map);
    }
}
