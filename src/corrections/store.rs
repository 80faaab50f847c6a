//! 訂正ストア本体
//!
//! メモリ上のマップと永続化処理を1つのロックで直列化します。

use std::sync::{Mutex, MutexGuard, PoisonError};

use super::append_log::SEPARATOR;
use super::{CorrectionBackend, CorrectionLookup, CorrectionMap};
use crate::error::CorrectionError;

struct StoreState {
    map: CorrectionMap,
    /// 永続化に失敗したこのセッションの書き込み
    unsynced: CorrectionMap,
}

pub struct CorrectionStore {
    backend: Box<dyn CorrectionBackend>,
    state: Mutex<StoreState>,
}

impl CorrectionStore {
    /// 保存先から読み込んでストアを開く
    ///
    /// 読み込みに失敗しても空のマップで開始する。
    pub fn open(backend: Box<dyn CorrectionBackend>) -> Self {
        let store = Self {
            backend,
            state: Mutex::new(StoreState {
                map: CorrectionMap::new(),
                unsynced: CorrectionMap::new(),
            }),
        };
        store.load();
        store
    }

    /// 保存先を読み直してメモリ上のマップと統合し、その内容を返す
    ///
    /// キーごとに後勝ち: 保存先の内容に、未保存のこのセッションの書き込みを重ねる。
    pub fn load(&self) -> CorrectionMap {
        let mut state = self.lock();
        self.merge_from_backend(&mut state);
        state.map.clone()
    }

    /// 訂正後のラベルを取得
    pub fn get(&self, label: &str) -> Option<String> {
        self.lock().map.get(label).cloned()
    }

    /// 訂正を登録して保存する
    ///
    /// 保存に失敗した場合もメモリ上には反映され、次回の書き込みで再度保存される。
    pub fn set(&self, wrong: &str, correct: &str) -> Result<(), CorrectionError> {
        let (wrong, correct) = (wrong.trim(), correct.trim());
        validate(wrong, correct)?;

        let mut state = self.lock();
        self.merge_from_backend(&mut state);

        // 以前の失敗分が残っていればログ追記ではなく全体を書き直す
        let only_this_write = state.unsynced.is_empty()
            || (state.unsynced.len() == 1 && state.unsynced.contains_key(wrong));

        state.map.insert(wrong.to_string(), correct.to_string());
        state.unsynced.insert(wrong.to_string(), correct.to_string());

        let result = if only_this_write {
            self.backend.record(&state.map, wrong, correct)
        } else {
            self.backend.persist(&state.map)
        };

        match result {
            Ok(()) => {
                state.unsynced.clear();
                tracing::info!(
                    backend = %self.backend.describe(),
                    wrong,
                    correct,
                    "correction recorded"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    backend = %self.backend.describe(),
                    error = %e,
                    wrong,
                    "correction kept in memory only"
                );
                Err(CorrectionError::Persist(e))
            }
        }
    }

    /// マップ全体を保存する
    pub fn save(&self) -> Result<(), CorrectionError> {
        let mut state = self.lock();
        self.merge_from_backend(&mut state);
        self.backend
            .persist(&state.map)
            .map_err(CorrectionError::Persist)?;
        state.unsynced.clear();
        Ok(())
    }

    /// 登録済みの訂正一覧（誤ラベル順）
    pub fn entries(&self) -> Vec<(String, String)> {
        self.lock()
            .map
            .iter()
            .map(|(wrong, correct)| (wrong.clone(), correct.clone()))
            .collect()
    }

    pub fn snapshot(&self) -> CorrectionMap {
        self.lock().map.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().map.is_empty()
    }

    /// 永続化の保留があるか
    pub fn has_unsynced(&self) -> bool {
        !self.lock().unsynced.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn merge_from_backend(&self, state: &mut StoreState) {
        match self.backend.load_all() {
            Ok(stored) => {
                let mut merged = sanitize(stored);
                for (wrong, correct) in &state.unsynced {
                    merged.insert(wrong.clone(), correct.clone());
                }
                state.map = merged;
            }
            Err(e) => {
                tracing::warn!(
                    backend = %self.backend.describe(),
                    error = %e,
                    "could not read corrections, keeping in-memory state"
                );
            }
        }
    }
}

impl CorrectionLookup for CorrectionStore {
    fn corrected_label(&self, label: &str) -> Option<String> {
        self.get(label)
    }
}

/// どの保存形式でも1件として読み戻せる組か検査する（前後の空白は除去済み）
fn validate(wrong: &str, correct: &str) -> Result<(), CorrectionError> {
    const LINE_BREAKS: [char; 2] = ['\n', '\r'];

    if correct.is_empty() {
        return Err(CorrectionError::EmptyCorrection);
    }
    if wrong.is_empty() {
        return Err(CorrectionError::NoPendingPrediction);
    }
    if wrong.contains(LINE_BREAKS) || wrong.contains(SEPARATOR) {
        return Err(CorrectionError::InvalidLabel {
            label: wrong.to_string(),
        });
    }
    if correct.contains(LINE_BREAKS) {
        return Err(CorrectionError::InvalidLabel {
            label: correct.to_string(),
        });
    }
    if wrong == correct {
        return Err(CorrectionError::NoOpCorrection {
            label: wrong.to_string(),
        });
    }
    Ok(())
}

/// 不正な項目を除き、前後の空白を取り除く
fn sanitize(stored: CorrectionMap) -> CorrectionMap {
    stored
        .into_iter()
        .filter_map(|(wrong, correct)| {
            let (wrong, correct) = (wrong.trim(), correct.trim());
            if validate(wrong, correct).is_err() {
                tracing::warn!(wrong, correct, "dropping invalid stored correction");
                None
            } else {
                Some((wrong.to_string(), correct.to_string()))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corrections::{
        AppendLogBackend, CorrectionBackendKind, JsonDocumentBackend, PreferenceBackend,
    };
    use std::fs;
    use std::path::Path;

    fn json_store(path: &Path) -> CorrectionStore {
        CorrectionStore::open(Box::new(JsonDocumentBackend::new(path)))
    }

    #[test]
    fn test_starts_empty_without_backing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = json_store(&dir.path().join("corrections.json"));
        assert!(store.is_empty());
        assert_eq!(store.get("cat"), None);
    }

    #[test]
    fn test_corrupt_store_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrections.json");
        fs::write(&path, "not json").unwrap();
        let store = json_store(&path);
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = json_store(&dir.path().join("corrections.json"));
        store.set("  cat ", " kitten  ").unwrap();
        assert_eq!(store.get("cat").as_deref(), Some("kitten"));
        assert_eq!(store.entries(), vec![("cat".to_string(), "kitten".to_string())]);
    }

    #[test]
    fn test_empty_correction_does_not_mutate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrections.json");
        let store = json_store(&path);
        assert!(matches!(
            store.set("x", "   "),
            Err(CorrectionError::EmptyCorrection)
        ));
        assert!(store.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_key_is_no_pending_prediction() {
        let dir = tempfile::tempdir().unwrap();
        let store = json_store(&dir.path().join("corrections.json"));
        assert!(matches!(
            store.set(" ", "kitten"),
            Err(CorrectionError::NoPendingPrediction)
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_self_mapping_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = json_store(&dir.path().join("corrections.json"));
        assert!(matches!(
            store.set("cat", " cat "),
            Err(CorrectionError::NoOpCorrection { .. })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_multiline_correction_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrections.log");
        let store = CorrectionStore::open(Box::new(AppendLogBackend::new(&path)));

        let err = store.set("cat", "tabby\ndog -> wolf").unwrap_err();
        assert!(matches!(err, CorrectionError::InvalidLabel { .. }));
        assert!(err.is_validation());
        assert!(matches!(
            store.set("cat", "tab\rby"),
            Err(CorrectionError::InvalidLabel { .. })
        ));
        assert!(matches!(
            store.set("dog -> wolf", "fox"),
            Err(CorrectionError::InvalidLabel { .. })
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_arrow_in_correct_label_roundtrips_through_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrections.log");
        let store = CorrectionStore::open(Box::new(AppendLogBackend::new(&path)));
        store.set("cat", "tabby -> striped").unwrap();

        let reopened = CorrectionStore::open(Box::new(AppendLogBackend::new(&path)));
        assert_eq!(reopened.snapshot(), store.snapshot());
        assert_eq!(reopened.get("cat").as_deref(), Some("tabby -> striped"));
    }

    #[test]
    fn test_roundtrip_through_fresh_instance_for_every_backend() {
        let dir = tempfile::tempdir().unwrap();
        for kind in [
            CorrectionBackendKind::JsonDocument,
            CorrectionBackendKind::AppendLog,
            CorrectionBackendKind::Preferences,
        ] {
            let path = dir.path().join(format!("{:?}", kind));
            let store = CorrectionStore::open(kind.open(&path));
            store.set("cat", "kitten").unwrap();
            store.set("dog", "puppy").unwrap();
            store.set("cat", "lion").unwrap();
            store.save().unwrap();

            let reopened = CorrectionStore::open(kind.open(&path));
            assert_eq!(reopened.snapshot(), store.snapshot(), "{:?}", kind);
            assert_eq!(reopened.get("cat").as_deref(), Some("lion"));
        }
    }

    #[test]
    fn test_append_log_records_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrections.log");
        let store = CorrectionStore::open(Box::new(AppendLogBackend::new(&path)));
        store.set("cat", "kitten").unwrap();
        store.set("cat", "lion").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "cat -> kitten\ncat -> lion\n");
    }

    #[test]
    fn test_external_writes_are_merged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrections.json");
        let ours = json_store(&path);
        let theirs = json_store(&path);

        ours.set("cat", "kitten").unwrap();
        theirs.set("dog", "puppy").unwrap();
        ours.set("bird", "sparrow").unwrap();

        let on_disk = JsonDocumentBackend::new(&path).load_all().unwrap();
        assert_eq!(on_disk.len(), 3);
        assert_eq!(on_disk.get("dog").map(String::as_str), Some("puppy"));
    }

    #[test]
    fn test_load_picks_up_external_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        let store = CorrectionStore::open(Box::new(PreferenceBackend::new(&path)));
        fs::write(&path, r#"{"correction.cat": "kitten"}"#).unwrap();
        assert_eq!(store.get("cat"), None);
        let map = store.load();
        assert_eq!(map.get("cat").map(String::as_str), Some("kitten"));
        assert_eq!(store.get("cat").as_deref(), Some("kitten"));
    }

    #[test]
    fn test_persist_failure_keeps_correction_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        // 親がファイルなので書き込みは必ず失敗する
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let store = json_store(&blocker.join("corrections.json"));

        let err = store.set("cat", "kitten").unwrap_err();
        assert!(matches!(err, CorrectionError::Persist(_)));
        assert!(!err.is_validation());
        assert_eq!(store.get("cat").as_deref(), Some("kitten"));
        assert!(store.has_unsynced());
    }

    #[test]
    fn test_invalid_stored_entries_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrections.json");
        fs::write(&path, r#"{"cat": "cat", "dog": " ", " bird ": " sparrow "}"#).unwrap();
        let store = json_store(&path);
        assert_eq!(store.entries(), vec![("bird".to_string(), "sparrow".to_string())]);
    }

    #[test]
    fn test_lookup_trait() {
        let dir = tempfile::tempdir().unwrap();
        let store = json_store(&dir.path().join("corrections.json"));
        store.set("cat", "kitten").unwrap();
        let lookup: &dyn CorrectionLookup = &store;
        assert_eq!(lookup.corrected_label("cat").as_deref(), Some("kitten"));
        assert_eq!(lookup.corrected_label("dog"), None);
    }
}
