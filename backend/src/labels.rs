use crate::error::LabelMapError;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

pub const UNKNOWN_DISEASE: &str = "Unknown Disease";

/// Class index (as a decimal string) to disease name.
#[derive(Debug, Clone)]
pub struct LabelMap {
    labels: HashMap<String, String>,
    loaded_at: DateTime<Utc>,
}

impl LabelMap {
    pub fn new(labels: HashMap<String, String>) -> Self {
        Self {
            labels,
            loaded_at: Utc::now(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LabelMapError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                LabelMapError::NotFound(path.to_path_buf())
            } else {
                LabelMapError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        Self::from_json(&raw)
    }

    /// Accepts `{"0": "Tomato_Bacterial_spot", ...}` or the trainer's
    /// `class_indices` orientation, `{"Tomato_Bacterial_spot": 0, ...}`.
    pub fn from_json(raw: &str) -> Result<Self, LabelMapError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| LabelMapError::Parse(e.to_string()))?;
        let Value::Object(entries) = value else {
            return Err(LabelMapError::Parse("expected a JSON object".into()));
        };

        let mut labels = HashMap::with_capacity(entries.len());
        for (key, value) in entries {
            match value {
                Value::String(name) => {
                    labels.insert(key, name);
                }
                Value::Number(index) if index.is_u64() => {
                    labels.insert(index.to_string(), key);
                }
                other => {
                    return Err(LabelMapError::Parse(format!(
                        "unsupported value for '{}': {}",
                        key, other
                    )));
                }
            }
        }
        Ok(Self::new(labels))
    }

    pub fn resolve(&self, class_index: usize) -> &str {
        self.labels
            .get(&class_index.to_string())
            .map(String::as_str)
            .unwrap_or(UNKNOWN_DISEASE)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

/// Holds the active label map. Readers take a cheap snapshot; `reload`
/// swaps in a freshly parsed map and leaves the old one on failure.
#[derive(Debug)]
pub struct LabelStore {
    path: Option<PathBuf>,
    current: RwLock<Arc<LabelMap>>,
}

impl LabelStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LabelMapError> {
        let path = path.into();
        let map = LabelMap::load(&path)?;
        Ok(Self {
            path: Some(path),
            current: RwLock::new(Arc::new(map)),
        })
    }

    /// A store with no backing file; `reload` keeps it as is.
    pub fn fixed(map: LabelMap) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(map)),
        }
    }

    pub fn snapshot(&self) -> Arc<LabelMap> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    pub fn reload(&self) -> Result<Arc<LabelMap>, LabelMapError> {
        let Some(path) = &self.path else {
            return Ok(self.snapshot());
        };

        let fresh = Arc::new(LabelMap::load(path)?);
        match self.current.write() {
            Ok(mut guard) => *guard = Arc::clone(&fresh),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&fresh),
        }
        log::info!("Reloaded {} labels from {}", fresh.len(), path.display());
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_labels(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn resolves_known_indices() {
        let map = LabelMap::from_json(r#"{"3": "Tomato_Healthy", "0": "Tomato_Bacterial_spot"}"#).unwrap();
        assert_eq!(map.resolve(3), "Tomato_Healthy");
        assert_eq!(map.resolve(0), "Tomato_Bacterial_spot");
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn absent_indices_fall_back_to_unknown_disease() {
        let map = LabelMap::from_json(r#"{"3": "Tomato_Healthy"}"#).unwrap();
        for index in [0, 1, 2, 4, 9, 10, usize::MAX] {
            assert_eq!(map.resolve(index), UNKNOWN_DISEASE);
        }

        let empty = LabelMap::from_json("{}").unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.resolve(0), "Unknown Disease");
    }

    #[test]
    fn keys_are_matched_as_decimal_strings() {
        let map = LabelMap::from_json(r#"{"03": "Padded", "3.0": "Float"}"#).unwrap();
        assert_eq!(map.resolve(3), UNKNOWN_DISEASE);
    }

    #[test]
    fn class_indices_orientation_is_inverted() {
        let map = LabelMap::from_json(r#"{"Tomato_Early_blight": 1, "Tomato_healthy": 9}"#).unwrap();
        assert_eq!(map.resolve(1), "Tomato_Early_blight");
        assert_eq!(map.resolve(9), "Tomato_healthy");
    }

    #[test]
    fn structural_problems_are_errors() {
        assert!(matches!(LabelMap::from_json("not json"), Err(LabelMapError::Parse(_))));
        assert!(matches!(LabelMap::from_json(r#"["a", "b"]"#), Err(LabelMapError::Parse(_))));
        assert!(matches!(LabelMap::from_json(r#"{"0": [1]}"#), Err(LabelMapError::Parse(_))));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = LabelMap::load("/nonexistent/class_labels.json").unwrap_err();
        assert!(matches!(err, LabelMapError::NotFound(_)));
        assert!(LabelStore::open("/nonexistent/class_labels.json").is_err());
    }

    #[test]
    fn reload_picks_up_changes() {
        let file = write_labels(r#"{"0": "Tomato_Leaf_Mold"}"#);
        let store = LabelStore::open(file.path()).unwrap();
        assert_eq!(store.snapshot().resolve(0), "Tomato_Leaf_Mold");

        std::fs::write(file.path(), r#"{"0": "Tomato_Septoria_leaf_spot", "1": "Tomato_healthy"}"#).unwrap();
        let fresh = store.reload().unwrap();
        assert_eq!(fresh.len(), 2);
        assert_eq!(store.snapshot().resolve(0), "Tomato_Septoria_leaf_spot");
    }

    #[test]
    fn failed_reload_keeps_previous_map() {
        let file = write_labels(r#"{"5": "Tomato_Target_Spot"}"#);
        let store = LabelStore::open(file.path()).unwrap();
        let before = store.snapshot();

        std::fs::write(file.path(), "{ truncated").unwrap();
        assert!(store.reload().is_err());
        assert_eq!(store.snapshot().resolve(5), "Tomato_Target_Spot");
        assert_eq!(store.snapshot().loaded_at(), before.loaded_at());
    }

    #[test]
    fn fixed_store_ignores_reload() {
        let store = LabelStore::fixed(LabelMap::from_json(r#"{"2": "Tomato_Late_blight"}"#).unwrap());
        assert_eq!(store.reload().unwrap().resolve(2), "Tomato_Late_blight");
    }
}
