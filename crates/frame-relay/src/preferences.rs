use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use context_bus::{publish_json, Bus, TOPIC_RUNTIME_CONTROL};
use parking_lot::Mutex;
use peek_proto::{ControlMessage, TOGGLE_DEFAULT, TOGGLE_PREFERENCE_KEY};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("preference io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("preference file is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("preference file must hold a json object")]
    NotAnObject,
}

pub type PreferenceResult<T> = Result<T, PreferenceError>;

/// Persisted "overlay enabled" flag.
pub trait PreferenceStore: Send + Sync {
    fn enabled(&self) -> PreferenceResult<bool>;

    fn set_enabled(&self, enabled: bool) -> PreferenceResult<()>;
}

/// Volatile store for tests and sessions without a preferences file.
#[derive(Debug, Default)]
pub struct InMemoryPreferences {
    enabled: Mutex<Option<bool>>,
}

impl InMemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for InMemoryPreferences {
    fn enabled(&self) -> PreferenceResult<bool> {
        Ok(self.enabled.lock().unwrap_or(TOGGLE_DEFAULT))
    }

    fn set_enabled(&self, enabled: bool) -> PreferenceResult<()> {
        *self.enabled.lock() = Some(enabled);
        Ok(())
    }
}

/// JSON object file keyed by preference name. Unknown keys are preserved.
#[derive(Debug, Clone)]
pub struct FilePreferences {
    path: PathBuf,
}

impl FilePreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the default value when the key has never been stored.
    pub fn ensure_default(&self) -> PreferenceResult<()> {
        let mut map = self.load()?;
        if map.contains_key(TOGGLE_PREFERENCE_KEY) {
            return Ok(());
        }
        map.insert(TOGGLE_PREFERENCE_KEY.to_string(), Value::Bool(TOGGLE_DEFAULT));
        self.save(&map)?;
        info!(path = %self.path.display(), "initialised overlay preference");
        Ok(())
    }

    fn load(&self) -> PreferenceResult<Map<String, Value>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => return Err(err.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&raw)? {
            Value::Object(map) => Ok(map),
            _ => Err(PreferenceError::NotAnObject),
        }
    }

    fn save(&self, map: &Map<String, Value>) -> PreferenceResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let encoded = serde_json::to_string_pretty(map)?;
        fs::write(&self.path, encoded)?;
        Ok(())
    }
}

impl PreferenceStore for FilePreferences {
    fn enabled(&self) -> PreferenceResult<bool> {
        let map = self.load()?;
        Ok(map
            .get(TOGGLE_PREFERENCE_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(TOGGLE_DEFAULT))
    }

    fn set_enabled(&self, enabled: bool) -> PreferenceResult<()> {
        let mut map = self.load()?;
        map.insert(TOGGLE_PREFERENCE_KEY.to_string(), Value::Bool(enabled));
        self.save(&map)
    }
}

/// Persists toggle changes and announces them on the control topic.
pub struct ToggleNotifier {
    store: Arc<dyn PreferenceStore>,
    bus: Arc<dyn Bus>,
}

impl ToggleNotifier {
    pub fn new(store: Arc<dyn PreferenceStore>, bus: Arc<dyn Bus>) -> Self {
        Self { store, bus }
    }

    pub fn enabled(&self) -> PreferenceResult<bool> {
        self.store.enabled()
    }

    /// Stores `enabled` and, when it differs from the stored value, publishes
    /// `TOGGLE_CHANGED`. Returns whether the value changed. Delivery is
    /// fire-and-forget: a missing listener is not an error.
    pub fn set_enabled(&self, enabled: bool) -> PreferenceResult<bool> {
        let previous = self.store.enabled()?;
        self.store.set_enabled(enabled)?;
        if previous == enabled {
            debug!(enabled, "overlay preference unchanged");
            return Ok(false);
        }
        let message = ControlMessage::ToggleChanged { enabled };
        match publish_json(self.bus.as_ref(), TOPIC_RUNTIME_CONTROL, &message) {
            Ok(listeners) => info!(enabled, listeners, "overlay preference changed"),
            Err(err) => warn!(enabled, error = %err, "failed to announce overlay preference"),
        }
        Ok(true)
    }

    pub fn toggle(&self) -> PreferenceResult<bool> {
        let next = !self.store.enabled()?;
        self.set_enabled(next)?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use context_bus::LocalBus;

    #[test]
    fn file_preferences_default_to_enabled_and_persist() {
        let dir = tempfile::tempdir().expect("tempdir");
        let prefs = FilePreferences::new(dir.path().join("nested").join("prefs.json"));
        assert!(prefs.enabled().expect("read default"));

        prefs.ensure_default().expect("write default");
        let raw = fs::read_to_string(prefs.path()).expect("file written");
        assert!(raw.contains(TOGGLE_PREFERENCE_KEY));

        prefs.set_enabled(false).expect("store");
        let reopened = FilePreferences::new(prefs.path());
        assert!(!reopened.enabled().expect("read stored"));

        reopened.ensure_default().expect("keeps stored value");
        assert!(!reopened.enabled().expect("read stored"));
    }

    #[test]
    fn file_preferences_keep_unrelated_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("prefs.json");
        fs::write(&path, r#"{"theme":"dark"}"#).expect("seed");
        let prefs = FilePreferences::new(&path);
        prefs.set_enabled(false).expect("store");
        let value: Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(value["theme"], "dark");
        assert_eq!(value[TOGGLE_PREFERENCE_KEY], false);
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("prefs.json");
        fs::write(&path, "[1,2]").expect("seed");
        assert!(matches!(
            FilePreferences::new(&path).enabled(),
            Err(PreferenceError::NotAnObject)
        ));
    }

    #[tokio::test]
    async fn notifier_announces_only_changes() {
        let bus = Arc::new(LocalBus::new());
        let mut rx = bus.subscribe(TOPIC_RUNTIME_CONTROL);
        let notifier = ToggleNotifier::new(Arc::new(InMemoryPreferences::new()), bus.clone());

        assert!(!notifier.set_enabled(true).expect("unchanged"));
        assert!(notifier.set_enabled(false).expect("changed"));
        assert!(notifier.toggle().expect("toggle back on"));

        let first = rx.recv().await.expect("first control");
        assert_eq!(
            first.decode::<ControlMessage>().expect("decode"),
            ControlMessage::ToggleChanged { enabled: false }
        );
        let second = rx.recv().await.expect("second control");
        assert_eq!(
            second.decode::<ControlMessage>().expect("decode"),
            ControlMessage::ToggleChanged { enabled: true }
        );
        assert!(rx.try_recv().is_err());
    }
}
