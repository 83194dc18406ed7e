use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

/// String key/value file standing in for browser local storage.
///
/// Reads always refresh from disk and writes merge only the touched keys into
/// the current on-disk object, so two stores pointed at the same file do not
/// clobber each other's keys.
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
    payload: Option<Map<String, Value>>,
    dirty_keys: Vec<String>,
}

impl LocalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            payload: None,
            dirty_keys: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&mut self, key: &str) -> Option<String> {
        self.refresh()
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.refresh()
            .insert(key.to_string(), Value::String(value.to_string()));
        self.mark_dirty(key);
        self.flush()
    }

    pub fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        self.refresh().remove(key);
        self.mark_dirty(key);
        self.flush()
    }

    fn mark_dirty(&mut self, key: &str) {
        if !self.dirty_keys.iter().any(|existing| existing == key) {
            self.dirty_keys.push(key.to_string());
        }
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        if self.dirty_keys.is_empty() {
            return Ok(());
        }
        let Some(payload) = &self.payload else {
            return Ok(());
        };

        let mut on_disk = read_json_object(&self.path).unwrap_or_default();
        for key in &self.dirty_keys {
            match payload.get(key) {
                Some(value) => {
                    on_disk.insert(key.clone(), value.clone());
                }
                None => {
                    on_disk.remove(key);
                }
            }
        }
        write_json_object(&self.path, &on_disk)?;
        self.payload = Some(on_disk);
        self.dirty_keys.clear();
        Ok(())
    }

    fn refresh(&mut self) -> &mut Map<String, Value> {
        self.payload
            .insert(read_json_object(&self.path).unwrap_or_default())
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    crate::write_json_pretty(path, &Value::Object(payload.clone()))
}

#[cfg(test)]
mod tests {
    use super::LocalStore;

    #[test]
    fn set_then_get_roundtrips_through_disk() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("session.json");
        let mut store = LocalStore::new(&path);
        store.set("key", "value")?;

        let mut reopened = LocalStore::new(&path);
        assert_eq!(reopened.get("key").as_deref(), Some("value"));
        Ok(())
    }

    #[test]
    fn remove_deletes_only_that_key() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("session.json");
        let mut store = LocalStore::new(&path);
        store.set("a", "1")?;
        store.set("b", "2")?;
        store.remove("a")?;

        let mut reopened = LocalStore::new(&path);
        assert_eq!(reopened.get("a"), None);
        assert_eq!(reopened.get("b").as_deref(), Some("2"));
        Ok(())
    }

    #[test]
    fn writes_merge_with_another_store_on_the_same_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("session.json");
        let mut store_a = LocalStore::new(&path);
        let mut store_b = LocalStore::new(&path);

        store_a.set("a", "1")?;
        store_b.set("b", "2")?;
        store_a.set("c", "3")?;

        let mut reopened = LocalStore::new(&path);
        assert_eq!(reopened.get("a").as_deref(), Some("1"));
        assert_eq!(reopened.get("b").as_deref(), Some("2"));
        assert_eq!(reopened.get("c").as_deref(), Some("3"));
        Ok(())
    }

    #[test]
    fn missing_or_corrupt_file_reads_as_empty() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("session.json");
        let mut store = LocalStore::new(&path);
        assert_eq!(store.get("key"), None);

        std::fs::write(&path, "not json")?;
        assert_eq!(store.get("key"), None);
        store.set("key", "value")?;
        assert_eq!(store.get("key").as_deref(), Some("value"));
        Ok(())
    }
}
