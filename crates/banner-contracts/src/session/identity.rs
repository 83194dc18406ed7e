use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::store::LocalStore;

pub const SESSION_KEY: &str = "generate_content_session_id";
const SESSION_PREFIX: &str = "generate_content_session";
const RANDOM_SUFFIX_LEN: usize = 9;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The session a unit of work was started under.
///
/// `epoch` increases on every reset, so a completion carrying an older context
/// can be recognised and dropped even if a backend echoes the same id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub id: SessionId,
    pub epoch: u64,
}

impl SessionContext {
    pub fn new(id: SessionId) -> Self {
        Self { id, epoch: 0 }
    }

    pub fn succeeded_by(&self, id: SessionId) -> Self {
        Self {
            id,
            epoch: self.epoch + 1,
        }
    }

    pub fn is_current(&self, current: &SessionContext) -> bool {
        self.epoch == current.epoch && self.id == current.id
    }
}

/// Owns the single persisted session key.
///
/// Two `get_or_create` calls without an intervening `reset` return the same id.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    store: LocalStore,
}

impl SessionIdentity {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: LocalStore::new(path),
        }
    }

    pub fn current(&mut self) -> Option<SessionId> {
        self.store.get(SESSION_KEY).map(SessionId)
    }

    pub fn get_or_create(&mut self) -> anyhow::Result<SessionId> {
        if let Some(existing) = self.current() {
            return Ok(existing);
        }
        let created = new_session_id();
        self.store.set(SESSION_KEY, created.as_str())?;
        Ok(created)
    }

    pub fn reset(&mut self) -> anyhow::Result<SessionId> {
        let previous = self.current();
        self.store.remove(SESSION_KEY)?;
        let mut created = new_session_id();
        while Some(&created) == previous.as_ref() {
            created = new_session_id();
        }
        self.store.set(SESSION_KEY, created.as_str())?;
        Ok(created)
    }
}

/// `generate_content_session_{unix_millis}_{9 base-36 chars}`.
pub fn new_session_id() -> SessionId {
    let millis = chrono::Utc::now().timestamp_millis();
    SessionId(format!(
        "{SESSION_PREFIX}_{millis}_{}",
        random_base36(RANDOM_SUFFIX_LEN)
    ))
}

fn random_base36(len: usize) -> String {
    let mut value = Uuid::new_v4().as_u128();
    let mut out = String::with_capacity(len);
    for _ in 0..len {
        out.push(BASE36[(value % 36) as usize] as char);
        value /= 36;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_stable_without_reset() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("session.json");
        let mut identity = SessionIdentity::new(&path);

        let first = identity.get_or_create()?;
        let second = identity.get_or_create()?;
        assert_eq!(first, second);

        let mut reopened = SessionIdentity::new(&path);
        assert_eq!(reopened.get_or_create()?, first);
        Ok(())
    }

    #[test]
    fn reset_mints_and_persists_a_different_id() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("session.json");
        let mut identity = SessionIdentity::new(&path);

        let first = identity.get_or_create()?;
        let second = identity.reset()?;
        assert_ne!(first, second);
        assert_eq!(identity.get_or_create()?, second);
        assert_eq!(SessionIdentity::new(&path).current(), Some(second));
        Ok(())
    }

    #[test]
    fn session_id_has_clock_and_random_components() {
        let id = new_session_id();
        let parts: Vec<&str> = id.as_str().rsplitn(3, '_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), RANDOM_SUFFIX_LEN);
        assert!(parts[0].chars().all(|ch| ch.is_ascii_alphanumeric()));
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2], SESSION_PREFIX);
    }

    #[test]
    fn context_epoch_distinguishes_resets() {
        let first = SessionContext::new(SessionId::new("a"));
        let second = first.succeeded_by(SessionId::new("b"));
        assert!(first.is_current(&first));
        assert!(!first.is_current(&second));
        assert_eq!(second.epoch, 1);
    }
}
