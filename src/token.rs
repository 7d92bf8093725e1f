// Auth token and the local key/value state that holds it.
//
// The store is passed around as a trait object so commands and tests can
// swap the on-disk file for an in-memory map.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::error::TokenStoreError;

/// Key under which the bearer token is stored.
pub const TOKEN_KEY: &str = "token";

/// File name of the key/value state inside the config directory.
pub const STATE_FILE: &str = "config.json";

/// Opaque bearer credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    /// Wraps a raw token, trimming surrounding whitespace. Empty input
    /// yields `None`.
    pub fn new(raw: impl AsRef<str>) -> Option<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Token(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First and last four characters, for display.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 8 {
            return "*".repeat(chars.len());
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}…{tail}")
    }

    /// Decoded claims when the token is a JWT, `None` for opaque tokens.
    pub fn jwt_claims(&self) -> Option<serde_json::Value> {
        let mut parts = self.0.split('.');
        let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Token").field(&self.masked()).finish()
    }
}

/// Where the token lives between invocations.
pub trait TokenStore {
    fn get(&self) -> Result<Option<Token>, TokenStoreError>;
    fn set(&self, token: Token) -> Result<(), TokenStoreError>;
    fn clear(&self) -> Result<(), TokenStoreError>;
}

/// JSON key/value file on disk.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Store backed by `<dir>/config.json`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(STATE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, TokenStoreError> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(TokenStoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_slice(&data).map_err(|source| TokenStoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, state: &BTreeMap<String, String>) -> Result<(), TokenStoreError> {
        let io_err = |source| TokenStoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let body = serde_json::to_vec_pretty(state).map_err(|source| TokenStoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        write_private(&self.path, &body).map_err(io_err)
    }
}

#[cfg(unix)]
fn write_private(path: &Path, body: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies on creation; tighten files left by older runs.
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(body)
}

#[cfg(not(unix))]
fn write_private(path: &Path, body: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, body)
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> Result<Option<Token>, TokenStoreError> {
        Ok(self.load()?.get(TOKEN_KEY).and_then(Token::new))
    }

    fn set(&self, token: Token) -> Result<(), TokenStoreError> {
        let mut state = self.load()?;
        state.insert(TOKEN_KEY.to_string(), token.0);
        self.save(&state)
    }

    fn clear(&self) -> Result<(), TokenStoreError> {
        let mut state = self.load()?;
        if state.remove(TOKEN_KEY).is_some() {
            self.save(&state)?;
        }
        Ok(())
    }
}

/// Process-local store for tests and one-shot tokens.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<Token>>,
}

impl MemoryTokenStore {
    pub fn with_token(token: &str) -> Self {
        Self {
            token: Mutex::new(Token::new(token)),
        }
    }
}

impl MemoryTokenStore {
    // A panic while holding the lock cannot leave a half-written `Option`.
    fn slot(&self) -> MutexGuard<'_, Option<Token>> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Result<Option<Token>, TokenStoreError> {
        Ok(self.slot().clone())
    }

    fn set(&self, token: Token) -> Result<(), TokenStoreError> {
        *self.slot() = Some(token);
        Ok(())
    }

    fn clear(&self) -> Result<(), TokenStoreError> {
        *self.slot() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_tokens_are_rejected() {
        assert!(Token::new("").is_none());
        assert!(Token::new("  \n").is_none());
        assert_eq!(Token::new(" abc \n").unwrap().as_str(), "abc");
    }

    #[test]
    fn debug_never_prints_the_secret() {
        let token = Token::new("supersecretvalue").unwrap();
        let dbg = format!("{token:?}");
        assert!(!dbg.contains("supersecretvalue"));
        assert!(dbg.contains("supe…alue"));
        assert_eq!(Token::new("short").unwrap().masked(), "*****");
    }

    #[test]
    fn decodes_jwt_claims() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"user-1","org":"acme"}"#);
        let token = Token::new(format!("eyJhbGciOiJIUzI1NiJ9.{payload}.c2ln")).unwrap();
        let claims = token.jwt_claims().unwrap();
        assert_eq!(claims["sub"], "user-1");
        assert_eq!(claims["org"], "acme");
    }

    #[test]
    fn opaque_tokens_have_no_claims() {
        assert!(Token::new("not-a-jwt").unwrap().jwt_claims().is_none());
        assert!(Token::new("a.b.c.d").unwrap().jwt_claims().is_none());
        assert!(Token::new("a.!!!.c").unwrap().jwt_claims().is_none());
    }

    #[test]
    fn file_store_round_trips_and_keeps_other_keys() {
        let dir = TempDir::new().unwrap();
        let store = FileTokenStore::in_dir(&dir.path().join("nested"));
        assert!(store.get().unwrap().is_none());

        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(store.path(), br#"{"theme":"dark"}"#).unwrap();

        store.set(Token::new("tok-123").unwrap()).unwrap();
        assert_eq!(store.get().unwrap().unwrap().as_str(), "tok-123");

        let raw: BTreeMap<String, String> =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw.get("theme").map(String::as_str), Some("dark"));

        store.clear().unwrap();
        assert!(store.get().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn file_store_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let store = FileTokenStore::in_dir(dir.path());
        store.set(Token::new("tok").unwrap()).unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn corrupt_state_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = FileTokenStore::in_dir(dir.path());
        std::fs::write(store.path(), b"not json").unwrap();
        assert!(matches!(store.get(), Err(TokenStoreError::Corrupt { .. })));
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryTokenStore::default();
        assert!(store.get().unwrap().is_none());
        store.set(Token::new("t").unwrap()).unwrap();
        assert_eq!(store.get().unwrap().unwrap().as_str(), "t");
        store.clear().unwrap();
        assert!(store.get().unwrap().is_none());
    }

    #[test]
    fn memory_store_survives_a_poisoned_lock() {
        let store = MemoryTokenStore::with_token("before");
        std::thread::scope(|scope| {
            let poisoned = scope
                .spawn(|| {
                    let _guard = store.token.lock().unwrap();
                    panic!("holder panicked");
                })
                .join();
            assert!(poisoned.is_err());
        });
        assert!(store.token.is_poisoned());

        assert_eq!(store.get().unwrap().unwrap().as_str(), "before");
        store.set(Token::new("after").unwrap()).unwrap();
        assert_eq!(store.get().unwrap().unwrap().as_str(), "after");
        store.clear().unwrap();
        assert!(store.get().unwrap().is_none());
    }
}
