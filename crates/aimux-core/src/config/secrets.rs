//! Secret resolution: direct value, `_FILE` indirection, or a shared
//! secrets directory. Values are cached per key, misses included.
//!
//! Secret values never reach a log line or an error message.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use super::defaults::DEFAULT_SECRETS_DIR;
use super::env::Env;

/// Resolves credentials and remembers the answer for the process lifetime
/// (or until [`SecretResolver::clear`]).
#[derive(Default)]
pub struct SecretResolver {
    secrets_dir: Option<PathBuf>,
    cache: Mutex<HashMap<String, Option<String>>>,
}

impl SecretResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the shared secrets directory instead of reading `AI_SECRETS_DIR`.
    pub fn with_secrets_dir(dir: impl Into<PathBuf>) -> Self {
        SecretResolver {
            secrets_dir: Some(dir.into()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve `key`. First hit wins:
    /// 1. `env[key]`, trimmed, non-empty
    /// 2. contents of the file named by `env[key + "_FILE"]`
    /// 3. `<secrets dir>/<key lowercased>`
    pub fn resolve(&self, env: &Env, key: &str) -> Option<String> {
        if let Some(hit) = self.lock().get(key) {
            return hit.clone();
        }

        let value = self.lookup(env, key);
        self.lock().insert(key.to_string(), value.clone());
        value
    }

    /// Drop every cached value; the next lookup goes back to the source.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lookup(&self, env: &Env, key: &str) -> Option<String> {
        if let Some(direct) = env.get(key) {
            return Some(direct);
        }

        let file_key = format!("{}_FILE", key);
        if let Some(path) = env.get(&file_key) {
            match read_trimmed(&absolutize(Path::new(&path))) {
                Ok(Some(value)) => return Some(value),
                Ok(None) => debug!(key = %file_key, "secret file is empty"),
                Err(e) => warn!(key = %file_key, path = %path, error = %e, "failed to read secret file"),
            }
        }

        let dir = match &self.secrets_dir {
            Some(dir) => dir.clone(),
            None => PathBuf::from(
                env.get("AI_SECRETS_DIR")
                    .unwrap_or_else(|| DEFAULT_SECRETS_DIR.to_string()),
            ),
        };
        let candidate = dir.join(key.to_lowercase());
        if candidate.is_file() {
            match read_trimmed(&candidate) {
                Ok(value) => return value,
                Err(e) => warn!(key, error = %e, "failed to read shared secret"),
            }
        }

        None
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Option<String>>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[cfg(test)]
    fn cached_keys(&self) -> usize {
        self.lock().len()
    }
}

impl std::fmt::Debug for SecretResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretResolver")
            .field("secrets_dir", &self.secrets_dir)
            .field("cached_keys", &self.lock().len())
            .finish()
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

fn read_trimmed(path: &Path) -> std::io::Result<Option<String>> {
    let raw = std::fs::read_to_string(path)?;
    let trimmed = raw.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}
