//! Account store: a JSON file of account records holding argon2 hashes only.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use argon2::Argon2;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use serde::{Deserialize, Serialize};

pub const CAP_ADMIN: &str = "admin";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountRec {
    pub name: String,
    #[serde(default)]
    pub pw_hash: Option<String>,
    #[serde(default)]
    pub pronouns: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caps: Option<Vec<String>>,
    pub created_unix: u64,
}

impl AccountRec {
    pub fn caps(&self) -> Vec<String> {
        self.caps
            .iter()
            .flatten()
            .map(|c| c.trim().to_ascii_lowercase())
            .filter(|c| !c.is_empty())
            .collect()
    }
}

pub struct NewAccount<'a> {
    pub name: &'a str,
    pub password: &'a [u8],
    pub pronouns: &'a str,
}

pub trait AccountStore: Send + Sync {
    fn find_by_name(&self, name: &str) -> anyhow::Result<Option<AccountRec>>;
    /// Fails if the name is taken.
    fn create(&self, new: NewAccount<'_>) -> anyhow::Result<AccountRec>;
    fn verify_credential(&self, rec: &AccountRec, password: &[u8]) -> bool;
    /// Re-read backing storage; returns the number of accounts.
    fn reload(&self) -> anyhow::Result<usize>;
}

fn name_key(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub struct JsonAccounts {
    path: PathBuf,
    hasher: Argon2<'static>,
    by_name: Mutex<HashMap<String, AccountRec>>,
}

impl std::fmt::Debug for JsonAccounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonAccounts")
            .field("path", &self.path)
            .field("accounts", &self.lock().len())
            .finish()
    }
}

impl JsonAccounts {
    pub fn load(path: PathBuf) -> anyhow::Result<Self> {
        Self::with_hasher(path, Argon2::default())
    }

    pub fn with_hasher(path: PathBuf, hasher: Argon2<'static>) -> anyhow::Result<Self> {
        let by_name = read_file(&path)?;
        Ok(Self {
            path,
            hasher,
            by_name: Mutex::new(by_name),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, AccountRec>> {
        self.by_name.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, by_name: &HashMap<String, AccountRec>) -> anyhow::Result<()> {
        let mut v = by_name.values().cloned().collect::<Vec<_>>();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        let s = serde_json::to_string_pretty(&v)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!("failed to create accounts dir {:?}: {e}", parent)
            })?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        std::fs::write(&tmp, s)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn read_file(path: &Path) -> anyhow::Result<HashMap<String, AccountRec>> {
    let s = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => anyhow::bail!("failed to read accounts file {:?}: {e}", path),
    };
    let v: Vec<AccountRec> = serde_json::from_str(&s)
        .map_err(|e| anyhow::anyhow!("failed to parse accounts file {:?}: {e}", path))?;
    Ok(v.into_iter()
        .filter(|a| !a.name.trim().is_empty())
        .map(|a| (name_key(&a.name), a))
        .collect())
}

impl AccountStore for JsonAccounts {
    fn find_by_name(&self, name: &str) -> anyhow::Result<Option<AccountRec>> {
        Ok(self.lock().get(&name_key(name)).cloned())
    }

    fn create(&self, new: NewAccount<'_>) -> anyhow::Result<AccountRec> {
        let k = name_key(new.name);
        if k.is_empty() {
            anyhow::bail!("empty account name");
        }

        // Store only a salted hash, never the raw password.
        let salt = SaltString::generate(&mut password_hash::rand_core::OsRng);
        let hash = self
            .hasher
            .hash_password(new.password, &salt)
            .map_err(|e| anyhow::anyhow!("hash_password failed: {e}"))?
            .to_string();

        let rec = AccountRec {
            name: new.name.trim().to_string(),
            pw_hash: Some(hash),
            pronouns: Some(new.pronouns.to_string()),
            caps: None,
            created_unix: now_unix(),
        };

        let mut m = self.lock();
        if m.contains_key(&k) {
            anyhow::bail!("account already exists: {k}");
        }
        m.insert(k.clone(), rec.clone());
        if let Err(e) = self.save(&m) {
            m.remove(&k);
            return Err(e);
        }
        Ok(rec)
    }

    fn verify_credential(&self, rec: &AccountRec, password: &[u8]) -> bool {
        let Some(hash) = rec.pw_hash.as_deref() else {
            return false;
        };
        match PasswordHash::new(hash) {
            Ok(ph) => self.hasher.verify_password(password, &ph).is_ok(),
            Err(_) => false,
        }
    }

    fn reload(&self) -> anyhow::Result<usize> {
        let fresh = read_file(&self.path)?;
        let n = fresh.len();
        *self.lock() = fresh;
        Ok(n)
    }
}

#[cfg(test)]
pub(crate) fn cheap_hasher() -> Argon2<'static> {
    let params = argon2::Params::new(8, 1, 1, None).expect("params");
    Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params)
}
