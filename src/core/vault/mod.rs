use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{Result, anyhow};
use base64::Engine;
use hmac::Mac;
use rusqlite::{Connection, OptionalExtension, params};
use sha2::Sha256;
use std::sync::Arc;
use tokio::sync::Mutex;

type HmacSha256 = hmac::Hmac<Sha256>;

const NONCE_LEN: usize = 12;

/// Provider API keys and dispatch credentials, encrypted at rest in the
/// store's database.
pub struct SecretsVault {
    db: Arc<Mutex<Connection>>,
    cipher: Aes256Gcm,
}

/// HMAC-SHA256(hostname + username) keyed with a fixed salt. Stable across
/// restarts, bound to the local machine and user.
fn derive_key() -> Result<[u8; 32]> {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown-host".to_string());
    let username = whoami::username();

    let mut mac = <HmacSha256 as Mac>::new_from_slice(b"foreman-vault-v1")
        .map_err(|e| anyhow!("vault key derivation failed: {}", e))?;
    mac.update(hostname.as_bytes());
    mac.update(username.as_bytes());
    let bytes = mac.finalize().into_bytes();

    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

impl SecretsVault {
    pub fn new(db: Arc<Mutex<Connection>>) -> Result<Self> {
        let key = derive_key()?;
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|e| anyhow!("invalid vault key: {}", e))?;
        Ok(Self { db, cipher })
    }

    pub async fn initialize(&self) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "CREATE TABLE IF NOT EXISTS secrets (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        Ok(())
    }

    /// base64(nonce || ciphertext)
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| anyhow!("encryption failed: {}", e))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
    }

    fn decrypt(&self, encoded: &str) -> Result<String> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| anyhow!("base64 decode failed: {}", e))?;
        if combined.len() <= NONCE_LEN {
            return Err(anyhow!("encrypted value too short"));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| anyhow!("decryption failed: {}", e))?;
        String::from_utf8(plaintext).map_err(|e| anyhow!("utf-8 decode failed: {}", e))
    }

    pub async fn set_secret(&self, key: &str, value: &str) -> Result<()> {
        let encrypted = self.encrypt(value)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO secrets (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                updated_at = CURRENT_TIMESTAMP",
            params![key, encrypted],
        )?;
        Ok(())
    }

    pub async fn get_secret(&self, key: &str) -> Result<Option<String>> {
        let stored: Option<String> = {
            let db = self.db.lock().await;
            db.query_row(
                "SELECT value FROM secrets WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?
        };
        stored
            .map(|s| {
                self.decrypt(&s)
                    .map_err(|e| anyhow!("vault entry '{}' unreadable: {}", key, e))
            })
            .transpose()
    }

    /// True when the key exists and holds a non-empty value.
    pub async fn has_secret(&self, key: &str) -> Result<bool> {
        Ok(self
            .get_secret(key)
            .await?
            .is_some_and(|v| !v.trim().is_empty()))
    }

    /// Subset of `keys` with no usable value.
    pub async fn missing_keys(&self, keys: &[&str]) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for key in keys {
            if !self.has_secret(key).await? {
                missing.push(key.to_string());
            }
        }
        Ok(missing)
    }

    pub async fn list_keys(&self) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT key FROM secrets ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut keys = Vec::new();
        for key in rows {
            keys.push(key?);
        }
        Ok(keys)
    }
}
