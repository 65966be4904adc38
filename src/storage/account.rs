//! Process-wide account material: the ACME account key and the API signing
//! secret.
//!
//! Both live in the `app_config` bucket. The account key is created lazily
//! on first use and reused across restarts so the engine keeps one identity
//! with the authority. The signing secret backs session tokens issued by the
//! external auth gate; exactly one exists at a time and rotating it
//! invalidates every previously signed session.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use log::info;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::{
    error::{Error, Result},
    storage::db::{BUCKET_APP_CONFIG, Db},
};

const KEY_ACME_ACCOUNT_KEY: &str = "acme_account_key";
const KEY_SIGNING_SECRET: &str = "api_signing_secret";

/// Required decoded length of a valid signing secret.
pub const SIGNING_SECRET_LEN: usize = 32;

#[derive(Clone)]
pub struct AccountStore {
    db: Db,
}

impl AccountStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Returns the persisted ACME account key, creating one on first use.
    /// Get-or-generate runs in a single transaction.
    pub fn ensure_account_key(&self) -> Result<Zeroizing<String>> {
        self.db.with_txn(|txn| {
            if let Some(value) = txn.get(BUCKET_APP_CONFIG, KEY_ACME_ACCOUNT_KEY)? {
                let pem = String::from_utf8(value)
                    .map_err(|_| Error::Storage("stored account key is not valid UTF-8".into()))?;
                return Ok(Zeroizing::new(pem));
            }

            let key = rcgen::KeyPair::generate()
                .map_err(|err| Error::Storage(format!("account key generation failed: {err}")))?;
            let pem = Zeroizing::new(key.serialize_pem());
            txn.put(BUCKET_APP_CONFIG, KEY_ACME_ACCOUNT_KEY, pem.as_bytes())?;
            info!("[account] generated new ACME account key");
            Ok(pem)
        })
    }

    /// Current signing secret, if one is stored and structurally valid.
    pub fn signing_secret(&self) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let Some(value) = self.db.get(BUCKET_APP_CONFIG, KEY_SIGNING_SECRET)? else {
            return Ok(None);
        };
        Ok(decode_secret(&value))
    }

    /// Idempotent bootstrap: keeps a valid stored secret, replaces an absent
    /// or invalid one with fresh random bytes. Check and initialize are one
    /// transaction so two racing bootstraps cannot both generate.
    pub fn ensure_signing_secret(&self) -> Result<Zeroizing<Vec<u8>>> {
        self.db.with_txn(|txn| {
            if let Some(value) = txn.get(BUCKET_APP_CONFIG, KEY_SIGNING_SECRET)? {
                if let Some(secret) = decode_secret(&value) {
                    return Ok(secret);
                }
                info!("[account] stored signing secret is invalid; regenerating");
            }

            let secret = generate_secret();
            txn.put(
                BUCKET_APP_CONFIG,
                KEY_SIGNING_SECRET,
                BASE64.encode(&*secret).as_bytes(),
            )?;
            info!("[account] initialized API signing secret");
            Ok(secret)
        })
    }

    /// Administrative rotation: unconditionally replaces the secret,
    /// invalidating all sessions signed with the previous one.
    pub fn rotate_signing_secret(&self) -> Result<Zeroizing<Vec<u8>>> {
        self.db.with_txn(|txn| {
            let secret = generate_secret();
            txn.put(
                BUCKET_APP_CONFIG,
                KEY_SIGNING_SECRET,
                BASE64.encode(&*secret).as_bytes(),
            )?;
            info!("[account] rotated API signing secret; all sessions invalidated");
            Ok(secret)
        })
    }
}

fn generate_secret() -> Zeroizing<Vec<u8>> {
    let mut bytes = Zeroizing::new(vec![0u8; SIGNING_SECRET_LEN]);
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}

fn decode_secret(stored: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
    let encoded = std::str::from_utf8(stored).ok()?;
    let bytes = BASE64.decode(encoded).ok()?;
    (bytes.len() == SIGNING_SECRET_LEN).then(|| Zeroizing::new(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> AccountStore {
        AccountStore::new(Db::open_in_memory().unwrap())
    }

    #[test]
    fn account_key_is_created_once_and_reused() -> Result<()> {
        let store = store();
        let first = store.ensure_account_key()?;
        assert!(first.contains("PRIVATE KEY"));

        let second = store.ensure_account_key()?;
        assert_eq!(*first, *second);
        Ok(())
    }

    #[test]
    fn signing_secret_bootstrap_is_idempotent() -> Result<()> {
        let store = store();
        assert!(store.signing_secret()?.is_none());

        let first = store.ensure_signing_secret()?;
        assert_eq!(first.len(), SIGNING_SECRET_LEN);

        let second = store.ensure_signing_secret()?;
        assert_eq!(*first, *second);
        Ok(())
    }

    #[test]
    fn invalid_stored_secret_is_replaced() -> Result<()> {
        let store = store();
        store
            .db
            .put(BUCKET_APP_CONFIG, KEY_SIGNING_SECRET, b"not-base64!!")?;

        let secret = store.ensure_signing_secret()?;
        assert_eq!(secret.len(), SIGNING_SECRET_LEN);
        assert_eq!(*store.signing_secret()?.unwrap(), *secret);
        Ok(())
    }

    #[test]
    fn rotation_replaces_the_secret() -> Result<()> {
        let store = store();
        let before = store.ensure_signing_secret()?;
        let after = store.rotate_signing_secret()?;
        assert_ne!(*before, *after);
        assert_eq!(*store.signing_secret()?.unwrap(), *after);
        Ok(())
    }
}
