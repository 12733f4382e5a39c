use std::{collections::HashMap, sync::Arc, time::Duration};

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use tokio::sync::{Mutex, OnceCell};
use url::Url;

use crate::{
    config::RetryPolicy,
    error::{IoriError, IoriResult},
    util::{http::HttpClient, retry::with_retry},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    pub uri: Url,
    pub key: [u8; 16],
}

/// Decrypt an AES-128-CBC payload and strip its PKCS7 padding.
pub fn decrypt(ciphertext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> IoriResult<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(IoriError::Decryption(format!(
            "ciphertext of {} bytes is not a whole number of blocks",
            ciphertext.len()
        )));
    }

    let decryptor = cbc::Decryptor::<aes::Aes128>::new(key.into(), iv.into());
    Ok(decryptor.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)?)
}

/// Keys of one stream session, fetched once per URI.
pub struct KeyStore {
    client: HttpClient,
    retry: RetryPolicy,
    timeout: Option<Duration>,
    manual_key: Option<[u8; 16]>,

    keys: Mutex<HashMap<Url, Arc<OnceCell<Arc<EncryptionKey>>>>>,
}

impl KeyStore {
    pub fn new(client: HttpClient, retry: RetryPolicy, timeout: Option<Duration>) -> Self {
        Self {
            client,
            retry,
            timeout,
            manual_key: None,
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Use a fixed hex key for every key URI instead of fetching.
    pub fn with_manual_key(mut self, key: &str) -> IoriResult<Self> {
        let key = key.strip_prefix("0x").unwrap_or(key);
        let bytes = hex::decode(key)?;
        let key: [u8; 16] = bytes.try_into().map_err(|v: Vec<u8>| {
            IoriError::Decryption(format!("manual key must be 16 bytes, got {}", v.len()))
        })?;
        self.manual_key = Some(key);
        Ok(self)
    }

    pub async fn get_key(&self, uri: &Url) -> IoriResult<Arc<EncryptionKey>> {
        // Only the map is locked here, concurrent callers for one URI wait on the same cell.
        let cell = self.keys.lock().await.entry(uri.clone()).or_default().clone();
        let key = cell.get_or_try_init(|| self.fetch_key(uri)).await?;
        Ok(key.clone())
    }

    async fn fetch_key(&self, uri: &Url) -> IoriResult<Arc<EncryptionKey>> {
        if let Some(key) = self.manual_key {
            tracing::debug!("Using manual key for {uri}.");
            return Ok(Arc::new(EncryptionKey {
                uri: uri.clone(),
                key,
            }));
        }

        tracing::info!("Fetching key {uri}.");
        let bytes = with_retry(&self.retry, uri.as_str(), || {
            self.client.get_bytes(uri, None, self.timeout)
        })
        .await
        .map_err(|reason| IoriError::KeyFetch {
            url: uri.clone(),
            reason,
        })?;

        let key: [u8; 16] = bytes.as_ref().try_into().map_err(|_| IoriError::KeyFetch {
            url: uri.clone(),
            reason: format!("expected a 16 bytes key, received {} bytes", bytes.len()),
        })?;
        Ok(Arc::new(EncryptionKey {
            uri: uri.clone(),
            key,
        }))
    }
}
