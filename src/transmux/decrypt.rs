use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::Result;

/// `METHOD` attribute of an `EXT-X-KEY` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionMethod {
    #[default]
    None,
    /// Whole segment AES-128-CBC with PKCS#7 padding.
    Aes128,
    /// Elementary stream sample encryption.
    SampleAes,
}

/// Key material for one fragment. The key itself is acquired elsewhere.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecryptData {
    pub method: EncryptionMethod,
    pub key: Option<[u8; 16]>,
    pub iv: Option<[u8; 16]>,
    pub uri: Option<Url>,
}

impl DecryptData {
    pub fn new(method: EncryptionMethod, key: [u8; 16], iv: [u8; 16]) -> Self {
        Self {
            method,
            key: Some(key),
            iv: Some(iv),
            uri: None,
        }
    }

    /// The scheme that applies to `data`: nothing to do without bytes or a key.
    pub fn encryption_type(&self, data: &[u8]) -> EncryptionMethod {
        if data.is_empty() || self.key.is_none() {
            EncryptionMethod::None
        } else {
            self.method
        }
    }

    /// Key and IV, when both are known.
    pub fn key_iv(&self) -> Option<(&[u8; 16], &[u8; 16])> {
        Some((self.key.as_ref()?, self.iv.as_ref()?))
    }
}

/// AES-128-CBC as an async byte transform.
#[async_trait]
pub trait Decrypter: Send + Sync {
    /// Decrypts a whole AES-128 segment and strips its PKCS#7 padding.
    async fn decrypt(&self, data: Bytes, key: &[u8; 16], iv: &[u8; 16]) -> Result<Bytes>;

    /// Decrypts whole 16-byte blocks without padding removal (SAMPLE-AES).
    async fn decrypt_blocks(&self, data: Bytes, key: &[u8; 16], iv: &[u8; 16]) -> Result<Bytes> {
        self.decrypt(data, key, iv).await
    }
}
