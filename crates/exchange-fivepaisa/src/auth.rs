//! Credentials and login payload encryption for 5paisa.
//!
//! The login endpoint expects the email, password and date of birth
//! encrypted with the app's encryption key:
//!
//! 1. PBKDF2-HMAC-SHA1 over the encryption key with a fixed 16-byte salt,
//!    1000 rounds, 48 bytes of output
//! 2. The first 16 bytes are the IV, the remaining 32 the AES-256 key
//! 3. AES-256-CBC with PKCS7 padding, base64 encoded
//!
//! # Security
//!
//! - Secrets are held in [`SecretString`] and never logged
//! - Derived key material is zeroized after use

use std::path::PathBuf;

use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use zeroize::Zeroize;

use crate::error::{BrokerError, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

const KDF_SALT: [u8; 16] = [
    83, 71, 26, 58, 54, 35, 22, 11, 83, 71, 26, 58, 54, 35, 22, 11,
];
const KDF_ROUNDS: u32 = 1000;

/// Account and app credentials, in the layout of the usual `creds.json`.
#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub email: String,
    #[serde(rename = "passwd")]
    pub password: SecretString,
    /// Date of birth, `YYYYMMDD`.
    pub dob: SecretString,
    #[serde(rename = "APP_NAME")]
    pub app_name: String,
    #[serde(rename = "APP_SOURCE")]
    pub app_source: String,
    #[serde(rename = "USER_ID")]
    pub user_id: String,
    #[serde(rename = "PASSWORD")]
    pub api_password: SecretString,
    #[serde(rename = "USER_KEY")]
    pub user_key: SecretString,
    #[serde(rename = "ENCRYPTION_KEY")]
    pub encryption_key: SecretString,
}

impl Credentials {
    /// Encrypts a login field with this app's encryption key.
    ///
    /// # Errors
    /// Returns [`BrokerError::Configuration`] if the cipher cannot be keyed.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        encrypt_field(self.encryption_key.expose_secret(), plaintext)
    }
}

/// Where credentials come from.
#[derive(Debug)]
pub enum CredentialSource {
    /// A JSON file on disk.
    FilePath(PathBuf),
    /// Already-parsed credentials.
    Inline(Box<Credentials>),
}

impl CredentialSource {
    /// Interprets a command-line value: inline JSON if it starts with `{`,
    /// otherwise a file path.
    ///
    /// # Errors
    /// Returns an error if inline JSON does not parse.
    pub fn from_arg(arg: &str) -> Result<Self> {
        let trimmed = arg.trim_start();
        if trimmed.starts_with('{') {
            let creds: Credentials = serde_json::from_str(trimmed).map_err(|e| {
                BrokerError::Configuration(format!("inline credentials are not valid JSON: {e}"))
            })?;
            Ok(Self::Inline(Box::new(creds)))
        } else {
            Ok(Self::FilePath(PathBuf::from(arg)))
        }
    }

    /// Resolves the source into credentials.
    ///
    /// # Errors
    /// Returns [`BrokerError::Configuration`] if the file cannot be read or
    /// parsed.
    pub fn resolve(self) -> Result<Credentials> {
        match self {
            Self::Inline(creds) => Ok(*creds),
            Self::FilePath(path) => {
                let raw = std::fs::read_to_string(&path).map_err(|e| {
                    BrokerError::Configuration(format!(
                        "cannot read credentials file {}: {e}",
                        path.display()
                    ))
                })?;
                serde_json::from_str(&raw).map_err(|e| {
                    BrokerError::Configuration(format!(
                        "credentials file {} is not valid: {e}",
                        path.display()
                    ))
                })
            }
        }
    }
}

fn encrypt_field(encryption_key: &str, plaintext: &str) -> Result<String> {
    let mut derived = [0u8; 48];
    pbkdf2::pbkdf2_hmac::<sha1::Sha1>(
        encryption_key.as_bytes(),
        &KDF_SALT,
        KDF_ROUNDS,
        &mut derived,
    );

    let (iv, key) = derived.split_at(16);
    let cipher = Aes256CbcEnc::new_from_slices(key, iv).map_err(|e| {
        BrokerError::Configuration(format!("cannot key login cipher: {e}"))
    });
    derived.zeroize();

    let ciphertext = cipher?.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
    Ok(BASE64.encode(ciphertext))
}
