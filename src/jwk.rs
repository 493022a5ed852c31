use openssl::{
    bn::BigNum,
    pkey::{PKey, Public},
    rsa::Rsa,
    sha::sha256,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::base64::{self, DecodeError};

/// JWK 相關操作的錯誤類型。
///
/// 此錯誤類型涵蓋 JWK 解析、金鑰轉換與序列化過程中可能發生的錯誤，
/// 並提供對應的錯誤訊息以輔助除錯。
#[derive(Debug, Error)]
pub enum JwkError {
    /// 不支援的演算法。
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    /// 金鑰轉換失敗。
    #[error("Failed to convert key: {0}")]
    KeyConversionError(#[from] openssl::error::ErrorStack),
    /// Base64 解碼錯誤。
    #[error("Base64 decode error: {0}")]
    Decode(#[from] DecodeError),
    /// 序列化錯誤。
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// JSON Web Key (JWK) 的封裝，目前僅支援 RSA 格式。
///
/// 此列舉未來可以擴充以支援其他金鑰類型。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    /// RSA 格式的 JWK。
    #[serde(rename = "RSA")]
    Rsa(RsaJwk),
}

/// RSA 格式的 JWK 結構，包含必要的公開參數。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsaJwk {
    n: String,
    e: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    alg: Option<String>,
}

impl RsaJwk {
    /// 根據 RSA 公鑰產生 RSA 格式的 JWK。
    fn from_public_key(key: &PKey<Public>) -> Result<Self, JwkError> {
        let rsa = key.rsa()?;
        let n = base64::encode(rsa.n().to_vec());
        let e = base64::encode(rsa.e().to_vec());

        Ok(RsaJwk {
            n,
            e,
            alg: Some(String::from("RS256")),
        })
    }

    /// 由公開參數重建 OpenSSL 公鑰。
    fn to_public_key(&self) -> Result<PKey<Public>, JwkError> {
        let n = BigNum::from_slice(&base64::decode(&self.n)?)?;
        let e = BigNum::from_slice(&base64::decode(&self.e)?)?;
        let rsa = Rsa::from_public_components(n, e)?;
        Ok(PKey::from_rsa(rsa)?)
    }

    /// 產生符合 ACME 協議要求的標準化 JSON 表示（欄位按字典序排列）。
    ///
    /// # 返回
    ///
    /// 成功時返回 JSON 格式字串，否則返回 `JwkError`。
    pub fn to_acme_json(&self) -> Result<String, JwkError> {
        let mut map = Map::new();
        map.insert("e".to_string(), Value::String(self.e.clone()));
        map.insert("kty".to_string(), Value::String("RSA".to_string()));
        map.insert("n".to_string(), Value::String(self.n.clone()));

        serde_json::to_string(&Value::Object(map)).map_err(JwkError::from)
    }
}

impl Jwk {
    /// 根據給定的 RSA 公鑰建立對應的 JWK。
    ///
    /// # 參數
    ///
    /// * `key` - OpenSSL 封裝的 RSA 公鑰。
    ///
    /// # 返回
    ///
    /// 成功時返回對應類型的 `Jwk`，否則返回 `JwkError`。
    pub fn from_public_key(key: &PKey<Public>) -> Result<Self, JwkError> {
        Ok(Jwk::Rsa(RsaJwk::from_public_key(key)?))
    }

    /// 由 JWK 的公開參數重建 OpenSSL 公鑰，用於簽章驗證。
    ///
    /// # 返回
    ///
    /// 成功時返回 `PKey<Public>`，否則返回 `JwkError`。
    pub fn to_public_key(&self) -> Result<PKey<Public>, JwkError> {
        match self {
            Jwk::Rsa(jwk) => jwk.to_public_key(),
        }
    }

    /// 取得 JWK 所使用的演算法。
    pub fn algorithm(&self) -> Option<&str> {
        match self {
            Jwk::Rsa(jwk) => jwk.alg.as_deref(),
        }
    }

    /// 將 JWK 轉換為符合 ACME 協議要求的 JSON 表示。
    pub fn to_acme_json(&self) -> Result<String, JwkError> {
        match self {
            Jwk::Rsa(jwk) => jwk.to_acme_json(),
        }
    }

    /// 計算 JWK 的縮影（thumbprint），即標準化 JSON 的 SHA-256 雜湊，
    /// 以 URL 安全 Base64 字串回傳。
    pub fn thumbprint(&self) -> Result<String, JwkError> {
        let hash = sha256(self.to_acme_json()?.as_bytes());
        Ok(base64::encode(hash))
    }
}
