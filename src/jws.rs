//! 此模組提供已簽署信封（JSON Web Signature, JWS）的解析與構造，
//! 伺服端以其驗證入站請求，測試端以其模擬客戶端。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    base64::{self, DecodeError},
    jwk::Jwk,
    key_pair::KeyPair,
    signature::{create_signature, SignatureError},
};

/// 表示與 JWS 相關的錯誤。
///
/// 包含在 Base64 解碼或 JSON 處理過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum JwsError {
    /// 當 Base64 解碼失敗時回傳此錯誤。
    #[error("Base64 decode error: {0}")]
    Base64DecodeError(#[from] DecodeError),
    /// 當 JSON 序列化或反序列化過程中發生錯誤時回傳此錯誤。
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    /// 當簽章生成失敗時回傳此錯誤。
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
}

type Result<T> = std::result::Result<T, JwsError>;

/// 表示一個已簽署的信封物件。
///
/// 此物件包含三個部分：
/// - `protected`：保護標頭，經 Base64 URL 安全編碼後的字串。
/// - `payload`：負載資料，經 Base64 URL 安全編碼後的字串。
/// - `signature`：簽章，經 Base64 URL 安全編碼後的字串。
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    /// 對應 JWS 中的 "protected" 欄位，包含已編碼的標頭資訊。
    pub protected: String,
    /// JWS 中的 payload 部分，經 Base64 URL 安全編碼。
    pub payload: String,
    /// JWS 中的簽章部分，經 Base64 URL 安全編碼。
    pub signature: String,
}

/// 表示已解碼的保護標頭。
///
/// 標頭中必須攜帶 nonce 與目標 URL，且 `jwk` 與 `kid` 恰有一者存在——
/// 此互斥性由引擎層強制，本結構僅忠實反映線上格式。
#[derive(Debug, Serialize, Deserialize)]
pub struct ProtectedHeader {
    /// 簽章演算法
    pub alg: String,
    /// 用於防止重放攻擊的隨機數
    pub nonce: String,
    /// 請求目標 URL
    pub url: String,
    /// 可選的 JSON Web Key (JWK)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub jwk: Option<Jwk>,
    /// 可選的密鑰標識符 (Key ID)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub kid: Option<String>,
}

impl Envelope {
    /// 從 JSON 字串解析 `Envelope`。
    ///
    /// # 錯誤
    ///
    /// 結構不符合 JWS 三段式格式時回傳 [`JwsError::JsonError`]。
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// 解碼並解析保護標頭。
    ///
    /// # 錯誤
    ///
    /// 回傳 [`JwsError::Base64DecodeError`] 或 [`JwsError::JsonError`]
    /// 當標頭不是合法的 Base64 URL 編碼 JSON 物件時。
    pub fn header(&self) -> Result<ProtectedHeader> {
        let decoded = base64::decode(&self.protected)?;
        Ok(serde_json::from_slice(&decoded)?)
    }

    /// 解碼並回傳原始負載位元組。POST-as-GET 請求的負載為空切片。
    pub fn payload_bytes(&self) -> Result<Vec<u8>> {
        Ok(base64::decode(&self.payload)?)
    }

    /// 解碼並回傳原始簽章位元組。
    pub fn signature_bytes(&self) -> Result<Vec<u8>> {
        Ok(base64::decode(&self.signature)?)
    }

    /// 以指定金鑰對構造一個已簽署信封。
    ///
    /// 該方法序列化標頭與負載、以 Base64 URL 編碼後進行簽章，
    /// 主要供測試與客戶端情境使用。
    ///
    /// # 參數
    ///
    /// - `header`: 保護標頭。
    /// - `payload`: 原始負載位元組（允許為空）。
    /// - `key_pair`: 用於簽章的金鑰對。
    pub fn build(header: &ProtectedHeader, payload: &[u8], key_pair: &KeyPair) -> Result<Self> {
        let protected = base64::encode(serde_json::to_string(header)?);
        let payload = base64::encode(payload);
        let signature = base64::encode(create_signature(&protected, &payload, key_pair)?);

        Ok(Envelope {
            protected,
            payload,
            signature,
        })
    }

    /// 將 `Envelope` 實例序列化為 JSON 格式的字串。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
