//! 此模組定義各操作的請求載荷（Payload）結構。
//!
//! 伺服端自已驗證簽章的信封中取出負載位元組，於此反序列化並檢查
//! 業務規則；任何不符合規範的載荷都會在進入狀態機之前被拒絕。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::base64::{self, DecodeError};

/// 表示載荷解析或驗證過程中的錯誤。
#[derive(Debug, Error)]
pub enum PayloadError {
    /// 當 JSON 反序列化失敗時回傳此錯誤。
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    /// 當 Base64 解碼失敗時回傳此錯誤。
    #[error("Base64 decode error: {0}")]
    Base64DecodeError(#[from] DecodeError),
    /// 當載荷內容不符合業務規則時回傳此錯誤。
    #[error("Invalid payload: {0}")]
    Invalid(String),
}

type Result<T> = std::result::Result<T, PayloadError>;

/// 定義所有請求載荷必須實作的功能。
///
/// 該 trait 要求實作者能夠自原始位元組反序列化，並提供自定義的驗證邏輯。
pub trait PayloadT: Sized + Serialize + for<'de> Deserialize<'de> {
    /// 自原始位元組解析載荷並立即執行驗證。
    ///
    /// # 錯誤
    ///
    /// 若反序列化失敗，則回傳 [`PayloadError::JsonError`]；
    /// 若驗證失敗，則回傳 [`PayloadError::Invalid`]。
    fn from_bytes(raw: &[u8]) -> Result<Self> {
        let payload: Self = serde_json::from_slice(raw)?;
        payload.validate()?;
        Ok(payload)
    }

    /// 驗證載荷資料是否符合預期的規範。
    ///
    /// 實作者需要根據各自的業務邏輯來檢查資料的正確性。
    ///
    /// # 錯誤
    ///
    /// 若驗證失敗，則回傳 [`PayloadError::Invalid`]。
    fn validate(&self) -> Result<()>;
}

/// 表示建立新帳號的請求載荷。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewAccountPayload {
    /// 帳號的聯絡資訊，通常為 `mailto:` URI。
    #[serde(default)]
    pub contact: Vec<String>,
    /// 使用者是否同意服務條款。
    #[serde(rename = "termsOfServiceAgreed", default)]
    pub terms_of_service_agreed: bool,
    /// 若為真，僅查詢既有帳號而不建立新帳號。
    #[serde(rename = "onlyReturnExisting", default)]
    pub only_return_existing: bool,
}

impl PayloadT for NewAccountPayload {
    /// 驗證新帳號載荷資料。
    ///
    /// 條款同意與既有帳號查詢的判定屬於帳號目錄的職責，
    /// 此處僅檢查聯絡資訊的格式。
    fn validate(&self) -> Result<()> {
        for contact in &self.contact {
            if contact.is_empty() {
                return Err(PayloadError::Invalid(
                    "Contact entry cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// 表示更新既有帳號的請求載荷。
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateAccountPayload {
    /// 新的聯絡資訊；省略時保持原值。
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub contact: Option<Vec<String>>,
    /// 新的帳號狀態；目前僅允許 `"deactivated"`。
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<String>,
}

impl PayloadT for UpdateAccountPayload {
    /// 驗證帳號更新載荷資料：狀態欄位僅允許停用請求。
    fn validate(&self) -> Result<()> {
        if let Some(status) = &self.status {
            if status != "deactivated" {
                return Err(PayloadError::Invalid(format!(
                    "Unsupported account status: {}",
                    status
                )));
            }
        }
        Ok(())
    }
}

/// 表示一個識別項，用來描述證書所涵蓋的主機名稱。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierPayload {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
}

/// 表示建立新訂單的請求載荷。
///
/// 該載荷中包含一組識別項，代表需驗證的域名。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewOrderPayload {
    pub identifiers: Vec<IdentifierPayload>,
    #[serde(rename = "notBefore", skip_serializing_if = "Option::is_none", default)]
    pub not_before: Option<String>,
    #[serde(rename = "notAfter", skip_serializing_if = "Option::is_none", default)]
    pub not_after: Option<String>,
}

impl PayloadT for NewOrderPayload {
    /// 驗證新訂單載荷資料：
    ///
    /// - 必須至少包含一個識別項。
    /// - 所有識別項的類型必須為 `"dns"` 且值不得為空。
    fn validate(&self) -> Result<()> {
        if self.identifiers.is_empty() {
            return Err(PayloadError::Invalid(
                "At least one identifier is required".to_string(),
            ));
        }
        for identifier in &self.identifiers {
            if identifier.type_ != "dns" {
                return Err(PayloadError::Invalid(format!(
                    "Unsupported identifier type: {}",
                    identifier.type_
                )));
            }
            if identifier.value.is_empty() {
                return Err(PayloadError::Invalid(
                    "Identifier value cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// 表示最終化訂單的請求載荷。
///
/// 該載荷主要包含 CSR（證書簽署請求）的 Base64 URL 安全編碼字串。
#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizeOrderPayload {
    #[serde(rename = "csr")]
    csr_b64_str: String,
}

impl FinalizeOrderPayload {
    /// 以 DER 編碼的 CSR 建立載荷，供測試與客戶端情境使用。
    pub fn from_der(csr_der: &[u8]) -> Self {
        FinalizeOrderPayload {
            csr_b64_str: base64::encode(csr_der),
        }
    }

    /// 解碼並回傳 CSR 的 DER 位元組。
    ///
    /// # 錯誤
    ///
    /// 當編碼字串不是合法的 Base64 URL 字串時回傳
    /// [`PayloadError::Base64DecodeError`]。
    pub fn csr_der(&self) -> Result<Vec<u8>> {
        Ok(base64::decode(&self.csr_b64_str)?)
    }
}

impl PayloadT for FinalizeOrderPayload {
    /// 驗證最終化訂單載荷資料：CSR 欄位不得為空。
    fn validate(&self) -> Result<()> {
        if self.csr_b64_str.is_empty() {
            return Err(PayloadError::Invalid("CSR is required".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_account_defaults() {
        let payload = NewAccountPayload::from_bytes(b"{}").unwrap();
        assert!(payload.contact.is_empty());
        assert!(!payload.terms_of_service_agreed);
        assert!(!payload.only_return_existing);
    }

    #[test]
    fn test_new_account_rejects_empty_contact_entry() {
        let raw = br#"{"contact": [""], "termsOfServiceAgreed": true}"#;
        assert!(matches!(
            NewAccountPayload::from_bytes(raw),
            Err(PayloadError::Invalid(_))
        ));
    }

    #[test]
    fn test_new_order_requires_identifiers() {
        let raw = br#"{"identifiers": []}"#;
        assert!(matches!(
            NewOrderPayload::from_bytes(raw),
            Err(PayloadError::Invalid(_))
        ));
    }

    #[test]
    fn test_new_order_rejects_non_dns_identifier() {
        let raw = br#"{"identifiers": [{"type": "ip", "value": "10.0.0.1"}]}"#;
        assert!(matches!(
            NewOrderPayload::from_bytes(raw),
            Err(PayloadError::Invalid(_))
        ));
    }

    #[test]
    fn test_new_order_accepts_dns_identifiers() {
        let raw = br#"{"identifiers": [{"type": "dns", "value": "example.org"}]}"#;
        let payload = NewOrderPayload::from_bytes(raw).unwrap();
        assert_eq!(payload.identifiers.len(), 1);
        assert_eq!(payload.identifiers[0].value, "example.org");
    }

    #[test]
    fn test_update_account_rejects_unknown_status() {
        let raw = br#"{"status": "valid"}"#;
        assert!(matches!(
            UpdateAccountPayload::from_bytes(raw),
            Err(PayloadError::Invalid(_))
        ));
    }

    #[test]
    fn test_finalize_round_trips_csr() {
        let payload = FinalizeOrderPayload::from_der(b"\x30\x03\x02\x01\x00");
        assert_eq!(payload.csr_der().unwrap(), b"\x30\x03\x02\x01\x00");
    }
}
