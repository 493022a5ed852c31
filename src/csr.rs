//! 此模組負責 CSR（證書簽名請求）的解析與建構。
//!
//! 伺服端在最終化訂單時以 [`names_of`] 取出 CSR 所涵蓋的名稱集合，
//! 與訂單的識別項比對；[`CsrBuilder`] 則提供生成 CSR 的能力，
//! 供測試與工具情境使用。

use std::{collections::HashSet, result};

use openssl::{
    hash::MessageDigest,
    stack::Stack,
    x509::{extension::SubjectAlternativeName, X509Req},
};
use thiserror::Error;
use x509_parser::prelude::{FromDer, GeneralName, ParsedExtension, X509CertificationRequest};

use crate::key_pair::KeyPair;

/// 用於描述 CSR 解析或建構過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("Openssl error: {0}")]
    OpensslError(#[from] openssl::error::ErrorStack),
    #[error("CSR parse error: {0}")]
    ParseError(String),
    #[error("No SAN entries")]
    NoSanEntries,
}

/// 為簡化錯誤處理定義 Result 類型
type Result<T> = result::Result<T, CsrError>;

/// 自 DER 編碼的 CSR 取出其涵蓋的名稱集合。
///
/// 集合內容為主體通用名稱（CN）與 SAN 擴展中的全部 DNS 名稱，
/// 一律轉為小寫，以便與訂單識別項做不區分大小寫的集合比對。
///
/// # 錯誤
///
/// 當輸入不是合法的 DER 編碼 CSR 時回傳 [`CsrError::ParseError`]。
pub fn names_of(csr_der: &[u8]) -> Result<HashSet<String>> {
    let (_, req) = X509CertificationRequest::from_der(csr_der)
        .map_err(|e| CsrError::ParseError(e.to_string()))?;

    let mut names = HashSet::new();

    for common_name in req.certification_request_info.subject.iter_common_name() {
        let value = common_name
            .as_str()
            .map_err(|e| CsrError::ParseError(e.to_string()))?;
        names.insert(value.to_ascii_lowercase());
    }

    if let Some(extensions) = req.requested_extensions() {
        for extension in extensions {
            if let ParsedExtension::SubjectAlternativeName(san) = extension {
                for general_name in &san.general_names {
                    if let GeneralName::DNSName(dns_name) = general_name {
                        names.insert(dns_name.to_ascii_lowercase());
                    }
                }
            }
        }
    }

    Ok(names)
}

/// 表示一個 CSR 建構器，用於生成包含主體替代名稱 (SAN) 擴展的證書簽名請求。
pub struct CsrBuilder {
    san_entries: Vec<String>,
}

impl Default for CsrBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CsrBuilder {
    /// 建立一個新的 `CsrBuilder` 實例。
    ///
    /// 此方法初始化一個空的 SAN 列表，之後可以藉由 `san` 方法新增域名。
    pub fn new() -> Self {
        CsrBuilder {
            san_entries: Vec::new(),
        }
    }

    /// 新增一個 DNS 主體替代名稱 (SAN) 到 CSR 中。
    pub fn san(mut self, dns_name: &str) -> Self {
        self.san_entries.push(dns_name.to_string());
        self
    }

    /// 根據當前設定的 SAN 項目以及指定的金鑰對構建一個 X509 CSR。
    ///
    /// 該方法會驗證是否已經設定至少一個 SAN 項目，否則回傳
    /// [`CsrError::NoSanEntries`]。接著建立 SAN 擴展並加入請求，
    /// 最後使用提供的金鑰對簽署 CSR。
    ///
    /// # 錯誤
    ///
    /// 若過程中遇到 OpenSSL 的錯誤或未設定 SAN 項目，回傳相對應的
    /// [`CsrError`]。
    pub fn build(self, key_pair: &KeyPair) -> Result<X509Req> {
        let mut req_builder = X509Req::builder()?;

        if self.san_entries.is_empty() {
            return Err(CsrError::NoSanEntries);
        }

        let mut san_builder = SubjectAlternativeName::new();
        for entry in &self.san_entries {
            san_builder.dns(entry);
        }
        let san_extension = san_builder.build(&req_builder.x509v3_context(None))?;

        let mut stack = Stack::new()?;
        stack.push(san_extension)?;
        req_builder.add_extensions(&stack)?;

        req_builder.set_pubkey(&key_pair.pri_key)?;
        req_builder.sign(&key_pair.pri_key, MessageDigest::sha256())?;

        Ok(req_builder.build())
    }

    /// 構建 CSR 並回傳其 DER 編碼。
    pub fn build_der(self, key_pair: &KeyPair) -> Result<Vec<u8>> {
        Ok(self.build(key_pair)?.to_der()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_of_collects_san_lowercased() {
        let key_pair = KeyPair::generate(Some(2048)).unwrap();
        let csr_der = CsrBuilder::new()
            .san("Example.ORG")
            .san("www.example.org")
            .build_der(&key_pair)
            .unwrap();

        let names = names_of(&csr_der).unwrap();
        let expected: HashSet<String> = ["example.org", "www.example.org"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_names_of_rejects_garbage() {
        assert!(matches!(
            names_of(b"not a csr"),
            Err(CsrError::ParseError(_))
        ));
    }

    #[test]
    fn test_build_requires_san() {
        let key_pair = KeyPair::generate(Some(2048)).unwrap();
        assert!(matches!(
            CsrBuilder::new().build(&key_pair),
            Err(CsrError::NoSanEntries)
        ));
    }
}
