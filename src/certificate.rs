//! 此模組定義證書（Certificate）實體與簽發協作者。
//!
//! 引擎本身不實作任何 CA 邏輯，僅透過 [`CertificateIssuer`] trait
//! 委派簽發；[`LocalIssuer`] 提供以本地自簽根金鑰簽發的預設實作。

use chrono::{DateTime, Duration, Utc};
use openssl::{
    asn1::Asn1Time,
    bn::{BigNum, MsbOption},
    hash::MessageDigest,
    pkey::{PKey, Private},
    x509::{
        extension::{BasicConstraints, SubjectAlternativeName},
        X509NameBuilder, X509Req, X509,
    },
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    csr::{self, CsrError},
    key_pair::{KeyError, KeyPair},
};

/// 用於描述證書簽發過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum IssuerError {
    #[error("Openssl error: {0}")]
    OpensslError(#[from] openssl::error::ErrorStack),
    #[error("Key error: {0}")]
    KeyError(#[from] KeyError),
    #[error("CSR error: {0}")]
    CsrError(#[from] CsrError),
    #[error("Invalid PEM: {0}")]
    InvalidPem(String),
}

type Result<T> = std::result::Result<T, IssuerError>;

/// 簽發出的證書自此刻回溯的生效餘裕（天）。
const NOT_BEFORE_BACKDATE_DAYS: i64 = 1;
/// 簽發出的證書自此刻起算的有效天數。
const VALIDITY_DAYS: i64 = 29;

/// 表示一張已簽發的證書實體。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    /// 證書的唯一識別碼（UUIDv4）。
    pub id: String,
    /// 所屬訂單的識別碼。
    pub order_id: String,
    /// 擁有者帳號的金鑰識別碼。
    pub account_kid: String,
    /// 完整證書鏈（葉證書在前），PEM 編碼。
    pub full_chain_pem: String,
    /// 簽發時間。
    pub created_at: DateTime<Utc>,
}

impl Certificate {
    /// 以簽發結果建立證書實體。
    pub fn new(order_id: &str, account_kid: &str, full_chain_pem: String) -> Self {
        Certificate {
            id: Uuid::new_v4().to_string(),
            order_id: order_id.to_string(),
            account_kid: account_kid.to_string(),
            full_chain_pem,
            created_at: Utc::now(),
        }
    }
}

/// 定義證書簽發協作者必須實作的功能。
pub trait CertificateIssuer: Send + Sync {
    /// 依 DER 編碼的 CSR 簽發證書，回傳完整證書鏈的 PEM 字串。
    fn issue(&self, csr_der: &[u8]) -> Result<String>;
}

/// 以本地根金鑰簽發證書的預設簽發者。
///
/// 簽出的葉證書生效時間回溯一天以容忍時鐘偏差，有效期 29 天，
/// SAN 自 CSR 中的名稱集合重建。
pub struct LocalIssuer {
    root_key: PKey<Private>,
    root_cert: X509,
}

impl LocalIssuer {
    /// 生成一組新的自簽根金鑰與根證書。
    ///
    /// # 參數
    ///
    /// - `common_name`: 根證書的主體通用名稱。
    pub fn generate(common_name: &str) -> Result<Self> {
        let key_pair = KeyPair::generate(Some(2048))?;
        let root_key = key_pair.pri_key;

        let mut name_builder = X509NameBuilder::new()?;
        name_builder.append_entry_by_text("CN", common_name)?;
        let name = name_builder.build();

        let serial = random_serial()?;
        let not_before = Asn1Time::days_from_now(0)?;
        let not_after = Asn1Time::days_from_now(3650)?;

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;
        builder.set_pubkey(&root_key)?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;
        builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
        builder.sign(&root_key, MessageDigest::sha256())?;

        Ok(LocalIssuer {
            root_key,
            root_cert: builder.build(),
        })
    }

    /// 載入既有的根金鑰與根證書（皆為 PEM 編碼）。
    pub fn from_pem(root_key_pem: &[u8], root_cert_pem: &[u8]) -> Result<Self> {
        let root_key = PKey::private_key_from_pem(root_key_pem)
            .map_err(|e| IssuerError::InvalidPem(e.to_string()))?;
        let root_cert = X509::from_pem(root_cert_pem)
            .map_err(|e| IssuerError::InvalidPem(e.to_string()))?;
        Ok(LocalIssuer {
            root_key,
            root_cert,
        })
    }

    /// 回傳根證書的 PEM 編碼。
    pub fn root_cert_pem(&self) -> Result<Vec<u8>> {
        Ok(self.root_cert.to_pem()?)
    }
}

impl CertificateIssuer for LocalIssuer {
    fn issue(&self, csr_der: &[u8]) -> Result<String> {
        let req = X509Req::from_der(csr_der)?;
        let names = csr::names_of(csr_der)?;

        let not_before =
            Asn1Time::from_unix((Utc::now() - Duration::days(NOT_BEFORE_BACKDATE_DAYS)).timestamp())?;
        let not_after = Asn1Time::days_from_now(VALIDITY_DAYS as u32)?;

        let serial = random_serial()?;
        let subject_key = req.public_key()?;

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(req.subject_name())?;
        builder.set_issuer_name(self.root_cert.subject_name())?;
        builder.set_pubkey(&subject_key)?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;

        let mut san_builder = SubjectAlternativeName::new();
        for name in &names {
            san_builder.dns(name);
        }
        let context = builder.x509v3_context(Some(&self.root_cert), None);
        let san_extension = san_builder.build(&context)?;
        builder.append_extension(san_extension)?;

        builder.sign(&self.root_key, MessageDigest::sha256())?;
        let leaf = builder.build();

        let mut pem = String::from_utf8(leaf.to_pem()?)
            .map_err(|e| IssuerError::InvalidPem(e.to_string()))?;
        pem.push_str(
            &String::from_utf8(self.root_cert.to_pem()?)
                .map_err(|e| IssuerError::InvalidPem(e.to_string()))?,
        );

        tracing::info!(names = names.len(), "certificate issued");
        Ok(pem)
    }
}

/// 生成一組 159 位元的隨機序號。
fn random_serial() -> Result<openssl::asn1::Asn1Integer> {
    let mut serial = BigNum::new()?;
    serial.rand(159, MsbOption::MAYBE_ZERO, false)?;
    Ok(serial.to_asn1_integer()?)
}
