//! 此模組定義挑戰（Challenge）實體與其狀態機。
//!
//! 每個授權底下掛載一組挑戰，任一挑戰通過即可使授權生效。
//! 實際的域名驗證工作委派給 [`ChallengeValidator`] 協作者，
//! 狀態機本身只記錄驗證的結果。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 挑戰的種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeKind {
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "dns-01")]
    Dns01,
}

impl ChallengeKind {
    /// 回傳協議線上格式所使用的名稱。
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeKind::Http01 => "http-01",
            ChallengeKind::Dns01 => "dns-01",
        }
    }
}

/// 挑戰的狀態。
///
/// 狀態轉移僅允許 `pending → processing → valid | invalid`，
/// 其中 `valid` 與 `invalid` 為終態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

impl ChallengeStatus {
    /// 判斷該狀態是否為終態。
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChallengeStatus::Valid | ChallengeStatus::Invalid)
    }
}

/// 表示一個挑戰實體。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    /// 挑戰的唯一識別碼（UUIDv4）。
    pub id: String,
    /// 所屬授權的識別碼。
    pub authorization_id: String,
    /// 挑戰種類。
    #[serde(rename = "type")]
    pub kind: ChallengeKind,
    /// 目前狀態。
    pub status: ChallengeStatus,
    /// 客戶端完成挑戰所需的隨機 token。
    pub token: String,
    /// 驗證通過的時間戳，僅於狀態為 `valid` 時存在。
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub validated: Option<DateTime<Utc>>,
}

impl Challenge {
    /// 為指定授權建立一個新的挑戰，初始狀態為 `pending`。
    pub fn create(authorization_id: &str, kind: ChallengeKind) -> Self {
        Challenge {
            id: Uuid::new_v4().to_string(),
            authorization_id: authorization_id.to_string(),
            kind,
            status: ChallengeStatus::Pending,
            token: Uuid::new_v4().to_string(),
            validated: None,
        }
    }

    /// 為指定授權建立每個啟用種類各一個的挑戰集合。
    pub fn create_all(authorization_id: &str, kinds: &[ChallengeKind]) -> Vec<Self> {
        kinds
            .iter()
            .map(|kind| Challenge::create(authorization_id, *kind))
            .collect()
    }

    /// 將挑戰標記為驗證通過。
    ///
    /// 終態下呼叫為無操作，直接回傳既有狀態；否則狀態轉為 `valid`
    /// 並記錄驗證時間。
    pub fn validate(&mut self, now: DateTime<Utc>) -> ChallengeStatus {
        if self.status.is_terminal() {
            return self.status;
        }
        self.status = ChallengeStatus::Valid;
        self.validated = Some(now);
        tracing::debug!(challenge_id = %self.id, "challenge validated");
        self.status
    }

    /// 將挑戰標記為驗證失敗。終態下呼叫為無操作。
    pub fn fail(&mut self) -> ChallengeStatus {
        if self.status.is_terminal() {
            return self.status;
        }
        self.status = ChallengeStatus::Invalid;
        tracing::debug!(challenge_id = %self.id, "challenge failed");
        self.status
    }
}

/// 表示一次外部驗證嘗試的結果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeOutcome {
    Valid,
    Invalid,
}

/// 定義挑戰驗證協作者必須實作的功能。
///
/// 引擎僅記錄驗證結果，實際查詢 HTTP 資源或 DNS 記錄的工作
/// 由實作者負責。
pub trait ChallengeValidator: Send + Sync {
    /// 對指定挑戰執行一次驗證嘗試。
    fn attempt(&self, challenge: &Challenge) -> ChallengeOutcome;
}

/// 無條件通過的驗證器，供測試與內部部署情境使用。
#[derive(Debug, Default)]
pub struct AcceptAllValidator;

impl ChallengeValidator for AcceptAllValidator {
    fn attempt(&self, _challenge: &Challenge) -> ChallengeOutcome {
        ChallengeOutcome::Valid
    }
}
