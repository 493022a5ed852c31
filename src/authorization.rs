//! 此模組定義授權（Authorization）實體。
//!
//! 授權對應單一識別項，其狀態由底下挑戰的結果彙總而來：
//! 任一挑戰通過即生效，全部失敗或逾期則失效。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::challenge::{Challenge, ChallengeStatus};

/// 授權的狀態。`valid` 與 `invalid` 為終態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
}

/// 表示一個授權實體。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authorization {
    /// 授權的唯一識別碼（UUIDv4）。
    pub id: String,
    /// 所屬識別項的識別碼。
    pub identifier_id: String,
    /// 目前狀態。
    pub status: AuthorizationStatus,
    /// 授權的到期時間。
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expires: Option<DateTime<Utc>>,
    /// 是否為萬用字元授權。
    pub wildcard: bool,
}

impl Authorization {
    /// 為指定識別項建立一個新的授權，初始狀態為 `pending`。
    pub fn from_identifier(identifier_id: &str, expires: Option<DateTime<Utc>>) -> Self {
        Authorization {
            id: Uuid::new_v4().to_string(),
            identifier_id: identifier_id.to_string(),
            status: AuthorizationStatus::Pending,
            expires,
            wildcard: false,
        }
    }

    /// 依底下挑戰的狀態重新計算授權狀態。
    ///
    /// 規則：
    /// - 終態下呼叫為無操作，直接回傳既有狀態。
    /// - 任一挑戰為 `valid` → 授權轉為 `valid`。
    /// - 到期時間已過，或所有挑戰皆為 `invalid` → 授權轉為 `invalid`。
    /// - 其餘情況維持 `pending`。
    pub fn finalize(&mut self, challenges: &[Challenge], now: DateTime<Utc>) -> AuthorizationStatus {
        if self.status != AuthorizationStatus::Pending {
            return self.status;
        }

        if challenges
            .iter()
            .any(|c| c.status == ChallengeStatus::Valid)
        {
            self.status = AuthorizationStatus::Valid;
        } else if self.expires.is_some_and(|expires| expires < now)
            || (!challenges.is_empty()
                && challenges
                    .iter()
                    .all(|c| c.status == ChallengeStatus::Invalid))
        {
            self.status = AuthorizationStatus::Invalid;
        }

        if self.status != AuthorizationStatus::Pending {
            tracing::debug!(
                authorization_id = %self.id,
                status = ?self.status,
                "authorization finalized"
            );
        }
        self.status
    }

    /// 判斷授權目前是否有效。
    pub fn is_valid(&self) -> bool {
        self.status == AuthorizationStatus::Valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::ChallengeKind;
    use chrono::Duration;

    fn pending_challenges(authorization_id: &str) -> Vec<Challenge> {
        Challenge::create_all(
            authorization_id,
            &[ChallengeKind::Http01, ChallengeKind::Dns01],
        )
    }

    #[test]
    fn test_one_valid_challenge_suffices() {
        let mut authz = Authorization::from_identifier("ident-1", None);
        let mut challenges = pending_challenges(&authz.id);
        challenges[1].validate(Utc::now());

        assert_eq!(
            authz.finalize(&challenges, Utc::now()),
            AuthorizationStatus::Valid
        );
        assert!(authz.is_valid());
    }

    #[test]
    fn test_all_invalid_challenges_fail_authorization() {
        let mut authz = Authorization::from_identifier("ident-1", None);
        let mut challenges = pending_challenges(&authz.id);
        for challenge in &mut challenges {
            challenge.fail();
        }

        assert_eq!(
            authz.finalize(&challenges, Utc::now()),
            AuthorizationStatus::Invalid
        );
    }

    #[test]
    fn test_expiry_overrides_pending_challenges() {
        let expired = Utc::now() - Duration::hours(1);
        let mut authz = Authorization::from_identifier("ident-1", Some(expired));
        let challenges = pending_challenges(&authz.id);

        assert_eq!(
            authz.finalize(&challenges, Utc::now()),
            AuthorizationStatus::Invalid
        );
    }

    #[test]
    fn test_pending_when_undecided() {
        let mut authz =
            Authorization::from_identifier("ident-1", Some(Utc::now() + Duration::days(7)));
        let mut challenges = pending_challenges(&authz.id);
        challenges[0].fail();

        assert_eq!(
            authz.finalize(&challenges, Utc::now()),
            AuthorizationStatus::Pending
        );
    }

    #[test]
    fn test_finalize_is_sticky_once_terminal() {
        let mut authz = Authorization::from_identifier("ident-1", None);
        let mut challenges = pending_challenges(&authz.id);
        challenges[0].validate(Utc::now());
        authz.finalize(&challenges, Utc::now());

        for challenge in &mut challenges {
            challenge.fail();
        }
        assert_eq!(
            authz.finalize(&challenges, Utc::now()),
            AuthorizationStatus::Valid
        );
    }
}
