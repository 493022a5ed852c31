//! 此模組定義訂單（Order）實體、其子實體圖的建立以及狀態重算。
//!
//! 訂單的狀態不會由子實體主動推進，而是在每次被讀取或最終化之前
//! 以全量掃描重新計算，確保逾期與授權結果即時反映。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    authorization::{Authorization, AuthorizationStatus},
    challenge::{Challenge, ChallengeKind},
    payload::NewOrderPayload,
};

/// 新訂單自建立起算的存活天數。
pub const EXPIRY_HORIZON_DAYS: i64 = 7;

/// 訂單的狀態。
///
/// 狀態轉移僅允許 `pending → ready → processing → valid | invalid`，
/// 其中 `pending` 亦可因逾期或授權失敗直接轉為 `invalid`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// 表示訂單所涵蓋的單一識別項。
///
/// 每個識別項擁有恰好一個授權。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identifier {
    /// 識別項的唯一識別碼（UUIDv4）。
    pub id: String,
    /// 所屬訂單的識別碼。
    pub order_id: String,
    /// 識別項類型，目前僅支援 `"dns"`。
    #[serde(rename = "type")]
    pub kind: String,
    /// 識別項的值，即域名。
    pub value: String,
}

/// 表示一個訂單實體。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// 訂單的唯一識別碼（UUIDv4）。
    pub id: String,
    /// 擁有者帳號的金鑰識別碼。
    pub account_kid: String,
    /// 目前狀態。
    pub status: OrderStatus,
    /// 訂單的到期時間。
    pub expires: DateTime<Utc>,
    /// 客戶端要求的證書生效時間。
    #[serde(rename = "notBefore", skip_serializing_if = "Option::is_none", default)]
    pub not_before: Option<DateTime<Utc>>,
    /// 客戶端要求的證書失效時間。
    #[serde(rename = "notAfter", skip_serializing_if = "Option::is_none", default)]
    pub not_after: Option<DateTime<Utc>>,
    /// 最終化時收到的 CSR（DER 編碼）。
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub csr_der: Option<Vec<u8>>,
    /// 簽發完成後對應的證書識別碼。
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub certificate_id: Option<String>,
}

/// 表示一筆新訂單連同其全部子實體，供同一交易一次寫入。
#[derive(Debug)]
pub struct OrderGraph {
    pub order: Order,
    pub identifiers: Vec<Identifier>,
    pub authorizations: Vec<Authorization>,
    pub challenges: Vec<Challenge>,
}

impl Order {
    /// 依新訂單載荷建立訂單及其子實體圖。
    ///
    /// 每個請求的域名產生一個識別項、一個授權，以及每個啟用挑戰
    /// 種類各一個的挑戰；訂單與授權的到期時間為建立時刻起算
    /// [`EXPIRY_HORIZON_DAYS`] 天。
    ///
    /// # 參數
    ///
    /// - `account_kid`: 擁有者帳號的金鑰識別碼。
    /// - `payload`: 已通過驗證的新訂單載荷。
    /// - `challenge_kinds`: 引擎啟用的挑戰種類。
    /// - `now`: 建立時刻。
    pub fn from_obj(
        account_kid: &str,
        payload: &NewOrderPayload,
        challenge_kinds: &[ChallengeKind],
        now: DateTime<Utc>,
    ) -> OrderGraph {
        let expires = now + Duration::days(EXPIRY_HORIZON_DAYS);
        let order = Order {
            id: Uuid::new_v4().to_string(),
            account_kid: account_kid.to_string(),
            status: OrderStatus::Pending,
            expires,
            not_before: None,
            not_after: None,
            csr_der: None,
            certificate_id: None,
        };

        let mut identifiers = Vec::with_capacity(payload.identifiers.len());
        let mut authorizations = Vec::with_capacity(payload.identifiers.len());
        let mut challenges = Vec::new();

        for requested in &payload.identifiers {
            let identifier = Identifier {
                id: Uuid::new_v4().to_string(),
                order_id: order.id.clone(),
                kind: requested.type_.clone(),
                value: requested.value.clone(),
            };
            let authorization = Authorization::from_identifier(&identifier.id, Some(expires));
            challenges.extend(Challenge::create_all(&authorization.id, challenge_kinds));
            identifiers.push(identifier);
            authorizations.push(authorization);
        }

        tracing::info!(
            order_id = %order.id,
            account_kid,
            identifiers = identifiers.len(),
            "order created"
        );

        OrderGraph {
            order,
            identifiers,
            authorizations,
            challenges,
        }
    }

    /// 依全部授權的狀態重新計算訂單狀態。
    ///
    /// 規則：
    /// - 狀態非 `pending` 時為無操作，直接回傳既有狀態。
    /// - 到期時間已過 → `invalid`（終態，優先於授權結果）。
    /// - 任一授權為 `invalid` → `invalid`。
    /// - 所有授權皆為 `valid` → `ready`。
    /// - 其餘情況維持 `pending`。
    pub fn validate(
        &mut self,
        authorizations: &[Authorization],
        now: DateTime<Utc>,
    ) -> OrderStatus {
        if self.status != OrderStatus::Pending {
            return self.status;
        }

        if self.expires < now {
            self.status = OrderStatus::Invalid;
        } else if authorizations
            .iter()
            .any(|a| a.status == AuthorizationStatus::Invalid)
        {
            self.status = OrderStatus::Invalid;
        } else if !authorizations.is_empty() && authorizations.iter().all(|a| a.is_valid()) {
            self.status = OrderStatus::Ready;
        }

        if self.status != OrderStatus::Pending {
            tracing::debug!(order_id = %self.id, status = ?self.status, "order revalidated");
        }
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{IdentifierPayload, PayloadT};

    fn order_payload(domains: &[&str]) -> NewOrderPayload {
        let identifiers = domains
            .iter()
            .map(|domain| IdentifierPayload {
                type_: "dns".to_string(),
                value: domain.to_string(),
            })
            .collect();
        let payload = NewOrderPayload {
            identifiers,
            not_before: None,
            not_after: None,
        };
        payload.validate().unwrap();
        payload
    }

    fn graph(domains: &[&str]) -> OrderGraph {
        Order::from_obj(
            "kid-1",
            &order_payload(domains),
            &[ChallengeKind::Http01, ChallengeKind::Dns01],
            Utc::now(),
        )
    }

    #[test]
    fn test_from_obj_builds_full_graph() {
        let graph = graph(&["example.org", "www.example.org"]);

        assert_eq!(graph.order.status, OrderStatus::Pending);
        assert_eq!(graph.identifiers.len(), 2);
        assert_eq!(graph.authorizations.len(), 2);
        assert_eq!(graph.challenges.len(), 4);

        for (identifier, authz) in graph.identifiers.iter().zip(&graph.authorizations) {
            assert_eq!(identifier.order_id, graph.order.id);
            assert_eq!(authz.identifier_id, identifier.id);
            assert_eq!(authz.expires, Some(graph.order.expires));
            assert_eq!(
                graph
                    .challenges
                    .iter()
                    .filter(|c| c.authorization_id == authz.id)
                    .count(),
                2
            );
        }
    }

    #[test]
    fn test_expiry_horizon() {
        let now = Utc::now();
        let graph = Order::from_obj(
            "kid-1",
            &order_payload(&["example.org"]),
            &[ChallengeKind::Http01],
            now,
        );
        assert_eq!(graph.order.expires, now + Duration::days(EXPIRY_HORIZON_DAYS));
    }

    #[test]
    fn test_validate_requires_all_authorizations() {
        let mut graph = graph(&["a.example.org", "b.example.org"]);
        let now = Utc::now();

        graph.authorizations[0].status = AuthorizationStatus::Valid;
        assert_eq!(
            graph.order.validate(&graph.authorizations, now),
            OrderStatus::Pending
        );

        graph.authorizations[1].status = AuthorizationStatus::Valid;
        assert_eq!(
            graph.order.validate(&graph.authorizations, now),
            OrderStatus::Ready
        );
    }

    #[test]
    fn test_one_invalid_authorization_fails_order() {
        let mut graph = graph(&["a.example.org", "b.example.org"]);
        graph.authorizations[0].status = AuthorizationStatus::Valid;
        graph.authorizations[1].status = AuthorizationStatus::Invalid;

        assert_eq!(
            graph.order.validate(&graph.authorizations, Utc::now()),
            OrderStatus::Invalid
        );
    }

    #[test]
    fn test_expired_order_is_invalid_despite_valid_authorizations() {
        let mut graph = graph(&["example.org"]);
        graph.authorizations[0].status = AuthorizationStatus::Valid;
        graph.order.expires = Utc::now() - Duration::hours(1);

        assert_eq!(
            graph.order.validate(&graph.authorizations, Utc::now()),
            OrderStatus::Invalid
        );
    }

    #[test]
    fn test_validate_is_noop_past_pending() {
        let mut graph = graph(&["example.org"]);
        graph.order.status = OrderStatus::Processing;
        graph.authorizations[0].status = AuthorizationStatus::Invalid;

        assert_eq!(
            graph.order.validate(&graph.authorizations, Utc::now()),
            OrderStatus::Processing
        );
    }
}
