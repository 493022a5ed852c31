//! 此模組實作協議引擎本體。
//!
//! 引擎接收已簽署的請求信封，完成 nonce 消耗、簽章驗證與帳號解析
//! 之後分派至各操作；每個操作在單一儲存交易內讀寫實體，於回應
//! 資源計算完成後提交，並無條件附上一枚新發的 nonce。

use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, Utc};
use openssl::pkey::{PKey, Public};
use serde::Serialize;
use thiserror::Error;

use crate::{
    account::{Account, AccountDirectory, AccountError, AccountStatus},
    authorization::{Authorization, AuthorizationStatus},
    certificate::{Certificate, CertificateIssuer, IssuerError, LocalIssuer},
    challenge::{
        AcceptAllValidator, Challenge, ChallengeKind, ChallengeOutcome, ChallengeStatus,
        ChallengeValidator,
    },
    csr,
    jws::{Envelope, JwsError},
    nonce::{NonceError, NonceRegistry},
    order::{Order, OrderStatus},
    payload::{
        FinalizeOrderPayload, IdentifierPayload, NewAccountPayload, NewOrderPayload, PayloadError,
        PayloadT, UpdateAccountPayload,
    },
    signature::{verify_signature, SignatureError},
    store::{MemStore, Store, StoreError, StoreTxn},
};

/// 協議層的錯誤分類。
///
/// 前面的變體對應協議定義的錯誤類型，會回報給客戶端；
/// 其餘為內部錯誤，不屬於協議語彙。
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Malformed request: {0}")]
    Malformed(String),
    #[error("Unknown or already used nonce: {0}")]
    BadNonce(String),
    #[error("Signature verification failed")]
    BadSignature,
    #[error("Bad public key: {0}")]
    BadPublicKey(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Account does not exist")]
    AccountDoesNotExist,
    #[error("Terms of service must be agreed")]
    TermsNotAgreed,
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Order is not ready for finalization")]
    OrderNotReady,
    #[error("CSR names do not match order identifiers")]
    CsrMismatch,
    #[error("Operation not implemented: {0}")]
    Unimplemented(String),
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Issuer error: {0}")]
    IssuerError(#[from] IssuerError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// 回傳協議線上格式的錯誤類型 URN。
    pub fn acme_type(&self) -> &'static str {
        match self {
            EngineError::Malformed(_) | EngineError::BadSignature => {
                "urn:ietf:params:acme:error:malformed"
            }
            EngineError::BadNonce(_) => "urn:ietf:params:acme:error:badNonce",
            EngineError::BadPublicKey(_) => "urn:ietf:params:acme:error:badPublicKey",
            EngineError::Unauthorized | EngineError::NotFound(_) => {
                "urn:ietf:params:acme:error:unauthorized"
            }
            EngineError::AccountDoesNotExist => {
                "urn:ietf:params:acme:error:accountDoesNotExist"
            }
            EngineError::TermsNotAgreed => "urn:ietf:params:acme:error:userActionRequired",
            EngineError::OrderNotReady => "urn:ietf:params:acme:error:orderNotReady",
            EngineError::CsrMismatch => "urn:ietf:params:acme:error:badCSR",
            EngineError::Unimplemented(_)
            | EngineError::StoreError(_)
            | EngineError::IssuerError(_)
            | EngineError::Internal(_) => "urn:ietf:params:acme:error:serverInternal",
        }
    }

    /// 回傳對應的 HTTP 狀態碼。`orderNotReady` 為 403，其餘協議
    /// 錯誤為 400。
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::OrderNotReady => 403,
            EngineError::NotFound(_) => 404,
            EngineError::Unimplemented(_) => 501,
            EngineError::StoreError(_) | EngineError::IssuerError(_) | EngineError::Internal(_) => {
                500
            }
            _ => 400,
        }
    }
}

impl From<JwsError> for EngineError {
    fn from(err: JwsError) -> Self {
        EngineError::Malformed(err.to_string())
    }
}

impl From<PayloadError> for EngineError {
    fn from(err: PayloadError) -> Self {
        EngineError::Malformed(err.to_string())
    }
}

impl From<NonceError> for EngineError {
    fn from(err: NonceError) -> Self {
        match err {
            NonceError::UnknownNonce(token) => EngineError::BadNonce(token),
            other => EngineError::Internal(other.to_string()),
        }
    }
}

impl From<AccountError> for EngineError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::TermsNotAgreed => EngineError::TermsNotAgreed,
            AccountError::AccountDoesNotExist => EngineError::AccountDoesNotExist,
            AccountError::StoreError(e) => EngineError::StoreError(e),
            other => EngineError::Internal(other.to_string()),
        }
    }
}

impl From<SignatureError> for EngineError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::UnsupportedAlgorithm(alg) => {
                EngineError::Malformed(format!("Unsupported signature algorithm: {}", alg))
            }
            other => EngineError::Internal(other.to_string()),
        }
    }
}

type Result<T> = std::result::Result<T, EngineError>;

/// 操作成功時的回應封裝：資源本體加上一枚新發的 nonce。
#[derive(Debug, Serialize)]
pub struct AcmeResult<T> {
    pub resource: T,
    pub nonce: String,
}

/// 帳號資源的線上表示。
#[derive(Debug, Clone, Serialize)]
pub struct AccountResource {
    pub kid: String,
    pub status: AccountStatus,
    pub contact: Vec<String>,
}

impl From<&Account> for AccountResource {
    fn from(account: &Account) -> Self {
        AccountResource {
            kid: account.kid.clone(),
            status: account.status,
            contact: account.contact.clone(),
        }
    }
}

/// 訂單資源的線上表示。
#[derive(Debug, Clone, Serialize)]
pub struct OrderResource {
    pub id: String,
    pub status: OrderStatus,
    pub expires: DateTime<Utc>,
    pub identifiers: Vec<IdentifierPayload>,
    pub authorizations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
}

/// 挑戰資源的線上表示。
#[derive(Debug, Clone, Serialize)]
pub struct ChallengeResource {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ChallengeKind,
    pub status: ChallengeStatus,
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated: Option<DateTime<Utc>>,
}

impl From<&Challenge> for ChallengeResource {
    fn from(challenge: &Challenge) -> Self {
        ChallengeResource {
            id: challenge.id.clone(),
            kind: challenge.kind,
            status: challenge.status,
            token: challenge.token.clone(),
            validated: challenge.validated,
        }
    }
}

/// 授權資源的線上表示。
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationResource {
    pub id: String,
    pub status: AuthorizationStatus,
    pub identifier: IdentifierPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    pub challenges: Vec<ChallengeResource>,
}

/// 證書資源的線上表示。
#[derive(Debug, Clone, Serialize)]
pub struct CertificateResource {
    pub id: String,
    pub full_chain_pem: String,
}

/// 已通過驗證的請求：解碼後的載荷與請求者身分。
struct VerifiedRequest {
    payload: Vec<u8>,
    kid: Option<String>,
    key: PKey<Public>,
}

/// 涉及訂單改寫的操作在提交衝突時的重試上限。
const COMMIT_ATTEMPTS: usize = 3;

/// 協議引擎。
///
/// 儲存後端、簽發者與挑戰驗證器皆以 trait 物件注入；
/// nonce 註冊表為引擎實例所私有。
pub struct Engine {
    store: Box<dyn Store>,
    nonces: Arc<NonceRegistry>,
    issuer: Box<dyn CertificateIssuer>,
    validator: Box<dyn ChallengeValidator>,
    challenge_kinds: Vec<ChallengeKind>,
}

/// `Engine` 的建構器，所有協作者皆可抽換，未指定者採用預設實作。
#[derive(Default)]
pub struct EngineBuilder {
    store: Option<Box<dyn Store>>,
    issuer: Option<Box<dyn CertificateIssuer>>,
    validator: Option<Box<dyn ChallengeValidator>>,
    challenge_kinds: Option<Vec<ChallengeKind>>,
}

impl EngineBuilder {
    /// 建立一個新的 `EngineBuilder` 實例。
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定儲存後端；預設為 [`MemStore`]。
    pub fn store(mut self, store: Box<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// 指定證書簽發者；預設為新生成根金鑰的 [`LocalIssuer`]。
    pub fn issuer(mut self, issuer: Box<dyn CertificateIssuer>) -> Self {
        self.issuer = Some(issuer);
        self
    }

    /// 指定挑戰驗證器；預設為 [`AcceptAllValidator`]。
    pub fn validator(mut self, validator: Box<dyn ChallengeValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// 指定啟用的挑戰種類；預設為 `http-01` 與 `dns-01`。
    pub fn challenge_kinds(mut self, kinds: Vec<ChallengeKind>) -> Self {
        self.challenge_kinds = Some(kinds);
        self
    }

    /// 組裝出 `Engine` 實例。
    ///
    /// # 錯誤
    ///
    /// 未指定簽發者且預設根金鑰生成失敗時回傳
    /// [`EngineError::IssuerError`]。
    pub fn build(self) -> Result<Engine> {
        let issuer = match self.issuer {
            Some(issuer) => issuer,
            None => Box::new(LocalIssuer::generate("sacme local root")?),
        };
        Ok(Engine {
            store: self.store.unwrap_or_else(|| Box::new(MemStore::new())),
            nonces: Arc::new(NonceRegistry::new()),
            issuer,
            validator: self
                .validator
                .unwrap_or_else(|| Box::new(AcceptAllValidator)),
            challenge_kinds: self
                .challenge_kinds
                .unwrap_or_else(|| vec![ChallengeKind::Http01, ChallengeKind::Dns01]),
        })
    }
}

impl Engine {
    /// 發放一枚新的 nonce，供客戶端的下一個請求使用。
    pub fn new_nonce(&self) -> Result<String> {
        Ok(self.nonces.issue()?)
    }

    /// 發放附加於回應上的 nonce。錯誤回應的邊界層也應呼叫此方法，
    /// 使每個回應都帶有新 nonce。
    pub fn fresh_nonce(&self) -> Result<String> {
        Ok(self.nonces.issue()?)
    }

    /// 驗證一個入站請求信封。
    ///
    /// 步驟依序為：結構解析、nonce 消耗（恰一次，失敗不退還）、
    /// `jwk` / `kid` 互斥檢查、金鑰解析、簽章驗證。
    fn authenticate(&self, txn: &dyn StoreTxn, raw: &str) -> Result<VerifiedRequest> {
        let envelope = Envelope::from_json(raw)?;
        let header = envelope.header()?;

        self.nonces.consume(&header.nonce)?;

        let (key, kid) = match (&header.jwk, &header.kid) {
            (Some(jwk), None) => {
                let key = jwk
                    .to_public_key()
                    .map_err(|e| EngineError::BadPublicKey(e.to_string()))?;
                (key, None)
            }
            (None, Some(kid_url)) => {
                // kid 可能以 URL 形式出現，取最後一段作為識別碼
                let kid = kid_url
                    .rsplit('/')
                    .next()
                    .unwrap_or(kid_url.as_str())
                    .to_string();
                let account = txn
                    .account(&kid)?
                    .filter(Account::is_valid)
                    .ok_or(EngineError::Unauthorized)?;
                let key = account
                    .public_key()
                    .map_err(|e| EngineError::Internal(e.to_string()))?;
                (key, Some(kid))
            }
            _ => {
                return Err(EngineError::Malformed(
                    "Exactly one of jwk and kid must be present".to_string(),
                ))
            }
        };

        let signature = envelope.signature_bytes()?;
        let verified = verify_signature(
            &envelope.protected,
            &envelope.payload,
            &signature,
            &key,
            &header.alg,
        )?;
        if !verified {
            return Err(EngineError::BadSignature);
        }

        tracing::debug!(kid = ?kid, url = %header.url, "request authenticated");
        Ok(VerifiedRequest {
            payload: envelope.payload_bytes()?,
            kid,
            key,
        })
    }

    /// 建立新帳號（內嵌 jwk 路徑）。
    ///
    /// 同一把金鑰重複註冊為冪等操作；`onlyReturnExisting` 置真時
    /// 僅查詢，查無帳號回傳 [`EngineError::AccountDoesNotExist`]。
    pub fn new_account(&self, raw: &str) -> Result<AcmeResult<AccountResource>> {
        let mut txn = self.store.begin();
        let verified = self.authenticate(txn.as_ref(), raw)?;
        if verified.kid.is_some() {
            return Err(EngineError::Malformed(
                "newAccount requires an embedded jwk".to_string(),
            ));
        }

        let payload = NewAccountPayload::from_bytes(&verified.payload)?;
        let account = if payload.only_return_existing {
            AccountDirectory::find_by_key(txn.as_ref(), &verified.key)?
                .filter(Account::is_valid)
                .ok_or(EngineError::AccountDoesNotExist)?
        } else {
            AccountDirectory::register(
                txn.as_mut(),
                &verified.key,
                payload.contact,
                payload.terms_of_service_agreed,
            )?
        };

        let resource = AccountResource::from(&account);
        txn.commit()?;
        self.respond(resource)
    }

    /// 更新既有帳號（kid 路徑）：聯絡資訊更新或帳號停用。
    pub fn update_account(&self, raw: &str) -> Result<AcmeResult<AccountResource>> {
        let mut txn = self.store.begin();
        let verified = self.authenticate(txn.as_ref(), raw)?;
        let kid = Self::require_kid(&verified)?;

        let payload = UpdateAccountPayload::from_bytes(&verified.payload)?;
        let account = if payload.status.as_deref() == Some("deactivated") {
            AccountDirectory::deactivate(txn.as_mut(), &kid)?
        } else if let Some(contact) = payload.contact {
            AccountDirectory::update_contact(txn.as_mut(), &kid, contact)?
        } else {
            AccountDirectory::find_by_kid(txn.as_ref(), &kid)?
                .ok_or(EngineError::AccountDoesNotExist)?
        };

        let resource = AccountResource::from(&account);
        txn.commit()?;
        self.respond(resource)
    }

    /// 建立新訂單（kid 路徑）。
    ///
    /// 每個請求的域名產生識別項、授權與啟用種類各一的挑戰，
    /// 全部子實體與訂單在同一交易內寫入。
    pub fn new_order(&self, raw: &str) -> Result<AcmeResult<OrderResource>> {
        let mut txn = self.store.begin();
        let verified = self.authenticate(txn.as_ref(), raw)?;
        let kid = Self::require_kid(&verified)?;

        let payload = NewOrderPayload::from_bytes(&verified.payload)?;
        let mut graph = Order::from_obj(&kid, &payload, &self.challenge_kinds, Utc::now());
        graph.order.not_before = parse_opt_time(&payload.not_before)?;
        graph.order.not_after = parse_opt_time(&payload.not_after)?;

        txn.put_order(graph.order.clone())?;
        for identifier in graph.identifiers {
            txn.put_identifier(identifier)?;
        }
        for authorization in graph.authorizations {
            txn.put_authorization(authorization)?;
        }
        for challenge in graph.challenges {
            txn.put_challenge(challenge)?;
        }

        let resource = self.order_resource(txn.as_ref(), &graph.order)?;
        txn.commit()?;
        self.respond(resource)
    }

    /// 讀取訂單（kid 路徑）。讀取前先全量重算訂單狀態，
    /// 逾期與授權結果即時反映。
    pub fn get_order(&self, raw: &str, order_id: &str) -> Result<AcmeResult<OrderResource>> {
        let auth_txn = self.store.begin();
        let verified = self.authenticate(auth_txn.as_ref(), raw)?;
        drop(auth_txn);
        let kid = Self::require_kid(&verified)?;

        for _ in 0..COMMIT_ATTEMPTS {
            let mut txn = self.store.begin();
            let mut order = self.order_for(txn.as_ref(), &kid, order_id)?;
            let authorizations = self.authorizations_of_order(txn.as_ref(), &order.id)?;
            order.validate(&authorizations, Utc::now());
            txn.put_order(order.clone())?;

            let resource = self.order_resource(txn.as_ref(), &order)?;
            match txn.commit() {
                Ok(()) => return self.respond(resource),
                Err(StoreError::Conflict) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(EngineError::StoreError(StoreError::Conflict))
    }

    /// 最終化訂單（kid 路徑）。
    ///
    /// 先重算訂單狀態；非 `ready` 一律回傳
    /// [`EngineError::OrderNotReady`]，這同時涵蓋了重複最終化。
    /// CSR 的名稱集合必須與訂單識別項完全一致（不區分大小寫）。
    ///
    /// 提交帶有樂觀衝突檢查：同一張訂單的並發最終化至多一方
    /// 提交成功，敗方重試後在 ready 閘門被擋下。
    pub fn finalize_order(
        &self,
        raw: &str,
        order_id: &str,
    ) -> Result<AcmeResult<OrderResource>> {
        let auth_txn = self.store.begin();
        let verified = self.authenticate(auth_txn.as_ref(), raw)?;
        drop(auth_txn);
        let kid = Self::require_kid(&verified)?;

        let payload = FinalizeOrderPayload::from_bytes(&verified.payload)?;
        let csr_der = payload.csr_der()?;

        for _ in 0..COMMIT_ATTEMPTS {
            let mut txn = self.store.begin();
            let mut order = self.order_for(txn.as_ref(), &kid, order_id)?;
            let authorizations = self.authorizations_of_order(txn.as_ref(), &order.id)?;
            order.validate(&authorizations, Utc::now());
            if order.status != OrderStatus::Ready {
                return Err(EngineError::OrderNotReady);
            }

            let csr_names =
                csr::names_of(&csr_der).map_err(|e| EngineError::Malformed(e.to_string()))?;
            let order_names: HashSet<String> = txn
                .identifiers_of_order(&order.id)?
                .iter()
                .map(|identifier| identifier.value.to_ascii_lowercase())
                .collect();
            if csr_names != order_names {
                tracing::info!(order_id = %order.id, "CSR name set rejected");
                return Err(EngineError::CsrMismatch);
            }

            order.csr_der = Some(csr_der.clone());
            order.status = OrderStatus::Processing;
            txn.put_order(order.clone())?;

            match self.issuer.issue(&csr_der) {
                Ok(full_chain_pem) => {
                    let certificate = Certificate::new(&order.id, &kid, full_chain_pem);
                    order.certificate_id = Some(certificate.id.clone());
                    order.status = OrderStatus::Valid;
                    txn.put_certificate(certificate)?;
                    txn.put_order(order.clone())?;
                }
                Err(err) => {
                    tracing::warn!(order_id = %order.id, error = %err, "issuance failed");
                    order.status = OrderStatus::Invalid;
                    txn.put_order(order.clone())?;
                    match txn.commit() {
                        Ok(()) => return Err(EngineError::IssuerError(err)),
                        Err(StoreError::Conflict) => continue,
                        Err(commit_err) => return Err(commit_err.into()),
                    }
                }
            }

            let resource = self.order_resource(txn.as_ref(), &order)?;
            match txn.commit() {
                Ok(()) => return self.respond(resource),
                Err(StoreError::Conflict) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(EngineError::StoreError(StoreError::Conflict))
    }

    /// 讀取授權（kid 路徑）。讀取前先依挑戰狀態重算授權。
    pub fn get_authorization(
        &self,
        raw: &str,
        authorization_id: &str,
    ) -> Result<AcmeResult<AuthorizationResource>> {
        let mut txn = self.store.begin();
        let verified = self.authenticate(txn.as_ref(), raw)?;
        let kid = Self::require_kid(&verified)?;

        let (mut authorization, _order) =
            self.authorization_for(txn.as_ref(), &kid, authorization_id)?;
        let challenges = txn.challenges_of_authorization(&authorization.id)?;
        authorization.finalize(&challenges, Utc::now());
        txn.put_authorization(authorization.clone())?;

        let resource = self.authorization_resource(txn.as_ref(), &authorization)?;
        txn.commit()?;
        self.respond(resource)
    }

    /// 讀取並驅動挑戰（kid 路徑）。
    ///
    /// 非終態的挑戰會交由驗證器執行一次嘗試，結果記錄後向上
    /// 連鎖：重算所屬授權，再全量重算所屬訂單。
    pub fn get_challenge(
        &self,
        raw: &str,
        challenge_id: &str,
    ) -> Result<AcmeResult<ChallengeResource>> {
        let auth_txn = self.store.begin();
        let verified = self.authenticate(auth_txn.as_ref(), raw)?;
        drop(auth_txn);
        let kid = Self::require_kid(&verified)?;

        for _ in 0..COMMIT_ATTEMPTS {
            let mut txn = self.store.begin();
            let (mut challenge, mut authorization, mut order) =
                self.challenge_for(txn.as_ref(), &kid, challenge_id)?;

            if !challenge.status.is_terminal() {
                let now = Utc::now();
                match self.validator.attempt(&challenge) {
                    ChallengeOutcome::Valid => challenge.validate(now),
                    ChallengeOutcome::Invalid => challenge.fail(),
                };
                txn.put_challenge(challenge.clone())?;

                let siblings = txn.challenges_of_authorization(&authorization.id)?;
                authorization.finalize(&siblings, now);
                txn.put_authorization(authorization.clone())?;

                let authorizations = self.authorizations_of_order(txn.as_ref(), &order.id)?;
                order.validate(&authorizations, now);
                txn.put_order(order)?;
            }

            let resource = ChallengeResource::from(&challenge);
            match txn.commit() {
                Ok(()) => return self.respond(resource),
                Err(StoreError::Conflict) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(EngineError::StoreError(StoreError::Conflict))
    }

    /// 下載證書（kid 路徑）。
    pub fn get_certificate(
        &self,
        raw: &str,
        certificate_id: &str,
    ) -> Result<AcmeResult<CertificateResource>> {
        let txn = self.store.begin();
        let verified = self.authenticate(txn.as_ref(), raw)?;
        let kid = Self::require_kid(&verified)?;

        let certificate = txn
            .certificate(certificate_id)?
            .filter(|c| c.account_kid == kid)
            .ok_or_else(|| EngineError::NotFound(certificate_id.to_string()))?;

        let resource = CertificateResource {
            id: certificate.id,
            full_chain_pem: certificate.full_chain_pem,
        };
        txn.commit()?;
        self.respond(resource)
    }

    /// 撤銷證書。契約已定義，撤銷演算法尚未實作。
    pub fn revoke_cert(&self, raw: &str) -> Result<AcmeResult<()>> {
        let txn = self.store.begin();
        self.authenticate(txn.as_ref(), raw)?;
        Err(EngineError::Unimplemented("revokeCert".to_string()))
    }

    fn respond<T>(&self, resource: T) -> Result<AcmeResult<T>> {
        Ok(AcmeResult {
            resource,
            nonce: self.fresh_nonce()?,
        })
    }

    fn require_kid(verified: &VerifiedRequest) -> Result<String> {
        verified.kid.clone().ok_or_else(|| {
            EngineError::Malformed("Account key identifier (kid) required".to_string())
        })
    }

    /// 以 kid 為範圍查詢訂單；跨帳號的存取一律視為不存在。
    fn order_for(&self, txn: &dyn StoreTxn, kid: &str, order_id: &str) -> Result<Order> {
        txn.order(order_id)?
            .filter(|order| order.account_kid == kid)
            .ok_or_else(|| EngineError::NotFound(order_id.to_string()))
    }

    /// 以 kid 為範圍查詢授權，連同其所屬訂單。
    fn authorization_for(
        &self,
        txn: &dyn StoreTxn,
        kid: &str,
        authorization_id: &str,
    ) -> Result<(Authorization, Order)> {
        let not_found = || EngineError::NotFound(authorization_id.to_string());
        let authorization = txn.authorization(authorization_id)?.ok_or_else(not_found)?;
        let identifier = txn
            .identifier(&authorization.identifier_id)?
            .ok_or_else(not_found)?;
        let order = txn
            .order(&identifier.order_id)?
            .filter(|order| order.account_kid == kid)
            .ok_or_else(not_found)?;
        Ok((authorization, order))
    }

    /// 以 kid 為範圍查詢挑戰，連同其所屬授權與訂單。
    fn challenge_for(
        &self,
        txn: &dyn StoreTxn,
        kid: &str,
        challenge_id: &str,
    ) -> Result<(Challenge, Authorization, Order)> {
        let challenge = txn
            .challenge(challenge_id)?
            .ok_or_else(|| EngineError::NotFound(challenge_id.to_string()))?;
        let (authorization, order) =
            match self.authorization_for(txn, kid, &challenge.authorization_id) {
                Ok(pair) => pair,
                // 斷鏈以挑戰自身的識別碼回報，其餘錯誤原樣上拋
                Err(EngineError::NotFound(_)) => {
                    return Err(EngineError::NotFound(challenge_id.to_string()))
                }
                Err(err) => return Err(err),
            };
        Ok((challenge, authorization, order))
    }

    /// 收集訂單全部識別項所屬的授權。
    fn authorizations_of_order(
        &self,
        txn: &dyn StoreTxn,
        order_id: &str,
    ) -> Result<Vec<Authorization>> {
        let mut authorizations = Vec::new();
        for identifier in txn.identifiers_of_order(order_id)? {
            if let Some(authorization) = txn.authorization_of_identifier(&identifier.id)? {
                authorizations.push(authorization);
            }
        }
        Ok(authorizations)
    }

    fn order_resource(&self, txn: &dyn StoreTxn, order: &Order) -> Result<OrderResource> {
        let identifiers = txn.identifiers_of_order(&order.id)?;
        let mut authorization_ids = Vec::with_capacity(identifiers.len());
        for identifier in &identifiers {
            if let Some(authorization) = txn.authorization_of_identifier(&identifier.id)? {
                authorization_ids.push(authorization.id);
            }
        }
        Ok(OrderResource {
            id: order.id.clone(),
            status: order.status,
            expires: order.expires,
            identifiers: identifiers
                .into_iter()
                .map(|identifier| IdentifierPayload {
                    type_: identifier.kind,
                    value: identifier.value,
                })
                .collect(),
            authorizations: authorization_ids,
            certificate: order.certificate_id.clone(),
        })
    }

    fn authorization_resource(
        &self,
        txn: &dyn StoreTxn,
        authorization: &Authorization,
    ) -> Result<AuthorizationResource> {
        let identifier = txn
            .identifier(&authorization.identifier_id)?
            .ok_or_else(|| EngineError::NotFound(authorization.identifier_id.clone()))?;
        let challenges = txn
            .challenges_of_authorization(&authorization.id)?
            .iter()
            .map(ChallengeResource::from)
            .collect();
        Ok(AuthorizationResource {
            id: authorization.id.clone(),
            status: authorization.status,
            identifier: IdentifierPayload {
                type_: identifier.kind,
                value: identifier.value,
            },
            expires: authorization.expires,
            challenges,
        })
    }
}

/// 解析選填的 RFC 3339 時間字串。
fn parse_opt_time(value: &Option<String>) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| EngineError::Malformed(format!("Invalid timestamp: {}", e))),
        None => Ok(None),
    }
}
