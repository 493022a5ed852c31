//! 此模組定義持久化契約與其記憶體實作。
//!
//! 所有讀寫皆透過交易進行：交易開啟時取得已提交狀態的快照視圖，
//! 寫入先暫存於交易內部，提交時一次套用（全有或全無）；
//! 未提交即丟棄的交易不留任何痕跡。

use std::{
    cell::RefCell,
    collections::HashMap,
    sync::{Arc, RwLock},
};

use thiserror::Error;

use crate::{
    account::Account,
    authorization::Authorization,
    certificate::Certificate,
    challenge::Challenge,
    order::{Identifier, Order},
};

/// 儲存操作可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Lock poisoned")]
    LockPoisoned,
    #[error("Serialization conflict")]
    Conflict,
}

/// 儲存操作的結果類型，封裝 [`StoreError`]。
pub type Result<T> = std::result::Result<T, StoreError>;

/// 定義儲存後端所需實現的 API。
pub trait Store: Send + Sync {
    /// 開啟一筆新交易。
    fn begin(&self) -> Box<dyn StoreTxn + '_>;
}

/// 定義單筆交易所需實現的 API。
///
/// 讀取一律先查暫存寫入，再回落到已提交狀態；`put_*` 僅暫存，
/// 直到 [`StoreTxn::commit`] 才生效。
pub trait StoreTxn {
    fn account(&self, kid: &str) -> Result<Option<Account>>;
    fn put_account(&mut self, account: Account) -> Result<()>;

    fn order(&self, id: &str) -> Result<Option<Order>>;
    fn put_order(&mut self, order: Order) -> Result<()>;

    fn identifier(&self, id: &str) -> Result<Option<Identifier>>;
    /// 列出指定訂單底下的全部識別項。
    fn identifiers_of_order(&self, order_id: &str) -> Result<Vec<Identifier>>;
    fn put_identifier(&mut self, identifier: Identifier) -> Result<()>;

    fn authorization(&self, id: &str) -> Result<Option<Authorization>>;
    /// 取得指定識別項所擁有的授權。
    fn authorization_of_identifier(&self, identifier_id: &str) -> Result<Option<Authorization>>;
    fn put_authorization(&mut self, authorization: Authorization) -> Result<()>;

    fn challenge(&self, id: &str) -> Result<Option<Challenge>>;
    /// 列出指定授權底下的全部挑戰。
    fn challenges_of_authorization(&self, authorization_id: &str) -> Result<Vec<Challenge>>;
    fn put_challenge(&mut self, challenge: Challenge) -> Result<()>;

    fn certificate(&self, id: &str) -> Result<Option<Certificate>>;
    fn put_certificate(&mut self, certificate: Certificate) -> Result<()>;

    /// 將全部暫存寫入一次套用至後端。
    ///
    /// 訂單列帶有樂觀版本戳：若此交易讀取過的訂單在提交前已被
    /// 另一筆交易改寫，回傳 [`StoreError::Conflict`]，且不套用
    /// 任何暫存寫入。
    fn commit(self: Box<Self>) -> Result<()>;
}

/// 各實體的資料表。
#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<String, Account>,
    orders: HashMap<String, Order>,
    identifiers: HashMap<String, Identifier>,
    authorizations: HashMap<String, Authorization>,
    challenges: HashMap<String, Challenge>,
    certificates: HashMap<String, Certificate>,
    /// 訂單列的版本戳，每次提交改寫時遞增；僅已提交端使用。
    order_versions: HashMap<String, u64>,
}

/// 基於記憶體的儲存實作，所有資料表保存在同一把讀寫鎖之下。
#[derive(Debug, Default)]
pub struct MemStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemStore {
    /// 建立一個空的記憶體儲存實例。
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemStore {
    fn begin(&self) -> Box<dyn StoreTxn + '_> {
        Box::new(MemTxn {
            committed: &self.tables,
            staged: Tables::default(),
            order_reads: RefCell::new(HashMap::new()),
        })
    }
}

/// 記憶體儲存的交易實作，暫存寫入保存在交易自身的資料表中。
struct MemTxn<'a> {
    committed: &'a Arc<RwLock<Tables>>,
    staged: Tables,
    /// 本交易首次讀取各訂單時所見的版本戳，供提交時比對。
    order_reads: RefCell<HashMap<String, u64>>,
}

impl MemTxn<'_> {
    /// 先查暫存、再查已提交狀態的單鍵讀取。
    fn read<T, F>(&self, select: F, id: &str) -> Result<Option<T>>
    where
        T: Clone,
        F: Fn(&Tables) -> &HashMap<String, T>,
    {
        if let Some(staged) = select(&self.staged).get(id) {
            return Ok(Some(staged.clone()));
        }
        let committed = self.committed.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(select(&committed).get(id).cloned())
    }

    /// 合併已提交與暫存資料表的篩選讀取，暫存版本優先。
    fn scan<T, F, P>(&self, select: F, matches: P) -> Result<Vec<T>>
    where
        T: Clone,
        F: Fn(&Tables) -> &HashMap<String, T>,
        P: Fn(&T) -> bool,
    {
        let mut merged: HashMap<String, T> = {
            let committed = self.committed.read().map_err(|_| StoreError::LockPoisoned)?;
            select(&committed)
                .iter()
                .filter(|(_, value)| matches(value))
                .map(|(id, value)| (id.clone(), value.clone()))
                .collect()
        };
        for (id, value) in select(&self.staged) {
            if matches(value) {
                merged.insert(id.clone(), value.clone());
            } else {
                merged.remove(id);
            }
        }
        Ok(merged.into_values().collect())
    }
}

impl StoreTxn for MemTxn<'_> {
    fn account(&self, kid: &str) -> Result<Option<Account>> {
        self.read(|t| &t.accounts, kid)
    }

    fn put_account(&mut self, account: Account) -> Result<()> {
        self.staged.accounts.insert(account.kid.clone(), account);
        Ok(())
    }

    fn order(&self, id: &str) -> Result<Option<Order>> {
        let committed = self.committed.read().map_err(|_| StoreError::LockPoisoned)?;
        self.order_reads
            .borrow_mut()
            .entry(id.to_string())
            .or_insert_with(|| committed.order_versions.get(id).copied().unwrap_or(0));
        if let Some(staged) = self.staged.orders.get(id) {
            return Ok(Some(staged.clone()));
        }
        Ok(committed.orders.get(id).cloned())
    }

    fn put_order(&mut self, order: Order) -> Result<()> {
        self.staged.orders.insert(order.id.clone(), order);
        Ok(())
    }

    fn identifier(&self, id: &str) -> Result<Option<Identifier>> {
        self.read(|t| &t.identifiers, id)
    }

    fn identifiers_of_order(&self, order_id: &str) -> Result<Vec<Identifier>> {
        self.scan(|t| &t.identifiers, |i| i.order_id == order_id)
    }

    fn put_identifier(&mut self, identifier: Identifier) -> Result<()> {
        self.staged
            .identifiers
            .insert(identifier.id.clone(), identifier);
        Ok(())
    }

    fn authorization(&self, id: &str) -> Result<Option<Authorization>> {
        self.read(|t| &t.authorizations, id)
    }

    fn authorization_of_identifier(&self, identifier_id: &str) -> Result<Option<Authorization>> {
        Ok(self
            .scan(|t| &t.authorizations, |a| a.identifier_id == identifier_id)?
            .into_iter()
            .next())
    }

    fn put_authorization(&mut self, authorization: Authorization) -> Result<()> {
        self.staged
            .authorizations
            .insert(authorization.id.clone(), authorization);
        Ok(())
    }

    fn challenge(&self, id: &str) -> Result<Option<Challenge>> {
        self.read(|t| &t.challenges, id)
    }

    fn challenges_of_authorization(&self, authorization_id: &str) -> Result<Vec<Challenge>> {
        self.scan(|t| &t.challenges, |c| c.authorization_id == authorization_id)
    }

    fn put_challenge(&mut self, challenge: Challenge) -> Result<()> {
        self.staged
            .challenges
            .insert(challenge.id.clone(), challenge);
        Ok(())
    }

    fn certificate(&self, id: &str) -> Result<Option<Certificate>> {
        self.read(|t| &t.certificates, id)
    }

    fn put_certificate(&mut self, certificate: Certificate) -> Result<()> {
        self.staged
            .certificates
            .insert(certificate.id.clone(), certificate);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let MemTxn {
            committed,
            staged,
            order_reads,
        } = *self;
        let mut committed = committed.write().map_err(|_| StoreError::LockPoisoned)?;

        // 讀過又改寫的訂單列：已提交版本必須仍是讀取當下的版本
        let order_reads = order_reads.into_inner();
        for id in staged.orders.keys() {
            if let Some(&seen) = order_reads.get(id) {
                let current = committed.order_versions.get(id).copied().unwrap_or(0);
                if current != seen {
                    return Err(StoreError::Conflict);
                }
            }
        }
        for id in staged.orders.keys() {
            *committed.order_versions.entry(id.clone()).or_insert(0) += 1;
        }

        committed.accounts.extend(staged.accounts);
        committed.orders.extend(staged.orders);
        committed.identifiers.extend(staged.identifiers);
        committed.authorizations.extend(staged.authorizations);
        committed.challenges.extend(staged.challenges);
        committed.certificates.extend(staged.certificates);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        challenge::ChallengeKind,
        order::OrderStatus,
        payload::{IdentifierPayload, NewOrderPayload},
    };
    use chrono::Utc;

    fn sample_graph(kid: &str) -> crate::order::OrderGraph {
        let payload = NewOrderPayload {
            identifiers: vec![IdentifierPayload {
                type_: "dns".to_string(),
                value: "example.org".to_string(),
            }],
            not_before: None,
            not_after: None,
        };
        Order::from_obj(kid, &payload, &[ChallengeKind::Http01], Utc::now())
    }

    fn stage_graph(txn: &mut dyn StoreTxn, graph: &crate::order::OrderGraph) {
        txn.put_order(graph.order.clone()).unwrap();
        for identifier in &graph.identifiers {
            txn.put_identifier(identifier.clone()).unwrap();
        }
        for authorization in &graph.authorizations {
            txn.put_authorization(authorization.clone()).unwrap();
        }
        for challenge in &graph.challenges {
            txn.put_challenge(challenge.clone()).unwrap();
        }
    }

    #[test]
    fn test_staged_writes_visible_inside_txn() {
        let store = MemStore::new();
        let graph = sample_graph("kid-1");

        let mut txn = store.begin();
        stage_graph(txn.as_mut(), &graph);

        assert!(txn.order(&graph.order.id).unwrap().is_some());
        assert_eq!(
            txn.identifiers_of_order(&graph.order.id).unwrap().len(),
            1
        );
        assert_eq!(
            txn.challenges_of_authorization(&graph.authorizations[0].id)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_dropped_txn_rolls_back() {
        let store = MemStore::new();
        let graph = sample_graph("kid-1");

        {
            let mut txn = store.begin();
            stage_graph(txn.as_mut(), &graph);
            // 未呼叫 commit，離開作用域即回滾
        }

        let txn = store.begin();
        assert!(txn.order(&graph.order.id).unwrap().is_none());
        assert!(txn
            .identifiers_of_order(&graph.order.id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_commit_applies_all_writes() {
        let store = MemStore::new();
        let graph = sample_graph("kid-1");

        let mut txn = store.begin();
        stage_graph(txn.as_mut(), &graph);
        txn.commit().unwrap();

        let txn = store.begin();
        assert_eq!(
            txn.order(&graph.order.id).unwrap().unwrap().status,
            OrderStatus::Pending
        );
        assert!(txn
            .authorization_of_identifier(&graph.identifiers[0].id)
            .unwrap()
            .is_some());
        assert_eq!(
            txn.challenges_of_authorization(&graph.authorizations[0].id)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_staged_version_shadows_committed() {
        let store = MemStore::new();
        let graph = sample_graph("kid-1");

        let mut txn = store.begin();
        stage_graph(txn.as_mut(), &graph);
        txn.commit().unwrap();

        let mut txn = store.begin();
        let mut order = txn.order(&graph.order.id).unwrap().unwrap();
        order.status = OrderStatus::Ready;
        txn.put_order(order).unwrap();

        assert_eq!(
            txn.order(&graph.order.id).unwrap().unwrap().status,
            OrderStatus::Ready
        );
        // 尚未提交，其他交易仍看到舊狀態
        let other = store.begin();
        assert_eq!(
            other.order(&graph.order.id).unwrap().unwrap().status,
            OrderStatus::Pending
        );
    }

    #[test]
    fn test_stale_order_write_conflicts_on_commit() {
        let store = MemStore::new();
        let graph = sample_graph("kid-1");
        let mut txn = store.begin();
        stage_graph(txn.as_mut(), &graph);
        txn.commit().unwrap();

        let mut first = store.begin();
        let mut second = store.begin();

        let mut order = first.order(&graph.order.id).unwrap().unwrap();
        order.status = OrderStatus::Ready;
        first.put_order(order).unwrap();

        let mut stale = second.order(&graph.order.id).unwrap().unwrap();
        stale.status = OrderStatus::Invalid;
        second.put_order(stale).unwrap();

        first.commit().unwrap();
        assert!(matches!(second.commit(), Err(StoreError::Conflict)));

        // 敗方的全部暫存寫入皆未落地
        let txn = store.begin();
        assert_eq!(
            txn.order(&graph.order.id).unwrap().unwrap().status,
            OrderStatus::Ready
        );
    }

    #[test]
    fn test_fresh_order_insert_does_not_conflict() {
        let store = MemStore::new();

        let mut first = store.begin();
        stage_graph(first.as_mut(), &sample_graph("kid-1"));
        let mut second = store.begin();
        stage_graph(second.as_mut(), &sample_graph("kid-2"));

        first.commit().unwrap();
        second.commit().unwrap();
    }
}
