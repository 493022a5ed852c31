//! 此模組定義帳號（Account）實體與帳號目錄。
//!
//! 帳號以其公鑰的 SHA-256 十六進位摘要作為金鑰識別碼（kid），
//! 因此每把金鑰至多對應一個帳號，重複註冊自然冪等。

use std::fmt::Write;

use chrono::{DateTime, Utc};
use openssl::{
    hash::{hash, MessageDigest},
    pkey::{PKey, Public},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{StoreError, StoreTxn};

/// 用於描述帳號操作過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum AccountError {
    /// 當使用者未同意服務條款時回傳此錯誤，不會建立帳號。
    #[error("Terms of service must be agreed")]
    TermsNotAgreed,
    /// 當指定的帳號不存在時回傳此錯誤。
    #[error("Account does not exist")]
    AccountDoesNotExist,
    #[error("Openssl error: {0}")]
    OpensslError(#[from] openssl::error::ErrorStack),
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
}

type Result<T> = std::result::Result<T, AccountError>;

/// 帳號的狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Valid,
    Deactivated,
    Revoked,
}

/// 表示一個帳號實體。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// 金鑰識別碼，即帳號公鑰 DER 編碼的 SHA-256 十六進位摘要。
    pub kid: String,
    /// 帳號公鑰的 PEM 編碼，後續請求的簽章皆以此驗證。
    pub key_pem: String,
    /// 目前狀態。
    pub status: AccountStatus,
    /// 聯絡資訊。
    pub contact: Vec<String>,
    /// 使用者是否同意服務條款。
    pub terms_of_service_agreed: bool,
    /// 建立時間。
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// 判斷帳號目前是否可用。
    pub fn is_valid(&self) -> bool {
        self.status == AccountStatus::Valid
    }

    /// 載入帳號的公鑰。
    pub fn public_key(&self) -> Result<PKey<Public>> {
        Ok(PKey::public_key_from_pem(self.key_pem.as_bytes())?)
    }
}

/// 帳號目錄，提供以公鑰或 kid 為索引的查詢與註冊操作。
///
/// 所有操作皆以交易為單位，寫入在交易提交前不會生效。
pub struct AccountDirectory;

impl AccountDirectory {
    /// 計算指定公鑰的金鑰識別碼。
    pub fn kid_for(key: &PKey<Public>) -> Result<String> {
        let digest = hash(MessageDigest::sha256(), &key.public_key_to_der()?)?;
        let mut kid = String::with_capacity(digest.len() * 2);
        for byte in digest.iter() {
            // digest 固定長度，寫入 String 不會失敗
            let _ = write!(kid, "{:02x}", byte);
        }
        Ok(kid)
    }

    /// 以 kid 查詢帳號。
    pub fn find_by_kid(txn: &dyn StoreTxn, kid: &str) -> Result<Option<Account>> {
        Ok(txn.account(kid)?)
    }

    /// 以公鑰查詢帳號。
    pub fn find_by_key(txn: &dyn StoreTxn, key: &PKey<Public>) -> Result<Option<Account>> {
        let kid = Self::kid_for(key)?;
        Ok(txn.account(&kid)?)
    }

    /// 註冊一個新帳號；同一把金鑰重複註冊時回傳既有帳號。
    ///
    /// # 錯誤
    ///
    /// 未同意服務條款時回傳 [`AccountError::TermsNotAgreed`]，
    /// 不會建立任何帳號。
    pub fn register(
        txn: &mut dyn StoreTxn,
        key: &PKey<Public>,
        contact: Vec<String>,
        terms_agreed: bool,
    ) -> Result<Account> {
        if !terms_agreed {
            return Err(AccountError::TermsNotAgreed);
        }

        let kid = Self::kid_for(key)?;
        if let Some(existing) = txn.account(&kid)? {
            tracing::debug!(%kid, "duplicate registration, returning existing account");
            return Ok(existing);
        }

        let account = Account {
            kid: kid.clone(),
            key_pem: String::from_utf8_lossy(&key.public_key_to_pem()?).into_owned(),
            status: AccountStatus::Valid,
            contact,
            terms_of_service_agreed: true,
            created_at: Utc::now(),
        };
        txn.put_account(account.clone())?;
        tracing::info!(%kid, "account registered");
        Ok(account)
    }

    /// 更新既有帳號的聯絡資訊。
    ///
    /// # 錯誤
    ///
    /// 帳號不存在時回傳 [`AccountError::AccountDoesNotExist`]。
    pub fn update_contact(
        txn: &mut dyn StoreTxn,
        kid: &str,
        contact: Vec<String>,
    ) -> Result<Account> {
        let mut account = txn
            .account(kid)?
            .ok_or(AccountError::AccountDoesNotExist)?;
        account.contact = contact;
        txn.put_account(account.clone())?;
        Ok(account)
    }

    /// 停用既有帳號。
    ///
    /// # 錯誤
    ///
    /// 帳號不存在時回傳 [`AccountError::AccountDoesNotExist`]。
    pub fn deactivate(txn: &mut dyn StoreTxn, kid: &str) -> Result<Account> {
        let mut account = txn
            .account(kid)?
            .ok_or(AccountError::AccountDoesNotExist)?;
        account.status = AccountStatus::Deactivated;
        txn.put_account(account.clone())?;
        tracing::info!(%kid, "account deactivated");
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{key_pair::KeyPair, store::MemStore, store::Store};

    fn public_key() -> PKey<Public> {
        KeyPair::generate(Some(2048)).unwrap().pub_key
    }

    #[test]
    fn test_kid_is_stable_hex_digest() {
        let key = public_key();
        let kid1 = AccountDirectory::kid_for(&key).unwrap();
        let kid2 = AccountDirectory::kid_for(&key).unwrap();
        assert_eq!(kid1, kid2);
        assert_eq!(kid1.len(), 64);
        assert!(kid1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_register_requires_terms() {
        let store = MemStore::new();
        let mut txn = store.begin();
        let result =
            AccountDirectory::register(txn.as_mut(), &public_key(), vec![], false);
        assert!(matches!(result, Err(AccountError::TermsNotAgreed)));
    }

    #[test]
    fn test_register_is_idempotent_per_key() {
        let store = MemStore::new();
        let mut txn = store.begin();
        let key = public_key();

        let first = AccountDirectory::register(
            txn.as_mut(),
            &key,
            vec!["mailto:admin@example.org".to_string()],
            true,
        )
        .unwrap();
        let second = AccountDirectory::register(txn.as_mut(), &key, vec![], true).unwrap();

        assert_eq!(first.kid, second.kid);
        assert_eq!(second.contact, vec!["mailto:admin@example.org".to_string()]);
    }

    #[test]
    fn test_concurrent_registration_converges_to_one_account() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(MemStore::new());
        let key_pem = public_key().public_key_to_pem().unwrap();

        let kids: Vec<String> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let key_pem = key_pem.clone();
                thread::spawn(move || {
                    let key = PKey::public_key_from_pem(&key_pem).unwrap();
                    let mut txn = store.begin();
                    let account =
                        AccountDirectory::register(txn.as_mut(), &key, vec![], true).unwrap();
                    txn.commit().unwrap();
                    account.kid
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();

        assert!(kids.windows(2).all(|pair| pair[0] == pair[1]));
        let txn = store.begin();
        assert!(AccountDirectory::find_by_kid(txn.as_ref(), &kids[0])
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_update_contact_unknown_account() {
        let store = MemStore::new();
        let mut txn = store.begin();
        let result = AccountDirectory::update_contact(txn.as_mut(), "missing", vec![]);
        assert!(matches!(result, Err(AccountError::AccountDoesNotExist)));
    }

    #[test]
    fn test_writes_visible_only_after_commit() {
        let store = MemStore::new();
        let key = public_key();
        let kid = {
            let mut txn = store.begin();
            let account =
                AccountDirectory::register(txn.as_mut(), &key, vec![], true).unwrap();
            // 未提交的交易對新交易不可見
            let fresh = store.begin();
            assert!(AccountDirectory::find_by_kid(fresh.as_ref(), &account.kid)
                .unwrap()
                .is_none());
            txn.commit().unwrap();
            account.kid
        };

        let txn = store.begin();
        let found = AccountDirectory::find_by_kid(txn.as_ref(), &kid).unwrap();
        assert!(found.is_some_and(|a| a.is_valid()));
    }
}
