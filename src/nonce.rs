use std::{collections::HashSet, sync::Mutex};

use openssl::rand::rand_bytes;
use thiserror::Error;
use tracing::debug;

use crate::base64;

/// 表示 Nonce 發放與消耗過程中可能發生的錯誤狀況。
#[derive(Debug, Error)]
pub enum NonceError {
    /// 當嘗試消耗的 nonce 不存在或已被消耗時回傳此錯誤。
    #[error("Unknown or already consumed nonce: {0}")]
    UnknownNonce(String),
    /// 當安全隨機數生成失敗時回傳此錯誤。
    #[error("Random generation failed: {0}")]
    Rand(#[from] openssl::error::ErrorStack),
    /// 當內部鎖已中毒時回傳此錯誤。
    #[error("Lock poisoned")]
    LockPoisoned,
}

type Result<T> = std::result::Result<T, NonceError>;

/// 防重放 nonce 註冊表。
///
/// 每個發放出去的 token 均進入未消耗集合，且只能被成功消耗一次；
/// 第二次消耗同一 token 必定失敗。此結構為進程範圍的共享狀態，
/// 發放與消耗對並發呼叫者皆為原子操作。
#[derive(Debug, Default)]
pub struct NonceRegistry {
    outstanding: Mutex<HashSet<String>>,
}

impl NonceRegistry {
    /// 每個 token 的隨機位元組數。
    const TOKEN_BYTES: usize = 32;

    /// 建立一個新的（空的）`NonceRegistry` 實例。
    pub fn new() -> Self {
        Self::default()
    }

    /// 發放一個新的 nonce。
    ///
    /// token 由安全隨機數生成器產生並以 URL 安全 Base64 編碼，
    /// 發放後立即存入未消耗集合。
    ///
    /// # Errors
    ///
    /// 回傳 [`NonceError::Rand`] 當隨機數生成失敗，或 [`NonceError::LockPoisoned`]。
    pub fn issue(&self) -> Result<String> {
        let mut buf = [0u8; Self::TOKEN_BYTES];
        rand_bytes(&mut buf)?;
        let token = base64::encode(buf);

        self.outstanding
            .lock()
            .map_err(|_| NonceError::LockPoisoned)?
            .insert(token.clone());
        debug!(%token, "issued nonce");

        Ok(token)
    }

    /// 消耗一個 nonce。
    ///
    /// 若 token 存在於未消耗集合中，將其移除並回傳成功；
    /// 否則回傳 [`NonceError::UnknownNonce`]。移除與檢查在同一把鎖下完成，
    /// 因此對同一 token 的 N 個並發消耗恰有一個成功。
    pub fn consume(&self, token: &str) -> Result<()> {
        let mut outstanding = self
            .outstanding
            .lock()
            .map_err(|_| NonceError::LockPoisoned)?;

        if outstanding.remove(token) {
            debug!(%token, "consumed nonce");
            Ok(())
        } else {
            Err(NonceError::UnknownNonce(token.to_string()))
        }
    }

    /// 回傳目前未消耗的 nonce 數量。
    pub fn outstanding_count(&self) -> Result<usize> {
        Ok(self
            .outstanding
            .lock()
            .map_err(|_| NonceError::LockPoisoned)?
            .len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_issue_then_consume() {
        let registry = NonceRegistry::new();
        let token = registry.issue().unwrap();
        assert_eq!(registry.outstanding_count().unwrap(), 1);
        registry.consume(&token).unwrap();
        assert_eq!(registry.outstanding_count().unwrap(), 0);
    }

    #[test]
    fn test_second_consume_fails() {
        let registry = NonceRegistry::new();
        let token = registry.issue().unwrap();
        registry.consume(&token).unwrap();
        assert!(matches!(
            registry.consume(&token),
            Err(NonceError::UnknownNonce(_))
        ));
    }

    #[test]
    fn test_unknown_token_fails() {
        let registry = NonceRegistry::new();
        assert!(matches!(
            registry.consume("never-issued"),
            Err(NonceError::UnknownNonce(_))
        ));
    }

    #[test]
    fn test_tokens_are_unique() {
        let registry = NonceRegistry::new();
        let a = registry.issue().unwrap();
        let b = registry.issue().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_concurrent_consume_exactly_one_success() {
        let registry = Arc::new(NonceRegistry::new());
        let token = registry.issue().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let token = token.clone();
                std::thread::spawn(move || registry.consume(&token).is_ok())
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }
}
