use openssl::{
    error::ErrorStack,
    pkey::{Id, PKey, Private, Public},
    rsa::Rsa,
};
use thiserror::Error;

use crate::jwk::{Jwk, JwkError};

/// 鍵相關操作的錯誤列舉，涵蓋 OpenSSL、JWK 與其他相關錯誤。
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] ErrorStack),
    #[error("Unsupported algorithm")]
    UnsupportedAlgorithm,
    #[error("JWK error: {0}")]
    JwkError(#[from] JwkError),
}

/// 本模組使用的結果類型，當中錯誤皆為 `KeyError`。
type Result<T> = std::result::Result<T, KeyError>;

/// 表示一組非對稱加密的金鑰對。
///
/// 此結構包含演算法名稱、私鑰與對應的公鑰，引擎以其持有簽發根金鑰，
/// 測試端則以其模擬客戶端帳戶金鑰。
#[derive(Debug)]
pub struct KeyPair {
    /// 加密演算法名稱，目前僅支援 "RSA"。
    pub alg_name: String,
    /// 私鑰，使用 OpenSSL 的 `PKey` 封裝。
    pub pri_key: PKey<Private>,
    /// 公鑰，從私鑰派生而來。
    pub pub_key: PKey<Public>,
}

impl KeyPair {
    /// 產生一組新的 RSA 金鑰對。
    ///
    /// # 參數
    ///
    /// - `bits`: 可選的金鑰長度，若未提供則預設為 2048 位元。
    ///
    /// # 回傳
    ///
    /// 成功回傳建立好的 `KeyPair`，否則回傳對應的 `KeyError`。
    pub fn generate(bits: Option<u32>) -> Result<Self> {
        let rsa = Rsa::generate(bits.unwrap_or(2048))?;
        let pri_key = PKey::from_rsa(rsa)?;
        let pub_key = Self::derive_public_key(&pri_key)?;

        Ok(Self {
            alg_name: "RSA".to_owned(),
            pri_key,
            pub_key,
        })
    }

    /// 根據 PEM 格式的私鑰資料建立一組金鑰對。
    ///
    /// # 參數
    ///
    /// - `pri_key_pem`: 私鑰的 PEM 格式位元組切片。
    ///
    /// # 回傳
    ///
    /// 成功回傳建立好的 `KeyPair`，否則回傳對應的錯誤。
    pub fn from_pem(pri_key_pem: &[u8]) -> Result<Self> {
        let pri_key = PKey::private_key_from_pem(pri_key_pem)?;
        let pub_key = Self::derive_public_key(&pri_key)?;

        Ok(Self {
            alg_name: "RSA".to_owned(),
            pri_key,
            pub_key,
        })
    }

    /// 根據私鑰派生出對應的公鑰。
    fn derive_public_key(pri_key: &PKey<Private>) -> Result<PKey<Public>> {
        match pri_key.id() {
            Id::RSA => {
                let rsa = pri_key.rsa()?;
                let pub_rsa =
                    Rsa::from_public_components(rsa.n().to_owned()?, rsa.e().to_owned()?)?;
                Ok(PKey::from_rsa(pub_rsa)?)
            }
            _ => Err(KeyError::UnsupportedAlgorithm),
        }
    }

    /// 計算並回傳金鑰對的縮影（thumbprint），用於唯一識別金鑰。
    ///
    /// 透過 JWK 格式轉換與 SHA-256 雜湊運算產生縮影，最後以 URL-safe Base64 字串回傳。
    pub fn thumbprint(&self) -> Result<String> {
        let jwk = Jwk::from_public_key(&self.pub_key)?;
        Ok(jwk.thumbprint()?)
    }

    /// 回傳公鑰的 PEM 表示，供帳戶記錄持久化使用。
    pub fn public_key_pem(&self) -> Result<Vec<u8>> {
        Ok(self.pub_key.public_key_to_pem()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_reload() {
        let key_pair = KeyPair::generate(Some(2048)).unwrap();
        let pem = key_pair.pri_key.private_key_to_pem_pkcs8().unwrap();
        let reloaded = KeyPair::from_pem(&pem).unwrap();
        assert!(key_pair.pub_key.public_eq(&reloaded.pub_key));
    }

    #[test]
    fn test_thumbprints_differ_between_keys() {
        let a = KeyPair::generate(Some(2048)).unwrap();
        let b = KeyPair::generate(Some(2048)).unwrap();
        assert_ne!(a.thumbprint().unwrap(), b.thumbprint().unwrap());
    }
}
