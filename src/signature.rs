use openssl::{
    hash::MessageDigest,
    pkey::{PKey, Private, Public},
    sign::{Signer, Verifier},
};
use thiserror::Error;

use crate::key_pair::KeyPair;

/// 定義簽章操作可能遇到的錯誤類型。
#[derive(Debug, Error)]
pub enum SignatureError {
    /// 簽章或驗證過程中發生錯誤，附帶錯誤訊息。
    #[error("Signing error: {0}")]
    SigningError(String),
    /// 不支援的簽章演算法，附帶未支援的演算法名稱。
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

type Result<T> = std::result::Result<T, SignatureError>;

/// 定義簽章演算法的介面。
///
/// 實作此介面的類型需提供對簽章輸入的簽署與驗證功能。
trait SignatureAlgorithmT {
    /// 使用指定的私鑰對資料進行簽章。
    fn sign(&self, data: &[u8], key: &PKey<Private>) -> Result<Vec<u8>>;

    /// 使用指定的公鑰驗證簽章，回傳簽章是否相符。
    fn verify(&self, data: &[u8], signature: &[u8], key: &PKey<Public>) -> Result<bool>;
}

/// RS256（RSA + SHA-256）簽章演算法的實作。
struct Rs256Signature;

impl SignatureAlgorithmT for Rs256Signature {
    fn sign(&self, data: &[u8], key: &PKey<Private>) -> Result<Vec<u8>> {
        let mut signer = Signer::new(MessageDigest::sha256(), key)
            .map_err(|e| SignatureError::SigningError(e.to_string()))?;

        signer
            .update(data)
            .map_err(|e| SignatureError::SigningError(e.to_string()))?;

        signer
            .sign_to_vec()
            .map_err(|e| SignatureError::SigningError(e.to_string()))
    }

    fn verify(&self, data: &[u8], signature: &[u8], key: &PKey<Public>) -> Result<bool> {
        let mut verifier = Verifier::new(MessageDigest::sha256(), key)
            .map_err(|e| SignatureError::SigningError(e.to_string()))?;

        verifier
            .update(data)
            .map_err(|e| SignatureError::SigningError(e.to_string()))?;

        verifier
            .verify(signature)
            .map_err(|e| SignatureError::SigningError(e.to_string()))
    }
}

/// 簽章演算法工廠，用於根據演算法名稱取得對應的簽章演算法實作。
struct SignatureAlgorithmFactory;

impl SignatureAlgorithmFactory {
    /// 根據演算法名稱取得對應的簽章演算法。
    ///
    /// # 參數
    ///
    /// - `alg_name`: 指定的演算法名稱（不區分大小寫）。
    ///
    /// # 回傳
    ///
    /// 若支援該演算法，回傳封裝在 Box 中的 `SignatureAlgorithmT` 實作；否則回傳 `SignatureError`。
    fn get_algorithm(alg_name: &str) -> Result<Box<dyn SignatureAlgorithmT>> {
        match alg_name.to_uppercase().as_str() {
            "RS256" | "RSA" => Ok(Box::new(Rs256Signature)),
            _ => Err(SignatureError::UnsupportedAlgorithm(alg_name.to_string())),
        }
    }
}

/// 依 JWS 規範組合簽章輸入：`{protected_b64}.{payload_b64}`。
pub fn signing_input(protected_b64: &str, payload_b64: &str) -> String {
    format!("{}.{}", protected_b64, payload_b64)
}

/// 驗證已簽署信封的簽章。
///
/// 此函式依據 protected 標頭與 payload 的 Base64 URL 編碼值組合出簽章輸入，
/// 然後依據標頭宣告的演算法取得相應的驗證實作進行驗證。
///
/// # 參數
///
/// - `protected_b64`: 已進行 Base64 URL 編碼的 protected 標頭。
/// - `payload_b64`: 已進行 Base64 URL 編碼的有效負載。
/// - `signature`: 解碼後的原始簽章位元組。
/// - `key`: 用於驗證的公鑰。
/// - `alg_name`: 標頭宣告的簽章演算法。
///
/// # 回傳
///
/// 簽章相符回傳 `true`，不符回傳 `false`；演算法不支援或驗證器建立失敗時回傳 `SignatureError`。
pub fn verify_signature(
    protected_b64: &str,
    payload_b64: &str,
    signature: &[u8],
    key: &PKey<Public>,
    alg_name: &str,
) -> Result<bool> {
    let input = signing_input(protected_b64, payload_b64);
    let algorithm = SignatureAlgorithmFactory::get_algorithm(alg_name)?;
    algorithm.verify(input.as_bytes(), signature, key)
}

/// 根據提供的 header、payload 與金鑰對，生成對應的簽章。
///
/// 主要供測試與客戶端情境構造已簽署信封使用。
///
/// # 回傳
///
/// 成功時回傳原始簽章位元組；失敗時回傳 `SignatureError`。
pub fn create_signature(
    protected_b64: &str,
    payload_b64: &str,
    key_pair: &KeyPair,
) -> Result<Vec<u8>> {
    let input = signing_input(protected_b64, payload_b64);
    let algorithm = SignatureAlgorithmFactory::get_algorithm(&key_pair.alg_name)?;
    algorithm.sign(input.as_bytes(), &key_pair.pri_key)
}
