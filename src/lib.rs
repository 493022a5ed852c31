//! # ACME 證書簽發協議引擎
//!
//! 本庫實作 ACME 協議的伺服端核心：接收已簽署的請求信封，完成
//! 防重放與簽章驗證後，驅動帳戶、訂單、授權與挑戰的狀態機，
//! 直到最終化簽發證書。傳輸層（HTTP 路由、標頭、持久化後端）
//! 由呼叫端自行搭配。
//!
//! ## 主要模組
//!
//! - **engine**: 協議引擎本體，包含請求驗證、操作分派、錯誤分類
//!   與回應組裝（每個回應附一枚新 nonce）。
//! - **account / order / authorization / challenge**: 各實體及其
//!   狀態機；訂單狀態在每次讀取前全量重算。
//! - **nonce**: 一次性 nonce 註冊表，提供恰一次的消耗語意。
//! - **jws / jwk / signature / payload**: 請求信封的解析、金鑰
//!   轉換、RS256 簽章驗證與載荷驗證。
//! - **certificate / csr**: 證書簽發協作者與 CSR 名稱比對。
//! - **store**: 交易式持久化契約與記憶體實作。
//!
//! ## 示例
//!
//! ```no_run
//! use sacme::engine::EngineBuilder;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = EngineBuilder::new().build()?;
//!
//!     // 客戶端先索取 nonce，再送出簽署後的請求信封
//!     let nonce = engine.new_nonce()?;
//!     let _ = nonce;
//!
//!     // let result = engine.new_account(&signed_envelope_json)?;
//!     // println!("kid: {}", result.resource.kid);
//!     Ok(())
//! }
//! ```
//!
//! 更多詳細 API 說明請參考各個模組的文檔。

pub mod account;
pub mod authorization;
pub mod base64;
pub mod certificate;
pub mod challenge;
pub mod csr;
pub mod engine;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod nonce;
pub mod order;
pub mod payload;
pub mod signature;
pub mod store;
