use thiserror::Error;

/// 錯誤類型，用於描述 URL 安全 Base64 編碼與解碼過程中的各種錯誤情形。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// 當遇到無效字符時返回此錯誤，包含該無效字符的 ASCII 值。
    #[error("Invalid character: {0}")]
    InvalidCharacter(u8),

    /// 當輸入長度不符合 Base64 分組規則（餘 1）時返回此錯誤。
    #[error("Invalid length")]
    InvalidLength,
}

// URL 安全字母表：以 `-` 與 `_` 取代標準編碼的 `+` 與 `/`。
const BASE64_URL_CHARS: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// 將輸入數據編碼為 URL 安全且不帶填充符號的 Base64 字符串。
///
/// 該函數接受任何可轉換為字節切片的類型（例如 `&str` 或 `Vec<u8>`），
/// 輸出符合 JWS 規範（RFC 7515）所要求的 base64url 表示。
///
/// # 示例
///
/// ```
/// let encoded = sacme::base64::encode("abc");
/// assert_eq!(encoded, "YWJj");
/// ```
pub fn encode<T: AsRef<[u8]>>(input: T) -> String {
    let bytes = input.as_ref();
    let mut output = String::with_capacity(bytes.len().div_ceil(3) * 4);

    for chunk in bytes.chunks(3) {
        let b1 = chunk[0];
        let b2 = chunk.get(1).copied().unwrap_or(0);
        let b3 = chunk.get(2).copied().unwrap_or(0);

        output.push(BASE64_URL_CHARS[(b1 >> 2) as usize] as char);
        output.push(BASE64_URL_CHARS[((b1 & 0x03) << 4 | (b2 >> 4)) as usize] as char);
        if chunk.len() > 1 {
            output.push(BASE64_URL_CHARS[((b2 & 0x0F) << 2 | (b3 >> 6)) as usize] as char);
        }
        if chunk.len() > 2 {
            output.push(BASE64_URL_CHARS[(b3 & 0x3F) as usize] as char);
        }
    }

    output
}

/// 將 URL 安全的 Base64 字符串解碼為原始二進制數據。
///
/// 輸入允許帶有尾端填充符號 `=`（將被忽略），以容忍非嚴格的客戶端實作。
///
/// # 錯誤
///
/// 可能返回 [`DecodeError::InvalidLength`] 或 [`DecodeError::InvalidCharacter`]。
pub fn decode(input: &str) -> Result<Vec<u8>, DecodeError> {
    let trimmed = input.trim_end_matches('=').as_bytes();
    if trimmed.len() % 4 == 1 {
        return Err(DecodeError::InvalidLength);
    }

    let mut buffer = Vec::with_capacity(trimmed.len() / 4 * 3 + 2);

    for chunk in trimmed.chunks(4) {
        let mut group: u32 = 0;
        for &c in chunk {
            group = group << 6 | decode_char(c)? as u32;
        }
        // 將不足四字符的分組左移補齊至 24 位
        group <<= 6 * (4 - chunk.len()) as u32;

        buffer.push((group >> 16) as u8);
        if chunk.len() > 2 {
            buffer.push((group >> 8) as u8);
        }
        if chunk.len() > 3 {
            buffer.push(group as u8);
        }
    }

    Ok(buffer)
}

/// 根據 URL 安全 Base64 字符返回其對應的數值。
///
/// # 錯誤
///
/// 當字符不在有效的字符範圍內時返回 [`DecodeError::InvalidCharacter`]。
fn decode_char(c: u8) -> Result<u8, DecodeError> {
    match c {
        b'A'..=b'Z' => Ok(c - b'A'),
        b'a'..=b'z' => Ok(c - b'a' + 26),
        b'0'..=b'9' => Ok(c - b'0' + 52),
        b'-' => Ok(62),
        b'_' => Ok(63),
        _ => Err(DecodeError::InvalidCharacter(c)),
    }
}
