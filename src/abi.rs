//! Minimal Solidity ABI codec
//!
//! Covers exactly what the ledger and the price feed speak: static 32-byte words
//! (`uint256`, `uint80`, `int256`, `address`, `bool`) plus the dynamic `string`
//! in BetCreated. Topics and selectors are keccak-256 of canonical signatures.

use num_bigint::BigUint;
use sha3::{Digest, Keccak256};

pub const WORD: usize = 32;

/// keccak-256 of an arbitrary preimage.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// topic0 for an event signature, `0x`-prefixed.
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

/// First four bytes of keccak-256 of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Strip an optional `0x` and hex-decode.
pub fn decode_hex(s: &str) -> Result<Vec<u8>, String> {
    hex::decode(s.trim().trim_start_matches("0x")).map_err(|e| e.to_string())
}

/// Parse a `0x`-prefixed hex quantity (block numbers, log indices).
pub fn parse_quantity(s: &str) -> Result<u64, String> {
    let digits = s.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return Err(format!("empty quantity {:?}", s));
    }
    u64::from_str_radix(digits, 16).map_err(|e| format!("bad quantity {:?}: {}", s, e))
}

pub fn encode_quantity(n: u64) -> String {
    format!("0x{:x}", n)
}

// =============================================================================
// Decoding
// =============================================================================

/// Read-only view over ABI-encoded return data or log data.
pub struct AbiReader<'a> {
    bytes: &'a [u8],
}

impl<'a> AbiReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn word_count(&self) -> usize {
        self.bytes.len() / WORD
    }

    pub fn word(&self, index: usize) -> Result<&'a [u8], String> {
        let start = index * WORD;
        self.bytes
            .get(start..start + WORD)
            .ok_or_else(|| format!("word {} out of range ({} bytes)", index, self.bytes.len()))
    }

    pub fn uint(&self, index: usize) -> Result<BigUint, String> {
        Ok(BigUint::from_bytes_be(self.word(index)?))
    }

    /// uint that must fit a u64 (timestamps, offsets).
    pub fn uint_u64(&self, index: usize) -> Result<u64, String> {
        let word = self.word(index)?;
        if word[..24].iter().any(|b| *b != 0) {
            return Err(format!("word {} exceeds u64", index));
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&word[24..]);
        Ok(u64::from_be_bytes(buf))
    }

    /// uint80/uint128 round ids: low 16 bytes.
    pub fn uint_u128(&self, index: usize) -> Result<u128, String> {
        let word = self.word(index)?;
        if word[..16].iter().any(|b| *b != 0) {
            return Err(format!("word {} exceeds u128", index));
        }
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&word[16..]);
        Ok(u128::from_be_bytes(buf))
    }

    /// int256 answers, narrowed to i128. The high half must be pure sign extension.
    pub fn int_i128(&self, index: usize) -> Result<i128, String> {
        let word = self.word(index)?;
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&word[16..]);
        let value = i128::from_be_bytes(buf);
        let fill = if value < 0 { 0xff } else { 0x00 };
        if word[..16].iter().any(|b| *b != fill) {
            return Err(format!("word {} exceeds i128", index));
        }
        Ok(value)
    }

    pub fn address(&self, index: usize) -> Result<String, String> {
        let word = self.word(index)?;
        if word[..12].iter().any(|b| *b != 0) {
            return Err(format!("word {} is not an address", index));
        }
        Ok(format!("0x{}", hex::encode(&word[12..])))
    }

    pub fn boolean(&self, index: usize) -> Result<bool, String> {
        let word = self.word(index)?;
        if word[..31].iter().any(|b| *b != 0) || word[31] > 1 {
            return Err(format!("word {} is not a bool", index));
        }
        Ok(word[31] == 1)
    }

    /// Dynamic `string` whose head slot at `index` holds the byte offset of its tail.
    pub fn string(&self, index: usize) -> Result<String, String> {
        let offset = usize::try_from(self.uint_u64(index)?).map_err(|e| e.to_string())?;
        if offset % WORD != 0 {
            return Err(format!("misaligned string offset {}", offset));
        }
        let tail = AbiReader::new(self.bytes.get(offset..).ok_or("string offset out of range")?);
        let len = usize::try_from(tail.uint_u64(0)?).map_err(|e| e.to_string())?;
        let data = tail
            .bytes
            .get(WORD..WORD + len)
            .ok_or_else(|| format!("string of {} bytes overruns data", len))?;
        String::from_utf8(data.to_vec()).map_err(|e| e.to_string())
    }
}

// =============================================================================
// Encoding
// =============================================================================

pub fn encode_uint(value: &BigUint) -> [u8; 32] {
    let bytes = value.to_bytes_be();
    let mut word = [0u8; 32];
    // uint256 callers never exceed 32 bytes; keep the low-order bytes if they do
    let take = bytes.len().min(WORD);
    word[WORD - take..].copy_from_slice(&bytes[bytes.len() - take..]);
    word
}

pub fn encode_u128(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Selector followed by static arguments.
pub fn encode_call(selector: [u8; 4], args: &[[u8; 32]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + args.len() * WORD);
    out.extend_from_slice(&selector);
    for arg in args {
        out.extend_from_slice(arg);
    }
    out
}
