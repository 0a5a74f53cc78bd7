//! Manual decoding of proposal calldata.
//!
//! Proposals store their calldata as hex strings, and the function behind a
//! parameter-change proposal is only known from the proposal's free-form
//! type, so there is no interface to hand a generic decoder. These readers
//! handle the few fixed shapes the indexer needs: `(string, string)` for
//! registry edits, a single `uint256` for setters and `(address, uint256)`
//! for mint/burn.

use alloy::primitives::{Address, U256};
use thiserror::Error;

const SELECTOR_LEN: usize = 4;
const WORD: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TupleDecodeError {
    #[error("Calldata is not valid hex: {0}")]
    InvalidHex(String),

    #[error("Calldata too short: need {needed} argument bytes, have {available}")]
    TooShort { needed: usize, available: usize },

    #[error("Offset of parameter `{0}` points outside the payload")]
    OffsetOutOfBounds(&'static str),

    #[error("Length of parameter `{0}` runs past the end of the payload")]
    LengthOutOfBounds(&'static str),
}

/// Argument bytes of a hex-encoded call, selector stripped
fn call_arguments(calldata: &str) -> Result<Vec<u8>, TupleDecodeError> {
    let hex_str = calldata.strip_prefix("0x").unwrap_or(calldata);
    let bytes = hex::decode(hex_str).map_err(|e| TupleDecodeError::InvalidHex(e.to_string()))?;
    if bytes.len() < SELECTOR_LEN {
        return Err(TupleDecodeError::TooShort {
            needed: SELECTOR_LEN,
            available: bytes.len(),
        });
    }
    Ok(bytes[SELECTOR_LEN..].to_vec())
}

fn read_word(args: &[u8], at: usize) -> Option<[u8; WORD]> {
    let end = at.checked_add(WORD)?;
    args.get(at..end)?.try_into().ok()
}

fn head_word(args: &[u8], index: usize) -> Result<[u8; WORD], TupleDecodeError> {
    let needed = (index + 1) * WORD;
    read_word(args, index * WORD).ok_or(TupleDecodeError::TooShort {
        needed,
        available: args.len(),
    })
}

/// A word interpreted as a position or size inside `args`
fn word_to_index(word: [u8; WORD]) -> Option<usize> {
    usize::try_from(U256::from_be_bytes(word)).ok()
}

fn read_string(args: &[u8], head_index: usize, param: &'static str) -> Result<String, TupleDecodeError> {
    let offset = word_to_index(head_word(args, head_index)?)
        .ok_or(TupleDecodeError::OffsetOutOfBounds(param))?;
    let len_word = read_word(args, offset).ok_or(TupleDecodeError::OffsetOutOfBounds(param))?;
    let len = word_to_index(len_word).ok_or(TupleDecodeError::LengthOutOfBounds(param))?;

    let start = offset + WORD;
    let data = start
        .checked_add(len)
        .and_then(|end| args.get(start..end))
        .ok_or(TupleDecodeError::LengthOutOfBounds(param))?;

    Ok(String::from_utf8_lossy(data).into_owned())
}

/// Decode the two string arguments of a registry edit call
/// (`editRegistry(string,string)` and friends). Invalid UTF-8 is replaced,
/// never rejected; out-of-bounds offsets or lengths fail the whole decode.
pub fn decode_string_pair(calldata: &str) -> Result<(String, String), TupleDecodeError> {
    let args = call_arguments(calldata)?;
    // both heads must be present before either string is followed
    head_word(&args, 1)?;
    let key = read_string(&args, 0, "key")?;
    let value = read_string(&args, 1, "value")?;
    Ok((key, value))
}

/// First argument of a single-uint setter (`setVotingPeriod(uint256)` etc.)
pub fn decode_uint_arg(calldata: &str) -> Result<U256, TupleDecodeError> {
    let args = call_arguments(calldata)?;
    Ok(U256::from_be_bytes(head_word(&args, 0)?))
}

/// `(address, uint256)` arguments of a mint or burn call
pub fn decode_address_amount(calldata: &str) -> Result<(Address, U256), TupleDecodeError> {
    let args = call_arguments(calldata)?;
    let account = head_word(&args, 0)?;
    let amount = head_word(&args, 1)?;
    Ok((
        Address::from_slice(&account[WORD - 20..]),
        U256::from_be_bytes(amount),
    ))
}
