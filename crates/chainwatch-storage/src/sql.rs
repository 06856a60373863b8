//! Column encodings shared by the SQL backends.
//!
//! Hashes and addresses are stored as `0x`-prefixed lowercase hex, values as
//! decimal strings (256 bits fit neither `BIGINT` nor `NUMERIC` portably).

use std::str::FromStr;

use alloy_primitives::{Address, B256, U256};

use chainwatch_core::error::WatchError;

pub(crate) fn db_err(e: sqlx::Error) -> WatchError {
    WatchError::Persistence(e.to_string())
}

pub(crate) fn parse_b256(column: &str, raw: &str) -> Result<B256, WatchError> {
    B256::from_str(raw).map_err(|e| corrupt(column, raw, e))
}

pub(crate) fn parse_address(column: &str, raw: &str) -> Result<Address, WatchError> {
    Address::from_str(raw).map_err(|e| corrupt(column, raw, e))
}

pub(crate) fn parse_u256(column: &str, raw: &str) -> Result<U256, WatchError> {
    U256::from_str_radix(raw, 10).map_err(|e| corrupt(column, raw, e))
}

fn corrupt(column: &str, raw: &str, e: impl std::fmt::Display) -> WatchError {
    WatchError::Persistence(format!("corrupt {column} value '{raw}': {e}"))
}

pub(crate) fn hex(value: impl std::fmt::LowerHex) -> String {
    format!("{value:#x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_round_trips_as_decimal() {
        let raw = U256::MAX.to_string();
        assert_eq!(
            raw,
            "115792089237316195423570985008687907853269984665640564039457584007913129639935"
        );
        assert_eq!(parse_u256("value", &raw).unwrap(), U256::MAX);
    }

    #[test]
    fn hash_round_trips_as_hex() {
        let hash = B256::repeat_byte(0xab);
        let raw = hex(hash);
        assert_eq!(raw.len(), 66);
        assert_eq!(parse_b256("block_hash", &raw).unwrap(), hash);
        assert_eq!(parse_address("from", &hex(Address::repeat_byte(1))).unwrap(), Address::repeat_byte(1));
    }

    #[test]
    fn corrupt_values_are_persistence_errors() {
        assert!(matches!(parse_u256("value", "-1"), Err(WatchError::Persistence(_))));
        assert!(matches!(parse_b256("block_hash", "0x12"), Err(WatchError::Persistence(_))));
    }
}
