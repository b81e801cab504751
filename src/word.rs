// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of OpenEthereum.

// OpenEthereum is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// OpenEthereum is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with OpenEthereum.  If not, see <http://www.gnu.org/licenses/>.

//! Word/address conversions and signed-word helpers shared across the interpreter.

use ethereum_types::{Address, BigEndianHash, H256, U256};
use num_bigint::BigUint;

/// Reinterpret a `U256` as an address, taking the low 20 bytes.
#[inline]
pub fn u256_to_address(value: &U256) -> Address {
    let hash: H256 = BigEndianHash::from_uint(value);
    Address::from(hash)
}

/// Widen an address to a word with the high 12 bytes zeroed.
#[inline]
pub fn address_to_u256(value: Address) -> U256 {
    H256::from(value).into_uint()
}

/// Split a word into its magnitude and sign, two's-complement style.
///
/// Mirrors `get_and_reset_sign`/`set_sign` from the reference interpreter:
/// the sign bit (bit 255) is cleared from the returned magnitude.
pub fn get_and_reset_sign(value: U256) -> (U256, bool) {
    let is_negative = value.bit(255);
    (set_sign(value, is_negative), is_negative)
}

/// Re-apply two's-complement negation to `value` iff `sign` is true.
pub fn set_sign(value: U256, sign: bool) -> U256 {
    if sign {
        (!U256::zero() ^ value).overflowing_add(U256::one()).0
    } else {
        value
    }
}

/// `U256` to `BigUint`, little-endian, for ADDMOD/MULMOD's wider intermediate.
pub fn to_biguint(x: U256) -> BigUint {
    let mut bytes = [0u8; 32];
    x.to_little_endian(&mut bytes);
    BigUint::from_bytes_le(&bytes)
}

/// `BigUint` back to `U256`, truncating to 256 bits (callers only ever pass
/// values already reduced modulo a 256-bit `c`).
pub fn from_biguint(x: BigUint) -> U256 {
    let bytes = x.to_bytes_le();
    U256::from_little_endian(&bytes)
}

/// Minimal RLP encoding of `(sender, nonce)`, just enough for CREATE's address
/// derivation (`keccak256(rlp([sender, nonce]))[12..]`). Not a general RLP
/// implementation; nonce is encoded as the shortest big-endian representation
/// per RLP's "no leading zero bytes" rule, with zero encoded as the empty string.
pub fn rlp_encode_sender_nonce(sender: Address, nonce: u64) -> Vec<u8> {
    fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
        if bytes.len() == 1 && bytes[0] < 0x80 {
            vec![bytes[0]]
        } else if bytes.len() < 56 {
            let mut out = vec![0x80 + bytes.len() as u8];
            out.extend_from_slice(bytes);
            out
        } else {
            let len_bytes = bytes.len().to_be_bytes();
            let len_bytes = strip_leading_zeros(&len_bytes);
            let mut out = vec![0xb7 + len_bytes.len() as u8];
            out.extend_from_slice(len_bytes);
            out.extend_from_slice(bytes);
            out
        }
    }

    fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
        let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
        &bytes[first_nonzero..]
    }

    let sender_encoded = encode_bytes(sender.as_bytes());
    let nonce_bytes = nonce.to_be_bytes();
    let nonce_trimmed = strip_leading_zeros(&nonce_bytes);
    let nonce_encoded = if nonce == 0 {
        vec![0x80]
    } else {
        encode_bytes(nonce_trimmed)
    };

    let payload_len = sender_encoded.len() + nonce_encoded.len();
    let mut out = Vec::with_capacity(payload_len + 4);
    if payload_len < 56 {
        out.push(0xc0 + payload_len as u8);
    } else {
        let len_bytes = payload_len.to_be_bytes();
        let len_bytes = strip_leading_zeros(&len_bytes);
        out.push(0xf7 + len_bytes.len() as u8);
        out.extend_from_slice(len_bytes);
    }
    out.extend_from_slice(&sender_encoded);
    out.extend_from_slice(&nonce_encoded);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_round_trips() {
        let neg_one = set_sign(U256::one(), true);
        assert_eq!(neg_one, U256::max_value());
        let (mag, sign) = get_and_reset_sign(neg_one);
        assert_eq!(mag, U256::one());
        assert!(sign);
    }

    #[test]
    fn address_word_round_trip() {
        let addr = Address::from_low_u64_be(0xdead_beef);
        assert_eq!(u256_to_address(&address_to_u256(addr)), addr);
    }

    #[test]
    fn rlp_nonce_zero_matches_known_address_shape() {
        // sender with nonce 0 is the common "first contract" case.
        let sender = Address::from_low_u64_be(1);
        let encoded = rlp_encode_sender_nonce(sender, 0);
        // list header + 21-byte address string + empty-string nonce
        assert_eq!(encoded[0], 0xc0 + 22);
        assert_eq!(encoded.last(), Some(&0x80));
    }
}
