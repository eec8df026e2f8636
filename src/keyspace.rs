//! Consistent-hash key space: SHA-1 digests ordered lexicographically on
//! their hex encoding (equivalently, byte-wise on the raw digest).

use hex::FromHex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt;

/// A point on the Chord ring: the SHA-1 digest of a peer address or a
/// storage key. `Ord` walks the raw bytes, which agrees with lexicographic
/// order on the hex string digit for digit.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key([u8; 20]);

impl Key {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(bytes);
        Key(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        <[u8; 20]>::from_hex(s).map(Key)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl Serialize for Key {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Key::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Ownership rule: does the half-open arc `(predecessor_key, self_key]`
/// contain `h`? A singleton ring (`predecessor_key == self_key`) owns the
/// whole space.
pub fn owns(h: Key, predecessor_key: Key, self_key: Key) -> bool {
    if predecessor_key < self_key {
        h > predecessor_key && h <= self_key
    } else if predecessor_key > self_key {
        h > predecessor_key || h <= self_key
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_hex_round_trips() {
        let k = Key::of(b"127.0.0.1:9001");
        let hex = k.to_hex();
        assert_eq!(hex.len(), 40);
        assert_eq!(Key::from_hex(&hex).unwrap(), k);
    }

    #[test]
    fn singleton_ring_owns_everything() {
        let me = Key::of(b"a");
        let anything = Key::of(b"whatever");
        assert!(owns(anything, me, me));
    }

    #[test]
    fn normal_arc_is_half_open() {
        // construct three ordered keys by hashing until we have a < b < c
        let mut keys: Vec<Key> = (0..64u32).map(|i| Key::of(&i.to_le_bytes())).collect();
        keys.sort();
        let (a, b, c) = (keys[0], keys[1], keys[2]);
        assert!(!owns(a, a, b)); // lower bound excluded
        assert!(owns(b, a, b)); // upper bound included
        assert!(!owns(c, a, b)); // outside the arc
    }

    #[test]
    fn wrapping_arc_covers_both_ends() {
        let mut keys: Vec<Key> = (0..64u32).map(|i| Key::of(&i.to_le_bytes())).collect();
        keys.sort();
        let lo = keys[0];
        let mid = keys[keys.len() / 2];
        let hi = keys[keys.len() - 1];
        // predecessor_key (hi) > self_key (lo): arc wraps through the max/min boundary
        assert!(owns(hi, hi, lo) == false); // predecessor itself is excluded
        assert!(owns(lo, hi, lo)); // lo included as upper bound
        assert!(!owns(mid, hi, lo)); // mid sits outside the wrapping arc
    }
}
