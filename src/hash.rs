//! # Hash Algorithm Suite
//!
//! String hashing for textual sharding values. The suite is a closed set of
//! named functions selectable by configuration string; every function runs
//! 32-bit wrapping arithmetic over UTF-16 code units so a given key hashes
//! identically on every node in a cluster.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const M_MASK: i32 = 0x8765_fed1_u32 as i32;
const FNV_PRIME: i32 = 16_777_619;
const FNV_OFFSET: i32 = 2_166_136_261_u32 as i32;

/// Named hash function for string sharding values.
///
/// The default is [`HashAlgo::Bernstein`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HashAlgo {
    Additive,
    Rotating,
    OneByOne,
    #[default]
    Bernstein,
    Fnv,
    Rs,
    Js,
    Pjw,
    Elf,
    Bkdr,
    Sdbm,
    Djb,
    Dek,
    Ap,
    PlatformDefault,
    Mixed,
}

impl HashAlgo {
    /// Hash a key with this algorithm, widened to 64 bits.
    ///
    /// All algorithms except [`HashAlgo::Mixed`] produce a 32-bit value
    /// (possibly negative); callers that need a non-negative routing input
    /// take the absolute value themselves.
    pub fn hash(self, key: &str) -> i64 {
        match self {
            HashAlgo::Additive => additive(key) as i64,
            HashAlgo::Rotating => rotating(key) as i64,
            HashAlgo::OneByOne => one_by_one(key) as i64,
            HashAlgo::Bernstein => bernstein(key) as i64,
            HashAlgo::Fnv => fnv1(key) as i64,
            HashAlgo::Rs => rs(key) as i64,
            HashAlgo::Js => js(key) as i64,
            HashAlgo::Pjw => pjw(key) as i64,
            HashAlgo::Elf => elf(key) as i64,
            HashAlgo::Bkdr => bkdr(key) as i64,
            HashAlgo::Sdbm => sdbm(key) as i64,
            HashAlgo::Djb => djb(key) as i64,
            HashAlgo::Dek => dek(key) as i64,
            HashAlgo::Ap => ap(key) as i64,
            HashAlgo::PlatformDefault => platform(key) as i64,
            HashAlgo::Mixed => mixed(key),
        }
    }

    /// The configuration name of this algorithm.
    pub fn name(self) -> &'static str {
        match self {
            HashAlgo::Additive => "additive",
            HashAlgo::Rotating => "rotating",
            HashAlgo::OneByOne => "one-by-one",
            HashAlgo::Bernstein => "bernstein",
            HashAlgo::Fnv => "fnv",
            HashAlgo::Rs => "rs",
            HashAlgo::Js => "js",
            HashAlgo::Pjw => "pjw",
            HashAlgo::Elf => "elf",
            HashAlgo::Bkdr => "bkdr",
            HashAlgo::Sdbm => "sdbm",
            HashAlgo::Djb => "djb",
            HashAlgo::Dek => "dek",
            HashAlgo::Ap => "ap",
            HashAlgo::PlatformDefault => "platform-default",
            HashAlgo::Mixed => "mixed",
        }
    }
}

impl fmt::Display for HashAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unknown hash algorithm name.
#[derive(Debug, thiserror::Error)]
#[error("unknown hash algorithm {0:?}")]
pub struct UnknownHashAlgo(pub String);

impl FromStr for HashAlgo {
    type Err = UnknownHashAlgo;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "additive" => Ok(HashAlgo::Additive),
            "rotating" => Ok(HashAlgo::Rotating),
            "one-by-one" | "oneByOne" => Ok(HashAlgo::OneByOne),
            "bernstein" => Ok(HashAlgo::Bernstein),
            "fnv" => Ok(HashAlgo::Fnv),
            "rs" => Ok(HashAlgo::Rs),
            "js" => Ok(HashAlgo::Js),
            "pjw" => Ok(HashAlgo::Pjw),
            "elf" => Ok(HashAlgo::Elf),
            "bkdr" => Ok(HashAlgo::Bkdr),
            "sdbm" => Ok(HashAlgo::Sdbm),
            "djb" => Ok(HashAlgo::Djb),
            "dek" => Ok(HashAlgo::Dek),
            "ap" => Ok(HashAlgo::Ap),
            "platform-default" | "platform" => Ok(HashAlgo::PlatformDefault),
            "mixed" | "mix" => Ok(HashAlgo::Mixed),
            other => Err(UnknownHashAlgo(other.to_string())),
        }
    }
}

fn units(key: &str) -> impl Iterator<Item = i32> + '_ {
    key.encode_utf16().map(|u| u as i32)
}

fn unit_len(key: &str) -> i32 {
    key.encode_utf16().count() as i32
}

fn additive(key: &str) -> i32 {
    let mut hash = unit_len(key);
    for c in units(key) {
        hash = hash.wrapping_add(c);
    }
    hash % 983
}

fn rotating(key: &str) -> i32 {
    let mut hash = unit_len(key);
    for c in units(key) {
        hash = (hash << 4) ^ (hash >> 28) ^ c;
    }
    hash ^ (hash >> 10) ^ (hash >> 20)
}

fn one_by_one(key: &str) -> i32 {
    let mut hash = 0i32;
    for c in units(key) {
        hash = hash.wrapping_add(c);
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash = hash.wrapping_add(hash << 15);
    hash & M_MASK
}

fn bernstein(key: &str) -> i32 {
    let mut hash = 0i32;
    for c in units(key) {
        hash = hash.wrapping_mul(33).wrapping_add(c);
    }
    hash
}

fn fnv1(key: &str) -> i32 {
    let mut hash = FNV_OFFSET;
    for c in units(key) {
        hash = (hash ^ c).wrapping_mul(FNV_PRIME);
    }
    hash = hash.wrapping_add(hash << 13);
    hash ^= hash >> 7;
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 17;
    hash.wrapping_add(hash << 5)
}

fn rs(key: &str) -> i32 {
    let b = 378_551i32;
    let mut a = 63_689i32;
    let mut hash = 0i32;
    for c in units(key) {
        hash = hash.wrapping_mul(a).wrapping_add(c);
        a = a.wrapping_mul(b);
    }
    hash & 0x7FFF_FFFF
}

fn js(key: &str) -> i32 {
    let mut hash = 1_315_423_911i32;
    for c in units(key) {
        hash ^= (hash << 5).wrapping_add(c).wrapping_add(hash >> 2);
    }
    hash & 0x7FFF_FFFF
}

fn pjw(key: &str) -> i32 {
    // 32-bit variant: shift an eighth in, fold the top three quarters back.
    let high_bits = (0xFFFF_FFFF_u32 << 28) as i32;
    let mut hash = 0i32;
    for c in units(key) {
        hash = (hash << 4).wrapping_add(c);
        let test = hash & high_bits;
        if test != 0 {
            hash = (hash ^ (test >> 24)) & !high_bits;
        }
    }
    hash & 0x7FFF_FFFF
}

fn elf(key: &str) -> i32 {
    let mut hash = 0i32;
    for c in units(key) {
        hash = (hash << 4).wrapping_add(c);
        let x = hash & 0xF000_0000_u32 as i32;
        if x != 0 {
            hash ^= x >> 24;
            hash &= !x;
        }
    }
    hash & 0x7FFF_FFFF
}

fn bkdr(key: &str) -> i32 {
    let seed = 131i32;
    let mut hash = 0i32;
    for c in units(key) {
        hash = hash.wrapping_mul(seed).wrapping_add(c);
    }
    hash & 0x7FFF_FFFF
}

fn sdbm(key: &str) -> i32 {
    let mut hash = 0i32;
    for c in units(key) {
        hash = c
            .wrapping_add(hash << 6)
            .wrapping_add(hash << 16)
            .wrapping_sub(hash);
    }
    hash & 0x7FFF_FFFF
}

fn djb(key: &str) -> i32 {
    let mut hash = 5381i32;
    for c in units(key) {
        hash = (hash << 5).wrapping_add(hash).wrapping_add(c);
    }
    hash & 0x7FFF_FFFF
}

fn dek(key: &str) -> i32 {
    let mut hash = unit_len(key);
    for c in units(key) {
        hash = ((hash << 5) ^ (hash >> 27)) ^ c;
    }
    hash & 0x7FFF_FFFF
}

fn ap(key: &str) -> i32 {
    let mut hash = 0i32;
    for (i, c) in units(key).enumerate() {
        if i & 1 == 0 {
            hash ^= (hash << 7) ^ c ^ (hash >> 3);
        } else {
            hash ^= !((hash << 11) ^ c ^ (hash >> 5));
        }
    }
    hash
}

fn platform(key: &str) -> i32 {
    let mut hash = 0i32;
    for c in units(key) {
        hash = hash.wrapping_mul(31).wrapping_add(c);
    }
    hash
}

/// Platform hash in the high 32 bits, FNV-1 in the low 32.
///
/// The low half is OR-ed in sign-extended, matching the historical wire
/// behavior that downstream counters were seeded against.
fn mixed(key: &str) -> i64 {
    ((platform(key) as i64) << 32) | (fnv1(key) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bernstein_known_values() {
        // h = 33*h + c over "test" = [116, 101, 115, 116]
        assert_eq!(HashAlgo::Bernstein.hash("test"), 4_282_592);
        assert_eq!(HashAlgo::Bernstein.hash(""), 0);
        assert_eq!(HashAlgo::Bernstein.hash("a"), 97);
    }

    #[test]
    fn test_additive_known_values() {
        // starts at the length, adds each unit, mod 983
        assert_eq!(HashAlgo::Additive.hash("test"), 452 % 983);
        assert_eq!(HashAlgo::Additive.hash(""), 0);
    }

    #[test]
    fn test_platform_matches_java_string_hash() {
        // 31-multiplier polynomial over UTF-16 units
        assert_eq!(HashAlgo::PlatformDefault.hash("a"), 97);
        assert_eq!(HashAlgo::PlatformDefault.hash("ab"), 31 * 97 + 98);
    }

    #[test]
    fn test_masked_algorithms_are_non_negative() {
        for algo in [
            HashAlgo::Rs,
            HashAlgo::Js,
            HashAlgo::Pjw,
            HashAlgo::Elf,
            HashAlgo::Bkdr,
            HashAlgo::Sdbm,
            HashAlgo::Djb,
            HashAlgo::Dek,
        ] {
            for key in ["", "a", "user:42", "Ünïcode ❤", "longer-sharding-key-material"] {
                let value = algo.hash(key);
                assert!(value >= 0, "{algo} produced negative hash for {key:?}");
                assert!(value <= i32::MAX as i64);
            }
        }
    }

    #[test]
    fn test_hash_is_deterministic() {
        for algo in [
            HashAlgo::Additive,
            HashAlgo::Rotating,
            HashAlgo::OneByOne,
            HashAlgo::Bernstein,
            HashAlgo::Fnv,
            HashAlgo::Ap,
            HashAlgo::Mixed,
        ] {
            assert_eq!(algo.hash("pinus"), algo.hash("pinus"));
        }
    }

    #[test]
    fn test_mixed_packs_two_hashes() {
        let value = HashAlgo::Mixed.hash("pinus");
        let high = (value >> 32) as i32;
        assert_eq!(high as i64, HashAlgo::PlatformDefault.hash("pinus"));
    }

    #[test]
    fn test_name_round_trip() {
        for algo in [
            HashAlgo::Additive,
            HashAlgo::Rotating,
            HashAlgo::OneByOne,
            HashAlgo::Bernstein,
            HashAlgo::Fnv,
            HashAlgo::Rs,
            HashAlgo::Js,
            HashAlgo::Pjw,
            HashAlgo::Elf,
            HashAlgo::Bkdr,
            HashAlgo::Sdbm,
            HashAlgo::Djb,
            HashAlgo::Dek,
            HashAlgo::Ap,
            HashAlgo::PlatformDefault,
            HashAlgo::Mixed,
        ] {
            assert_eq!(algo.name().parse::<HashAlgo>().unwrap(), algo);
        }
    }

    #[test]
    fn test_serde_uses_config_names() {
        let json = serde_json::to_string(&HashAlgo::OneByOne).unwrap();
        assert_eq!(json, "\"one-by-one\"");
        let algo: HashAlgo = serde_json::from_str("\"platform-default\"").unwrap();
        assert_eq!(algo, HashAlgo::PlatformDefault);
    }

    #[test]
    fn test_default_is_bernstein() {
        assert_eq!(HashAlgo::default(), HashAlgo::Bernstein);
    }
}
