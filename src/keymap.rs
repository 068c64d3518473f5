//! Open-addressing hash table mapping item names to item byte offsets.
//!
//! Collisions are resolved by double hashing. The probe sequence is produced
//! by [`probe`], which is the only place the sequence is defined: the factory
//! uses it to place offsets and the reader uses it to find them again.

use crate::error::{GisError, Result};
use crate::format::{EMPTY, read_i32, read_offset, to_i32};
use bytes::{BufMut, BytesMut};

/// `(max items, map length, rehash)` where `length` and `rehash` are twin
/// primes and `length >= 2 * max items + 1`.
const PRIME_PAIRS: &[(usize, usize, usize)] = &[
    (8, 19, 17),
    (16, 43, 41),
    (32, 73, 71),
    (64, 139, 137),
    (128, 271, 269),
    (256, 523, 521),
    (512, 1033, 1031),
    (1024, 2083, 2081),
    (2048, 4129, 4127),
    (4096, 8221, 8219),
    (8192, 16453, 16451),
    (16384, 32803, 32801),
    (32768, 65539, 65537),
    (65536, 131113, 131111),
    (131072, 262153, 262151),
    (262144, 524353, 524351),
    (524288, 1048891, 1048889),
    (1048576, 2097259, 2097257),
    (2097152, 4194583, 4194581),
    (4194304, 8388619, 8388617),
    (8388608, 16777291, 16777289),
    (16777216, 33554503, 33554501),
    (33554432, 67109323, 67109321),
];

/// 32-bit FNV-1a hash of an item name.
pub fn name_hash(name: &str) -> i32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    let mut h = OFFSET_BASIS;
    for b in name.bytes() {
        h ^= b as u32;
        h = h.wrapping_mul(PRIME);
    }
    h as i32
}

/// Table geometry stored in front of the slot array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapParams {
    pub length: usize,
    pub rehash: usize,
}

impl MapParams {
    /// Smallest table that keeps the load factor at or below one half.
    pub fn for_items(n_items: usize) -> Result<MapParams> {
        PRIME_PAIRS
            .iter()
            .find(|(max, _, _)| *max >= n_items)
            .map(|&(_, length, rehash)| MapParams { length, rehash })
            .ok_or_else(|| {
                GisError::TooLarge(format!("{} items exceed the key map capacity", n_items))
            })
    }

    /// Byte size of the serialized map including its two parameter fields.
    pub fn byte_size(&self) -> usize {
        8 + 4 * self.length
    }
}

/// Double-hashing probe sequence for `hash`.
///
/// Starts at `h mod length` and advances by `1 + (h mod rehash)`, where `h`
/// is the hash reinterpreted as unsigned. Since `length` is prime and the
/// step is smaller than `length`, the first `length` positions are distinct.
#[derive(Debug, Clone)]
pub struct Probe {
    idx: usize,
    step: usize,
    length: usize,
}

pub fn probe(hash: i32, params: MapParams) -> Probe {
    let h = hash as u32 as usize;
    Probe {
        idx: h % params.length,
        step: 1 + h % params.rehash,
        length: params.length,
    }
}

impl Iterator for Probe {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        let idx = self.idx;
        self.idx = (self.idx + self.step) % self.length;
        Some(idx)
    }
}

/// Place `(hash, item offset)` entries into a slot array.
pub fn build_slots(entries: &[(i32, usize)], params: MapParams) -> Result<Vec<i32>> {
    let mut slots = vec![EMPTY; params.length];
    for &(hash, offset) in entries {
        let offset = to_i32(offset, "item offset")?;
        let slot = probe(hash, params)
            .take(params.length)
            .find(|&i| slots[i] == EMPTY)
            .ok_or_else(|| GisError::TooLarge("key map is full".into()))?;
        slots[slot] = offset;
    }
    Ok(slots)
}

/// Serialize `mapLength mapRehash { offset }*`.
pub fn write_slots(buf: &mut BytesMut, params: MapParams, slots: &[i32]) -> Result<()> {
    buf.put_i32(to_i32(params.length, "map length")?);
    buf.put_i32(to_i32(params.rehash, "map rehash")?);
    for &slot in slots {
        buf.put_i32(slot);
    }
    Ok(())
}

/// Read the map parameters stored at `off`.
pub fn read_params(buf: &[u8], off: usize) -> Result<MapParams> {
    let length = read_i32(buf, off)?;
    let rehash = read_i32(buf, off + 4)?;
    if length <= 0 || rehash <= 0 || rehash >= length {
        return Err(GisError::format(format!(
            "invalid key map parameters length={} rehash={}",
            length, rehash
        )));
    }
    Ok(MapParams {
        length: length as usize,
        rehash: rehash as usize,
    })
}

/// Look up the item whose name hashes to `hash` in the slot array at
/// `slots_off`. `is_match` decides whether a candidate item offset holds the
/// requested key.
///
/// An empty slot ends the search with `Ok(None)`. A sequence that inspects
/// more than `n_items` occupied slots cannot come from a well-formed table
/// and is reported as [`GisError::Corrupted`].
pub fn lookup<F>(
    buf: &[u8],
    slots_off: usize,
    params: MapParams,
    n_items: usize,
    hash: i32,
    mut is_match: F,
) -> Result<Option<usize>>
where
    F: FnMut(usize) -> Result<bool>,
{
    for slot in probe(hash, params).take(n_items + 1) {
        match read_offset(buf, slots_off + 4 * slot)? {
            None => return Ok(None),
            Some(item_off) => {
                if is_match(item_off)? {
                    return Ok(Some(item_off));
                }
            }
        }
    }
    Err(GisError::corrupted(format!(
        "key map probe for hash {:#010x} did not terminate after {} slots",
        hash as u32,
        n_items + 1
    )))
}
