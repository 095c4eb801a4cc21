// tantrums-core - Value model, heap registry, bytecode chunks and built-in natives for Tantrums
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Hash functions for values and string keys.
//!
//! Strings use a Murmur3-style finalised mix over their bytes. The result is
//! never zero, so zero stays reserved for empty hash slots. Integers and
//! floats go through an integer-Murmur finaliser to avoid clustering for
//! sequential keys.

/// Murmur3 32-bit hash over a byte slice (seed 0). Never returns zero.
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h: u32 = 0;
    let mut chunks = bytes.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);
        h ^= k;
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let rest = chunks.remainder();
    if !rest.is_empty() {
        let mut k: u32 = 0;
        for (i, &b) in rest.iter().enumerate() {
            k |= (b as u32) << (i * 8);
        }
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);
        h ^= k;
    }

    h ^= bytes.len() as u32;
    h = fmix32(h);
    if h == 0 { 1 } else { h }
}

/// Finalise a 32-bit hash (Murmur3 fmix32).
fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Finalise a 64-bit value and fold to 32 bits (Murmur3 fmix64).
fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

/// Hash an integer value.
pub fn hash_i64(v: i64) -> u32 {
    let mixed = fmix64(v as u64);
    (mixed ^ (mixed >> 32)) as u32
}

/// Hash a float value by its bit pattern. Negative zero is normalised to
/// zero first: the two compare equal, so they must hash equal.
pub fn hash_f64(v: f64) -> u32 {
    let v = if v == 0.0 { 0.0 } else { v };
    let mixed = fmix64(v.to_bits());
    (mixed ^ (mixed >> 32)) as u32
}
