//! Core wyhash (final 4) routines
//!
//! All arithmetic wraps modulo 2^64 and reads are little-endian, so results are
//! identical on every platform.

/// Default secret for the mixing rounds
pub const SECRET: [u64; 4] = [
    0x2d35_8dcc_aa6c_78a5,
    0x8bb8_4b93_962e_acc9,
    0x4b33_a62e_d433_d4a3,
    0x4d5a_2da5_1de1_aa47,
];

/// Width of one bulk stripe, consumed by three independent lanes
const STRIPE: usize = 48;

/// Full 128-bit product of `a` and `b`, split into (low, high)
#[inline(always)]
fn mum(a: u64, b: u64) -> (u64, u64) {
    let r = (a as u128).wrapping_mul(b as u128);
    (r as u64, (r >> 64) as u64)
}

/// Multiply and fold the halves together
#[inline(always)]
fn mix(a: u64, b: u64) -> u64 {
    let (lo, hi) = mum(a, b);
    lo ^ hi
}

#[inline(always)]
fn read8(p: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&p[at..at + 8]);
    u64::from_le_bytes(buf)
}

#[inline(always)]
fn read4(p: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&p[at..at + 4]);
    u32::from_le_bytes(buf) as u64
}

/// Spread 1..=3 bytes over a single word: first, middle and last byte
#[inline(always)]
fn read3(p: &[u8]) -> u64 {
    let k = p.len();
    ((p[0] as u64) << 16) | ((p[k >> 1] as u64) << 8) | p[k - 1] as u64
}

/// Hash `data` with `seed` using the default secret
pub fn hash(data: &[u8], seed: u64) -> u64 {
    hash_with_secret(data, seed, &SECRET)
}

/// Hash the UTF-8 encoding of `s`; identical to `hash(s.as_bytes(), seed)`
pub fn hash_str(s: &str, seed: u64) -> u64 {
    hash(s.as_bytes(), seed)
}

/// Hash `data` with an explicit secret
pub fn hash_with_secret(data: &[u8], seed: u64, secret: &[u64; 4]) -> u64 {
    let len = data.len();
    let mut seed = seed ^ mix(seed ^ secret[0], secret[1]);

    let (a, b) = if len <= 16 {
        if len >= 4 {
            let quarter = (len >> 3) << 2;
            (
                (read4(data, 0) << 32) | read4(data, quarter),
                (read4(data, len - 4) << 32) | read4(data, len - 4 - quarter),
            )
        } else if len > 0 {
            (read3(data), 0)
        } else {
            (0, 0)
        }
    } else {
        let mut offset = 0;
        let mut remaining = len;

        if remaining > STRIPE {
            let mut see1 = seed;
            let mut see2 = seed;
            while remaining > STRIPE {
                seed = mix(
                    read8(data, offset) ^ secret[1],
                    read8(data, offset + 8) ^ seed,
                );
                see1 = mix(
                    read8(data, offset + 16) ^ secret[2],
                    read8(data, offset + 24) ^ see1,
                );
                see2 = mix(
                    read8(data, offset + 32) ^ secret[3],
                    read8(data, offset + 40) ^ see2,
                );
                offset += STRIPE;
                remaining -= STRIPE;
            }
            seed ^= see1 ^ see2;
        }

        while remaining > 16 {
            seed = mix(
                read8(data, offset) ^ secret[1],
                read8(data, offset + 8) ^ seed,
            );
            offset += 16;
            remaining -= 16;
        }

        // The tail always covers the last 16 bytes, overlapping consumed input
        (read8(data, len - 16), read8(data, len - 8))
    };

    let (lo, hi) = mum(a ^ secret[1], b ^ seed);
    mix(lo ^ secret[0] ^ len as u64, hi ^ secret[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_folds_high_and_low() {
        // 2^63 * 4 = 2^65 -> low 0, high 2
        assert_eq!(mum(1 << 63, 4), (0, 2));
        assert_eq!(mix(1 << 63, 4), 2);
        assert_eq!(mix(u64::MAX, u64::MAX), 1 ^ (u64::MAX - 1));
    }

    #[test]
    fn test_read3_short_inputs() {
        assert_eq!(read3(&[0xAB]), 0xAB_AB_AB);
        assert_eq!(read3(&[0x01, 0x02]), 0x01_02_02);
        assert_eq!(read3(&[0x01, 0x02, 0x03]), 0x01_02_03);
    }

    #[test]
    fn test_reference_vectors() {
        // Published wyhash final 4 vectors, seed equals the vector index
        let vectors: [(&[u8], u64); 7] = [
            (b"", 0x93228a4de0eec5a2),
            (b"a", 0xc5bac3db178713c4),
            (b"abc", 0xa97f2f7b1d9b3314),
            (b"message digest", 0x786d1f1df3801df4),
            (b"abcdefghijklmnopqrstuvwxyz", 0xdca5a8138ad37c87),
            (
                b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789",
                0xb9e734f117cfaf70,
            ),
            (
                b"12345678901234567890123456789012345678901234567890123456789012345678901234567890",
                0x6cc5eab49a92d617,
            ),
        ];

        for (seed, (input, expected)) in vectors.iter().enumerate() {
            assert_eq!(hash(input, seed as u64), *expected, "vector {seed}");
        }
    }
}
