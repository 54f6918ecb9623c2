//! BLAKE2b `F` compression function (EIP-152).

use super::PrecompileError;

const INPUT_LEN: usize = 213;

const IV: [u64; 8] = [
    0x6a09e667f3bcc908,
    0xbb67ae8584caa73b,
    0x3c6ef372fe94f82b,
    0xa54ff53a5f1d36f1,
    0x510e527fade682d1,
    0x9b05688c2b3e6c1f,
    0x1f83d9abfb41bd6b,
    0x5be0cd19137e2179,
];

const SIGMA: [[usize; 16]; 10] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
    [14, 10, 4, 8, 9, 15, 13, 6, 1, 12, 0, 2, 11, 7, 5, 3],
    [11, 8, 12, 0, 5, 2, 15, 13, 10, 14, 3, 6, 7, 1, 9, 4],
    [7, 9, 3, 1, 13, 12, 11, 14, 2, 6, 5, 10, 4, 0, 15, 8],
    [9, 0, 5, 7, 2, 4, 10, 15, 14, 1, 11, 12, 6, 8, 3, 13],
    [2, 12, 6, 10, 0, 11, 8, 3, 4, 13, 7, 5, 15, 14, 1, 9],
    [12, 5, 1, 15, 14, 13, 4, 10, 0, 7, 6, 3, 9, 2, 8, 11],
    [13, 11, 7, 14, 12, 1, 3, 9, 5, 0, 15, 4, 8, 6, 2, 10],
    [6, 15, 14, 9, 11, 3, 0, 8, 12, 2, 13, 7, 1, 4, 10, 5],
    [10, 2, 8, 4, 7, 6, 1, 5, 15, 11, 9, 14, 3, 12, 13, 0],
];

/// One gas per round; malformed input is priced at zero and fails on execution.
pub(super) fn gas_cost(input: &[u8]) -> u64 {
    if input.len() != INPUT_LEN {
        return 0;
    }
    rounds(input) as u64
}

fn rounds(input: &[u8]) -> u32 {
    u32::from_be_bytes([input[0], input[1], input[2], input[3]])
}

fn read_words<const N: usize>(bytes: &[u8]) -> [u64; N] {
    let mut words = [0u64; N];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(8)) {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(chunk);
        *word = u64::from_le_bytes(buf);
    }
    words
}

pub(super) fn compress(input: &[u8]) -> Result<Vec<u8>, PrecompileError> {
    if input.len() != INPUT_LEN {
        return Err(PrecompileError::InvalidInput("blake2f input length"));
    }
    let last = match input[212] {
        0 => false,
        1 => true,
        _ => return Err(PrecompileError::InvalidInput("blake2f final block flag")),
    };

    let mut h = read_words::<8>(&input[4..68]);
    let m = read_words::<16>(&input[68..196]);
    let t = read_words::<2>(&input[196..212]);

    f(&mut h, &m, t, last, rounds(input));

    Ok(h.iter().flat_map(|word| word.to_le_bytes()).collect())
}

fn f(h: &mut [u64; 8], m: &[u64; 16], t: [u64; 2], last: bool, rounds: u32) {
    let mut v = [0u64; 16];
    v[..8].copy_from_slice(h);
    v[8..].copy_from_slice(&IV);
    v[12] ^= t[0];
    v[13] ^= t[1];
    if last {
        v[14] = !v[14];
    }

    for round in 0..rounds as usize {
        let s = &SIGMA[round % 10];
        g(&mut v, 0, 4, 8, 12, m[s[0]], m[s[1]]);
        g(&mut v, 1, 5, 9, 13, m[s[2]], m[s[3]]);
        g(&mut v, 2, 6, 10, 14, m[s[4]], m[s[5]]);
        g(&mut v, 3, 7, 11, 15, m[s[6]], m[s[7]]);
        g(&mut v, 0, 5, 10, 15, m[s[8]], m[s[9]]);
        g(&mut v, 1, 6, 11, 12, m[s[10]], m[s[11]]);
        g(&mut v, 2, 7, 8, 13, m[s[12]], m[s[13]]);
        g(&mut v, 3, 4, 9, 14, m[s[14]], m[s[15]]);
    }

    for i in 0..8 {
        h[i] ^= v[i] ^ v[i + 8];
    }
}

fn g(v: &mut [u64; 16], a: usize, b: usize, c: usize, d: usize, x: u64, y: u64) {
    v[a] = v[a].wrapping_add(v[b]).wrapping_add(x);
    v[d] = (v[d] ^ v[a]).rotate_right(32);
    v[c] = v[c].wrapping_add(v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(24);
    v[a] = v[a].wrapping_add(v[b]).wrapping_add(y);
    v[d] = (v[d] ^ v[a]).rotate_right(16);
    v[c] = v[c].wrapping_add(v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(63);
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    /// BLAKE2b-512("abc") as a single compression of the parameterized IV.
    fn abc_input(rounds: u32, last: u8) -> Vec<u8> {
        let mut input = rounds.to_be_bytes().to_vec();
        let mut h = IV;
        h[0] ^= 0x0101_0040;
        for word in h {
            input.extend_from_slice(&word.to_le_bytes());
        }
        let mut m = [0u8; 128];
        m[..3].copy_from_slice(b"abc");
        input.extend_from_slice(&m);
        input.extend_from_slice(&3u64.to_le_bytes());
        input.extend_from_slice(&0u64.to_le_bytes());
        input.push(last);
        input
    }

    #[test]
    fn test_compress_abc() {
        let input = abc_input(12, 1);
        assert_eq!(gas_cost(&input), 12);
        assert_eq!(
            hex::encode(compress(&input).unwrap()),
            "ba80a53f981c4d0d6a2797b69f12f6e94c212f14685ac4b74b12bb6fdbffa2d1\
             7d87c5392aab792dc252d5de4533cc9518d38aa8dbf1925ab92386edd4009923"
        );
    }

    #[test]
    fn test_flags_and_rounds_matter() {
        let a = compress(&abc_input(12, 0)).unwrap();
        let b = compress(&abc_input(12, 1)).unwrap();
        let c = compress(&abc_input(1, 1)).unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);

        // zero rounds only folds the state halves
        assert_eq!(compress(&abc_input(0, 0)).unwrap().len(), 64);
    }

    #[test]
    fn test_invalid_input() {
        assert!(compress(&[0u8; 212]).is_err());
        assert!(compress(&abc_input(12, 2)).is_err());
        assert_eq!(gas_cost(&[0u8; 10]), 0);
    }
}
