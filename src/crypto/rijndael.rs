//! Rijndael block cipher with variable block length.
//!
//! AES fixes the block at 128 bits; the legacy container format uses the
//! original Rijndael with a 256-bit block and a 256-bit key, which no AES
//! implementation covers.  This is a straightforward byte-oriented
//! implementation of FIPS-197 generalised to Nb ∈ {4, 6, 8}.
//!
//! State layout follows the reference: input byte `i` lands in row `i % 4`,
//! column `i / 4`.

use zeroize::Zeroize;

use super::CryptoError;

const fn xtime(a: u8) -> u8 {
    let shifted = a << 1;
    if a & 0x80 != 0 { shifted ^ 0x1b } else { shifted }
}

const fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut p = 0u8;
    while b != 0 {
        if b & 1 != 0 {
            p ^= a;
        }
        a = xtime(a);
        b >>= 1;
    }
    p
}

/// Multiplicative inverse in GF(2^8) as x^254.
const fn gf_inv(x: u8) -> u8 {
    let mut result = 1u8;
    let mut base = x;
    let mut e = 254u8;
    while e > 0 {
        if e & 1 == 1 {
            result = gf_mul(result, base);
        }
        base = gf_mul(base, base);
        e >>= 1;
    }
    if x == 0 { 0 } else { result }
}

const fn build_sbox() -> [u8; 256] {
    let mut sbox = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let b = gf_inv(i as u8);
        sbox[i] = b
            ^ b.rotate_left(1)
            ^ b.rotate_left(2)
            ^ b.rotate_left(3)
            ^ b.rotate_left(4)
            ^ 0x63;
        i += 1;
    }
    sbox
}

const fn invert(sbox: &[u8; 256]) -> [u8; 256] {
    let mut inv = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        inv[sbox[i] as usize] = i as u8;
        i += 1;
    }
    inv
}

const SBOX: [u8; 256] = build_sbox();
const INV_SBOX: [u8; 256] = invert(&SBOX);

const MAX_BLOCK: usize = 32;

pub struct Rijndael {
    /// Block length in 32-bit words.
    nb:         usize,
    rounds:     usize,
    /// Expanded key, `nb * (rounds + 1)` words of 4 bytes.
    round_keys: Vec<[u8; 4]>,
}

impl Rijndael {
    /// Key and block lengths must each be 16, 24 or 32 bytes.
    pub fn new(key: &[u8], block_len: usize) -> Result<Self, CryptoError> {
        if !matches!(key.len(), 16 | 24 | 32) {
            return Err(CryptoError::InvalidKeyLength(key.len()));
        }
        if !matches!(block_len, 16 | 24 | 32) {
            return Err(CryptoError::InvalidBlockLength(block_len));
        }
        let nk = key.len() / 4;
        let nb = block_len / 4;
        let rounds = nk.max(nb) + 6;
        let total = nb * (rounds + 1);

        let mut w: Vec<[u8; 4]> = Vec::with_capacity(total);
        for chunk in key.chunks_exact(4) {
            w.push([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }

        let mut rcon = 1u8;
        for i in nk..total {
            let mut temp = w[i - 1];
            if i % nk == 0 {
                temp = [
                    SBOX[temp[1] as usize] ^ rcon,
                    SBOX[temp[2] as usize],
                    SBOX[temp[3] as usize],
                    SBOX[temp[0] as usize],
                ];
                rcon = xtime(rcon);
            } else if nk > 6 && i % nk == 4 {
                temp = temp.map(|b| SBOX[b as usize]);
            }
            let prev = w[i - nk];
            w.push([
                prev[0] ^ temp[0],
                prev[1] ^ temp[1],
                prev[2] ^ temp[2],
                prev[3] ^ temp[3],
            ]);
        }

        Ok(Self { nb, rounds, round_keys: w })
    }

    pub fn block_len(&self) -> usize {
        self.nb * 4
    }

    /// Encrypt one block in place.  `block.len()` must equal [`block_len`](Self::block_len).
    pub fn encrypt_block(&self, block: &mut [u8]) {
        debug_assert_eq!(block.len(), self.block_len());
        self.add_round_key(block, 0);
        for round in 1..self.rounds {
            sub_bytes(block, &SBOX);
            self.shift_rows(block);
            mix_columns(block);
            self.add_round_key(block, round);
        }
        sub_bytes(block, &SBOX);
        self.shift_rows(block);
        self.add_round_key(block, self.rounds);
    }

    /// Decrypt one block in place.
    pub fn decrypt_block(&self, block: &mut [u8]) {
        debug_assert_eq!(block.len(), self.block_len());
        self.add_round_key(block, self.rounds);
        for round in (1..self.rounds).rev() {
            self.inv_shift_rows(block);
            sub_bytes(block, &INV_SBOX);
            self.add_round_key(block, round);
            inv_mix_columns(block);
        }
        self.inv_shift_rows(block);
        sub_bytes(block, &INV_SBOX);
        self.add_round_key(block, 0);
    }

    fn add_round_key(&self, state: &mut [u8], round: usize) {
        let words = &self.round_keys[round * self.nb..(round + 1) * self.nb];
        for (c, word) in words.iter().enumerate() {
            for r in 0..4 {
                state[4 * c + r] ^= word[r];
            }
        }
    }

    fn shifts(&self) -> [usize; 4] {
        match self.nb {
            8 => [0, 1, 3, 4],
            _ => [0, 1, 2, 3],
        }
    }

    fn shift_rows(&self, state: &mut [u8]) {
        let nb = self.nb;
        let shifts = self.shifts();
        let mut tmp = [0u8; MAX_BLOCK];
        tmp[..4 * nb].copy_from_slice(state);
        for r in 1..4 {
            for c in 0..nb {
                state[4 * c + r] = tmp[4 * ((c + shifts[r]) % nb) + r];
            }
        }
    }

    fn inv_shift_rows(&self, state: &mut [u8]) {
        let nb = self.nb;
        let shifts = self.shifts();
        let mut tmp = [0u8; MAX_BLOCK];
        tmp[..4 * nb].copy_from_slice(state);
        for r in 1..4 {
            for c in 0..nb {
                state[4 * ((c + shifts[r]) % nb) + r] = tmp[4 * c + r];
            }
        }
    }
}

impl Drop for Rijndael {
    fn drop(&mut self) {
        for word in self.round_keys.iter_mut() {
            word.zeroize();
        }
    }
}

impl zeroize::ZeroizeOnDrop for Rijndael {}

impl std::fmt::Debug for Rijndael {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rijndael")
            .field("block_len", &self.block_len())
            .field("rounds", &self.rounds)
            .field("round_keys", &"[REDACTED]")
            .finish()
    }
}

fn sub_bytes(state: &mut [u8], table: &[u8; 256]) {
    for b in state.iter_mut() {
        *b = table[*b as usize];
    }
}

fn mix_columns(state: &mut [u8]) {
    for col in state.chunks_exact_mut(4) {
        let [a0, a1, a2, a3] = [col[0], col[1], col[2], col[3]];
        col[0] = gf_mul(a0, 2) ^ gf_mul(a1, 3) ^ a2 ^ a3;
        col[1] = a0 ^ gf_mul(a1, 2) ^ gf_mul(a2, 3) ^ a3;
        col[2] = a0 ^ a1 ^ gf_mul(a2, 2) ^ gf_mul(a3, 3);
        col[3] = gf_mul(a0, 3) ^ a1 ^ a2 ^ gf_mul(a3, 2);
    }
}

fn inv_mix_columns(state: &mut [u8]) {
    for col in state.chunks_exact_mut(4) {
        let [a0, a1, a2, a3] = [col[0], col[1], col[2], col[3]];
        col[0] = gf_mul(a0, 14) ^ gf_mul(a1, 11) ^ gf_mul(a2, 13) ^ gf_mul(a3, 9);
        col[1] = gf_mul(a0, 9) ^ gf_mul(a1, 14) ^ gf_mul(a2, 11) ^ gf_mul(a3, 13);
        col[2] = gf_mul(a0, 13) ^ gf_mul(a1, 9) ^ gf_mul(a2, 14) ^ gf_mul(a3, 11);
        col[3] = gf_mul(a0, 11) ^ gf_mul(a1, 13) ^ gf_mul(a2, 9) ^ gf_mul(a3, 14);
    }
}
