//! FF1 format-preserving encryption (NIST SP 800-38G).
//!
//! The ciphertext has the same length as the plaintext and uses the same
//! alphabet. The round function is an AES CBC-MAC over a fixed header block
//! `P` and a per-round block `Q`, expanded with AES-ECB to `d` bytes.
//!
//! Numeral-string arithmetic uses [`BigUint`]: `radix^m` overflows machine
//! words for long inputs or large radices.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use std::sync::Arc;

use aes::{Aes128, Aes192, Aes256};
use num::{BigUint, Integer};
use thiserror::Error;

use super::alphabet::Alphabet;

/// Smallest supported radix.
pub const MIN_RADIX: u32 = 2;

/// Largest supported radix (`2^16`).
pub const MAX_RADIX: u32 = 65_536;

/// Minimum domain size `radix^n` accepted for encryption.
pub const MIN_DOMAIN_SIZE: u64 = 100;

/// Longest numeral string accepted. Round cost grows with the square of the
/// length, so this bounds the CPU time of a single call.
pub const MAX_LEN: usize = 4096;

const MIN_LEN: usize = 2;
const ROUNDS: u8 = 10;
const BLOCK_LEN: usize = 16;

/// Errors produced by the FF1 layer. All are raised before any round runs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FpeError {
    /// Radix outside `[2, 65536]` or larger than the configured alphabet.
    #[error("unsupported radix {0}")]
    InvalidRadix(u32),

    /// `radix^len` is below [`MIN_DOMAIN_SIZE`], or the input is shorter than two numerals.
    #[error("domain too small: {len} numerals of radix {radix}")]
    DomainTooSmall { radix: u32, len: usize },

    #[error("invalid character {ch:?} at position {position} for radix {radix}")]
    InvalidCharacter {
        ch: char,
        position: usize,
        radix: u32,
    },

    #[error("invalid numeral {numeral} at position {position} for radix {radix}")]
    InvalidNumeral {
        numeral: u32,
        position: usize,
        radix: u32,
    },

    #[error("invalid key length: {0} bytes (expected 16, 24 or 32)")]
    InvalidKeyLength(usize),

    #[error("invalid tweak length: expected {expected} bytes, got {actual}")]
    InvalidTweakLength { expected: usize, actual: usize },

    #[error("input of {0} numerals exceeds the maximum of {MAX_LEN}")]
    InputTooLong(usize),

    #[error("invalid alphabet: {0}")]
    InvalidAlphabet(String),
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Encrypt,
    Decrypt,
}

/// AES with one of the three standard key sizes.
enum BlockCipher {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl BlockCipher {
    fn new(key: &[u8]) -> Result<Self, FpeError> {
        let cipher = match key.len() {
            16 => Aes128::new_from_slice(key).map(Self::Aes128),
            24 => Aes192::new_from_slice(key).map(Self::Aes192),
            32 => Aes256::new_from_slice(key).map(Self::Aes256),
            len => return Err(FpeError::InvalidKeyLength(len)),
        };
        cipher.map_err(|_| FpeError::InvalidKeyLength(key.len()))
    }

    fn encrypt_block(&self, block: &mut [u8; BLOCK_LEN]) {
        let block = GenericArray::from_mut_slice(&mut block[..]);
        match self {
            Self::Aes128(c) => c.encrypt_block(block),
            Self::Aes192(c) => c.encrypt_block(block),
            Self::Aes256(c) => c.encrypt_block(block),
        }
    }

    /// CBC-MAC with a zero IV. `data` is always a whole number of blocks.
    fn cbc_mac(&self, data: &[u8]) -> [u8; BLOCK_LEN] {
        let mut y = [0u8; BLOCK_LEN];
        for chunk in data.chunks_exact(BLOCK_LEN) {
            y.iter_mut().zip(chunk).for_each(|(a, b)| *a ^= b);
            self.encrypt_block(&mut y);
        }
        y
    }
}

/// An FF1 cipher bound to a radix, key, tweak and alphabet.
pub struct Ff1 {
    radix: u32,
    tweak: Vec<u8>,
    cipher: BlockCipher,
    alphabet: Arc<Alphabet>,
}

impl std::fmt::Debug for Ff1 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ff1")
            .field("radix", &self.radix)
            .field("tweak_len", &self.tweak.len())
            .finish_non_exhaustive()
    }
}

impl Ff1 {
    /// Create a cipher over the default alphabet.
    ///
    /// # Errors
    ///
    /// See [`Ff1::with_alphabet`].
    pub fn new(radix: u32, tweak_len: usize, key: &[u8], tweak: &[u8]) -> Result<Self, FpeError> {
        Self::with_alphabet(radix, tweak_len, key, tweak, Arc::new(Alphabet::default()))
    }

    /// Create a cipher whose string form uses `alphabet`.
    ///
    /// # Errors
    ///
    /// - [`FpeError::InvalidRadix`] if `radix` is outside `[2, 65536]` or
    ///   exceeds the alphabet size.
    /// - [`FpeError::InvalidTweakLength`] if `tweak` is not `tweak_len` bytes.
    /// - [`FpeError::InvalidKeyLength`] if `key` is not 16, 24 or 32 bytes.
    pub fn with_alphabet(
        radix: u32,
        tweak_len: usize,
        key: &[u8],
        tweak: &[u8],
        alphabet: Arc<Alphabet>,
    ) -> Result<Self, FpeError> {
        if !(MIN_RADIX..=MAX_RADIX).contains(&radix) || radix as usize > alphabet.len() {
            return Err(FpeError::InvalidRadix(radix));
        }
        if tweak.len() != tweak_len || u32::try_from(tweak_len).is_err() {
            return Err(FpeError::InvalidTweakLength {
                expected: tweak_len,
                actual: tweak.len(),
            });
        }
        let cipher = BlockCipher::new(key)?;
        Ok(Self {
            radix,
            tweak: tweak.to_vec(),
            cipher,
            alphabet,
        })
    }

    /// Encrypt a string over the cipher's alphabet.
    ///
    /// # Errors
    ///
    /// [`FpeError::DomainTooSmall`], [`FpeError::InvalidCharacter`] or
    /// [`FpeError::InputTooLong`].
    pub fn encrypt(&self, plaintext: &str) -> Result<String, FpeError> {
        self.run_str(plaintext, Direction::Encrypt)
    }

    /// Decrypt a string produced by [`Ff1::encrypt`].
    ///
    /// # Errors
    ///
    /// Same as [`Ff1::encrypt`].
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, FpeError> {
        self.run_str(ciphertext, Direction::Decrypt)
    }

    /// Encrypt a numeral string directly.
    ///
    /// # Errors
    ///
    /// [`FpeError::DomainTooSmall`], [`FpeError::InvalidNumeral`] or
    /// [`FpeError::InputTooLong`].
    pub fn encrypt_numerals(&self, numerals: &[u32]) -> Result<Vec<u32>, FpeError> {
        self.validate_numerals(numerals)?;
        Ok(self.feistel(numerals, Direction::Encrypt))
    }

    /// Decrypt a numeral string directly.
    ///
    /// # Errors
    ///
    /// Same as [`Ff1::encrypt_numerals`].
    pub fn decrypt_numerals(&self, numerals: &[u32]) -> Result<Vec<u32>, FpeError> {
        self.validate_numerals(numerals)?;
        Ok(self.feistel(numerals, Direction::Decrypt))
    }

    fn run_str(&self, input: &str, direction: Direction) -> Result<String, FpeError> {
        self.check_length(input.chars().count())?;
        let numerals = self.alphabet.to_numerals(input, self.radix)?;
        let output = self.feistel(&numerals, direction);
        Ok(self.alphabet.render(&output))
    }

    fn validate_numerals(&self, numerals: &[u32]) -> Result<(), FpeError> {
        self.check_length(numerals.len())?;
        match numerals.iter().position(|&numeral| numeral >= self.radix) {
            Some(position) => Err(FpeError::InvalidNumeral {
                numeral: numerals[position],
                position,
                radix: self.radix,
            }),
            None => Ok(()),
        }
    }

    fn check_length(&self, len: usize) -> Result<(), FpeError> {
        if len > MAX_LEN {
            return Err(FpeError::InputTooLong(len));
        }
        if len < MIN_LEN || !domain_at_least(self.radix, len, MIN_DOMAIN_SIZE) {
            return Err(FpeError::DomainTooSmall {
                radix: self.radix,
                len,
            });
        }
        Ok(())
    }

    /// The 10-round Feistel network. Input is already validated.
    fn feistel(&self, x: &[u32], direction: Direction) -> Vec<u32> {
        let n = x.len();
        let u = n / 2;
        let v = n - u;

        let radix = BigUint::from(self.radix);
        let modulus_u = radix.pow(u as u32);
        let modulus_v = radix.pow(v as u32);

        // b = ceil(ceil(v * log2(radix)) / 8), computed exactly.
        let b = ((modulus_v.clone() - 1u32).bits() as usize).div_ceil(8);
        let d = 4 * b.div_ceil(4) + 4;

        // P || Q, with Q's round byte and numeral tail rewritten every round.
        let t = self.tweak.len();
        let pad = (BLOCK_LEN - (t + b + 1) % BLOCK_LEN) % BLOCK_LEN;
        let mut block = self.header(u, n);
        block.extend_from_slice(&self.tweak);
        block.resize(BLOCK_LEN + t + pad + 1 + b, 0);

        let mut a = num_radix(&x[..u], &radix);
        let mut b_half = num_radix(&x[u..], &radix);

        match direction {
            Direction::Encrypt => {
                for i in 0..ROUNDS {
                    let modulus = if i % 2 == 0 { &modulus_u } else { &modulus_v };
                    let y = self.round_value(&mut block, i, &b_half, b, d);
                    let c = (a + y) % modulus;
                    a = std::mem::replace(&mut b_half, c);
                }
            }
            Direction::Decrypt => {
                for i in (0..ROUNDS).rev() {
                    let modulus = if i % 2 == 0 { &modulus_u } else { &modulus_v };
                    let y = self.round_value(&mut block, i, &a, b, d) % modulus;
                    let c = (&b_half + modulus - y) % modulus;
                    b_half = std::mem::replace(&mut a, c);
                }
            }
        }

        let mut out = str_radix(a, &radix, u);
        out.extend(str_radix(b_half, &radix, v));
        out
    }

    /// `P = [1]^1 || [2]^1 || [1]^1 || [radix]^3 || [10]^1 || [u mod 256]^1 || [n]^4 || [t]^4`.
    fn header(&self, u: usize, n: usize) -> Vec<u8> {
        let mut p = Vec::with_capacity(BLOCK_LEN * 2 + self.tweak.len());
        p.extend_from_slice(&[1, 2, 1]);
        p.extend_from_slice(&self.radix.to_be_bytes()[1..]);
        p.push(ROUNDS);
        p.push((u % 256) as u8);
        p.extend_from_slice(&(n as u32).to_be_bytes());
        p.extend_from_slice(&(self.tweak.len() as u32).to_be_bytes());
        p
    }

    /// Compute `y = NUM(S)` for one round, where `half` is the unchanged half.
    fn round_value(
        &self,
        block: &mut [u8],
        round: u8,
        half: &BigUint,
        b: usize,
        d: usize,
    ) -> BigUint {
        let len = block.len();
        block[len - b - 1] = round;
        let numeral_bytes = half.to_bytes_be();
        let tail = &mut block[len - b..];
        tail.fill(0);
        tail[b - numeral_bytes.len()..].copy_from_slice(&numeral_bytes);

        let r = self.cipher.cbc_mac(block);

        let mut s = Vec::with_capacity(d + BLOCK_LEN);
        s.extend_from_slice(&r);
        let mut counter: u128 = 1;
        while s.len() < d {
            let mut expanded = r;
            expanded
                .iter_mut()
                .zip(counter.to_be_bytes())
                .for_each(|(x, c)| *x ^= c);
            self.cipher.encrypt_block(&mut expanded);
            s.extend_from_slice(&expanded);
            counter += 1;
        }
        s.truncate(d);
        BigUint::from_bytes_be(&s)
    }
}

/// `NUM_radix(X)`: most significant numeral first.
fn num_radix(numerals: &[u32], radix: &BigUint) -> BigUint {
    numerals
        .iter()
        .fold(BigUint::default(), |acc, &numeral| acc * radix + numeral)
}

/// `STR^m_radix(x)`: `m` numerals, left-padded with zeros. Requires `x < radix^m`.
fn str_radix(mut value: BigUint, radix: &BigUint, m: usize) -> Vec<u32> {
    let mut out = vec![0u32; m];
    for slot in out.iter_mut().rev() {
        let (quotient, digit) = value.div_rem(radix);
        *slot = digit.to_u32_digits().first().copied().unwrap_or(0);
        value = quotient;
    }
    out
}

/// Whether `radix^len >= floor`, without materialising the full power.
fn domain_at_least(radix: u32, len: usize, floor: u64) -> bool {
    let mut size: u64 = 1;
    for _ in 0..len {
        size = size.saturating_mul(u64::from(radix));
        if size >= floor {
            return true;
        }
    }
    size >= floor
}
