//! Mapping between external strings and FF1 numeral strings.

use std::collections::HashMap;

use super::ff1::{FpeError, MAX_RADIX};

/// Default symbol order: digits, then lowercase, then uppercase letters.
///
/// Any radix up to 62 uses a prefix of this alphabet, so radix 10 is plain
/// decimal digits and radix 16 is lowercase hex.
pub const DEFAULT_ALPHABET: &str =
    "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// An ordered set of distinct symbols; symbol `i` represents numeral `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alphabet {
    symbols: Vec<char>,
    index: HashMap<char, u32>,
}

impl Alphabet {
    /// Build an alphabet from the characters of `symbols`, in order.
    ///
    /// # Errors
    ///
    /// Returns [`FpeError::InvalidAlphabet`] if fewer than two symbols are
    /// given, more than 65536 are given, or a symbol repeats.
    pub fn new(symbols: &str) -> Result<Self, FpeError> {
        let symbols: Vec<char> = symbols.chars().collect();
        if symbols.len() < 2 || symbols.len() > MAX_RADIX as usize {
            return Err(FpeError::InvalidAlphabet(format!(
                "expected between 2 and {MAX_RADIX} symbols, got {}",
                symbols.len()
            )));
        }

        let mut index = HashMap::with_capacity(symbols.len());
        for (numeral, &ch) in symbols.iter().enumerate() {
            if index.insert(ch, numeral as u32).is_some() {
                return Err(FpeError::InvalidAlphabet(format!(
                    "symbol {ch:?} appears more than once"
                )));
            }
        }
        Ok(Self { symbols, index })
    }

    /// Number of symbols, i.e. the largest radix this alphabet can express.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Convert `input` to numerals, rejecting any symbol whose numeral is not
    /// below `radix`.
    ///
    /// # Errors
    ///
    /// Returns [`FpeError::InvalidCharacter`] naming the first offending
    /// character and its position.
    pub fn to_numerals(&self, input: &str, radix: u32) -> Result<Vec<u32>, FpeError> {
        input
            .chars()
            .enumerate()
            .map(|(position, ch)| match self.index.get(&ch) {
                Some(&numeral) if numeral < radix => Ok(numeral),
                _ => Err(FpeError::InvalidCharacter {
                    ch,
                    position,
                    radix,
                }),
            })
            .collect()
    }

    /// Render numerals back to a string. Numerals must be below [`Self::len`].
    pub fn render(&self, numerals: &[u32]) -> String {
        numerals
            .iter()
            .map(|&numeral| self.symbols[numeral as usize])
            .collect()
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        let symbols: Vec<char> = DEFAULT_ALPHABET.chars().collect();
        let index = symbols
            .iter()
            .enumerate()
            .map(|(numeral, &ch)| (ch, numeral as u32))
            .collect();
        Self { symbols, index }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_alphabet_has_62_symbols() {
        assert_eq!(Alphabet::default().len(), 62);
        assert_eq!(Alphabet::default(), Alphabet::new(DEFAULT_ALPHABET).unwrap());
    }

    #[test]
    fn decimal_round_trip() {
        let alphabet = Alphabet::default();
        let numerals = alphabet.to_numerals("0429", 10).unwrap();
        assert_eq!(numerals, vec![0, 4, 2, 9]);
        assert_eq!(alphabet.render(&numerals), "0429");
    }

    #[test]
    fn rejects_symbol_outside_radix() {
        let err = Alphabet::default().to_numerals("12a4", 10).unwrap_err();
        assert_eq!(
            err,
            FpeError::InvalidCharacter {
                ch: 'a',
                position: 2,
                radix: 10
            }
        );
    }

    #[test]
    fn rejects_unknown_symbol() {
        let err = Alphabet::default().to_numerals("123-45", 10).unwrap_err();
        assert!(matches!(err, FpeError::InvalidCharacter { ch: '-', .. }));
    }

    #[test]
    fn custom_alphabet_order() {
        let alphabet = Alphabet::new("ACGT").unwrap();
        assert_eq!(alphabet.to_numerals("TGCA", 4).unwrap(), vec![3, 2, 1, 0]);
    }

    #[test]
    fn rejects_duplicate_symbols() {
        assert!(matches!(
            Alphabet::new("0120"),
            Err(FpeError::InvalidAlphabet(_))
        ));
    }

    #[test]
    fn rejects_single_symbol() {
        assert!(Alphabet::new("0").is_err());
    }
}
