use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Printable ASCII: digits, letters, punctuation, then whitespace.
pub const PRINTABLE: &[u8] = b"0123456789\
abcdefghijklmnopqrstuvwxyz\
ABCDEFGHIJKLMNOPQRSTUVWXYZ\
!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~ \t\n\r\x0b\x0c";

/// Source of synthetic payload bytes for decoys.
pub trait PayloadSource {
    fn payload(&mut self, len: usize) -> Vec<u8>;
}

impl<S: PayloadSource + ?Sized> PayloadSource for &mut S {
    fn payload(&mut self, len: usize) -> Vec<u8> {
        (**self).payload(len)
    }
}

/// Draws each byte uniformly from [`PRINTABLE`].
pub struct PrintablePayload<R> {
    rng: R,
}

impl<R: Rng> PrintablePayload<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl PrintablePayload<StdRng> {
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    /// Reproducible stream, e.g. for `--seed`.
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> PayloadSource for PrintablePayload<R> {
    fn payload(&mut self, len: usize) -> Vec<u8> {
        (0..len)
            .map(|_| *PRINTABLE.choose(&mut self.rng).unwrap_or(&b' '))
            .collect()
    }
}

/// Repeats one byte. Handy when the exact bytes should not matter.
#[derive(Debug, Clone, Copy)]
pub struct FixedPayload(pub u8);

impl PayloadSource for FixedPayload {
    fn payload(&mut self, len: usize) -> Vec<u8> {
        vec![self.0; len]
    }
}
