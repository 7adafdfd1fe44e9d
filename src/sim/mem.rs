//! Core memory for the simulator.
//!
//! This module consists of:
//! - [`Core`]: the 32768-word magnetic core store.
//! - [`CoreInitStrategy`]: how the store is filled before any program runs.
//!
//! Core is addressed modulo 32768; every access masks the address to 15
//! bits. Note that [`Core`] does no breakpoint checking itself; the
//! simulator's [`read`]/[`write`] accessors layer that on top.
//!
//! [`read`]: super::Simulator::read
//! [`write`]: super::Simulator::write

use rand::rngs::StdRng;
use rand::Rng;

/// Number of words in core.
pub const CORE_SIZE: usize = 32768;

/// Mask applied to every core address (and to the program counter).
pub const ADDR_MASK: u16 = 0x7FFF;

/// The machine's core store: 32768 signed 16-bit words.
///
/// All addressing wraps modulo [`CORE_SIZE`]. The words are held in the heap
/// since they are too large for the stack.
#[derive(Debug, Clone)]
pub struct Core {
    data: Box<[i16; CORE_SIZE]>,
}

impl Core {
    /// Creates a new core store, filled by the provided filler.
    pub fn new(fill: &mut impl WordFiller) -> Self {
        Self {
            data: std::iter::repeat_with(|| fill.generate())
                .take(CORE_SIZE)
                .collect::<Box<_>>()
                .try_into()
                .unwrap_or_else(|_| unreachable!("iterator should have had {CORE_SIZE} elements")),
        }
    }

    /// Reads the word at the given address (modulo core size).
    pub fn get(&self, addr: u16) -> i16 {
        self.data[usize::from(addr & ADDR_MASK)]
    }

    /// Writes the word at the given address (modulo core size).
    pub fn set(&mut self, addr: u16, value: i16) {
        self.data[usize::from(addr & ADDR_MASK)] = value;
    }

    /// Loads a program image into core starting at `addr`, wrapping modulo
    /// core size.
    ///
    /// The image is a sequence of big-endian 16-bit words. An odd trailing
    /// byte is accepted and loaded as the high byte of a final word.
    pub fn load_image(&mut self, addr: u16, bytes: &[u8]) {
        let mut addr = addr;
        for pair in bytes.chunks(2) {
            let word = match *pair {
                [hi, lo] => i16::from_be_bytes([hi, lo]),
                [hi] => i16::from_be_bytes([hi, 0]),
                _ => unreachable!("chunks(2) yields 1 or 2 bytes"),
            };
            self.set(addr, word);
            addr = addr.wrapping_add(1) & ADDR_MASK;
        }
    }
}

impl Default for Core {
    /// Creates a zeroed core store.
    fn default() -> Self {
        Core::new(&mut 0i16)
    }
}

/// Trait for types that can generate the initial contents of a core word.
///
/// This is used with [`Core::new`] to fill the store before any program is
/// loaded.
pub trait WordFiller {
    /// Generate the data.
    fn generate(&mut self) -> i16;
}
impl WordFiller for () {
    /// Unseeded, non-deterministic values.
    fn generate(&mut self) -> i16 {
        rand::random()
    }
}
impl WordFiller for i16 {
    /// Fills every word with the given value.
    fn generate(&mut self) -> i16 {
        *self
    }
}
impl WordFiller for StdRng {
    /// Values from the standard RNG; seed it for deterministic fills.
    fn generate(&mut self) -> i16 {
        self.gen()
    }
}

/// Strategy used to fill [`Core`] when the simulator is created.
///
/// Magnetic core keeps whatever pattern it held at power-down, so the
/// default zero fill is a politeness, not a guarantee programs may rely on.
/// The scrambled strategies exist to shake out programs that read words
/// they never wrote.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum CoreInitStrategy {
    /// Every word zeroed.
    #[default]
    Zeroed,
    /// Every word random and non-deterministic.
    Unseeded,
    /// Every word random, derived from the given seed.
    Seeded {
        /// The seed for the RNG.
        seed: u64,
    },
    /// Every word set to a known value.
    Known {
        /// The fill value.
        value: i16,
    },
}

impl CoreInitStrategy {
    pub(super) fn generator(&self) -> impl WordFiller {
        use rand::SeedableRng;

        match self {
            CoreInitStrategy::Zeroed => CoreFiller::Known(0),
            CoreInitStrategy::Unseeded => CoreFiller::Unseeded,
            CoreInitStrategy::Seeded { seed } => CoreFiller::Seeded(Box::new(StdRng::seed_from_u64(*seed))),
            CoreInitStrategy::Known { value } => CoreFiller::Known(*value),
        }
    }
}

enum CoreFiller {
    Unseeded,
    Seeded(Box<StdRng>),
    Known(i16),
}
impl WordFiller for CoreFiller {
    fn generate(&mut self) -> i16 {
        match self {
            CoreFiller::Unseeded => ().generate(),
            CoreFiller::Seeded(r) => r.generate(),
            CoreFiller::Known(k) => k.generate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addressing_wraps() {
        let mut core = Core::default();
        core.set(0x8005, 0x1234);
        assert_eq!(core.get(0x0005), 0x1234);
    }

    #[test]
    fn load_image_big_endian() {
        let mut core = Core::default();
        core.load_image(10, &[0x10, 0x05, 0x00, 0x2A]);
        assert_eq!(core.get(10), 0x1005);
        assert_eq!(core.get(11), 0x002A);
    }

    #[test]
    fn load_image_odd_trailing_byte() {
        let mut core = Core::default();
        core.load_image(0, &[0x12, 0x34, 0x56]);
        assert_eq!(core.get(0), 0x1234);
        assert_eq!(core.get(1), 0x5600);
    }

    #[test]
    fn load_image_wraps_modulo_core() {
        let mut core = Core::default();
        core.load_image(0x7FFF, &[0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(core.get(0x7FFF), 0x0A0B);
        assert_eq!(core.get(0), 0x0C0D);
    }

    #[test]
    fn seeded_fill_is_deterministic() {
        let strat = CoreInitStrategy::Seeded { seed: 9 };
        let a = Core::new(&mut strat.generator());
        let b = Core::new(&mut strat.generator());
        for addr in (0..CORE_SIZE as u16).step_by(1021) {
            assert_eq!(a.get(addr), b.get(addr));
        }
    }
}
