use crate::config::ConfigError;
use rand::Rng;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Highest bit position addressable inside a single byte.
const MAX_BIT_POSITION: u8 = 7;

/// Errors raised when a mutation cannot be drawn or applied to a buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// The operator needs at least one byte to address. Only `ByteInsert` and
    /// `ByteDelete` accept an empty buffer.
    #[error("{0} requires a non-empty input buffer")]
    EmptyInput(MutationOp),

    /// A hand-built `Mutation` addressed a byte outside the buffer it was applied to.
    #[error("{op} addresses index {index}, but the buffer holds {len} bytes")]
    OutOfBounds {
        op: MutationOp,
        index: usize,
        len: usize,
    },

    /// A hand-built bit-level `Mutation` named a bit position above 7.
    #[error("{op} addresses bit {bit}, but a byte only has bits 0..=7")]
    InvalidBit { op: MutationOp, bit: u8 },
}

/// The six byte/bit level operators. Operators carry no state; all randomness is
/// drawn at the point of use from the generator passed to [`MutationOp::draw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationOp {
    BitFlip,
    BitInsert,
    /// Clears one bit. The buffer never gets shorter.
    BitDelete,
    ByteFlip,
    ByteInsert,
    ByteDelete,
}

impl MutationOp {
    /// Every operator, bit-level first.
    pub const ALL: [MutationOp; 6] = [
        MutationOp::BitFlip,
        MutationOp::BitInsert,
        MutationOp::BitDelete,
        MutationOp::ByteFlip,
        MutationOp::ByteInsert,
        MutationOp::ByteDelete,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MutationOp::BitFlip => "BitFlip",
            MutationOp::BitInsert => "BitInsert",
            MutationOp::BitDelete => "BitDelete",
            MutationOp::ByteFlip => "ByteFlip",
            MutationOp::ByteInsert => "ByteInsert",
            MutationOp::ByteDelete => "ByteDelete",
        }
    }

    /// Draws every random choice this operator needs for `input` and returns them
    /// as a concrete [`Mutation`]. Draw order is index, then bit position, then value.
    ///
    /// # Errors
    /// `MutationError::EmptyInput` when `input` is empty and the operator has to
    /// address an existing byte (every operator except `ByteInsert` and `ByteDelete`).
    pub fn draw<R: Rng + ?Sized>(
        self,
        input: &[u8],
        rng: &mut R,
    ) -> Result<Mutation, MutationError> {
        let len = input.len();
        let mutation = match self {
            MutationOp::ByteInsert => Mutation::ByteInsert {
                index: rng.random_range(0..=len),
                value: rng.random(),
            },
            MutationOp::ByteDelete => Mutation::ByteDelete {
                index: (len > 0).then(|| rng.random_range(0..len)),
            },
            _ if len == 0 => return Err(MutationError::EmptyInput(self)),
            MutationOp::BitFlip => Mutation::BitFlip {
                index: rng.random_range(0..len),
                bit: rng.random_range(0..=MAX_BIT_POSITION),
            },
            MutationOp::BitInsert => Mutation::BitInsert {
                index: rng.random_range(0..len),
                bit: rng.random_range(0..=MAX_BIT_POSITION),
                value: rng.random_bool(0.5),
            },
            MutationOp::BitDelete => Mutation::BitDelete {
                index: rng.random_range(0..len),
                bit: rng.random_range(0..=MAX_BIT_POSITION),
            },
            MutationOp::ByteFlip => Mutation::ByteFlip {
                index: rng.random_range(0..len),
                value: rng.random(),
            },
        };
        Ok(mutation)
    }
}

impl fmt::Display for MutationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Granularity of a campaign. Fixed for the whole run.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MutationMode {
    #[default]
    Bit,
    Byte,
}

impl MutationMode {
    /// The three operators a candidate of this mode is drawn from.
    pub fn operators(&self) -> [MutationOp; 3] {
        match self {
            MutationMode::Bit => [
                MutationOp::BitFlip,
                MutationOp::BitInsert,
                MutationOp::BitDelete,
            ],
            MutationMode::Byte => [
                MutationOp::ByteFlip,
                MutationOp::ByteInsert,
                MutationOp::ByteDelete,
            ],
        }
    }
}

impl FromStr for MutationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bit" => Ok(MutationMode::Bit),
            "byte" => Ok(MutationMode::Byte),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}

impl fmt::Display for MutationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationMode::Bit => f.write_str("bit"),
            MutationMode::Byte => f.write_str("byte"),
        }
    }
}

/// One fully drawn edit. Applying it is a pure function of the input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    BitFlip { index: usize, bit: u8 },
    BitInsert { index: usize, bit: u8, value: bool },
    BitDelete { index: usize, bit: u8 },
    ByteFlip { index: usize, value: u8 },
    /// `index` may equal the buffer length, which appends.
    ByteInsert { index: usize, value: u8 },
    /// `None` is the empty-buffer case: nothing is removed.
    ByteDelete { index: Option<usize> },
}

impl Mutation {
    pub fn op(&self) -> MutationOp {
        match self {
            Mutation::BitFlip { .. } => MutationOp::BitFlip,
            Mutation::BitInsert { .. } => MutationOp::BitInsert,
            Mutation::BitDelete { .. } => MutationOp::BitDelete,
            Mutation::ByteFlip { .. } => MutationOp::ByteFlip,
            Mutation::ByteInsert { .. } => MutationOp::ByteInsert,
            Mutation::ByteDelete { .. } => MutationOp::ByteDelete,
        }
    }

    /// Byte index touched by this edit, if any.
    pub fn index(&self) -> Option<usize> {
        match *self {
            Mutation::BitFlip { index, .. }
            | Mutation::BitInsert { index, .. }
            | Mutation::BitDelete { index, .. }
            | Mutation::ByteFlip { index, .. }
            | Mutation::ByteInsert { index, .. } => Some(index),
            Mutation::ByteDelete { index } => index,
        }
    }

    /// Bit position touched by this edit, for the bit-level operators.
    pub fn bit(&self) -> Option<u8> {
        match *self {
            Mutation::BitFlip { bit, .. }
            | Mutation::BitInsert { bit, .. }
            | Mutation::BitDelete { bit, .. } => Some(bit),
            _ => None,
        }
    }

    /// Produces a new buffer with this edit applied. `input` is never modified.
    pub fn apply(&self, input: &[u8]) -> Result<Vec<u8>, MutationError> {
        let op = self.op();
        let len = input.len();
        let out_of_bounds = |index| MutationError::OutOfBounds { op, index, len };
        let mask = |bit: u8| {
            1u8.checked_shl(u32::from(bit))
                .ok_or(MutationError::InvalidBit { op, bit })
        };

        let mut output = input.to_vec();
        match *self {
            Mutation::BitFlip { index, bit } => {
                let byte = output.get_mut(index).ok_or_else(|| out_of_bounds(index))?;
                *byte ^= mask(bit)?;
            }
            Mutation::BitInsert { index, bit, value } => {
                let byte = output.get_mut(index).ok_or_else(|| out_of_bounds(index))?;
                let mask = mask(bit)?;
                *byte = (*byte & !mask) | if value { mask } else { 0 };
            }
            Mutation::BitDelete { index, bit } => {
                let byte = output.get_mut(index).ok_or_else(|| out_of_bounds(index))?;
                *byte &= !mask(bit)?;
            }
            Mutation::ByteFlip { index, value } => {
                let byte = output.get_mut(index).ok_or_else(|| out_of_bounds(index))?;
                *byte = value;
            }
            Mutation::ByteInsert { index, value } => {
                if index > len {
                    return Err(out_of_bounds(index));
                }
                output.insert(index, value);
            }
            Mutation::ByteDelete { index: None } => {}
            Mutation::ByteDelete { index: Some(index) } => {
                if index >= len {
                    return Err(out_of_bounds(index));
                }
                output.remove(index);
            }
        }
        Ok(output)
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Mutation::BitFlip { index, bit } | Mutation::BitDelete { index, bit } => {
                write!(f, "{} at index {index}, bit {bit}", self.op())
            }
            Mutation::BitInsert { index, bit, value } => write!(
                f,
                "{} at index {index}, bit {bit} set to {}",
                self.op(),
                u8::from(value)
            ),
            Mutation::ByteFlip { index, value } => {
                write!(f, "{} at index {index} to {value:#04x}", self.op())
            }
            Mutation::ByteInsert { index, value } => {
                write!(f, "{} at index {index}, inserted {value:#04x}", self.op())
            }
            Mutation::ByteDelete { index: Some(index) } => {
                write!(f, "{} at index {index}", self.op())
            }
            Mutation::ByteDelete { index: None } => {
                write!(f, "{} on empty input (unchanged)", self.op())
            }
        }
    }
}

/// The result of one mutator invocation: the new buffer plus the edit that made it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutated {
    pub bytes: Vec<u8>,
    pub mutation: Mutation,
    /// Value of the touched byte before the edit. `None` for inserts and for the
    /// empty-buffer delete.
    pub original: Option<u8>,
}

impl Mutated {
    /// Value of the touched byte after the edit, for the in-place operators.
    pub fn replacement(&self) -> Option<u8> {
        match self.mutation {
            Mutation::ByteDelete { .. } => None,
            Mutation::ByteInsert { value, .. } => Some(value),
            other => other.index().and_then(|i| self.bytes.get(i).copied()),
        }
    }
}

/// A `Mutator` turns one population member's bytes into a candidate's bytes.
///
/// Implementations must not keep hidden randomness: every choice comes from `rng`,
/// so a seeded generator reproduces a campaign exactly.
///
/// # Type Parameters
/// * `R`: The random number generator used for mutation decisions.
pub trait Mutator<R: Rng + ?Sized> {
    /// Draws and applies one mutation to `input`.
    ///
    /// # Errors
    /// Propagates `MutationError` when the chosen operator cannot address `input`
    /// (see [`MutationOp::draw`]).
    fn mutate(&mut self, input: &[u8], rng: &mut R) -> Result<Mutated, MutationError>;
}

fn mutate_with<R: Rng + ?Sized>(
    op: MutationOp,
    input: &[u8],
    rng: &mut R,
) -> Result<Mutated, MutationError> {
    let mutation = op.draw(input, rng)?;
    let bytes = mutation.apply(input)?;
    let original = match mutation {
        Mutation::ByteInsert { .. } => None,
        other => other.index().and_then(|i| input.get(i).copied()),
    };
    Ok(Mutated {
        bytes,
        mutation,
        original,
    })
}

/// Picks one of its mode's three operators uniformly per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeMutator {
    mode: MutationMode,
}

impl ModeMutator {
    pub fn new(mode: MutationMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> MutationMode {
        self.mode
    }
}

impl<R: Rng + ?Sized> Mutator<R> for ModeMutator {
    fn mutate(&mut self, input: &[u8], rng: &mut R) -> Result<Mutated, MutationError> {
        let operators = self.mode.operators();
        let op = operators[rng.random_range(0..operators.len())];
        mutate_with(op, input, rng)
    }
}

/// Always applies the same operator. Useful for exercising one operator in isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleOpMutator(pub MutationOp);

impl<R: Rng + ?Sized> Mutator<R> for SingleOpMutator {
    fn mutate(&mut self, input: &[u8], rng: &mut R) -> Result<Mutated, MutationError> {
        mutate_with(self.0, input, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn bit_flip_at_index_zero_bit_zero() {
        let mutation = Mutation::BitFlip { index: 0, bit: 0 };
        assert_eq!(mutation.apply(&[0x00, 0xFF]).unwrap(), vec![0x01, 0xFF]);
    }

    #[test]
    fn byte_insert_at_front() {
        let mutation = Mutation::ByteInsert {
            index: 0,
            value: 0xAA,
        };
        assert_eq!(mutation.apply(&[0x10]).unwrap(), vec![0xAA, 0x10]);
    }

    #[test]
    fn byte_delete_on_empty_input_is_unchanged() {
        let mut rng = ChaCha8Rng::from_seed([0u8; 32]);
        let mutation = MutationOp::ByteDelete.draw(&[], &mut rng).unwrap();
        assert_eq!(mutation, Mutation::ByteDelete { index: None });
        assert_eq!(mutation.apply(&[]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn byte_insert_accepts_empty_input() {
        let mut rng = ChaCha8Rng::from_seed([3u8; 32]);
        let mutated = SingleOpMutator(MutationOp::ByteInsert)
            .mutate(&[], &mut rng)
            .unwrap();
        assert_eq!(mutated.bytes.len(), 1);
        assert_eq!(mutated.mutation.index(), Some(0));
        assert_eq!(mutated.original, None);
    }

    #[test]
    fn addressing_operators_reject_empty_input() {
        let mut rng = ChaCha8Rng::from_seed([4u8; 32]);
        for op in [
            MutationOp::BitFlip,
            MutationOp::BitInsert,
            MutationOp::BitDelete,
            MutationOp::ByteFlip,
        ] {
            assert_eq!(
                op.draw(&[], &mut rng),
                Err(MutationError::EmptyInput(op)),
                "{op} should refuse an empty buffer"
            );
        }
    }

    #[test]
    fn bit_delete_only_clears() {
        let cleared = Mutation::BitDelete { index: 1, bit: 7 }
            .apply(&[0xFF, 0xFF])
            .unwrap();
        assert_eq!(cleared, vec![0xFF, 0x7F]);

        let already_clear = Mutation::BitDelete { index: 0, bit: 3 }
            .apply(&[0x00])
            .unwrap();
        assert_eq!(already_clear, vec![0x00]);
    }

    #[test]
    fn bit_insert_sets_drawn_value() {
        let set = Mutation::BitInsert {
            index: 0,
            bit: 2,
            value: true,
        };
        assert_eq!(set.apply(&[0x00]).unwrap(), vec![0x04]);

        let unset = Mutation::BitInsert {
            index: 0,
            bit: 2,
            value: false,
        };
        assert_eq!(unset.apply(&[0xFF]).unwrap(), vec![0xFB]);
        assert_eq!(unset.apply(&[0x00]).unwrap(), vec![0x00], "may be a no-op");
    }

    #[test]
    fn byte_insert_at_end_appends() {
        let appended = Mutation::ByteInsert {
            index: 2,
            value: 0x55,
        }
        .apply(&[1, 2])
        .unwrap();
        assert_eq!(appended, vec![1, 2, 0x55]);
    }

    #[test]
    fn out_of_bounds_mutation_is_an_error() {
        let err = Mutation::ByteFlip { index: 5, value: 0 }
            .apply(&[1, 2, 3])
            .unwrap_err();
        assert_eq!(
            err,
            MutationError::OutOfBounds {
                op: MutationOp::ByteFlip,
                index: 5,
                len: 3
            }
        );
        assert!(
            Mutation::ByteInsert { index: 4, value: 0 }
                .apply(&[1, 2, 3])
                .is_err()
        );
        assert_eq!(
            Mutation::BitFlip { index: 0, bit: 8 }.apply(&[0]),
            Err(MutationError::InvalidBit {
                op: MutationOp::BitFlip,
                bit: 8
            })
        );
    }

    #[test]
    fn mode_mutator_uses_only_its_operators() {
        let mut rng = ChaCha8Rng::from_seed([9u8; 32]);
        let input = vec![0x42u8; 32];
        for mode in [MutationMode::Bit, MutationMode::Byte] {
            let allowed = mode.operators();
            let mut seen = HashSet::new();
            let mut mutator = ModeMutator::new(mode);
            for _ in 0..200 {
                let mutated = mutator.mutate(&input, &mut rng).unwrap();
                assert!(allowed.contains(&mutated.mutation.op()));
                seen.insert(mutated.mutation.op());
            }
            assert_eq!(seen.len(), 3, "all three {mode} operators should be drawn");
        }
    }

    #[test]
    fn modes_split_the_operators_between_them() {
        let bit = MutationMode::Bit.operators();
        let byte = MutationMode::Byte.operators();
        let combined: Vec<MutationOp> = bit.iter().chain(byte.iter()).copied().collect();
        assert_eq!(combined, MutationOp::ALL);

        let names: HashSet<&str> = MutationOp::ALL.iter().map(MutationOp::name).collect();
        assert_eq!(names.len(), MutationOp::ALL.len());
    }

    #[test]
    fn mutated_reports_original_and_replacement() {
        let mut rng = ChaCha8Rng::from_seed([11u8; 32]);
        let input = vec![0x0Fu8; 8];
        let mutated = SingleOpMutator(MutationOp::BitFlip)
            .mutate(&input, &mut rng)
            .unwrap();
        let index = mutated.mutation.index().unwrap();
        let bit = mutated.mutation.bit().unwrap();
        assert_eq!(mutated.original, Some(0x0F));
        assert_eq!(mutated.replacement(), Some(0x0F ^ (1 << bit)));
        assert_eq!(mutated.bytes[index], 0x0F ^ (1 << bit));
    }

    #[test]
    fn same_seed_same_mutations() {
        let input: Vec<u8> = (0..64).collect();
        let run = |seed: u8| {
            let mut rng = ChaCha8Rng::from_seed([seed; 32]);
            let mut mutator = ModeMutator::new(MutationMode::Byte);
            (0..20)
                .map(|_| mutator.mutate(&input, &mut rng).unwrap().mutation)
                .collect::<Vec<_>>()
        };
        assert_eq!(run(5), run(5));
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("BYTE".parse::<MutationMode>().unwrap(), MutationMode::Byte);
        assert_eq!("bit".parse::<MutationMode>().unwrap(), MutationMode::Bit);
        assert!(matches!(
            "nibble".parse::<MutationMode>(),
            Err(ConfigError::UnknownMode(_))
        ));
    }

    proptest! {
        #[test]
        fn flips_preserve_length(input in prop::collection::vec(any::<u8>(), 1..256), seed in any::<u64>()) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            for op in [MutationOp::BitFlip, MutationOp::ByteFlip] {
                let out = SingleOpMutator(op).mutate(&input, &mut rng).unwrap();
                prop_assert_eq!(out.bytes.len(), input.len());
            }
        }

        #[test]
        fn bit_insert_and_delete_preserve_length(input in prop::collection::vec(any::<u8>(), 1..256), seed in any::<u64>()) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            for op in [MutationOp::BitInsert, MutationOp::BitDelete] {
                let out = SingleOpMutator(op).mutate(&input, &mut rng).unwrap();
                prop_assert_eq!(out.bytes.len(), input.len());
            }
        }

        #[test]
        fn byte_insert_grows_and_delete_shrinks(input in prop::collection::vec(any::<u8>(), 1..256), seed in any::<u64>()) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let grown = SingleOpMutator(MutationOp::ByteInsert).mutate(&input, &mut rng).unwrap();
            prop_assert_eq!(grown.bytes.len(), input.len() + 1);
            let shrunk = SingleOpMutator(MutationOp::ByteDelete).mutate(&input, &mut rng).unwrap();
            prop_assert_eq!(shrunk.bytes.len(), input.len() - 1);
        }

        #[test]
        fn bit_flip_changes_exactly_one_bit(input in prop::collection::vec(any::<u8>(), 1..128), seed in any::<u64>()) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let out = SingleOpMutator(MutationOp::BitFlip).mutate(&input, &mut rng).unwrap();
            let differing: u32 = input
                .iter()
                .zip(&out.bytes)
                .map(|(a, b)| (a ^ b).count_ones())
                .sum();
            prop_assert_eq!(differing, 1);
        }
    }
}
