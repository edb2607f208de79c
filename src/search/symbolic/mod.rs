//! Counterexample-guided synthesis of small programs
//!
//! A program of `n` instructions is described by `4n` integer slots (an
//! opcode and three operands each). The encoder turns a slot vector into a
//! symbolic value, and the CEGIS loop alternates between asking the solver
//! for slot values that work on every known counterexample and asking it for
//! a new counterexample to the current candidate.

pub mod bounds;
pub mod sketch;
pub mod synthesis;

pub use synthesis::Synthesizer;
