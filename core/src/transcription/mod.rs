//! Streaming speech recognition: wire protocol, token reconciliation, and the
//! transcript normalizer.

pub mod accumulator;
pub mod client;
pub mod normalizer;
pub mod protocol;

pub use accumulator::{TokenAccumulator, TranscriptEvent};
pub use client::{ConnectionState, TranscriptionClient, TranscriptionError, TranscriptionHandle};
pub use normalizer::{clean, TranscriptNormalizer};

#[cfg(test)]
mod tests;
