//! Callflow Core Library
//!
//! Real-time conversation engine for voice calls: an agent's conversation graph
//! is walked one caller turn at a time, with narrow concurrent LLM specialists
//! for the latency-critical decisions, streaming speech recognition in front,
//! and durable per-call sessions behind.

pub mod config;
pub mod flow;
pub mod graph;
pub mod persistence;
pub mod session;
pub mod specialists;
pub mod telemetry;
pub mod transcription;
