//! Testing utilities and mock implementations
//!
//! Lets the agent loop be exercised without a broker or a network transport.

pub mod mocks;

pub use mocks::*;
