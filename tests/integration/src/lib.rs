//! Integration tests for multi-peer key gossip
//!
//! This test suite validates:
//! - Identity bootstrap and first-contact key exchange between two peers
//! - Convergence of several peers over periodic and broadcast gossip
//! - Rejection of forged entries inside otherwise valid batches
//! - Late joiners catching up through full-state pushes
//! - Accepted keys surviving a node restart

pub mod test_utils;

#[cfg(test)]
mod convergence_tests;

#[cfg(test)]
mod adversarial_tests;
