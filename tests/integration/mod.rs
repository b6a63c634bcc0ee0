//! Integration test suite for rigwatch.
//!
//! These tests run the witness against a temporary workspace with the
//! file-backed agent store and mailbox, and real git worktrees for the
//! reclaimer to inspect.
//!
//! # Test Categories
//!
//! - `circuit_breaker`: Failure counting, tripping and half-open on disk
//! - `isolation`: Requeue, reclaim and escalation of tripped polecats
//! - `patrol`: Full patrol cycles over a workspace
//! - `queue`: Merge-queue ranking

mod fixtures;

mod circuit_breaker;
mod isolation;
mod patrol;
mod queue;
