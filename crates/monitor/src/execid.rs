// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution id generation: `exec-<decimal-millis>-<6 base36 chars>`.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 6;

/// Generate a fresh execution id using the wall clock and the thread-local
/// RNG. See [`generate_at`] for a testable, time-injected variant.
pub fn generate() -> String {
    generate_at(now_millis(), &mut rand::rng())
}

/// Generate an execution id for a given millisecond timestamp and RNG,
/// so the format can be tested without depending on real time.
pub fn generate_at(millis: u128, rng: &mut impl Rng) -> String {
    let mut suffix = String::with_capacity(SUFFIX_LEN);
    for _ in 0..SUFFIX_LEN {
        let idx = rng.random_range(0..BASE36.len());
        suffix.push(BASE36[idx] as char);
    }
    format!("exec-{millis}-{suffix}")
}

fn now_millis() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}

#[cfg(test)]
#[path = "execid_tests.rs"]
mod tests;
