//! Test fixtures for generating test data.

use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique auth subjects.
static SUBJECT_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate deterministic test data based on a seed.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    data
}

/// Compute SHA-256 hash of data as hex string.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub fn sha256_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    result.iter().map(|b| format!("{:02x}", b)).collect()
}

/// A unique identity-provider subject.
#[allow(dead_code)]
pub fn unique_subject(name: &str) -> String {
    let n = SUBJECT_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("auth0|{name}-{n}")
}

/// A small lab-results document.
#[allow(dead_code)]
pub fn lab_report(seed: u64) -> Vec<u8> {
    format!(
        "Lab report #{seed}\nGlucose: {} mg/dL\nHbA1c: 5.{}%\n",
        80 + seed % 40,
        seed % 10
    )
    .into_bytes()
}
