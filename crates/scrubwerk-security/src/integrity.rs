// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Content fingerprints — SHA-256 digests, full and truncated.
//
// The truncated form is what every audit record carries: enough to correlate
// an input with its sanitized output, too short to be worth brute-forcing
// back to a low-entropy payload such as a barcode's ID number.

use scrubwerk_core::error::ScrubError;
use sha2::{Digest, Sha256};

/// Number of hex characters kept by [`short_hash`].
pub const SHORT_HASH_LEN: usize = 16;

/// Compute the SHA-256 hash of `data` and return it as a lowercase hex string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// First 16 hex characters of the SHA-256 of `data`.
///
/// Used for original/stripped file fingerprints, pixel-buffer fingerprints
/// and the one-way record of a decoded barcode payload.
pub fn short_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    hex::encode(&digest[..SHORT_HASH_LEN / 2])
}

/// Verify that `data` matches the expected SHA-256 hex digest.
///
/// Accepts either the full 64-character digest or a truncated prefix such
/// as the one produced by [`short_hash`].
pub fn verify_hash(data: &[u8], expected_hex: &str) -> Result<(), ScrubError> {
    let actual = hash_bytes(data);
    let expected = expected_hex.to_ascii_lowercase();
    if !expected.is_empty() && actual.starts_with(&expected) {
        Ok(())
    } else {
        Err(ScrubError::IntegrityMismatch {
            expected: expected_hex.to_owned(),
            actual: actual[..expected_hex.len().clamp(SHORT_HASH_LEN, actual.len())].to_owned(),
        })
    }
}
