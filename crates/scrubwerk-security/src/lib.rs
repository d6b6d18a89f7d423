// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scrubwerk-security — Fingerprints and audit trail.
//
// Every record that leaves the engine identifies content by a truncated
// SHA-256 digest, never by the content itself. The audit log persists those
// records together with counts and classification strings.

pub mod audit;
pub mod integrity;

pub use audit::{AuditEntry, AuditLog, AuditRecord};
pub use integrity::{SHORT_HASH_LEN, hash_bytes, short_hash, verify_hash};
