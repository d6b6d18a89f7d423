// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image module — container-preserving decode and re-encode.

pub mod codec;

pub use codec::{JPEG_QUALITY, decode, encode};
