// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use thiserror::Error;

/// Errors raised by the wire codec itself.
///
/// Encoding errors are always local and never transmitted; decoding errors
/// mean the peer sent something malformed, not that the value is merely
/// unknown (unknown tags decode to plain maps).
#[derive(Error, Debug)]
pub enum WireError {
    #[error("value has no wire mapping: {0}")]
    Serialization(String),

    #[error("malformed wire value: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, WireError>;
