// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Bridge configuration.
//!
//! Plain serde structs with defaults, loadable from TOML. Session limits
//! (`max_refs`, `ttl_secs`) are accepted here and handed to the session
//! store; only `max_refs` is enforced by the in-process lifecycle manager.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::session::SessionOptions;
use pybridge_wire::AtomAllowlist;

const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Explicit session id; generated when absent.
    pub session_id: Option<String>,
    /// Address the worker should call back into for callback invocations.
    pub callback_address: Option<String>,
    /// Which decoded atoms rehydrate into symbolic constants.
    pub atoms: AtomAllowlist,
    pub call_timeout_secs: u64,
    /// Timeout for a single stream pull, not the whole traversal.
    pub stream_timeout_secs: u64,
    pub session: SessionLimits,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLimits {
    pub max_refs: Option<usize>,
    pub ttl_secs: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            session_id: None,
            callback_address: None,
            atoms: AtomAllowlist::default(),
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
            stream_timeout_secs: DEFAULT_STREAM_TIMEOUT_SECS,
            session: SessionLimits::default(),
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| BridgeError::Runtime(format!("invalid config: {e}")))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            max_refs: self.session.max_refs,
            ttl: self.session.ttl_secs.map(Duration::from_secs),
        }
    }
}
