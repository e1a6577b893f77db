//! Wire types for the daemon's HTTP surface.
//!
//! Deliberately small: the control surface is the CLI (talking directly to
//! the database), not HTTP. These endpoints answer "is it alive and what is
//! it doing", nothing more.

use serde::{Deserialize, Serialize};

use crate::state::{BuildInfo, StatusSnapshot};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub db_ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

impl HealthResponse {
    pub fn new(db_ok: bool, build: &BuildInfo) -> Self {
        Self {
            ok: db_ok,
            db_ok,
            service: build.service,
            version: build.version,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub snapshot: StatusSnapshot,
    pub service: &'static str,
    pub version: &'static str,
}
