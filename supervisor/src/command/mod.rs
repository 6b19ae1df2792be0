pub mod members;
pub mod reconcile;
pub mod serve;

use anyhow::Context;
use reqwest::Client;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::core::probe::HttpProber;
use crate::core::state::SupervisorState;
use crate::core::store::KvPlatform;

/// Opens the index and wires the HTTP prober.
pub fn open_state(index: &Path, http_timeout: Duration) -> anyhow::Result<SupervisorState> {
    let platform = KvPlatform::open(index)
        .with_context(|| format!("opening index at {}", index.display()))?;
    let http = Client::builder().timeout(http_timeout).build()?;

    Ok(SupervisorState {
        platform: Arc::new(platform),
        prober: Arc::new(HttpProber::new(http)),
    })
}
