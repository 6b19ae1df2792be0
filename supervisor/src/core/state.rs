use std::sync::Arc;

use crate::core::platform::Platform;
use crate::core::probe::NodeProber;

/// Collaborators handed to every reconciliation tick and admin handler.
#[derive(Clone)]
pub struct SupervisorState {
    pub platform: Arc<dyn Platform>,
    pub prober: Arc<dyn NodeProber>,
}
