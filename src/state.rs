use std::sync::Arc;
use std::time::Duration;

use crate::admission::AdmissionController;
use crate::jobs::JobOrchestrator;

// app's shared state
pub struct AppState {
    pub admission: AdmissionController,
    pub orchestrator: Arc<JobOrchestrator>,
    pub sync_timeout: Duration, // deadline for the synchronous endpoints
}
