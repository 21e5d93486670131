//! Shared handler state.

use std::path::PathBuf;
use std::sync::Arc;

use crate::contacts::SegmentStore;
use crate::scheduler::DispatchScheduler;
use crate::session::SessionManager;

/// Services every route can reach.
pub struct AppState {
    pub session: SessionManager,
    pub scheduler: Arc<DispatchScheduler>,
    pub segments: Arc<SegmentStore>,
    /// Where uploaded media is written before sending
    pub uploads_dir: PathBuf,
    pub max_upload_bytes: usize,
}
