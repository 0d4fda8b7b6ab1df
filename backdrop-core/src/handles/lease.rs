use std::sync::Arc;

use backdrop_model::BlobHandle;

use super::HandleManager;

/// Owned reference to a live blob handle.
///
/// The reference taken on construction is released on drop, so a lease that
/// goes out of scope on an error path cannot leak its blob.
#[derive(Debug)]
pub struct BlobLease {
    manager: Arc<HandleManager>,
    handle: BlobHandle,
    armed: bool,
}

impl BlobLease {
    pub(super) fn new(manager: Arc<HandleManager>, handle: BlobHandle) -> Self {
        Self {
            manager,
            handle,
            armed: true,
        }
    }

    pub fn handle(&self) -> &BlobHandle {
        &self.handle
    }

    pub fn bytes(&self) -> Option<Arc<[u8]>> {
        self.manager.bytes(&self.handle)
    }

    /// Hand the reference over to the caller without releasing it.
    pub fn into_handle(mut self) -> BlobHandle {
        self.armed = false;
        self.handle.clone()
    }
}

impl Drop for BlobLease {
    fn drop(&mut self) {
        if self.armed {
            self.manager.release(&self.handle, false);
        }
    }
}
