use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use backdrop_model::{BlobHandle, HandleScope};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::{
    handles::HandleManager,
    ports::{LayerId, Stage},
};

/// A mounted layer and the handles it keeps alive.
#[derive(Debug, Clone)]
pub(crate) struct LayerRecord {
    pub(crate) id: LayerId,
    handle: Option<BlobHandle>,
    scope: Option<HandleScope>,
    // Set by whichever path cleans the layer up first.
    retired: Arc<AtomicBool>,
}

impl LayerRecord {
    pub(crate) fn new(id: LayerId, handle: Option<BlobHandle>, scope: Option<HandleScope>) -> Self {
        Self {
            id,
            handle,
            scope,
            retired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Release and unmount exactly once, however many paths race here.
    /// Handles are released before the first await so an aborted caller
    /// cannot leak them.
    async fn finish(&self, stage: &dyn Stage, handles: &HandleManager) -> bool {
        if self.retired.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(handle) = &self.handle {
            handles.release(handle, false);
        }
        if let Some(scope) = &self.scope {
            handles.release_scope(scope);
        }
        stage.unmount(self.id).await;
        true
    }
}

struct Retiring {
    record: LayerRecord,
    task: Option<JoinHandle<()>>,
}

/// Visible layers, bottom first, plus the ones fading out.
pub(crate) struct LayerStack {
    stage: Arc<dyn Stage>,
    handles: Arc<HandleManager>,
    fade: Duration,
    margin: Duration,
    visible: Mutex<Vec<LayerRecord>>,
    retiring: Arc<DashMap<LayerId, Retiring>>,
}

impl fmt::Debug for LayerStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerStack")
            .field("fade", &self.fade)
            .field("margin", &self.margin)
            .field("visible", &self.visible.lock().len())
            .field("retiring", &self.retiring.len())
            .finish_non_exhaustive()
    }
}

impl LayerStack {
    pub(crate) fn new(
        stage: Arc<dyn Stage>,
        handles: Arc<HandleManager>,
        fade: Duration,
        margin: Duration,
    ) -> Self {
        Self {
            stage,
            handles,
            fade,
            margin,
            visible: Mutex::new(Vec::new()),
            retiring: Arc::new(DashMap::new()),
        }
    }

    pub(crate) fn stage(&self) -> &Arc<dyn Stage> {
        &self.stage
    }

    pub(crate) fn visible_ids(&self) -> Vec<LayerId> {
        self.visible.lock().iter().map(|l| l.id).collect()
    }

    pub(crate) fn retiring_len(&self) -> usize {
        self.retiring.len()
    }

    /// Register a freshly mounted layer and start retiring everything below.
    pub(crate) fn push(&self, record: LayerRecord) {
        let outgoing: Vec<LayerRecord> = {
            let mut visible = self.visible.lock();
            let outgoing = std::mem::take(&mut *visible);
            visible.push(record);
            outgoing
        };
        for layer in outgoing {
            self.retire(layer);
        }
    }

    fn retire(&self, record: LayerRecord) {
        let id = record.id;
        self.retiring.insert(
            id,
            Retiring {
                record: record.clone(),
                task: None,
            },
        );

        let stage = Arc::clone(&self.stage);
        let handles = Arc::clone(&self.handles);
        let retiring = Arc::clone(&self.retiring);
        let fade = self.fade;
        let deadline = self.fade + self.margin;

        let task = tokio::spawn(async move {
            stage.fade_out(id, fade).await;
            tokio::select! {
                _ = stage.transition_end(id) => {}
                _ = tokio::time::sleep(deadline) => {
                    tracing::debug!(layer = %id, "no transition end before deadline; retiring anyway");
                }
            }
            record.finish(stage.as_ref(), &handles).await;
            retiring.remove(&id);
        });

        if let Some(mut entry) = self.retiring.get_mut(&id) {
            entry.task = Some(task);
        }
    }

    /// Tear down every layer immediately, visible ones included.
    pub(crate) async fn clear(&self) -> usize {
        let mut records: Vec<LayerRecord> = std::mem::take(&mut *self.visible.lock());

        let ids: Vec<LayerId> = self.retiring.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, retiring)) = self.retiring.remove(&id) {
                if let Some(task) = retiring.task {
                    task.abort();
                }
                records.push(retiring.record);
            }
        }

        let mut finished = 0;
        for record in records {
            if record.finish(self.stage.as_ref(), &self.handles).await {
                finished += 1;
            }
        }
        finished
    }
}
