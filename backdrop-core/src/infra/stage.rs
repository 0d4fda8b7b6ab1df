use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::{
    error::{BackdropError, Result},
    ports::{LayerContent, LayerId, Stage},
};

#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    Mounted(LayerId),
    FadeStarted(LayerId, Duration),
    Unmounted(LayerId),
}

/// In-process render target: keeps the layer stack in memory.
///
/// With `auto_transition_end` unset, `transition_end` never resolves, which
/// is how a host that drops transition events behaves.
#[derive(Debug)]
pub struct HeadlessStage {
    next_id: AtomicU64,
    layers: Mutex<Vec<(LayerId, LayerContent)>>,
    fades: DashMap<LayerId, Duration>,
    events: Mutex<Vec<StageEvent>>,
    auto_transition_end: bool,
    fail_mounts: AtomicBool,
}

impl HeadlessStage {
    pub fn new(auto_transition_end: bool) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            layers: Mutex::new(Vec::new()),
            fades: DashMap::new(),
            events: Mutex::new(Vec::new()),
            auto_transition_end,
            fail_mounts: AtomicBool::new(false),
        }
    }

    pub fn fail_mounts(&self, fail: bool) {
        self.fail_mounts.store(fail, Ordering::SeqCst);
    }

    /// Mounted layers, bottom first.
    pub fn layers(&self) -> Vec<(LayerId, LayerContent)> {
        self.layers.lock().clone()
    }

    pub fn top(&self) -> Option<LayerContent> {
        self.layers.lock().last().map(|(_, content)| content.clone())
    }

    pub fn events(&self) -> Vec<StageEvent> {
        self.events.lock().clone()
    }

    pub fn mount_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, StageEvent::Mounted(_)))
            .count()
    }
}

impl Default for HeadlessStage {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl Stage for HeadlessStage {
    async fn mount(&self, content: LayerContent) -> Result<LayerId> {
        if self.fail_mounts.load(Ordering::SeqCst) {
            return Err(BackdropError::Internal("stage refused mount".into()));
        }
        let id = LayerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.layers.lock().push((id, content));
        self.events.lock().push(StageEvent::Mounted(id));
        Ok(id)
    }

    async fn fade_out(&self, layer: LayerId, duration: Duration) {
        self.fades.insert(layer, duration);
        self.events.lock().push(StageEvent::FadeStarted(layer, duration));
    }

    async fn transition_end(&self, layer: LayerId) {
        if !self.auto_transition_end {
            return futures::future::pending().await;
        }
        let fade = self.fades.get(&layer).map(|d| *d).unwrap_or_default();
        tokio::time::sleep(fade).await;
    }

    async fn unmount(&self, layer: LayerId) {
        self.fades.remove(&layer);
        let removed = {
            let mut layers = self.layers.lock();
            let before = layers.len();
            layers.retain(|(id, _)| *id != layer);
            layers.len() != before
        };
        if removed {
            self.events.lock().push(StageEvent::Unmounted(layer));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{HeadlessStage, StageEvent};
    use crate::ports::{LayerContent, Stage};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn layers_stack_and_unmount_once() {
        let stage = HeadlessStage::new(true);
        let a = stage.mount(LayerContent::Color("#000".into())).await.unwrap();
        let b = stage.mount(LayerContent::Color("#fff".into())).await.unwrap();
        assert_eq!(stage.top(), Some(LayerContent::Color("#fff".into())));

        stage.fade_out(a, Duration::from_millis(300)).await;
        stage.transition_end(a).await;
        stage.unmount(a).await;
        stage.unmount(a).await;

        assert_eq!(stage.layers().len(), 1);
        assert_eq!(
            stage.events(),
            vec![
                StageEvent::Mounted(a),
                StageEvent::Mounted(b),
                StageEvent::FadeStarted(a, Duration::from_millis(300)),
                StageEvent::Unmounted(a),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transition_end_can_be_withheld() {
        let stage = HeadlessStage::new(false);
        let a = stage.mount(LayerContent::Color("#000".into())).await.unwrap();
        stage.fade_out(a, Duration::ZERO).await;
        let ended =
            tokio::time::timeout(Duration::from_secs(60), stage.transition_end(a)).await;
        assert!(ended.is_err());
    }
}
