use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Condvar, Mutex,
    },
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

/// Priority tier for components that should stop last. HLS writers register
/// here so they keep flushing until every producer above them has quiesced.
pub const SHUTDOWN_PRIORITY_LAST: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    HlsWriter,
    Mp4Writer,
    DetectionWorker,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentId(usize);

#[derive(Debug)]
struct ComponentRecord {
    name: String,
    kind: ComponentKind,
    /// Lower numbers are waited for first; the highest tier drains last.
    priority: u32,
    state: ComponentState,
}

/// Process-wide shutdown registry. Components register with a priority,
/// poll [`ShutdownCoordinator::is_shutdown_initiated`] in their loops and
/// report [`ComponentState::Stopped`] on exit; the owner then joins them in
/// ascending priority order.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    shutdown_initiated: AtomicBool,
    components: Mutex<Vec<ComponentRecord>>,
    state_changed: Condvar,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, kind: ComponentKind, priority: u32) -> ComponentId {
        let mut components = self.components.lock().unwrap();
        components.push(ComponentRecord {
            name: name.to_string(),
            kind,
            priority,
            state: ComponentState::Running,
        });
        let id = ComponentId(components.len() - 1);
        debug!(component = name, ?kind, priority, "Registered shutdown component");
        id
    }

    pub fn update_state(&self, id: ComponentId, state: ComponentState) {
        let mut components = self.components.lock().unwrap();
        if let Some(record) = components.get_mut(id.0) {
            record.state = state;
        }
        self.state_changed.notify_all();
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    pub fn initiate_shutdown(&self) {
        info!("Shutdown initiated");
        self.shutdown_initiated.store(true, Ordering::Release);
    }

    /// Wait until every registered component reports stopped, tier by tier in
    /// ascending priority order. Returns the names of components that were
    /// still running when the deadline passed.
    pub fn wait_for_stopped(&self, timeout: Duration) -> Result<(), Vec<String>> {
        let deadline = Instant::now() + timeout;

        let mut tiers: Vec<u32> = {
            let components = self.components.lock().unwrap();
            components.iter().map(|c| c.priority).collect()
        };
        tiers.sort_unstable();
        tiers.dedup();

        for tier in tiers {
            let mut components = self.components.lock().unwrap();
            loop {
                let pending = components
                    .iter()
                    .filter(|c| c.priority == tier && c.state != ComponentState::Stopped)
                    .count();
                if pending == 0 {
                    break;
                }
                let now = Instant::now();
                if now >= deadline {
                    let stragglers: Vec<String> = components
                        .iter()
                        .filter(|c| c.state != ComponentState::Stopped)
                        .map(|c| c.name.clone())
                        .collect();
                    warn!(?stragglers, "Shutdown wait timed out");
                    return Err(stragglers);
                }
                let (guard, _) = self
                    .state_changed
                    .wait_timeout(components, deadline - now)
                    .unwrap();
                components = guard;
            }
            debug!(priority = tier, "Shutdown tier drained");
        }
        Ok(())
    }
}
