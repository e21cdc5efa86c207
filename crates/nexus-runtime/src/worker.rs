use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nexus_core::{Task, TaskQueue};
use tracing::info;

const POP_TIMEOUT: Duration = Duration::from_millis(50);

/// Drains completed tasks off the shared deadline queue and finalizes
/// replies. The pop timeout bounds how long a stop request can go unseen.
pub struct PostprocessWorker {
    pub id: u32,
    pub queue: Arc<TaskQueue<Arc<Task>>>,
    pub running: Arc<AtomicBool>,
}

impl PostprocessWorker {
    pub async fn run(self) {
        info!(worker_id = self.id, "postprocess worker started");
        while self.running.load(Ordering::Relaxed) {
            let Some(task) = self.queue.pop_timeout(POP_TIMEOUT).await else {
                continue;
            };
            task.record("postprocess");
            task.finish();
        }
        info!(worker_id = self.id, "postprocess worker stopped");
    }
}
