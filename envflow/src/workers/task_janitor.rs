//! Task janitor: prunes finished tasks past their retention age

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::storage::settings::TaskSettings;
use crate::tasks::registry::TaskRegistry;

/// Task janitor options
#[derive(Debug, Clone)]
pub struct Options {
    /// Pruning interval
    pub interval: Duration,

    /// Age after which finished tasks are dropped
    pub retention: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            retention: Duration::from_secs(86_400),
        }
    }
}

impl From<&TaskSettings> for Options {
    fn from(settings: &TaskSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.janitor_interval_secs.max(1)),
            retention: Duration::from_secs(settings.retention_secs),
        }
    }
}

/// Run the task janitor
pub async fn run<S, F>(
    options: &Options,
    tasks: &TaskRegistry,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Task janitor starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Task janitor shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        let pruned = tasks.prune(options.retention);
        if pruned > 0 {
            info!("Pruned {} finished task(s)", pruned);
            if let Err(e) = tasks.save().await {
                warn!("Failed to save task snapshot: {}", e);
            }
        } else {
            debug!("No tasks to prune");
        }
    }
}
