//! Analysis surface wiring
//!
//! A surface mounts one notification channel, builds one controller per job
//! kind it hosts, loads their snapshots, and routes every push event to the
//! controller of its kind. Each event gets its own task, so refetches run
//! independently and the last to finish wins.

use std::collections::HashMap;
use std::sync::Arc;

use curio_common::{EventBus, JobKind, PushEvent, SurfaceKind};
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::NotificationChannel;
use crate::controller::CriteriaJobController;
use crate::error::{Result, SyncError};
use crate::http_store::{ApiClient, HttpStore};
use crate::store::{CriterionStore, JobCapabilities, ResultStore};

/// Stores backing one job kind
pub type KindStores = (Arc<dyn CriterionStore>, Arc<dyn ResultStore>);

pub struct Surface {
    kind: SurfaceKind,
    project_id: String,
    channel: Arc<NotificationChannel>,
    controllers: HashMap<JobKind, Arc<CriteriaJobController>>,
    cancel: CancellationToken,
    router: Option<JoinHandle<()>>,
}

impl Surface {
    /// Open the surface's channel and mount it over the REST stores
    pub async fn connect(
        api: &ApiClient,
        ws_base_url: &str,
        user_id: &str,
        kind: SurfaceKind,
        project_id: &str,
        events: EventBus,
    ) -> Result<Self> {
        let (channel, inbound) = NotificationChannel::open(ws_base_url, kind, user_id).await?;
        let surface = Self::mount(kind, project_id, channel, inbound, events, |job_kind| {
            let store = Arc::new(HttpStore::new(api.clone(), job_kind));
            (store.clone() as Arc<dyn CriterionStore>, store as Arc<dyn ResultStore>)
        })
        .await;
        Ok(surface)
    }

    /// Mount over an open channel
    ///
    /// Performs the initial refresh of every controller; a failed refresh is
    /// logged and leaves that controller empty until the next push.
    pub async fn mount<F>(
        kind: SurfaceKind,
        project_id: &str,
        channel: NotificationChannel,
        inbound: mpsc::UnboundedReceiver<PushEvent>,
        events: EventBus,
        stores: F,
    ) -> Self
    where
        F: Fn(JobKind) -> KindStores,
    {
        let channel = Arc::new(channel);
        let controllers: HashMap<JobKind, Arc<CriteriaJobController>> = kind
            .job_kinds()
            .iter()
            .map(|&job_kind| {
                let (criteria, results) = stores(job_kind);
                let caps = JobCapabilities::new(criteria, results, channel.clone());
                let controller = CriteriaJobController::new(job_kind, project_id, caps, events.clone());
                (job_kind, Arc::new(controller))
            })
            .collect();

        let refreshed = join_all(controllers.values().map(|c| c.refresh())).await;
        let failed = refreshed.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!(surface = %kind, failed, "Initial refresh incomplete");
        }

        let cancel = CancellationToken::new();
        let router = tokio::spawn(route_events(inbound, controllers.clone(), cancel.clone()));

        info!(surface = %kind, project_id = %project_id, kinds = controllers.len(), "Surface mounted");
        Self {
            kind,
            project_id: project_id.to_string(),
            channel,
            controllers,
            cancel,
            router: Some(router),
        }
    }

    pub fn kind(&self) -> SurfaceKind {
        self.kind
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    pub fn controller(&self, kind: JobKind) -> Option<Arc<CriteriaJobController>> {
        self.controllers.get(&kind).cloned()
    }

    /// Controller for `kind`, or an error naming the surface that lacks it
    pub fn require_controller(&self, kind: JobKind) -> Result<Arc<CriteriaJobController>> {
        self.controller(kind).ok_or_else(|| {
            SyncError::InvalidState(format!("{} jobs are not hosted on the {} surface", kind, self.kind))
        })
    }

    /// Stop routing and close the channel
    pub async fn unmount(mut self) {
        self.cancel.cancel();
        self.channel.shutdown().await;
        if let Some(router) = self.router.take() {
            if let Err(e) = router.await {
                warn!(surface = %self.kind, "Router task failed: {}", e);
            }
        }
        info!(surface = %self.kind, "Surface unmounted");
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.channel.close();
    }
}

async fn route_events(
    mut inbound: mpsc::UnboundedReceiver<PushEvent>,
    controllers: HashMap<JobKind, Arc<CriteriaJobController>>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = inbound.recv() => event,
        };
        let Some(event) = event else {
            debug!("Push event stream ended");
            break;
        };

        let Some(controller) = controllers.get(&event.kind).cloned() else {
            debug!(kind = %event.kind, "Push event for a kind this surface does not host");
            continue;
        };
        tokio::spawn(async move {
            if let Err(e) = controller.handle_push_event(&event).await {
                warn!(kind = %event.kind, "Push event handling failed: {}", e);
            }
        });
    }
}
