//! Registration of the client on the event subscription stream.

use std::{collections::BTreeSet, ops::ControlFlow, sync::Arc, time::Duration};

use backoff::{Backoff, BackoffConfig, BackoffError};
use futures::StreamExt;
use inventory_types::{ClientKind, ResourceKind, SubscribeEventsRequest};
use observability_deps::tracing::{info, warn};
use parking_lot::RwLock;
use snafu::OptionExt;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{
        CanceledSnafu, DeadlineExceededSnafu, Error, InternalSnafu, Result, UnavailableSnafu,
    },
    interface::{EventStream, InventoryService},
};

/// Upper bound for a single registration backoff.
pub const REGISTER_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Client UUID of the current registration.
///
/// Empty while the event stream is down; requests then fail fast.
#[derive(Debug, Default)]
pub(crate) struct Registration {
    client_uuid: RwLock<Option<Arc<str>>>,
}

impl Registration {
    /// Current client UUID.
    pub(crate) fn client_uuid(&self) -> Result<Arc<str>> {
        self.client_uuid
            .read()
            .as_ref()
            .map(Arc::clone)
            .context(UnavailableSnafu {
                descr: "client is not registered with the inventory",
            })
    }

    pub(crate) fn is_registered(&self) -> bool {
        self.client_uuid.read().is_some()
    }

    pub(crate) fn set(&self, client_uuid: &str) {
        *self.client_uuid.write() = Some(Arc::from(client_uuid));
    }

    pub(crate) fn clear(&self) {
        self.client_uuid.write().take();
    }
}

/// Union of the kinds the application and the caches need events for, without duplicates.
pub(crate) fn merge_kinds(
    app_kinds: &[ResourceKind],
    cache_kinds: &[ResourceKind],
) -> Vec<ResourceKind> {
    app_kinds
        .iter()
        .chain(cache_kinds)
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Registration parameters.
#[derive(Debug)]
pub(crate) struct Registrar {
    pub(crate) service: Arc<dyn InventoryService>,
    pub(crate) client_name: String,
    pub(crate) client_kind: ClientKind,
}

impl Registrar {
    /// Open the event stream and wait for the client UUID, which is always the first message.
    pub(crate) async fn register(&self, kinds: Vec<ResourceKind>) -> Result<(String, EventStream)> {
        let mut stream = self
            .service
            .subscribe_events(SubscribeEventsRequest {
                client_name: self.client_name.clone(),
                client_kind: self.client_kind,
                subscribed_resource_kinds: kinds,
            })
            .await?;

        match stream.next().await {
            Some(Ok(msg)) if !msg.client_uuid.is_empty() => {
                info!(
                    client_name = %self.client_name,
                    client_uuid = %msg.client_uuid,
                    "registered with inventory"
                );
                Ok((msg.client_uuid, stream))
            }
            Some(Ok(_)) => InternalSnafu {
                descr: "first event stream message carries no client UUID",
            }
            .fail(),
            Some(Err(status)) => Err(status.into()),
            None => UnavailableSnafu {
                descr: "event stream closed during registration",
            }
            .fail(),
        }
    }

    /// [`register`](Self::register) until it succeeds, `config` runs out, or `shutdown` fires.
    ///
    /// Every registration error is retried. Returns `Canceled` on shutdown and
    /// `DeadlineExceeded` once the deadline of `config` has passed, counting the time spent in
    /// attempts as well as the backoff in between.
    pub(crate) async fn register_with_retry(
        &self,
        kinds: impl Fn() -> Vec<ResourceKind> + Send + Sync,
        config: &BackoffConfig,
        shutdown: &CancellationToken,
    ) -> Result<(String, EventStream)> {
        let mut backoff = Backoff::new(config);
        let attempts = async {
            backoff
                .retry_with_backoff("register with inventory", || async {
                    match self.register(kinds()).await {
                        Ok(registered) => ControlFlow::Break(registered),
                        Err(e) => {
                            warn!(%e, client_name = %self.client_name, "registration failed");
                            ControlFlow::Continue(e)
                        }
                    }
                })
                .await
                .map_err(|e| match e {
                    BackoffError::DeadlineExceeded { deadline, source } => {
                        Error::DeadlineExceeded {
                            descr: format!(
                                "registration did not succeed within {deadline:?}: {source}"
                            ),
                        }
                    }
                })
        };
        let limited = async {
            let Some(deadline) = config.deadline else {
                return attempts.await;
            };
            tokio::time::timeout(deadline, attempts)
                .await
                .unwrap_or_else(|_| {
                    DeadlineExceededSnafu {
                        descr: format!("registration did not complete within {deadline:?}"),
                    }
                    .fail()
                })
        };

        tokio::select! {
            _ = shutdown.cancelled() => CanceledSnafu {
                descr: "shutdown during registration",
            }
            .fail(),
            res = limited => res,
        }
    }
}

/// Backoff for re-registration: doubling from `initial_backoff`, giving up after `max_elapsed`.
pub(crate) fn register_backoff_config(
    initial_backoff: Duration,
    max_elapsed: Duration,
) -> BackoffConfig {
    BackoffConfig {
        init_backoff: initial_backoff,
        max_backoff: REGISTER_MAX_BACKOFF.max(initial_backoff),
        base: 2.0,
        deadline: Some(max_elapsed),
    }
}
