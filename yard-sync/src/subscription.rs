use futures_util::stream::{SelectAll, Stream, StreamExt};
use futures_util::stream::BoxStream;
use serde::Serialize;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use yard_core::WorkspaceStateUpdate;

/// One item on a [`Subscription`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SubscriptionEvent {
    Update(WorkspaceStateUpdate),
    /// The subscriber fell behind and `skipped` updates for this workspace were
    /// dropped. Local state for it can no longer be trusted; refetch.
    #[serde(rename_all = "camelCase")]
    Lagged { workspace_id: String, skipped: u64 },
}

impl SubscriptionEvent {
    pub fn workspace_id(&self) -> &str {
        match self {
            SubscriptionEvent::Update(update) => &update.workspace_id,
            SubscriptionEvent::Lagged { workspace_id, .. } => workspace_id,
        }
    }
}

/// Merged stream of updates for a fixed set of workspaces.
///
/// A workspace's part of the stream ends when it is forgotten by the
/// synchronizer; the whole stream ends once every part has.
pub struct Subscription {
    workspace_ids: Vec<String>,
    inner: SelectAll<BoxStream<'static, SubscriptionEvent>>,
}

impl Subscription {
    pub(crate) fn new(receivers: Vec<(String, broadcast::Receiver<WorkspaceStateUpdate>)>) -> Self {
        let mut workspace_ids = Vec::with_capacity(receivers.len());
        let mut inner = SelectAll::new();

        for (workspace_id, rx) in receivers {
            workspace_ids.push(workspace_id.clone());
            let stream = BroadcastStream::new(rx)
                .map(move |item| match item {
                    Ok(update) => SubscriptionEvent::Update(update),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => SubscriptionEvent::Lagged {
                        workspace_id: workspace_id.clone(),
                        skipped,
                    },
                })
                .boxed();
            inner.push(stream);
        }

        Self {
            workspace_ids,
            inner,
        }
    }

    pub fn workspace_ids(&self) -> &[String] {
        &self.workspace_ids
    }
}

impl Stream for Subscription {
    type Item = SubscriptionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
