// ── Liveness streams ──
//
// Watch-backed subscription to the fleet's online/offline map, for
// consumers that want the current picture rather than individual edges.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::address_book::CameraId;

/// Online flag per camera, in id order.
pub type LivenessMap = BTreeMap<CameraId, bool>;

/// A subscription to the liveness map.
pub struct StatusStream {
    current: Arc<LivenessMap>,
    receiver: watch::Receiver<Arc<LivenessMap>>,
}

impl StatusStream {
    pub(crate) fn new(receiver: watch::Receiver<Arc<LivenessMap>>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// Snapshot taken at creation or at the last `changed()`.
    pub fn current(&self) -> &Arc<LivenessMap> {
        &self.current
    }

    pub fn latest(&self) -> Arc<LivenessMap> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next liveness edge. `None` once the monitor is gone.
    pub async fn changed(&mut self) -> Option<Arc<LivenessMap>> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = snap.clone();
        Some(snap)
    }

    pub fn into_stream(self) -> StatusWatchStream {
        StatusWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` of liveness snapshots.
pub struct StatusWatchStream {
    inner: WatchStream<Arc<LivenessMap>>,
}

impl Stream for StatusWatchStream {
    type Item = Arc<LivenessMap>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
