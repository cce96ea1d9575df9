//! Process-lifetime buffering and SSE fan-out.
//!
//! Buffers grow unboundedly for the lifetime of the process so that replay
//! stays complete; long-lived deployments recycle the process to bound
//! memory. Per-client delivery channels ARE bounded — a slow debugger gets
//! frames dropped, never a wedged emitter.

use bytes::Bytes;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use waypoint_contract::{AgentContextSnapshot, BusEvent};
use waypoint_runtime::{Broadcast, EventBus};

const CLIENT_BUFFER: usize = 256;

/// One SSE wire frame: `event: <name>` line plus a JSON `data:` line.
pub fn sse_frame<T: Serialize>(event: &str, data: &T) -> Bytes {
    let json = serde_json::to_string(data).unwrap_or_else(|_| "null".to_string());
    Bytes::from(format!("event: {event}\ndata: {json}\n\n"))
}

struct Client {
    id: u64,
    tx: mpsc::Sender<Bytes>,
}

struct HubInner {
    snapshots: Vec<AgentContextSnapshot>,
    events: Vec<BusEvent>,
    clients: Vec<Client>,
    next_id: u64,
}

/// Buffers both streams and fans them out to attached SSE clients.
pub struct BridgeHub {
    inner: Mutex<HubInner>,
}

impl Default for BridgeHub {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HubInner {
                snapshots: Vec::new(),
                events: Vec::new(),
                clients: Vec::new(),
                next_id: 0,
            }),
        }
    }
}

impl BridgeHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribe to the shared streams and pump them into the hub for the
    /// rest of the process lifetime.
    pub fn spawn_forwarders(
        self: &Arc<Self>,
        bus: &EventBus,
        snapshots: &Broadcast<AgentContextSnapshot>,
    ) {
        let hub = Arc::clone(self);
        let mut event_feed = bus.subscribe();
        tokio::spawn(async move {
            while let Some(event) = event_feed.recv().await {
                hub.push_event(event);
            }
        });

        let hub = Arc::clone(self);
        let mut snapshot_feed = snapshots.subscribe();
        tokio::spawn(async move {
            while let Some(snapshot) = snapshot_feed.recv().await {
                hub.push_snapshot(snapshot);
            }
        });
    }

    pub fn push_event(&self, event: BusEvent) {
        let frame = sse_frame("bus-event", &event);
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        inner.events.push(event);
        fan_out(&mut inner.clients, frame);
    }

    pub fn push_snapshot(&self, snapshot: AgentContextSnapshot) {
        let frame = sse_frame("snapshot", &snapshot);
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        inner.snapshots.push(snapshot);
        fan_out(&mut inner.clients, frame);
    }

    /// Attach one client: the replay frames (all snapshots, then all
    /// events) plus a live receiver. Buffer copy and registration happen
    /// under one lock, so nothing emitted concurrently is missed or
    /// duplicated.
    pub fn attach(&self) -> (Vec<Bytes>, mpsc::Receiver<Bytes>) {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        let mut replay = Vec::with_capacity(inner.snapshots.len() + inner.events.len());
        for snapshot in &inner.snapshots {
            replay.push(sse_frame("snapshot", snapshot));
        }
        for event in &inner.events {
            replay.push(sse_frame("bus-event", event));
        }
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.clients.push(Client { id, tx });
        (replay, rx)
    }

    pub fn event_count(&self) -> usize {
        self.inner.lock().expect("hub lock poisoned").events.len()
    }

    pub fn snapshot_count(&self) -> usize {
        self.inner
            .lock()
            .expect("hub lock poisoned")
            .snapshots
            .len()
    }

    pub fn client_count(&self) -> usize {
        self.inner.lock().expect("hub lock poisoned").clients.len()
    }
}

fn fan_out(clients: &mut Vec<Client>, frame: Bytes) {
    clients.retain(|client| match client.tx.try_send(frame.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(client = client.id, "sse client lagging, frame dropped");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_contract::{BusEvent, BusEventType};

    fn event(trace: &str) -> BusEvent {
        BusEvent::new(BusEventType::AgentLog, trace)
    }

    #[tokio::test]
    async fn replay_sends_snapshots_before_events() {
        let hub = BridgeHub::new();
        hub.push_event(event("e1"));
        let snapshot = AgentContextSnapshot {
            agent_id: "a".into(),
            root_task_id: "t".into(),
            active_task_id: None,
            tasks: Default::default(),
            observations: Vec::new(),
            working_memory: Default::default(),
            metadata: Default::default(),
            iteration: 0,
            master_plan: None,
        };
        hub.push_snapshot(snapshot);
        hub.push_event(event("e2"));

        let (replay, _rx) = hub.attach();
        let frames: Vec<String> = replay
            .iter()
            .map(|b| String::from_utf8_lossy(b).to_string())
            .collect();
        assert_eq!(frames.len(), 3);
        assert!(frames[0].starts_with("event: snapshot\n"));
        assert!(frames[1].starts_with("event: bus-event\n"));
        assert!(frames[2].starts_with("event: bus-event\n"));
    }

    #[tokio::test]
    async fn late_joiner_gets_history_then_live_without_duplicates() {
        let hub = BridgeHub::new();
        hub.push_event(event("e1"));
        hub.push_event(event("e2"));

        let (replay, mut rx) = hub.attach();
        assert_eq!(replay.len(), 2);

        hub.push_event(event("e3"));
        let live = rx.recv().await.unwrap();
        let text = String::from_utf8_lossy(&live);
        assert!(text.contains("\"traceId\":\"e3\""));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnected_clients_are_pruned() {
        let hub = BridgeHub::new();
        let (_replay, rx) = hub.attach();
        assert_eq!(hub.client_count(), 1);
        drop(rx);
        hub.push_event(event("e1"));
        assert_eq!(hub.client_count(), 0);
    }
}
