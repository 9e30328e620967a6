//! Audit events for verified workloads.
//!
//! Events are published fire-and-forget: the verdict has already been
//! decided when an event is emitted, and publishing failures are only logged.

use kube::Client;
use kube::Resource;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::{debug, warn};

use super::workload::Workload;

/// Component name reported on events
pub const EVENT_COMPONENT: &str = "cosignwebhook";
/// Event reason for verified images
pub const EVENT_REASON: &str = "Cosignwebhook";
/// Event note for verified images
pub const EVENT_NOTE: &str = "Cosign image verified";

/// Receives notifications about verified workloads.
pub trait AuditSink: Send + Sync {
    /// Called once per Allow verdict. Must not block.
    fn image_verified(&self, workload: &Workload);
}

/// Audit sink that drops every notification
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn image_verified(&self, _workload: &Workload) {}
}

/// Publishes Kubernetes events against the admitted pod
#[derive(Clone)]
pub struct KubeEventRecorder {
    client: Client,
    reporter: Reporter,
}

impl KubeEventRecorder {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: EVENT_COMPONENT.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }
}

impl AuditSink for KubeEventRecorder {
    fn image_verified(&self, workload: &Workload) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone());
        let mut object_ref = workload.pod().object_ref(&());
        object_ref.namespace = Some(workload.namespace.clone());
        let target = workload.to_string();

        tokio::spawn(async move {
            let event = Event {
                type_: EventType::Normal,
                reason: EVENT_REASON.into(),
                note: Some(EVENT_NOTE.into()),
                action: "Verify".into(),
                secondary: None,
            };
            match recorder.publish(&event, &object_ref).await {
                Ok(()) => debug!(pod = %target, "Published verification event"),
                Err(e) => warn!(pod = %target, error = %e, "Failed to publish event"),
            }
        });
    }
}
