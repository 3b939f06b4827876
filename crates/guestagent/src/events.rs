//! Container port events.
//!
//! Events arrive one JSON object per line:
//!
//! ```json
//! {"action":"add","containerId":"3f2a...","ports":{"80/tcp":[{"HostIp":"127.0.0.1","HostPort":"8080"}]}}
//! {"action":"remove","containerId":"3f2a..."}
//! {"action":"removeAll"}
//! ```
//!
//! When the feed ends or shutdown is requested every tracked port is
//! withdrawn.

use guestagent_common::{ContainerId, GuestAgentResult};
use guestagent_tracker::{PortMap, Tracker, TrackerResult};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// A change in a container's published ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PortEvent {
    /// Container started or its ports changed.
    Add {
        /// Container the ports belong to.
        container_id: ContainerId,
        /// Every port the container publishes.
        #[serde(default)]
        ports: PortMap,
    },
    /// Container stopped.
    Remove {
        /// Container to forget.
        container_id: ContainerId,
    },
    /// Container runtime restarted; nothing is running any more.
    RemoveAll,
}

/// Counters for one run of the event loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventStats {
    /// Events that were applied cleanly.
    pub applied: usize,
    /// Events whose tracker call reported failures.
    pub failed: usize,
    /// Lines that were not valid events.
    pub malformed: usize,
}

/// Apply one event to the tracker.
pub async fn apply(tracker: &dyn Tracker, event: PortEvent) -> TrackerResult<()> {
    match event {
        PortEvent::Add {
            container_id,
            ports,
        } => tracker.add(&container_id, ports).await,
        PortEvent::Remove { container_id } => tracker.remove(&container_id).await,
        PortEvent::RemoveAll => tracker.remove_all().await,
    }
}

/// Feed events from `reader` into `tracker` until the input ends or
/// `shutdown` completes, then withdraw everything.
///
/// Tracker failures and malformed lines are logged and counted; only
/// reading from `reader` can fail the loop.
///
/// # Errors
///
/// Returns an error if reading the event feed fails.
pub async fn run<R, S>(tracker: &dyn Tracker, reader: R, shutdown: S) -> GuestAgentResult<EventStats>
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    let mut lines = reader.lines();
    let mut stats = EventStats::default();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            () = &mut shutdown => {
                tracing::info!("Shutdown requested");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            tracing::info!("Event feed closed");
            break;
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: PortEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed event");
                stats.malformed += 1;
                continue;
            }
        };

        tracing::debug!(?event, "Applying event");
        match apply(tracker, event).await {
            Ok(()) => stats.applied += 1,
            Err(e) => {
                tracing::error!(error = %e, "Event applied with failures");
                stats.failed += 1;
            }
        }
    }

    if let Err(e) = tracker.remove_all().await {
        tracing::error!(error = %e, "Failed to withdraw ports on shutdown");
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use guestagent_tracker::{
        ApiError, BindingFailure, Operation, PortBinding, PortKey, TrackerError,
    };
    use parking_lot::Mutex;

    /// Tracker that records calls and fails adds for one container.
    #[derive(Default)]
    struct RecordingTracker {
        calls: Mutex<Vec<String>>,
        fail_add_for: Option<&'static str>,
    }

    #[async_trait]
    impl Tracker for RecordingTracker {
        async fn add(&self, id: &ContainerId, ports: PortMap) -> TrackerResult<()> {
            self.calls.lock().push(format!("add {id} {}", ports.len()));
            if self.fail_add_for == Some(id.as_str()) {
                let failure = BindingFailure::new(
                    Operation::Expose,
                    PortBinding::new("127.0.0.1", 80),
                    ApiError::new("boom"),
                );
                return Err(TrackerError::Expose(vec![failure].into()));
            }
            Ok(())
        }

        async fn remove(&self, id: &ContainerId) -> TrackerResult<()> {
            self.calls.lock().push(format!("remove {id}"));
            Ok(())
        }

        async fn remove_all(&self) -> TrackerResult<()> {
            self.calls.lock().push("remove_all".to_string());
            Ok(())
        }

        fn get(&self, _id: &ContainerId) -> Option<PortMap> {
            None
        }
    }

    #[test]
    fn parse_events() {
        let event: PortEvent = serde_json::from_str(
            r#"{"action":"add","containerId":"web","ports":{"80/tcp":[{"HostIp":"127.0.0.1","HostPort":"8080"}]}}"#,
        )
        .unwrap();
        let PortEvent::Add {
            container_id,
            ports,
        } = event
        else {
            panic!("expected add event");
        };
        assert_eq!(container_id.as_str(), "web");
        assert_eq!(
            ports[&PortKey::tcp(80)],
            vec![PortBinding::new("127.0.0.1", 8080)]
        );

        let event: PortEvent =
            serde_json::from_str(r#"{"action":"remove","containerId":"web"}"#).unwrap();
        assert!(matches!(event, PortEvent::Remove { .. }));

        let event: PortEvent = serde_json::from_str(r#"{"action":"removeAll"}"#).unwrap();
        assert_eq!(event, PortEvent::RemoveAll);
    }

    #[test]
    fn reject_invalid_container_id() {
        let result =
            serde_json::from_str::<PortEvent>(r#"{"action":"remove","containerId":"-bad"}"#);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn run_applies_events_then_withdraws() {
        let tracker = RecordingTracker {
            fail_add_for: Some("db"),
            ..RecordingTracker::default()
        };
        let input = concat!(
            r#"{"action":"add","containerId":"web","ports":{"80/tcp":[{"HostPort":"8080"}]}}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"action":"add","containerId":"db"}"#,
            "\n",
            r#"{"action":"remove","containerId":"web"}"#,
            "\n",
        );

        let stats = run(&tracker, input.as_bytes(), std::future::pending())
            .await
            .unwrap();

        assert_eq!(
            stats,
            EventStats {
                applied: 2,
                failed: 1,
                malformed: 1,
            }
        );
        assert_eq!(
            *tracker.calls.lock(),
            vec!["add web 1", "add db 0", "remove web", "remove_all"]
        );
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let tracker = RecordingTracker::default();
        let (_writer, reader) = tokio::io::duplex(64);
        let reader = tokio::io::BufReader::new(reader);

        let stats = run(&tracker, reader, async {}).await.unwrap();

        assert_eq!(stats, EventStats::default());
        assert_eq!(*tracker.calls.lock(), vec!["remove_all"]);
    }
}
