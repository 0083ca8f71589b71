//! Per-tick statistics and their delivery.
//!
//! Every completed tick produces one [`Stats`]. The [`StatsReporter`]
//! publishes it on a bounded broadcast channel: a slow subscriber loses the
//! oldest summaries rather than stalling the executor, and publishing with
//! no subscriber at all is fine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use devgrid_state::{Transition, WorkspaceId};
use serde::{Serialize, Serializer};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::TransitionError;

/// Outcome of one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stats {
    pub tick: DateTime<Utc>,
    pub instance_id: String,
    /// Transitions this instance enqueued, by workspace.
    pub transitions: HashMap<WorkspaceId, Transition>,
    /// Workspaces this instance marked dormant.
    pub dormant: Vec<WorkspaceId>,
    /// Per-workspace failures, retried on the next tick.
    #[serde(serialize_with = "errors_as_strings")]
    pub errors: HashMap<WorkspaceId, TransitionError>,
}

fn errors_as_strings<S: Serializer>(
    errors: &HashMap<WorkspaceId, TransitionError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(errors.iter().map(|(id, e)| (id, e.to_string())))
}

impl Stats {
    pub fn new(tick: DateTime<Utc>, instance_id: impl Into<String>) -> Self {
        Self {
            tick,
            instance_id: instance_id.into(),
            ..Default::default()
        }
    }

    pub fn count(&self, transition: Transition) -> usize {
        self.transitions.values().filter(|t| **t == transition).count()
    }
}

/// Publishes tick summaries to any number of observers.
#[derive(Clone)]
pub struct StatsReporter {
    tx: broadcast::Sender<Stats>,
}

impl StatsReporter {
    /// `capacity` summaries are buffered per subscriber before the oldest is dropped.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Stats> {
        self.tx.subscribe()
    }

    pub fn publish(&self, stats: Stats) {
        let receivers = self.tx.send(stats).unwrap_or(0);
        debug!(receivers, "tick stats published");
    }
}

/// Render a tick summary in Prometheus text exposition format.
pub fn render_prometheus(stats: &Stats) -> String {
    let mut out = String::new();

    out.push_str("# HELP devgrid_autobuild_transitions Transitions enqueued in the last tick.\n");
    out.push_str("# TYPE devgrid_autobuild_transitions gauge\n");
    for transition in [Transition::Start, Transition::Stop, Transition::Delete] {
        out.push_str(&format!(
            "devgrid_autobuild_transitions{{instance=\"{}\",transition=\"{}\"}} {}\n",
            stats.instance_id,
            transition,
            stats.count(transition)
        ));
    }

    out.push_str("# HELP devgrid_autobuild_dormant Workspaces marked dormant in the last tick.\n");
    out.push_str("# TYPE devgrid_autobuild_dormant gauge\n");
    out.push_str(&format!(
        "devgrid_autobuild_dormant{{instance=\"{}\"}} {}\n",
        stats.instance_id,
        stats.dormant.len()
    ));

    out.push_str("# HELP devgrid_autobuild_errors Workspaces that failed in the last tick.\n");
    out.push_str("# TYPE devgrid_autobuild_errors gauge\n");
    out.push_str(&format!(
        "devgrid_autobuild_errors{{instance=\"{}\"}} {}\n",
        stats.instance_id,
        stats.errors.len()
    ));

    out.push_str("# HELP devgrid_autobuild_last_tick_seconds Unix time of the last completed tick.\n");
    out.push_str("# TYPE devgrid_autobuild_last_tick_seconds gauge\n");
    out.push_str(&format!(
        "devgrid_autobuild_last_tick_seconds{{instance=\"{}\"}} {}\n",
        stats.instance_id,
        stats.tick.timestamp()
    ));

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Stats {
        let mut stats = Stats::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), "replica-1");
        stats.transitions.insert("ws-1".into(), Transition::Start);
        stats.transitions.insert("ws-2".into(), Transition::Start);
        stats.transitions.insert("ws-3".into(), Transition::Stop);
        stats.dormant.push("ws-4".into());
        stats
            .errors
            .insert("ws-5".into(), TransitionError::TemplateNotFound("tpl".into()));
        stats
    }

    #[test]
    fn render_contains_counts() {
        let output = render_prometheus(&sample());

        assert!(output.contains("# TYPE devgrid_autobuild_transitions gauge"));
        assert!(output.contains(
            "devgrid_autobuild_transitions{instance=\"replica-1\",transition=\"start\"} 2"
        ));
        assert!(output.contains(
            "devgrid_autobuild_transitions{instance=\"replica-1\",transition=\"delete\"} 0"
        ));
        assert!(output.contains("devgrid_autobuild_dormant{instance=\"replica-1\"} 1"));
        assert!(output.contains("devgrid_autobuild_errors{instance=\"replica-1\"} 1"));
        assert!(output.contains("devgrid_autobuild_last_tick_seconds{instance=\"replica-1\"} 1704067200"));
    }

    #[test]
    fn stats_serialize_errors_as_messages() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["errors"]["ws-5"], "template tpl not found");
        assert_eq!(json["transitions"]["ws-3"], "stop");
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_block() {
        let reporter = StatsReporter::new(1);
        reporter.publish(sample());
        reporter.publish(sample());
    }

    #[tokio::test]
    async fn slow_subscriber_loses_oldest() {
        let reporter = StatsReporter::new(2);
        let mut rx = reporter.subscribe();
        for minute in 0..3 {
            let mut stats = sample();
            stats.tick = stats.tick + chrono::Duration::minutes(minute);
            reporter.publish(stats);
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
        let next = rx.recv().await.unwrap();
        assert_eq!(next.tick.timestamp(), 1704067200 + 60);
    }
}
