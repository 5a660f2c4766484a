use std::collections::HashMap;
use std::time::Duration;
use std::time::Instant;

use indexmap::IndexMap;
use tracing::debug;
use tracing::warn;

use testpilot_protocol::AgentOutcome;

/// How long a completed agent lingers in the active set so the UI can
/// show a brief "done" state before it disappears.
pub const COMPLETE_LINGER: Duration = Duration::from_secs(3);
/// An agent silent for this long while thinking/executing is presumed
/// dead (a dropped terminal event) and promoted to `Error`.
pub const STALE_AFTER: Duration = Duration::from_secs(5 * 60);
/// Cadence of the staleness sweep.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

const STALE_MESSAGE: &str = "Agent timed out without reporting a result";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentStatus {
    Thinking,
    Executing,
    Complete,
    Error,
}

/// Live snapshot of one sub-agent. Exclusively owned and mutated by the
/// tracker; consumers only read.
#[derive(Debug, Clone)]
pub struct ActiveAgent {
    pub id: String,
    pub agent_type: String,
    pub name: Option<String>,
    pub status: AgentStatus,
    pub progress: u8,
    pub current_tool: Option<String>,
    pub confidence: Option<f64>,
    pub message: Option<String>,
    pub started_at: Instant,
}

impl ActiveAgent {
    fn is_running(&self) -> bool {
        matches!(self.status, AgentStatus::Thinking | AgentStatus::Executing)
    }
}

/// Agent lifecycle state machine: `thinking → executing → {complete,
/// error}`. Completed agents self-destruct after [`COMPLETE_LINGER`];
/// errored agents stay until cleared. All deadlines are plain data driven
/// by [`tick`](Self::tick), so callers own the clock.
#[derive(Default)]
pub struct AgentActivityTracker {
    agents: IndexMap<String, ActiveAgent>,
    removals: HashMap<String, Instant>,
    last_sweep: Option<Instant>,
}

impl AgentActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn handle_start(
        &mut self,
        agent_id: String,
        agent_type: String,
        name: Option<String>,
        message: Option<String>,
        now: Instant,
    ) {
        // A restart resets the lifecycle, including any pending removal.
        self.removals.remove(&agent_id);
        self.agents.insert(
            agent_id.clone(),
            ActiveAgent {
                id: agent_id,
                agent_type,
                name,
                status: AgentStatus::Thinking,
                progress: 0,
                current_tool: None,
                confidence: None,
                message,
                started_at: now,
            },
        );
    }

    pub(crate) fn handle_progress(
        &mut self,
        agent_id: &str,
        progress: f64,
        current_tool: Option<String>,
        message: Option<String>,
    ) {
        let Some(agent) = self.agents.get_mut(agent_id) else {
            debug!(agent_id, "progress for unknown agent dropped");
            return;
        };
        if !agent.is_running() {
            debug!(agent_id, "progress after terminal status dropped");
            return;
        }
        if let Some(tool) = current_tool {
            agent.current_tool = Some(tool);
        }
        if let Some(message) = message {
            agent.message = Some(message);
        }

        let clamped = progress.clamp(0.0, 100.0).round() as u8;
        if clamped < agent.progress {
            // Progress only ever increases within one lifetime; a lower
            // value is a data anomaly, not a rollback.
            debug!(
                agent_id,
                reported = clamped,
                current = agent.progress,
                "ignoring regressive progress"
            );
            return;
        }
        agent.progress = clamped;
        if clamped > 0 && agent.status == AgentStatus::Thinking {
            agent.status = AgentStatus::Executing;
        }
    }

    pub(crate) fn handle_complete(
        &mut self,
        agent_id: &str,
        outcome: AgentOutcome,
        confidence: Option<f64>,
        message: Option<String>,
        now: Instant,
    ) {
        let Some(agent) = self.agents.get_mut(agent_id) else {
            debug!(agent_id, "completion for unknown agent dropped");
            return;
        };
        agent.confidence = confidence;
        if let Some(message) = message {
            agent.message = Some(message);
        }
        match outcome {
            AgentOutcome::Complete => {
                agent.status = AgentStatus::Complete;
                agent.progress = 100;
                self.removals
                    .insert(agent_id.to_string(), now + COMPLETE_LINGER);
            }
            AgentOutcome::Error => {
                // Errored agents are kept until the caller clears them.
                agent.status = AgentStatus::Error;
                self.removals.remove(agent_id);
            }
        }
    }

    /// Reap elapsed removal deadlines and, every [`SWEEP_INTERVAL`],
    /// promote silently-stuck agents to `Error`.
    pub(crate) fn tick(&mut self, now: Instant) {
        let due: Vec<String> = self
            .removals
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in due {
            self.removals.remove(&id);
            self.agents.shift_remove(&id);
        }

        let sweep_due = self
            .last_sweep
            .is_none_or(|last| now.duration_since(last) >= SWEEP_INTERVAL);
        if !sweep_due {
            return;
        }
        self.last_sweep = Some(now);
        for agent in self.agents.values_mut() {
            if agent.is_running() && now.duration_since(agent.started_at) > STALE_AFTER {
                warn!(agent_id = %agent.id, "stale agent promoted to error");
                agent.status = AgentStatus::Error;
                agent.message = Some(STALE_MESSAGE.to_string());
            }
        }
    }

    /// Drop every agent and cancel all pending removal deadlines.
    pub(crate) fn clear(&mut self) {
        self.agents.clear();
        self.removals.clear();
    }

    pub fn get(&self, agent_id: &str) -> Option<&ActiveAgent> {
        self.agents.get(agent_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveAgent> {
        self.agents.values()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Arithmetic mean of all active agents' progress; 0 with none active.
    pub fn overall_progress(&self) -> u8 {
        if self.agents.is_empty() {
            return 0;
        }
        let total: u64 = self.agents.values().map(|a| u64::from(a.progress)).sum();
        (total / self.agents.len() as u64) as u8
    }

    pub fn is_processing(&self) -> bool {
        self.agents.values().any(ActiveAgent::is_running)
    }

    pub fn agents_by_status(&self) -> HashMap<AgentStatus, Vec<&ActiveAgent>> {
        let mut partition: HashMap<AgentStatus, Vec<&ActiveAgent>> = HashMap::new();
        for agent in self.agents.values() {
            partition.entry(agent.status).or_default().push(agent);
        }
        partition
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn started(tracker: &mut AgentActivityTracker, id: &str, now: Instant) {
        tracker.handle_start(id.to_string(), "runner".to_string(), None, None, now);
    }

    #[test]
    fn lifecycle_runs_thinking_to_complete_and_reaps_after_linger() {
        let mut tracker = AgentActivityTracker::new();
        let t0 = Instant::now();
        started(&mut tracker, "a1", t0);
        assert_eq!(tracker.get("a1").map(|a| a.status), Some(AgentStatus::Thinking));

        tracker.handle_progress("a1", 50.0, Some("run_test".to_string()), None);
        let agent = tracker.get("a1").expect("agent");
        assert_eq!(agent.status, AgentStatus::Executing);
        assert_eq!(agent.progress, 50);

        tracker.handle_complete("a1", AgentOutcome::Complete, Some(0.9), None, t0);
        let agent = tracker.get("a1").expect("agent");
        assert_eq!(agent.status, AgentStatus::Complete);
        assert_eq!(agent.progress, 100);

        // Still lingering just before the deadline.
        tracker.tick(t0 + COMPLETE_LINGER - Duration::from_millis(1));
        assert!(tracker.get("a1").is_some());
        tracker.tick(t0 + COMPLETE_LINGER);
        assert!(tracker.get("a1").is_none());
    }

    #[test]
    fn errored_agents_are_not_auto_removed() {
        let mut tracker = AgentActivityTracker::new();
        let t0 = Instant::now();
        started(&mut tracker, "a1", t0);
        tracker.handle_complete("a1", AgentOutcome::Error, None, None, t0);
        tracker.tick(t0 + Duration::from_secs(60));
        assert_eq!(tracker.get("a1").map(|a| a.status), Some(AgentStatus::Error));
    }

    #[test]
    fn stale_executing_agent_is_promoted_to_error() {
        let mut tracker = AgentActivityTracker::new();
        let t0 = Instant::now();
        started(&mut tracker, "a1", t0);
        tracker.handle_progress("a1", 10.0, None, None);

        tracker.tick(t0 + STALE_AFTER + Duration::from_secs(1));
        let agent = tracker.get("a1").expect("agent");
        assert_eq!(agent.status, AgentStatus::Error);
        assert_eq!(agent.message.as_deref(), Some(STALE_MESSAGE));
    }

    #[test]
    fn sweep_is_rate_limited_to_its_interval() {
        let mut tracker = AgentActivityTracker::new();
        let t0 = Instant::now();
        started(&mut tracker, "a1", t0);
        // First sweep runs right at the staleness boundary, where the
        // agent does not yet qualify.
        tracker.tick(t0 + STALE_AFTER);
        assert_eq!(tracker.get("a1").map(|a| a.status), Some(AgentStatus::Thinking));
        // Stale now, but the next sweep slot hasn't arrived yet.
        tracker.tick(t0 + STALE_AFTER + Duration::from_secs(1));
        assert_eq!(tracker.get("a1").map(|a| a.status), Some(AgentStatus::Thinking));
        tracker.tick(t0 + STALE_AFTER + SWEEP_INTERVAL);
        assert_eq!(tracker.get("a1").map(|a| a.status), Some(AgentStatus::Error));
    }

    #[test]
    fn regressive_progress_is_ignored() {
        let mut tracker = AgentActivityTracker::new();
        let t0 = Instant::now();
        started(&mut tracker, "a1", t0);
        tracker.handle_progress("a1", 60.0, None, None);
        tracker.handle_progress("a1", 30.0, None, None);
        assert_eq!(tracker.get("a1").map(|a| a.progress), Some(60));
        // Out-of-range values clamp instead of erroring.
        tracker.handle_progress("a1", 250.0, None, None);
        assert_eq!(tracker.get("a1").map(|a| a.progress), Some(100));
    }

    #[test]
    fn derived_reads_partition_and_average() {
        let mut tracker = AgentActivityTracker::new();
        let t0 = Instant::now();
        assert_eq!(tracker.overall_progress(), 0);
        assert!(!tracker.is_processing());

        started(&mut tracker, "a1", t0);
        started(&mut tracker, "a2", t0);
        tracker.handle_progress("a1", 40.0, None, None);
        tracker.handle_complete("a2", AgentOutcome::Error, None, None, t0);

        assert_eq!(tracker.overall_progress(), 20);
        assert!(tracker.is_processing());
        let by_status = tracker.agents_by_status();
        assert_eq!(by_status[&AgentStatus::Executing].len(), 1);
        assert_eq!(by_status[&AgentStatus::Error].len(), 1);
    }

    #[test]
    fn clear_cancels_pending_removals() {
        let mut tracker = AgentActivityTracker::new();
        let t0 = Instant::now();
        started(&mut tracker, "a1", t0);
        tracker.handle_complete("a1", AgentOutcome::Complete, None, None, t0);
        tracker.clear();
        assert!(tracker.is_empty());
        assert!(tracker.removals.is_empty());
        // A later tick finds nothing to reap.
        tracker.tick(t0 + COMPLETE_LINGER * 2);
        assert!(tracker.is_empty());
    }
}
