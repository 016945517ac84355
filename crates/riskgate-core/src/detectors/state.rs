//! Execution-state signals: loops, budget overruns, stalled progress.
//!
//! State findings carry spans over action indices, not text offsets.

use std::collections::HashMap;

use crate::config::StateMonitorConfig;
use crate::types::{clamp_unit, AgentAction, AgentStateSnapshot, Entity, EntityCategory, Span};

/// Per-signal risks of one snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSignals {
    pub loop_risk: f64,
    pub cost_risk: f64,
    pub progress_risk: f64,
    pub entities: Vec<Entity>,
}

#[derive(Debug, Clone)]
pub struct StateDetector {
    config: StateMonitorConfig,
}

impl StateDetector {
    pub fn new(config: StateMonitorConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, snapshot: &AgentStateSnapshot) -> StateSignals {
        let mut signals = StateSignals::default();

        if let Some((risk, entity)) = self.loop_signal(&snapshot.actions) {
            signals.loop_risk = risk;
            signals.entities.push(entity);
        }
        if let Some((risk, entity)) = cost_signal(snapshot) {
            signals.cost_risk = risk;
            signals.entities.extend(entity);
        }
        if let Some(entity) = self.progress_signal(&snapshot.actions) {
            signals.progress_risk = self.config.progress_flag_value;
            signals.entities.push(entity);
        }
        signals
    }

    /// Most repeated action signature within the trailing window.
    ///
    /// Reaching the repeat threshold gives at least 0.6, rising with the
    /// share of the window taken by the repetition.
    fn loop_signal(&self, actions: &[AgentAction]) -> Option<(f64, Entity)> {
        let window_start = actions.len().saturating_sub(self.config.loop_window);
        let window = &actions[window_start..];

        let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
        for (offset, action) in window.iter().enumerate() {
            let entry = counts.entry(action.signature()).or_insert((0, offset));
            entry.0 += 1;
        }
        let (signature, (count, first)) = counts
            .into_iter()
            .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then(b.1 .1.cmp(&a.1 .1)))?;
        if count < self.config.loop_repeat_threshold {
            return None;
        }

        let risk = clamp_unit((count as f64 / self.config.loop_window as f64).max(0.6));
        tracing::debug!(signature = %signature, count, risk, "Loop detected");
        Some((
            risk,
            Entity::new(
                EntityCategory::LoopDetected,
                Span::new(window_start + first, actions.len()),
                risk,
                1.0,
                "state.loop",
            ),
        ))
    }

    fn progress_signal(&self, actions: &[AgentAction]) -> Option<Entity> {
        let window = self.config.progress_window;
        if actions.len() < window {
            return None;
        }
        let start = actions.len() - window;
        if actions[start..].iter().any(|a| a.made_progress) {
            return None;
        }
        Some(Entity::new(
            EntityCategory::NoProgress,
            Span::new(start, actions.len()),
            1.0,
            self.config.progress_flag_value,
            "state.no_progress",
        ))
    }
}

/// Budget utilisation: the larger of token and cost ratios.
///
/// A finding is only emitted once a budget is exhausted.
fn cost_signal(snapshot: &AgentStateSnapshot) -> Option<(f64, Option<Entity>)> {
    let token_ratio = snapshot
        .token_budget
        .map(|budget| ratio(snapshot.tokens_used as f64, budget as f64));
    let cost_ratio = snapshot
        .cost_budget_usd
        .map(|budget| ratio(snapshot.cost_usd, budget));

    let utilisation = match (token_ratio, cost_ratio) {
        (None, None) => return None,
        (a, b) => a.unwrap_or(0.0).max(b.unwrap_or(0.0)),
    };
    let risk = clamp_unit(utilisation);
    let entity = (utilisation >= 1.0).then(|| {
        Entity::new(
            EntityCategory::CostOverrun,
            Span::new(0, snapshot.actions.len()),
            1.0,
            1.0,
            "state.cost_overrun",
        )
    });
    Some((risk, entity))
}

fn ratio(used: f64, budget: f64) -> f64 {
    let used = used.max(0.0);
    if budget <= 0.0 {
        return if used > 0.0 { 1.0 } else { 0.0 };
    }
    used / budget
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> StateDetector {
        StateDetector::new(StateMonitorConfig::default())
    }

    fn action(tool: &str, progress: bool) -> AgentAction {
        AgentAction::new(tool, "{}", progress)
    }

    #[test]
    fn test_no_state_no_risk() {
        let signals = detector().detect(&AgentStateSnapshot::default());
        assert_eq!(signals, StateSignals::default());
    }

    #[test]
    fn test_loop_detection() {
        let snapshot = AgentStateSnapshot {
            actions: vec![
                action("search", true),
                action("fetch", false),
                action("fetch", false),
                action("fetch", false),
            ],
            ..Default::default()
        };
        let signals = detector().detect(&snapshot);
        assert_eq!(signals.loop_risk, 0.6);
        assert_eq!(signals.entities[0].category, EntityCategory::LoopDetected);
        assert_eq!(signals.entities[0].span, Span::new(1, 4));
    }

    #[test]
    fn test_loop_risk_grows_with_repetition() {
        let snapshot = AgentStateSnapshot {
            actions: (0..10).map(|_| action("fetch", false)).collect(),
            ..Default::default()
        };
        let signals = detector().detect(&snapshot);
        assert_eq!(signals.loop_risk, 1.0);
        assert_eq!(signals.progress_risk, 0.3);
    }

    #[test]
    fn test_different_arguments_are_not_a_loop() {
        let snapshot = AgentStateSnapshot {
            actions: (0..5)
                .map(|i| AgentAction::new("fetch", format!("{{\"page\": {}}}", i), true))
                .collect(),
            ..Default::default()
        };
        assert_eq!(detector().detect(&snapshot).loop_risk, 0.0);
    }

    #[test]
    fn test_cost_utilisation() {
        let snapshot = AgentStateSnapshot {
            tokens_used: 5_000,
            token_budget: Some(10_000),
            cost_usd: 0.9,
            cost_budget_usd: Some(1.0),
            ..Default::default()
        };
        let signals = detector().detect(&snapshot);
        assert!((signals.cost_risk - 0.9).abs() < 1e-9);
        assert!(signals.entities.is_empty());

        let over = AgentStateSnapshot {
            tokens_used: 12_000,
            token_budget: Some(10_000),
            ..Default::default()
        };
        let signals = detector().detect(&over);
        assert_eq!(signals.cost_risk, 1.0);
        assert_eq!(signals.entities[0].category, EntityCategory::CostOverrun);
    }

    #[test]
    fn test_progress_needs_full_window() {
        let short = AgentStateSnapshot {
            actions: (0..4).map(|i| action(&format!("t{}", i), false)).collect(),
            ..Default::default()
        };
        assert_eq!(detector().detect(&short).progress_risk, 0.0);

        let stalled = AgentStateSnapshot {
            actions: (0..5).map(|i| action(&format!("t{}", i), false)).collect(),
            ..Default::default()
        };
        assert_eq!(detector().detect(&stalled).progress_risk, 0.3);
    }
}
