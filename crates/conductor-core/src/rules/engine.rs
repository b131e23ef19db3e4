//! Rule registry and evaluation.
//!
//! Rules live in insertion order; evaluation visits enabled rules in
//! ascending priority, so equal priorities keep the order they were added
//! in. A condition that cannot be evaluated (type mismatch, unknown time
//! field) is logged and counts as false. Only a bad rule definition is an
//! error, and it is raised by [`RulesEngine::add_rule`].

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value, json};

use conductor_types::rule::{Rule, RuleCondition, RuleOperator, TriggeredRule};

use super::RuleError;
use super::actions::ActionExecutor;
use super::condition::{compile_pattern, evaluate_with, resolve_field};
use crate::metrics::MetricsSource;

struct RuleEntry {
    rule: Rule,
    /// One slot per condition; `Some` for `matches`.
    patterns: Vec<Option<Regex>>,
}

#[derive(Default)]
struct RuleSet {
    entries: Vec<RuleEntry>,
    context: Map<String, Value>,
}

pub struct RulesEngine {
    state: RwLock<RuleSet>,
    actions: Option<Arc<dyn ActionExecutor>>,
    metrics: Option<Arc<dyn MetricsSource>>,
}

impl RulesEngine {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RuleSet::default()),
            actions: None,
            metrics: None,
        }
    }

    pub fn with_actions(mut self, actions: Arc<dyn ActionExecutor>) -> Self {
        self.actions = Some(actions);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSource>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, RuleSet> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RuleSet> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------------

    /// Validate and register `rule`. A rule with the same id is replaced in
    /// place, keeping its position.
    pub fn add_rule(&self, rule: Rule) -> Result<(), RuleError> {
        if rule.id.trim().is_empty() {
            return Err(RuleError::Parse("rule id must not be empty".into()));
        }
        if rule.name.trim().is_empty() {
            return Err(RuleError::Parse(format!("rule '{}' has no name", rule.id)));
        }
        let patterns = rule
            .conditions
            .iter()
            .map(|c| match c.operator {
                RuleOperator::Matches => compile_pattern(&c.value).map(Some),
                _ => Ok(None),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let entry = RuleEntry { rule, patterns };
        let mut state = self.write();
        tracing::info!(rule_id = %entry.rule.id, name = %entry.rule.name, "rule added");
        match state.entries.iter_mut().find(|e| e.rule.id == entry.rule.id) {
            Some(existing) => *existing = entry,
            None => state.entries.push(entry),
        }
        Ok(())
    }

    pub fn remove_rule(&self, rule_id: &str) -> Result<Rule, RuleError> {
        let mut state = self.write();
        let index = state
            .entries
            .iter()
            .position(|e| e.rule.id == rule_id)
            .ok_or_else(|| RuleError::UnknownRule(rule_id.to_string()))?;
        tracing::info!(rule_id, "rule removed");
        Ok(state.entries.remove(index).rule)
    }

    pub fn enable_rule(&self, rule_id: &str) -> Result<(), RuleError> {
        self.set_enabled(rule_id, true)
    }

    pub fn disable_rule(&self, rule_id: &str) -> Result<(), RuleError> {
        self.set_enabled(rule_id, false)
    }

    fn set_enabled(&self, rule_id: &str, enabled: bool) -> Result<(), RuleError> {
        let mut state = self.write();
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.rule.id == rule_id)
            .ok_or_else(|| RuleError::UnknownRule(rule_id.to_string()))?;
        entry.rule.enabled = enabled;
        Ok(())
    }

    /// Merge `context` into the persistent evaluation context. Top-level
    /// keys are overwritten.
    pub fn update_context(&self, context: Map<String, Value>) {
        self.write().context.extend(context);
    }

    pub fn context(&self) -> Map<String, Value> {
        self.read().context.clone()
    }

    /// Snapshot of every rule with its counters, in insertion order.
    pub fn rule_stats(&self) -> Vec<Rule> {
        self.read().entries.iter().map(|e| e.rule.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build a rule from a JSON config, applying the usual defaults.
    pub fn create_from_config(config: Value) -> Result<Rule, RuleError> {
        serde_json::from_value(config).map_err(|err| RuleError::Parse(err.to_string()))
    }

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------

    pub fn evaluate_condition(
        &self,
        condition: &RuleCondition,
        context: &Map<String, Value>,
    ) -> Result<bool, RuleError> {
        self.evaluate_condition_at(condition, context, Utc::now())
    }

    pub fn evaluate_condition_at(
        &self,
        condition: &RuleCondition,
        context: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<bool, RuleError> {
        self.check(condition, None, context, now)
    }

    fn check(
        &self,
        condition: &RuleCondition,
        pattern: Option<&Regex>,
        context: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<bool, RuleError> {
        let actual = resolve_field(
            condition.source,
            &condition.field,
            context,
            self.metrics.as_deref(),
            now,
        )?;
        evaluate_with(&actual, condition.operator, &condition.value, pattern)
    }

    /// True when `rule` is enabled and every condition holds. Stops at the
    /// first false condition.
    pub fn evaluate_rule(&self, rule_id: &str, context: &Map<String, Value>) -> Result<bool, RuleError> {
        self.evaluate_rule_at(rule_id, context, Utc::now())
    }

    pub fn evaluate_rule_at(
        &self,
        rule_id: &str,
        context: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<bool, RuleError> {
        let state = self.read();
        let entry = state
            .entries
            .iter()
            .find(|e| e.rule.id == rule_id)
            .ok_or_else(|| RuleError::UnknownRule(rule_id.to_string()))?;
        Ok(self.satisfied(entry, context, now))
    }

    fn satisfied(&self, entry: &RuleEntry, context: &Map<String, Value>, now: DateTime<Utc>) -> bool {
        if !entry.rule.enabled {
            return false;
        }
        entry
            .rule
            .conditions
            .iter()
            .zip(&entry.patterns)
            .all(|(condition, pattern)| {
                match self.check(condition, pattern.as_ref(), context, now) {
                    Ok(holds) => holds,
                    Err(err) => {
                        tracing::warn!(
                            rule_id = %entry.rule.id,
                            field = %condition.field,
                            error = %err,
                            "condition evaluation failed, treating as false"
                        );
                        false
                    }
                }
            })
    }

    /// Evaluate every enabled rule against the persistent context merged
    /// with `event_context`, run the actions of those that fire, and
    /// return them.
    pub fn evaluate_all_rules(&self, event_context: Map<String, Value>) -> Vec<TriggeredRule> {
        self.evaluate_all_rules_at(event_context, Utc::now())
    }

    pub fn evaluate_all_rules_at(
        &self,
        event_context: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Vec<TriggeredRule> {
        // Counters are updated under the lock; actions run after it is
        // released so they may call back into this engine.
        let (context, fired) = {
            let mut state = self.write();
            let mut context = state.context.clone();
            context.extend(event_context);

            let mut order: Vec<usize> = (0..state.entries.len())
                .filter(|&i| state.entries[i].rule.enabled)
                .collect();
            order.sort_by_key(|&i| state.entries[i].rule.priority);

            let mut fired = Vec::new();
            for i in order {
                state.entries[i].rule.evaluation_count += 1;
                if self.satisfied(&state.entries[i], &context, now) {
                    let rule = &mut state.entries[i].rule;
                    rule.trigger_count += 1;
                    rule.last_triggered = Some(now);
                    fired.push(rule.clone());
                }
            }
            (context, fired)
        };

        fired
            .into_iter()
            .map(|rule| {
                tracing::info!(rule_id = %rule.id, name = %rule.name, "rule triggered");
                let failed_actions = self.run_actions(&rule, &context);
                TriggeredRule {
                    rule_id: rule.id,
                    rule_name: rule.name,
                    actions: rule.actions,
                    failed_actions,
                }
            })
            .collect()
    }

    /// Run every action; a failure is logged and the rest still run.
    fn run_actions(&self, rule: &Rule, context: &Map<String, Value>) -> usize {
        let Some(executor) = &self.actions else {
            return 0;
        };
        let mut scoped = context.clone();
        scoped.insert("rule".into(), json!({ "id": rule.id, "name": rule.name }));

        rule.actions
            .iter()
            .filter(|action| match executor.execute(action, &scoped) {
                Ok(()) => false,
                Err(err) => {
                    tracing::error!(rule_id = %rule.id, action = action.kind(), error = %err, "rule action failed");
                    true
                }
            })
            .count()
    }
}

impl Default for RulesEngine {
    fn default() -> Self {
        Self::new()
    }
}
