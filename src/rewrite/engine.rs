//! Shared rule store and status rewriting.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::rewrite::rule::{RewriteRule, RuleError};

/// Ordered rewrite rules shared by every connection.
///
/// Readers work on a snapshot; writers publish a new list with `rcu`.
/// Each mutation is atomic on its own, a sequence of them is not.
pub struct RewriteEngine {
    rules: ArcSwap<Vec<RewriteRule>>,
}

impl RewriteEngine {
    /// An engine with no rules.
    pub fn with_defaults() -> Self {
        Self {
            rules: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Seed the engine from configured rules, validating each.
    pub fn from_config(rules: &[RewriteRule]) -> Result<Self, RuleError> {
        for rule in rules {
            rule.validate()?;
        }
        Ok(Self {
            rules: ArcSwap::from_pointee(rules.to_vec()),
        })
    }

    /// Current rules, in evaluation order.
    pub fn rules(&self) -> Arc<Vec<RewriteRule>> {
        self.rules.load_full()
    }

    pub fn len(&self) -> usize {
        self.rules.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.load().is_empty()
    }

    /// Append a rule after validating it.
    pub fn add_rule(&self, rule: RewriteRule) -> Result<(), RuleError> {
        rule.validate()?;
        tracing::info!(
            original = %rule.original_status_code,
            new = %rule.new_status_code,
            endpoint = %rule.endpoint_pattern,
            "Rewrite rule added"
        );
        self.rules.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(rule.clone());
            next
        });
        Ok(())
    }

    /// Replace the rule at `index` after validating the new one.
    pub fn update_rule(&self, index: usize, rule: RewriteRule) -> Result<(), RuleError> {
        rule.validate()?;
        let mut outcome = Ok(());
        self.rules.rcu(|current| {
            let mut next = Vec::clone(current);
            match next.get_mut(index) {
                Some(slot) => {
                    *slot = rule.clone();
                    outcome = Ok(());
                }
                None => {
                    outcome = Err(RuleError::IndexOutOfRange {
                        index,
                        len: current.len(),
                    })
                }
            }
            next
        });
        if outcome.is_ok() {
            tracing::info!(index, "Rewrite rule updated");
        }
        outcome
    }

    /// Remove the first rule equal to `rule`. Returns whether one was removed.
    pub fn remove_rule(&self, rule: &RewriteRule) -> bool {
        let mut removed = false;
        self.rules.rcu(|current| {
            let mut next = Vec::clone(current);
            removed = match next.iter().position(|r| r == rule) {
                Some(pos) => {
                    next.remove(pos);
                    true
                }
                None => false,
            };
            next
        });
        removed
    }

    /// Remove and return the rule at `index`.
    pub fn remove_at(&self, index: usize) -> Result<RewriteRule, RuleError> {
        let mut outcome = Err(RuleError::IndexOutOfRange { index, len: 0 });
        self.rules.rcu(|current| {
            let mut next = Vec::clone(current);
            outcome = if index < next.len() {
                Ok(next.remove(index))
            } else {
                Err(RuleError::IndexOutOfRange {
                    index,
                    len: current.len(),
                })
            };
            next
        });
        outcome
    }

    pub fn set_all_enabled(&self, enabled: bool) {
        self.rules.rcu(|current| {
            current
                .iter()
                .cloned()
                .map(|rule| rule.with_enabled(enabled))
                .collect::<Vec<_>>()
        });
        tracing::info!(enabled, "All rewrite rules toggled");
    }

    /// Swap in a whole new rule list (config reload). Nothing is stored
    /// unless every rule validates.
    pub fn replace_rules(&self, rules: Vec<RewriteRule>) -> Result<(), RuleError> {
        for rule in &rules {
            rule.validate()?;
        }
        let count = rules.len();
        self.rules.store(Arc::new(rules));
        tracing::info!(count, "Rewrite rules replaced");
        Ok(())
    }

    /// Status to send for a response with `status` to `url`.
    ///
    /// The first enabled matching rule with a usable replacement wins. A
    /// matching rule whose replacement is unusable is skipped and the search
    /// continues.
    pub fn apply_rewrite(&self, status: u16, url: &str) -> u16 {
        let rules = self.rules.load();
        for rule in rules.iter().filter(|rule| rule.matches(status, url)) {
            match rule.replacement() {
                Ok(code) => {
                    tracing::debug!(
                        original = status,
                        new = code,
                        url = %url,
                        "Status rewritten"
                    );
                    return code;
                }
                Err(e) => {
                    tracing::warn!(
                        rule = %rule.original_status_code,
                        new = %rule.new_status_code,
                        error = %e,
                        "Skipping rewrite rule with unusable status"
                    );
                }
            }
        }
        status
    }
}

impl Default for RewriteEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> RewriteEngine {
        let engine = RewriteEngine::with_defaults();
        engine.add_rule(RewriteRule::new("404", "200", "/api/users")).unwrap();
        engine.add_rule(RewriteRule::new("500", "200", "")).unwrap();
        engine
    }

    #[test]
    fn first_matching_rule_wins() {
        let engine = engine();
        assert_eq!(engine.apply_rewrite(404, "http://x/api/users"), 200);
        assert_eq!(engine.apply_rewrite(404, "http://x/other"), 404);
        assert_eq!(engine.apply_rewrite(500, "http://anything"), 200);
        assert_eq!(engine.apply_rewrite(201, "http://x/api/users"), 201);
    }

    #[test]
    fn unusable_replacement_is_skipped() {
        let engine = RewriteEngine::with_defaults();
        engine.add_rule(RewriteRule::new("404", "4xx", "")).unwrap();
        engine.add_rule(RewriteRule::new("4xx", "418", "")).unwrap();
        assert_eq!(engine.apply_rewrite(404, "http://x/"), 418);

        let engine = RewriteEngine::from_config(&[]).unwrap();
        engine.add_rule(RewriteRule::new("404", "2xx", "")).unwrap();
        assert_eq!(engine.apply_rewrite(404, "http://x/"), 404);
    }

    #[test]
    fn invalid_rules_are_rejected() {
        let engine = RewriteEngine::with_defaults();
        assert_eq!(
            engine.add_rule(RewriteRule::new("", "200", "")),
            Err(RuleError::EmptyOriginal)
        );
        assert!(engine.is_empty());
        assert!(RewriteEngine::from_config(&[RewriteRule::new("9xx", "200", "")]).is_err());
    }

    #[test]
    fn update_and_remove() {
        let engine = engine();
        engine.update_rule(0, RewriteRule::new("404", "204", "")).unwrap();
        assert_eq!(engine.apply_rewrite(404, "http://x/other"), 204);
        assert_eq!(
            engine.update_rule(5, RewriteRule::new("404", "200", "")),
            Err(RuleError::IndexOutOfRange { index: 5, len: 2 })
        );

        assert!(engine.remove_rule(&RewriteRule::new("500", "200", "")));
        assert!(!engine.remove_rule(&RewriteRule::new("500", "200", "")));
        assert_eq!(engine.len(), 1);

        let removed = engine.remove_at(0).unwrap();
        assert_eq!(removed.new_status_code, "204");
        assert!(engine.remove_at(0).is_err());
    }

    #[test]
    fn toggling_all_rules() {
        let engine = engine();
        engine.set_all_enabled(false);
        assert!(engine.rules().iter().all(|r| !r.enabled));
        assert_eq!(engine.apply_rewrite(500, "http://x/"), 500);

        engine.set_all_enabled(true);
        assert_eq!(engine.apply_rewrite(500, "http://x/"), 200);
    }

    #[test]
    fn replace_is_all_or_nothing() {
        let engine = engine();
        let bad = vec![
            RewriteRule::new("404", "200", ""),
            RewriteRule::new("404", "", ""),
        ];
        assert!(engine.replace_rules(bad).is_err());
        assert_eq!(engine.len(), 2);

        engine.replace_rules(vec![RewriteRule::new("3xx", "200", "")]).unwrap();
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.apply_rewrite(301, "http://x/"), 200);
    }

    #[test]
    fn snapshot_survives_mutation() {
        let engine = engine();
        let snapshot = engine.rules();
        engine.remove_at(0).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn concurrent_readers_and_writers() {
        let engine = Arc::new(engine());
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        engine.add_rule(RewriteRule::new("418", "200", "")).unwrap();
                    }
                })
            })
            .collect();
        for _ in 0..1000 {
            assert_eq!(engine.apply_rewrite(404, "http://x/api/users"), 200);
        }
        for w in writers {
            w.join().unwrap();
        }
        assert_eq!(engine.len(), 402);
    }
}
