//! Type forwarding for renamed or moved record types.
//!
//! The table is built once from static configuration, validated, and
//! then only read. It is passed into each decode call by reference.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use atosave_common::{Error, Result};

/// Maps one legacy type identifier to its current identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingRule {
    pub from: String,
    pub to: String,
}

impl ForwardingRule {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Immutable forwarding table.
///
/// Chains are collapsed at construction (`a -> b`, `b -> c` resolves `a`
/// to `c`), so `resolve` is idempotent.
#[derive(Debug, Clone, Default)]
pub struct TypeForwardingRegistry {
    targets: HashMap<String, String>,
}

impl TypeForwardingRegistry {
    /// A registry with no rules.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a registry from rules.
    ///
    /// # Errors
    /// - An identifier is empty
    /// - A rule forwards an identifier to itself
    /// - Two rules forward the same identifier to different targets
    /// - The rules form a cycle
    pub fn new(rules: impl IntoIterator<Item = ForwardingRule>) -> Result<Self> {
        let mut direct: HashMap<String, String> = HashMap::new();

        for rule in rules {
            if rule.from.is_empty() || rule.to.is_empty() {
                return Err(Error::Config(
                    "Forwarding rule has an empty type identifier".to_string(),
                ));
            }
            if rule.from == rule.to {
                return Err(Error::Config(format!(
                    "Forwarding rule maps '{}' to itself",
                    rule.from
                )));
            }
            match direct.get(&rule.from) {
                Some(existing) if *existing != rule.to => {
                    return Err(Error::Config(format!(
                        "Conflicting forwarding rules for '{}': '{}' and '{}'",
                        rule.from, existing, rule.to
                    )));
                }
                _ => {
                    direct.insert(rule.from, rule.to);
                }
            }
        }

        let mut targets = HashMap::with_capacity(direct.len());
        for from in direct.keys() {
            let mut seen: HashSet<&str> = HashSet::new();
            let mut path = vec![from.as_str()];
            let mut current = from.as_str();
            seen.insert(current);

            while let Some(next) = direct.get(current).map(String::as_str) {
                path.push(next);
                if !seen.insert(next) {
                    return Err(Error::Config(format!(
                        "Forwarding rules form a cycle: {}",
                        path.join(" -> ")
                    )));
                }
                current = next;
            }
            targets.insert(from.clone(), current.to_string());
        }

        Ok(Self { targets })
    }

    /// Current identifier for `raw`, or `raw` itself if no rule applies.
    pub fn resolve<'a>(&'a self, raw: &'a str) -> &'a str {
        self.targets.get(raw).map(String::as_str).unwrap_or(raw)
    }

    /// Number of forwarded identifiers.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_resolve_forwarded_and_unknown() {
        let registry =
            TypeForwardingRegistry::new(vec![ForwardingRule::new("Old.Hero", "Game.Hero")])
                .unwrap();

        assert_eq!(registry.resolve("Old.Hero"), "Game.Hero");
        assert_eq!(registry.resolve("Game.Hero"), "Game.Hero");
        assert_eq!(registry.resolve("Other"), "Other");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_chains_collapse() {
        let registry = TypeForwardingRegistry::new(vec![
            ForwardingRule::new("a", "b"),
            ForwardingRule::new("b", "c"),
        ])
        .unwrap();

        assert_eq!(registry.resolve("a"), "c");
        assert_eq!(registry.resolve("b"), "c");
        assert_eq!(registry.resolve("c"), "c");
    }

    #[test]
    fn test_two_rule_cycle_rejected() {
        let result = TypeForwardingRegistry::new(vec![
            ForwardingRule::new("a", "b"),
            ForwardingRule::new("b", "a"),
        ]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_longer_cycle_rejected() {
        let result = TypeForwardingRegistry::new(vec![
            ForwardingRule::new("a", "b"),
            ForwardingRule::new("b", "c"),
            ForwardingRule::new("c", "a"),
        ]);
        match result {
            Err(Error::Config(msg)) => assert!(msg.contains("cycle")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_self_rule_rejected() {
        let result = TypeForwardingRegistry::new(vec![ForwardingRule::new("a", "a")]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_conflicting_rules_rejected() {
        let result = TypeForwardingRegistry::new(vec![
            ForwardingRule::new("a", "b"),
            ForwardingRule::new("a", "c"),
        ]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_duplicate_identical_rule_accepted() {
        let registry = TypeForwardingRegistry::new(vec![
            ForwardingRule::new("a", "b"),
            ForwardingRule::new("a", "b"),
        ])
        .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_empty_identifier_rejected() {
        let result = TypeForwardingRegistry::new(vec![ForwardingRule::new("", "b")]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rules_deserialize() {
        let rules: Vec<ForwardingRule> =
            serde_json::from_str(r#"[{"from":"Old.Hero","to":"Game.Hero"}]"#).unwrap();
        assert_eq!(rules, vec![ForwardingRule::new("Old.Hero", "Game.Hero")]);
    }

    proptest! {
        #[test]
        fn prop_resolve_is_idempotent(
            edges in proptest::collection::vec((0u8..12, 0u8..12), 0..16),
            probe in 0u8..14,
        ) {
            let rules: Vec<ForwardingRule> = edges
                .iter()
                .map(|(a, b)| ForwardingRule::new(format!("T{}", a), format!("T{}", b)))
                .collect();

            // Random rule sets may be invalid; only valid ones are checked.
            if let Ok(registry) = TypeForwardingRegistry::new(rules) {
                let probe = format!("T{}", probe);
                let once = registry.resolve(&probe).to_string();
                prop_assert_eq!(registry.resolve(&once), once.as_str());
            }
        }
    }
}
