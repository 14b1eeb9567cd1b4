//! Local command rules

use std::collections::HashMap;

/// Phrases answered without a network round trip
const BUILTIN_RULES: &[(&str, &str)] = &[
    ("hello", "Hi there!"),
    ("how are you", "I'm just a robot, but I'm doing fine."),
    ("what is your name", "My name is Neo, your assistant."),
    ("move forward", "Moving forward now."),
    ("move back", "Reversing now."),
    ("turn left", "Turning left."),
    ("turn right", "Turning right."),
    ("stop", "Stopping now."),
];

/// Normalize an utterance for rule lookup (trimmed, lower-cased)
#[must_use]
pub fn normalize(utterance: &str) -> String {
    utterance.trim().to_lowercase()
}

/// Exact-match phrase to reply table
///
/// Keys are stored normalized. The table is built once and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: HashMap<String, String>,
}

impl RuleTable {
    /// Build a table from phrase/reply pairs
    ///
    /// Blank phrases are skipped; later duplicates win.
    pub fn new<I, K, V>(rules: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut table = Self::default();
        table.extend(rules);
        table
    }

    /// The built-in rule set
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(BUILTIN_RULES.iter().copied())
    }

    /// Add or replace rules
    #[must_use]
    pub fn with_rules<I, K, V>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        self.extend(rules);
        self
    }

    fn extend<I, K, V>(&mut self, rules: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (phrase, reply) in rules {
            let key = normalize(phrase.as_ref());
            if key.is_empty() {
                tracing::warn!("skipping command rule with blank phrase");
                continue;
            }
            self.rules.insert(key, reply.into());
        }
    }

    /// Look up the reply for an utterance
    #[must_use]
    pub fn lookup(&self, utterance: &str) -> Option<&str> {
        self.rules.get(&normalize(utterance)).map(String::as_str)
    }

    /// Number of rules
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the table has no rules
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_rules_present() {
        let table = RuleTable::builtin();
        assert_eq!(table.len(), BUILTIN_RULES.len());
        assert_eq!(table.lookup("turn left"), Some("Turning left."));
        assert_eq!(table.lookup("stop"), Some("Stopping now."));
    }

    #[test]
    fn lookup_ignores_case_and_outer_whitespace() {
        let table = RuleTable::builtin();
        assert_eq!(table.lookup("Hello"), Some("Hi there!"));
        assert_eq!(table.lookup("  HELLO  "), Some("Hi there!"));
        assert_eq!(table.lookup("\tMove Forward\n"), Some("Moving forward now."));
    }

    #[test]
    fn lookup_is_exact() {
        let table = RuleTable::builtin();
        assert_eq!(table.lookup("hello there"), None);
        assert_eq!(table.lookup("hell"), None);
        assert_eq!(table.lookup("please stop"), None);
        assert_eq!(table.lookup("turn  left"), None);
    }

    #[test]
    fn overrides_replace_and_extend() {
        let table = RuleTable::builtin().with_rules([
            ("Stop", "Halting."),
            ("dance", "I can't dance yet."),
            ("   ", "ignored"),
        ]);
        assert_eq!(table.lookup("stop"), Some("Halting."));
        assert_eq!(table.lookup("DANCE"), Some("I can't dance yet."));
        assert_eq!(table.len(), BUILTIN_RULES.len() + 1);
    }
}
