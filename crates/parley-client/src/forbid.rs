use std::collections::HashSet;

/// Nicknames whose inbound transfer requests are rejected.
#[derive(Default)]
pub struct ForbidSet(HashSet<String>);

impl ForbidSet {
    /// Returns false when the nickname was already forbidden.
    pub fn insert(&mut self, nick: &str) -> bool {
        self.0.insert(nick.to_owned())
    }

    /// Returns false when the nickname was not forbidden.
    pub fn remove(&mut self, nick: &str) -> bool {
        self.0.remove(nick)
    }

    pub fn contains(&self, nick: &str) -> bool {
        self.0.contains(nick)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::ForbidSet;

    #[test]
    fn forbid_then_allow_round_trips() {
        let mut set = ForbidSet::default();
        assert!(set.insert("bob"));
        assert!(set.contains("bob"));
        assert!(set.remove("bob"));
        assert!(set.is_empty());
    }

    #[test]
    fn duplicate_and_missing_operations_report() {
        let mut set = ForbidSet::default();
        assert!(set.insert("bob"));
        assert!(!set.insert("bob"));
        assert!(set.remove("bob"));
        assert!(!set.remove("bob"));
    }
}
