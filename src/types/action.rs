//! Actions and the action→protocol map.
//!
//! An action is an index into a fixed, ordered list of congestion-control
//! protocols. The list is fixed for the lifetime of a run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An index into the protocol map, in `0..nchoices`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(usize);

impl Action {
    /// Creates an action from a raw index.
    ///
    /// The index is not checked here; use [`ProtocolMap::action`] when the
    /// value comes from outside the loop.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Action> for usize {
    fn from(action: Action) -> Self {
        action.0
    }
}

/// Ordered mapping from action index to protocol name.
///
/// The kernel module recognises `cubic` = 0, `bbr` = 1, `hybla` = 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolMap {
    protocols: Vec<String>,
}

impl ProtocolMap {
    /// Creates a map from an ordered list of protocol names.
    #[must_use]
    pub fn new<I, S>(protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            protocols: protocols.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of selectable protocols (`nchoices`).
    #[must_use]
    pub fn len(&self) -> usize {
        self.protocols.len()
    }

    /// Returns true if no protocol is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty()
    }

    /// Returns the action for `index` if it is inside the map.
    #[must_use]
    pub fn action(&self, index: usize) -> Option<Action> {
        (index < self.protocols.len()).then_some(Action(index))
    }

    /// Returns true if `action` is inside the map.
    #[must_use]
    pub fn contains(&self, action: Action) -> bool {
        action.0 < self.protocols.len()
    }

    /// Returns the protocol name for `action`.
    #[must_use]
    pub fn name(&self, action: Action) -> Option<&str> {
        self.protocols.get(action.0).map(String::as_str)
    }

    /// Returns the action whose protocol is `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Action> {
        self.protocols.iter().position(|p| p == name).map(Action)
    }

    /// Iterates protocol names in action order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.protocols.iter().map(String::as_str)
    }
}

impl Default for ProtocolMap {
    fn default() -> Self {
        Self::new(["cubic", "bbr", "hybla"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_kernel_module_ids() {
        let map = ProtocolMap::default();
        assert_eq!(map.len(), 3);
        assert_eq!(map.lookup("cubic"), Some(Action::new(0)));
        assert_eq!(map.lookup("bbr"), Some(Action::new(1)));
        assert_eq!(map.lookup("hybla"), Some(Action::new(2)));
    }

    #[test]
    fn action_rejects_out_of_range() {
        let map = ProtocolMap::default();
        assert_eq!(map.action(2), Some(Action::new(2)));
        assert_eq!(map.action(3), None);
        assert!(!map.contains(Action::new(5)));
    }

    #[test]
    fn name_for_action() {
        let map = ProtocolMap::new(["reno", "cubic"]);
        assert_eq!(map.name(Action::new(1)), Some("cubic"));
        assert_eq!(map.name(Action::new(2)), None);
        assert_eq!(map.names().collect::<Vec<_>>(), vec!["reno", "cubic"]);
    }

    #[test]
    fn serializes_transparently() {
        assert_eq!(serde_json::to_string(&Action::new(2)).unwrap(), "2");
        let map: ProtocolMap = serde_json::from_str(r#"["cubic","bbr"]"#).unwrap();
        assert_eq!(map.len(), 2);
    }
}
