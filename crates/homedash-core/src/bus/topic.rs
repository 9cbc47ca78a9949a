// ── Typed event names ──
//
// The bus dispatches on strings; `Topic` is the typed front door for the
// names the core itself publishes, so producers and subscribers cannot
// drift on spelling.

use std::fmt;

/// Separator between an event's namespace and its action.
pub const NAMESPACE_SEPARATOR: char = ':';

/// Pattern matching every event.
pub const GLOBAL_WILDCARD: &str = "*";

/// Known event names, with a fallback for feature-defined ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// `connection:<service>:online`
    ConnectionOnline(String),
    /// `connection:<service>:offline`
    ConnectionOffline(String),
    /// `state:<path>:changed`
    StateChanged(String),
    /// `state:<path>:removed`
    StateRemoved(String),
    /// `state:batch:changed`
    StateBatchChanged,
    /// `app:ready`
    AppReady,
    /// Any other name, passed through verbatim.
    Custom(String),
}

impl Topic {
    /// Namespace wildcard covering every event in `namespace`.
    pub fn namespace_pattern(namespace: &str) -> String {
        format!("{namespace}{NAMESPACE_SEPARATOR}*")
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionOnline(id) => write!(f, "connection:{id}:online"),
            Self::ConnectionOffline(id) => write!(f, "connection:{id}:offline"),
            Self::StateChanged(path) => write!(f, "state:{path}:changed"),
            Self::StateRemoved(path) => write!(f, "state:{path}:removed"),
            Self::StateBatchChanged => f.write_str("state:batch:changed"),
            Self::AppReady => f.write_str("app:ready"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Self::Custom(name.to_owned())
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Self::Custom(name)
    }
}

/// The namespace of an event name: everything before the first `:`.
/// Names without a separator have no namespace.
pub(crate) fn namespace_of(name: &str) -> Option<&str> {
    name.split_once(NAMESPACE_SEPARATOR).map(|(ns, _)| ns)
}
