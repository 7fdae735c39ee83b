use crate::registry::core::RegistryError;
use crate::registry::group::HandlerGroup;
use std::collections::HashSet;
use std::fmt;

/// A bundle of handler groups registered and unregistered as one unit.
///
/// Listener identity is the `Arc` the caller registers, not the shape of
/// its groups: two separately built listeners with identical handlers are
/// two distinct subscriptions.
pub struct Listener {
    name: Option<String>,
    groups: Vec<HandlerGroup>,
}

impl Listener {
    pub fn builder() -> ListenerBuilder {
        ListenerBuilder {
            name: None,
            groups: Vec::new(),
            error: None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Label used in log lines and exception-hook contexts.
    pub(crate) fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("listener")
    }

    pub(crate) fn groups(&self) -> &[HandlerGroup] {
        &self.groups
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("name", &self.name)
            .field("groups", &self.groups)
            .finish()
    }
}

/// Builder collecting handler groups; the first construction error wins
/// and is surfaced by [`build`](Self::build).
pub struct ListenerBuilder {
    name: Option<String>,
    groups: Vec<HandlerGroup>,
    error: Option<RegistryError>,
}

impl ListenerBuilder {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn group(mut self, group: Result<HandlerGroup, RegistryError>) -> Self {
        match group {
            Ok(group) => self.groups.push(group),
            Err(error) => {
                self.error.get_or_insert(error);
            }
        }
        self
    }

    pub fn build(self) -> Result<Listener, RegistryError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let mut seen = HashSet::new();
        for group in &self.groups {
            if !seen.insert(group.key()) {
                return Err(RegistryError::DuplicatePrimary {
                    event_type: group.event_label(),
                });
            }
        }
        Ok(Listener {
            name: self.name,
            groups: self.groups,
        })
    }
}
