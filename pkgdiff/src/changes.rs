//! Changelog classification
//!
//! Reduces raw changelog events to one task per package with a new
//! release, honouring an optional allow-list.

use indexmap::IndexMap;
use tracing::info;

use crate::registry::ChangeEvent;

/// Changelog action that marks a new release of a package.
pub const NEW_RELEASE: &str = "new release";

/// Unit of work for one changed package. Versions are not bound here;
/// the resolver re-queries the registry when the task runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageTask {
    pub name: String,
}

/// Filter changelog events down to package tasks.
///
/// Only new-release events are retained. With an allow-list, events for
/// other packages are dropped. Multiple events for one package collapse
/// into a single task, the latest event winning.
pub fn classify(events: Vec<ChangeEvent>, allowlist: Option<&[String]>) -> Vec<PackageTask> {
    let mut latest: IndexMap<String, ChangeEvent> = IndexMap::new();

    for event in events {
        if event.action != NEW_RELEASE {
            continue;
        }
        if let Some(packages) = allowlist {
            if !packages.iter().any(|p| p == &event.name) {
                info!("Ignoring package [{}], not in package list.", event.name);
                continue;
            }
        }
        latest.insert(event.name.clone(), event);
    }

    latest
        .into_keys()
        .map(|name| PackageTask { name })
        .collect()
}
