use std::path::PathBuf;

use notify::EventKind;
use notify::event::ModifyKind;
use serde::Serialize;

/// Native-watcher vocabulary for what happened to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Content or metadata changed.
    Changed,
    /// The entry appeared, disappeared, or was renamed.
    Renamed,
}

impl ChangeKind {
    /// Map a notify event kind; access events are not changes.
    pub fn from_event_kind(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Access(_) => None,
            EventKind::Create(_) | EventKind::Remove(_) => Some(Self::Renamed),
            EventKind::Modify(ModifyKind::Name(_)) => Some(Self::Renamed),
            EventKind::Modify(_) | EventKind::Any | EventKind::Other => Some(Self::Changed),
        }
    }
}

/// A relevant change on one watched path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    /// The watched path (not the changed file).
    pub path: PathBuf,
    #[serde(rename = "eventType")]
    pub kind: ChangeKind,
    /// Basename of the changed entry, when the platform reports one.
    pub filename: Option<String>,
}
