pub mod event;
pub mod filter;

use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;

use crate::engine::EngineMessage;
use event::{ChangeEvent, ChangeKind};

/// One watched path and its native subscription.
///
/// Dropping the target closes the OS watcher; events already queued for it
/// are ignored by the engine because its id is no longer registered.
pub struct WatchTarget {
    id: usize,
    path: PathBuf,
    watcher: RecommendedWatcher,
}

impl WatchTarget {
    /// Open a native watcher for `path` and route its events into the engine inbox.
    ///
    /// The watch is non-recursive: whatever the platform reports for a single
    /// path is what the engine sees.
    pub(crate) fn open(
        id: usize,
        path: PathBuf,
        metadata: Metadata,
        inbox: UnboundedSender<EngineMessage>,
    ) -> notify::Result<Self> {
        let mut watcher = notify::recommended_watcher(move |result| {
            let _ = inbox.send(EngineMessage::Fs { target: id, result });
        })?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;
        tracing::debug!(path = %path.display(), dir = metadata.is_dir(), "watching");

        Ok(Self {
            id,
            path,
            watcher,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unregister the OS watch. The target must still be dropped afterwards.
    pub fn close(&mut self) -> notify::Result<()> {
        self.watcher.unwatch(&self.path)
    }

    /// Translate a native event into per-entry change events for this target.
    pub fn changes(&self, event: &notify::Event) -> Vec<ChangeEvent> {
        let Some(kind) = ChangeKind::from_event_kind(&event.kind) else {
            return Vec::new();
        };

        if event.paths.is_empty() {
            return vec![ChangeEvent {
                path: self.path.clone(),
                kind,
                filename: None,
            }];
        }

        event
            .paths
            .iter()
            .map(|changed| ChangeEvent {
                path: self.path.clone(),
                kind,
                filename: changed
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned()),
            })
            .collect()
    }

    /// True when the event reports the watched path itself being removed.
    pub fn is_closed_by(&self, event: &notify::Event) -> bool {
        matches!(event.kind, EventKind::Remove(_)) && event.paths.iter().any(|p| p == &self.path)
    }
}

/// Stat every path concurrently. Results come back in input order.
pub async fn stat_all(paths: &[PathBuf]) -> Vec<io::Result<Metadata>> {
    let mut set = JoinSet::new();
    for (index, path) in paths.iter().cloned().enumerate() {
        set.spawn(async move { (index, tokio::fs::metadata(&path).await) });
    }

    let mut results: Vec<Option<io::Result<Metadata>>> = paths.iter().map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, stat)) => results[index] = Some(stat),
            Err(err) => tracing::warn!("stat task failed: {err}"),
        }
    }

    results
        .into_iter()
        .map(|stat| stat.unwrap_or_else(|| Err(io::Error::other("stat task did not complete"))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, ModifyKind, RemoveKind};
    use tokio::sync::mpsc;

    fn target(dir: &Path) -> WatchTarget {
        let (tx, _rx) = mpsc::unbounded_channel();
        let metadata = std::fs::metadata(dir).unwrap();
        WatchTarget::open(0, dir.to_path_buf(), metadata, tx).unwrap()
    }

    #[tokio::test]
    async fn test_stat_all_preserves_order_and_failures() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("index.js");
        std::fs::write(&file, "").unwrap();
        let missing = dir.path().join("missing");

        let stats = stat_all(&[dir.path().to_path_buf(), missing, file]).await;
        assert_eq!(stats.len(), 3);
        assert!(stats[0].as_ref().unwrap().is_dir());
        assert_eq!(stats[1].as_ref().unwrap_err().kind(), io::ErrorKind::NotFound);
        assert!(stats[2].as_ref().unwrap().is_file());
    }

    #[tokio::test]
    async fn test_changes_report_basenames() {
        let dir = tempfile::tempdir().unwrap();
        let target = target(dir.path());
        let event = notify::Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(dir.path().join("index.js"))
            .add_path(dir.path().join("App.jsx"));

        let changes = target.changes(&event);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].filename.as_deref(), Some("index.js"));
        assert_eq!(changes[1].filename.as_deref(), Some("App.jsx"));
        assert!(changes.iter().all(|c| c.path == dir.path()));
        assert!(changes.iter().all(|c| c.kind == ChangeKind::Changed));
    }

    #[tokio::test]
    async fn test_event_without_paths_has_no_filename() {
        let dir = tempfile::tempdir().unwrap();
        let target = target(dir.path());
        let changes = target.changes(&notify::Event::new(EventKind::Create(CreateKind::Any)));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].filename, None);
        assert_eq!(changes[0].kind, ChangeKind::Renamed);
    }

    #[tokio::test]
    async fn test_root_removal_closes_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = target(dir.path());
        let removed = notify::Event::new(EventKind::Remove(RemoveKind::Folder))
            .add_path(dir.path().to_path_buf());
        let child_removed = notify::Event::new(EventKind::Remove(RemoveKind::File))
            .add_path(dir.path().join("a.js"));
        assert!(target.is_closed_by(&removed));
        assert!(!target.is_closed_by(&child_removed));
    }
}
