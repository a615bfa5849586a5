//! Local filesystem watcher.
//!
//! Watches the sync root recursively with `notify` and reports debounced
//! "something changed" signals into an mpsc channel. The manager treats a
//! signal exactly like a poll tick: both feed the same producer pass, so
//! correctness never depends on which trigger fired.

use crate::ignore::INTERNAL_DIR;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Component, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Debounce window for filesystem events.
pub const WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

/// Watch `root` and send a unit signal after each debounced burst of
/// events. Exits when the receiver is dropped.
pub async fn watch_root_task(root: PathBuf, tx: mpsc::Sender<()>) {
    let (notify_tx, mut notify_rx) = mpsc::channel::<Result<Event, notify::Error>>(256);

    let mut watcher = match RecommendedWatcher::new(
        move |res| {
            let _ = notify_tx.blocking_send(res);
        },
        Config::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            error!(error = %e, "failed to create filesystem watcher");
            return;
        }
    };

    if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
        error!(root = %root.display(), error = %e, "failed to watch sync root");
        return;
    }
    info!(root = %root.display(), "watching sync root");

    while let Some(res) = notify_rx.recv().await {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "watcher error, continuing");
                continue;
            }
        };
        if !is_relevant(&event) {
            continue;
        }

        // swallow the rest of the burst
        let debounce = tokio::time::sleep(WATCH_DEBOUNCE);
        tokio::pin!(debounce);
        loop {
            tokio::select! {
                _ = &mut debounce => break,
                more = notify_rx.recv() => {
                    if more.is_none() {
                        return;
                    }
                }
            }
        }

        debug!("filesystem change detected, signaling sync");
        if tx.send(()).await.is_err() {
            return;
        }
    }
}

/// Skip events that only touch client bookkeeping or hidden entries.
fn is_relevant(event: &Event) -> bool {
    event.paths.iter().any(|p| {
        !p.components().any(|c| match c {
            Component::Normal(name) => {
                let name = name.to_string_lossy();
                name == INTERNAL_DIR || name.starts_with(".tmp-")
            }
            _ => false,
        })
    })
}
