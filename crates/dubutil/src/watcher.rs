// dub: The build system and package manager for the D language.
// Copyright (C) 2024 International Digital Economy Academy
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// For inquiries, you can contact us via e-mail at jichuruanjian@idea.edu.cn.

use anyhow::{bail, Context};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

/// What ended a combined wait: a watched file changed, or the child process
/// terminated.
#[derive(Debug)]
pub enum WaitOutcome {
    Changed,
    Exited(ExitStatus),
}

/// Platform-abstracted modification notifier over an explicit set of files.
///
/// On inotify/kqueue platforms every registered file is watched directly. On
/// Windows the unit of watch is a directory, so registered paths accumulate
/// and the first wait installs a single recursive watch rooted at the deepest
/// common ancestor, with events filtered back to the registered set.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    files: Vec<PathBuf>,
    #[cfg(windows)]
    armed: bool,
}

impl FileWatcher {
    pub fn new() -> anyhow::Result<Self> {
        let (tx, rx) = std::sync::mpsc::channel();
        let watcher = RecommendedWatcher::new(tx, Config::default())
            .context("failed to set up the file watcher")?;
        Ok(FileWatcher {
            watcher,
            rx,
            files: Vec::new(),
            #[cfg(windows)]
            armed: false,
        })
    }

    /// Register a file for modification notifications.
    pub fn add_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let abs = dunce::canonicalize(path)
            .with_context(|| format!("failed to resolve watched file `{}`", path.display()))?;
        #[cfg(not(windows))]
        self.watcher
            .watch(&abs, RecursiveMode::NonRecursive)
            .map_err(|e| watch_error(e, &abs))?;
        self.files.push(abs);
        Ok(())
    }

    fn arm(&mut self) -> anyhow::Result<()> {
        #[cfg(windows)]
        if !self.armed && !self.files.is_empty() {
            let root = deepest_common_ancestor(&self.files);
            self.watcher
                .watch(&root, RecursiveMode::Recursive)
                .map_err(|e| watch_error(e, &root))?;
            self.armed = true;
        }
        Ok(())
    }

    /// Block until any watched file is reported modified.
    pub fn wait(&mut self) -> anyhow::Result<()> {
        self.arm()?;
        loop {
            let res = self.rx.recv().context("file watcher channel closed")?;
            if self.relevant(&res) {
                return Ok(());
            }
        }
    }

    /// Block until either a watched file is modified or the child process
    /// terminates. Events arriving while the child is polled stay queued in
    /// the channel, so neither outcome can be dropped; an exit between polls
    /// is observed within one timeout period.
    pub fn wait_child(&mut self, child: &mut Child) -> anyhow::Result<WaitOutcome> {
        self.arm()?;
        loop {
            if let Some(status) = child.try_wait().context("failed to poll child process")? {
                return Ok(WaitOutcome::Exited(status));
            }
            match self.rx.recv_timeout(Duration::from_millis(50)) {
                Ok(res) => {
                    if self.relevant(&res) {
                        return Ok(WaitOutcome::Changed);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => bail!("file watcher channel closed"),
            }
        }
    }

    /// Drain pending event buffers without blocking.
    pub fn read_changes(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }

    fn relevant(&self, res: &notify::Result<Event>) -> bool {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                log::debug!("file watcher reported an error: {:?}", e);
                return false;
            }
        };
        // when a file is modified, multiple events may be received; only
        // content writes matter here
        let modified = match event.kind {
            #[cfg(unix)]
            EventKind::Modify(notify::event::ModifyKind::Data(_)) => true,
            // windows has different file event kinds
            #[cfg(not(unix))]
            EventKind::Modify(_) => true,
            _ => false,
        };
        if !modified {
            return false;
        }
        #[cfg(windows)]
        {
            event.paths.iter().any(|p| self.files.contains(p))
        }
        #[cfg(not(windows))]
        {
            true
        }
    }
}

#[cfg_attr(not(windows), allow(dead_code))]
fn deepest_common_ancestor(paths: &[PathBuf]) -> PathBuf {
    let mut ancestor = paths[0]
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .to_path_buf();
    for path in &paths[1..] {
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        while !dir.starts_with(&ancestor) {
            if !ancestor.pop() {
                break;
            }
        }
    }
    ancestor
}

fn watch_error(err: notify::Error, path: &Path) -> anyhow::Error {
    #[cfg(target_os = "linux")]
    if let notify::ErrorKind::Io(io) = &err.kind {
        if io.raw_os_error() == Some(libc::ENOSPC) {
            return anyhow::anyhow!(
                "failed to watch `{}`: the inotify watch limit is reached, \
                 consider raising fs.inotify.max_user_watches",
                path.display()
            );
        }
    }
    anyhow::Error::new(err).context(format!("failed to watch `{}`", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_deepest_common_ancestor() {
        let paths = vec![
            PathBuf::from("/work/app/source/app.d"),
            PathBuf::from("/work/app/source/sub/mod.d"),
            PathBuf::from("/work/libx/source/libx.d"),
        ];
        assert_eq!(deepest_common_ancestor(&paths), PathBuf::from("/work"));

        let single = vec![PathBuf::from("/work/app/source/app.d")];
        assert_eq!(
            deepest_common_ancestor(&single),
            PathBuf::from("/work/app/source")
        );
    }

    #[test]
    fn test_wait_child_reports_exit() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("watched.d");
        std::fs::write(&file, "module watched;").unwrap();

        let mut watcher = FileWatcher::new().unwrap();
        watcher.add_file(&file).unwrap();

        let mut child = std::process::Command::new("true")
            .spawn()
            .expect("spawn `true`");
        match watcher.wait_child(&mut child).unwrap() {
            WaitOutcome::Exited(status) => assert!(status.success()),
            WaitOutcome::Changed => panic!("expected the child exit to win"),
        }
    }

    #[test]
    fn test_wait_child_sees_modification() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("watched.d");
        std::fs::write(&file, "module watched;").unwrap();

        let mut watcher = FileWatcher::new().unwrap();
        watcher.add_file(&file).unwrap();

        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn `sleep`");
        std::thread::sleep(Duration::from_millis(100));
        let mut handle = std::fs::OpenOptions::new()
            .append(true)
            .open(&file)
            .unwrap();
        writeln!(handle, "// touched").unwrap();
        handle.sync_all().unwrap();
        drop(handle);

        let outcome = watcher.wait_child(&mut child).unwrap();
        let _ = child.kill();
        let _ = child.wait();
        match outcome {
            WaitOutcome::Changed => {}
            other => panic!("expected a change, got {:?}", other),
        }
    }
}
