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

use colored::Colorize;
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dubutil::package::Project;
use dubutil::settings::is_linker_file;
use dubutil::watcher::{FileWatcher, WaitOutcome};

use crate::build::{self, BuildOutput};
use crate::generate::{GeneratorSettings, TargetInfo};

/// Run the freshly built root executable and rebuild/restart it whenever one
/// of its input files changes. Returns the child's exit code once it
/// terminates on its own; a killed child only ever means a restart.
pub fn watch_and_run(
    project: &Project,
    targets: &IndexMap<String, TargetInfo>,
    settings: &GeneratorSettings,
    output: BuildOutput,
) -> anyhow::Result<i32> {
    let mut watcher = FileWatcher::new()?;
    for ti in targets.values() {
        let bs = &ti.build_settings;
        let inputs = bs
            .source_files
            .iter()
            .chain(&bs.import_files)
            .chain(&bs.string_import_files);
        for file in inputs {
            if is_linker_file(file) {
                continue;
            }
            // watch mode is long-running: an unwatchable file is not worth
            // dying for
            if let Err(e) = watcher.add_file(file) {
                log::debug!("not watching `{}`: {}", file.display(), e);
            }
        }
    }

    {
        // make sure the handler is only set once even if watching restarts
        static HANDLER_SET: AtomicBool = AtomicBool::new(false);
        if HANDLER_SET
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            ctrlc::set_handler(|| std::process::exit(130))
                .expect("Error setting Ctrl-C handler");
        }
    }

    println!(
        "{}",
        "Watching source files for changes...".green().bold()
    );
    let mut output = output;
    loop {
        let mut child = build::spawn_target(project, targets, settings, &output.artifact)?;
        match watcher.wait_child(&mut child)? {
            WaitOutcome::Exited(status) => {
                return Ok(status.code().unwrap_or(-1));
            }
            WaitOutcome::Changed => {}
        }
        let _ = child.kill();
        let _ = child.wait();

        // some networked or virtualized filesystems report the change before
        // the written data is visible
        std::thread::sleep(Duration::from_millis(1));
        watcher.read_changes();

        loop {
            match build::build_targets(project, targets, settings) {
                Ok(rebuilt) => {
                    output = rebuilt;
                    println!(
                        "{}",
                        "Restarting after rebuild, waiting for filesystem changes..."
                            .green()
                            .bold()
                    );
                    break;
                }
                Err(e) => {
                    println!(
                        "{:?}\n{}",
                        e,
                        "Had errors, waiting for filesystem changes...".red().bold()
                    );
                    watcher.wait()?;
                    std::thread::sleep(Duration::from_millis(1));
                    watcher.read_changes();
                }
            }
        }
    }
}
