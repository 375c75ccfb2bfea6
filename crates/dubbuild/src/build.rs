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

use anyhow::Context;
use colored::Colorize;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::SystemTime;

use dubutil::compiler::CommandStyle;
use dubutil::hash;
use dubutil::package::{Package, Project};
use dubutil::settings::{is_linker_file, BuildOptions, BuildSettings, TargetType};

use crate::generate::{BuildMode, GeneratorSettings, TargetInfo};
use crate::hooks::{self, HookPhase};

/// Build the planned targets bottom-up and, when requested, run or watch the
/// root executable. Returns the exit code to surface: the child's code for
/// `run`, 0 otherwise.
pub fn build(
    project: &Project,
    targets: &IndexMap<String, TargetInfo>,
    settings: &GeneratorSettings,
) -> anyhow::Result<i32> {
    let output = build_targets(project, targets, settings)?;
    let root_type = targets[project.root_name()].build_settings.target_type;
    if settings.run && root_type == TargetType::Executable {
        if settings.watch {
            return crate::watch::watch_and_run(project, targets, settings, output);
        }
        return run_target(project, targets, settings, &output.artifact);
    }
    Ok(0)
}

/// Temporary build products. Removed in reverse creation order when the
/// tracker goes out of scope, whether the build ended normally or not.
#[derive(Default)]
pub struct TempTracker {
    paths: Vec<PathBuf>,
}

impl Drop for TempTracker {
    fn drop(&mut self) {
        for path in self.paths.iter().rev() {
            let res = if path.is_dir() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            };
            if let Err(e) = res {
                log::debug!("failed to clean up `{}`: {}", path.display(), e);
            }
        }
    }
}

/// A finished build: where the root artifact landed, plus the temporary
/// files that must outlive a subsequent `run` of that artifact.
pub struct BuildOutput {
    pub artifact: PathBuf,
    _temp: TempTracker,
}

/// Compile and link every reachable target, dependencies before dependents.
pub fn build_targets(
    project: &Project,
    targets: &IndexMap<String, TargetInfo>,
    settings: &GeneratorSettings,
) -> anyhow::Result<BuildOutput> {
    let mut builder = Builder {
        project,
        targets,
        settings,
        artifacts: HashMap::new(),
        temp: TempTracker::default(),
    };
    let root = project.root_name();
    let root_type = targets[root].build_settings.target_type;

    // rdmd resolves dependencies internally and a static library archives
    // only its own objects, so in both cases dependency builds are skipped
    if settings.rdmd || matches!(root_type, TargetType::StaticLibrary | TargetType::Library) {
        builder.build_target(root)?;
    } else {
        builder.build_target_rec(root)?;
    }

    for (name, ti) in targets {
        if !builder.artifacts.contains_key(name)
            || ti.build_settings.post_generate_commands.is_empty()
        {
            continue;
        }
        let pack = builder.pack_of(ti);
        hooks::run_build_commands(
            HookPhase::PostGenerate,
            &ti.build_settings.post_generate_commands,
            pack,
            project,
            settings,
            &ti.build_settings,
        );
    }

    Ok(BuildOutput {
        artifact: builder.artifacts[root].clone(),
        _temp: builder.temp,
    })
}

struct Builder<'a> {
    project: &'a Project,
    targets: &'a IndexMap<String, TargetInfo>,
    settings: &'a GeneratorSettings,
    /// Final artifact location of every built target.
    artifacts: HashMap<String, PathBuf>,
    temp: TempTracker,
}

impl<'a> Builder<'a> {
    fn target(&self, name: &str) -> &'a TargetInfo {
        &self.targets[name]
    }

    fn pack_of(&self, ti: &TargetInfo) -> &'a Package {
        self.project
            .get(&ti.pack)
            .expect("planned package exists in the project")
    }

    fn build_target_rec(&mut self, name: &str) -> anyhow::Result<()> {
        if self.artifacts.contains_key(name) {
            return Ok(());
        }
        let ti = self.target(name);
        for dep in &ti.dependencies {
            self.build_target_rec(dep)?;
        }
        self.build_target(name)
    }

    fn build_target(&mut self, name: &str) -> anyhow::Result<()> {
        let ti = self.target(name);
        let mut bs = ti.build_settings.clone();

        // wire link dependencies: a non-static target links the artifacts,
        // a static library only tracks them as rebuild inputs
        let is_static = matches!(
            bs.target_type,
            TargetType::StaticLibrary | TargetType::Library
        );
        let mut extra_dep_files = Vec::new();
        for dep in &ti.link_dependencies {
            let artifact = match self.artifacts.get(dep) {
                Some(path) => path.clone(),
                None => self.default_artifact_path(dep),
            };
            if is_static {
                extra_dep_files.push(artifact);
            } else {
                bs.source_files.push(artifact);
            }
        }

        let direct = self.settings.direct || bs.options.contains(BuildOptions::SYNTAX_ONLY);
        if self.settings.rdmd {
            self.perform_rdmd_build(name, bs)?;
        } else if direct {
            self.perform_direct_build(name, bs, false)?;
        } else {
            self.perform_cached_build(name, bs, &extra_dep_files)?;
        }
        Ok(())
    }

    /// Where a target's artifact lands when nothing redirected it.
    fn default_artifact_path(&self, name: &str) -> PathBuf {
        let ti = self.target(name);
        let bs = &ti.build_settings;
        let dir = dest_dir(self.pack_of(ti), bs);
        dir.join(
            self.settings
                .compiler
                .target_file_name(bs, &self.settings.platform),
        )
    }

    fn announce(&self, ti: &TargetInfo) {
        let pack = self.pack_of(ti);
        println!(
            "Building {} {} [{}]...",
            pack.name, pack.version, ti.config
        );
    }

    fn perform_cached_build(
        &mut self,
        name: &str,
        mut bs: BuildSettings,
        extra_dep_files: &[PathBuf],
    ) -> anyhow::Result<bool> {
        let ti = self.target(name);
        let pack = self.pack_of(ti);
        let build_id = hash::build_id(
            &ti.config,
            &self.settings.build_type,
            &self.settings.platform,
            &bs,
        );
        let cache_dir = pack.path.join(".dub").join("build").join(&build_id);
        let file_name = self
            .settings
            .compiler
            .target_file_name(&bs, &self.settings.platform);
        let cached_artifact = cache_dir.join(&file_name);
        let dest_dir = dest_dir(pack, &bs);
        let dest = dest_dir.join(&file_name);

        if !self.settings.force && self.check_up_to_date(name, &cached_artifact, &bs, extra_dep_files)
        {
            println!(
                "{} {}: target for configuration [{}] is up to date.",
                pack.name, pack.version, ti.config
            );
            log::debug!(
                "using existing build in `{}`, pass --force to rebuild",
                cache_dir.display()
            );
            copy_target_out(&cached_artifact, &dest)?;
            self.perform_copy_files(pack, &bs, &dest_dir);
            self.artifacts.insert(name.to_string(), dest);
            return Ok(true);
        }

        if self.settings.temp_build || !ensure_writable_dir(&cache_dir) {
            self.perform_direct_build(name, bs, true)?;
            return Ok(false);
        }

        self.announce(ti);
        hooks::run_build_commands(
            HookPhase::PreBuild,
            &bs.pre_build_commands.clone(),
            pack,
            self.project,
            self.settings,
            &bs,
        );
        bs.target_path = cache_dir;
        self.build_with_compiler(&mut bs)?;
        copy_target_out(&cached_artifact, &dest)?;
        self.perform_copy_files(pack, &bs, &dest_dir);
        hooks::run_build_commands(
            HookPhase::PostBuild,
            &bs.post_build_commands.clone(),
            pack,
            self.project,
            self.settings,
            &bs,
        );
        self.artifacts.insert(name.to_string(), dest);
        Ok(false)
    }

    fn perform_direct_build(
        &mut self,
        name: &str,
        mut bs: BuildSettings,
        force_temp: bool,
    ) -> anyhow::Result<()> {
        let ti = self.target(name);
        let pack = self.pack_of(ti);

        // relative paths keep the command line under platform limits
        let cwd = std::env::current_dir().context("failed to read the working directory")?;
        let dest = dest_dir(pack, &bs);
        make_paths_relative(&mut bs, &cwd);

        let temp = force_temp || self.settings.temp_build;
        if temp {
            let base = std::env::temp_dir().join("dub");
            fs::create_dir_all(&base)
                .with_context(|| format!("failed to create `{}`", base.display()))?;
            let dir = tempfile::Builder::new().tempdir_in(&base)?.into_path();
            self.temp.paths.push(dir.clone());
            bs.target_path = dir;
        } else {
            bs.target_path = dest;
        }

        self.announce(ti);
        hooks::run_build_commands(
            HookPhase::PreBuild,
            &bs.pre_build_commands.clone(),
            pack,
            self.project,
            self.settings,
            &bs,
        );
        self.build_with_compiler(&mut bs)?;

        let artifact = self
            .settings
            .compiler
            .target_output_path(&bs, &self.settings.platform);
        if temp {
            self.temp.paths.push(artifact.clone());
            for copy in &bs.copy_files {
                if let Some(base) = Path::new(copy).file_name() {
                    self.temp.paths.push(bs.target_path.join(base));
                }
            }
        }
        let target_dir = bs.target_path.clone();
        self.perform_copy_files(pack, &bs, &target_dir);
        hooks::run_build_commands(
            HookPhase::PostBuild,
            &bs.post_build_commands.clone(),
            pack,
            self.project,
            self.settings,
            &bs,
        );
        self.artifacts.insert(name.to_string(), artifact);
        Ok(())
    }

    /// Hand the whole target to `rdmd`, which discovers and compiles imports
    /// on its own.
    fn perform_rdmd_build(&mut self, name: &str, mut bs: BuildSettings) -> anyhow::Result<()> {
        let ti = self.target(name);
        let pack = self.pack_of(ti);

        let cwd = std::env::current_dir().context("failed to read the working directory")?;
        make_paths_relative(&mut bs, &cwd);

        let main = bs
            .main_source_file
            .clone()
            .or_else(|| bs.source_files.iter().find(|f| !is_linker_file(f)).cloned())
            .context("rdmd builds need a main source file")?;

        let file_name = self
            .settings
            .compiler
            .target_file_name(&bs, &self.settings.platform);
        if self.settings.temp_build {
            let base = std::env::temp_dir().join(".rdmd").join("source");
            fs::create_dir_all(&base)
                .with_context(|| format!("failed to create `{}`", base.display()))?;
            let dir = tempfile::Builder::new().tempdir_in(&base)?.into_path();
            self.temp.paths.push(dir.clone());
            bs.target_path = dir;
        } else {
            bs.target_path = dest_dir(pack, &bs);
            fs::create_dir_all(&bs.target_path)
                .with_context(|| format!("failed to create `{}`", bs.target_path.display()))?;
        }
        let artifact = bs.target_path.join(&file_name);

        self.announce(ti);
        hooks::run_build_commands(
            HookPhase::PreBuild,
            &bs.pre_build_commands.clone(),
            pack,
            self.project,
            self.settings,
            &bs,
        );

        let mut flags = bs.clone();
        flags.source_files.clear();
        self.settings.compiler.prepare_build_settings(
            &mut flags,
            &self.settings.platform,
            CommandStyle::AllInline,
        );
        let mut command = Command::new("rdmd");
        command
            .arg("--build-only")
            .arg(format!(
                "--compiler={}",
                self.settings.platform.compiler_binary
            ))
            .arg(format!("-of{}", artifact.display()))
            .args(&flags.dflags)
            .arg(&main);
        log::debug!("invoking rdmd for `{}`", name);
        let status = command
            .status()
            .context("failed to execute `rdmd`")?;
        if !status.success() {
            return Err(dubutil::compiler::BuildFailure::CompileFailed(
                status.code().unwrap_or(-1),
            )
            .into());
        }

        hooks::run_build_commands(
            HookPhase::PostBuild,
            &bs.post_build_commands.clone(),
            pack,
            self.project,
            self.settings,
            &bs,
        );
        self.artifacts.insert(name.to_string(), artifact);
        Ok(())
    }

    fn check_up_to_date(
        &self,
        name: &str,
        artifact: &Path,
        bs: &BuildSettings,
        extra_dep_files: &[PathBuf],
    ) -> bool {
        let ti = self.target(name);
        let mut inputs: Vec<PathBuf> = Vec::new();
        inputs.extend(bs.source_files.iter().cloned());
        inputs.extend(bs.import_files.iter().cloned());
        inputs.extend(bs.string_import_files.iter().cloned());
        for pack_name in &ti.packages {
            if let Some(pack) = self.project.get(pack_name) {
                inputs.push(pack.recipe_path.clone());
            }
        }
        inputs.extend(extra_dep_files.iter().cloned());
        if name == self.project.root_name() {
            if let Some(selections) = &self.project.selections_path {
                inputs.push(selections.clone());
            }
        }
        is_up_to_date(artifact, &inputs)
    }

    fn compile_callback(&self) -> Option<dubutil::compiler::OutputCallback<'_>> {
        self.settings.compile_callback.as_ref().map(|cb| &**cb)
    }

    fn link_callback(&self) -> Option<dubutil::compiler::OutputCallback<'_>> {
        self.settings.link_callback.as_ref().map(|cb| &**cb)
    }

    fn build_with_compiler(&mut self, bs: &mut BuildSettings) -> anyhow::Result<()> {
        let compiler = self.settings.compiler.as_ref();
        let platform = &self.settings.platform;
        let generate_binary = bs.target_type != TargetType::None
            && !bs.options.contains(BuildOptions::SYNTAX_ONLY);
        let is_static = matches!(
            bs.target_type,
            TargetType::StaticLibrary | TargetType::Library
        );
        if generate_binary {
            fs::create_dir_all(&bs.target_path)
                .with_context(|| format!("failed to create `{}`", bs.target_path.display()))?;
        }
        let target_file = compiler.target_output_path(bs, platform);

        // the separate compile+link split only pays off for DMD binaries
        let separate_link = self.settings.build_mode == BuildMode::Separate
            && compiler.name() == "dmd"
            && generate_binary
            && !is_static;

        let result = if self.settings.build_mode == BuildMode::SingleFile {
            self.compile_single_files(bs)
        } else if separate_link {
            self.compile_then_link(bs)
        } else {
            self.compile_all_at_once(bs, generate_binary)
        };
        if let Err(e) = result {
            // do not leave a partially written artifact behind
            if generate_binary && target_file.exists() {
                let _ = fs::remove_file(&target_file);
            }
            return Err(e);
        }
        Ok(())
    }

    fn compile_all_at_once(
        &self,
        bs: &BuildSettings,
        generate_binary: bool,
    ) -> anyhow::Result<()> {
        let compiler = self.settings.compiler.as_ref();
        let platform = &self.settings.platform;
        let mut cbs = bs.clone();
        compiler.prepare_build_settings(&mut cbs, platform, CommandStyle::AllInline);
        if generate_binary {
            compiler.set_target(&mut cbs, platform, None);
        }
        compiler.invoke(&cbs, platform, self.compile_callback())
    }

    fn compile_then_link(&self, bs: &BuildSettings) -> anyhow::Result<()> {
        let compiler = self.settings.compiler.as_ref();
        let platform = &self.settings.platform;
        let obj_path = bs
            .target_path
            .join(format!("{}{}", bs.target_name, platform.obj_suffix()));

        let mut cbs = bs.clone();
        compiler.prepare_build_settings(&mut cbs, platform, CommandStyle::SeparateLinkerAndSources);
        compiler.set_target(&mut cbs, platform, Some(&obj_path));
        compiler.invoke(&cbs, platform, self.compile_callback())?;

        let mut lbs = bs.clone();
        compiler.prepare_build_settings(&mut lbs, platform, CommandStyle::SeparateLinkerAndSources);
        lbs.source_files.clear();
        compiler.invoke_linker(&lbs, platform, &[obj_path], self.link_callback())
    }

    fn compile_single_files(&self, bs: &BuildSettings) -> anyhow::Result<()> {
        let compiler = self.settings.compiler.as_ref();
        let platform = &self.settings.platform;

        let (to_compile, linker_inputs): (Vec<PathBuf>, Vec<PathBuf>) = bs
            .source_files
            .iter()
            .cloned()
            .partition(|f| !is_linker_file(f));

        let objects: Vec<PathBuf> = to_compile
            .iter()
            .map(|src| {
                bs.target_path
                    .join(object_file_name(src, platform.obj_suffix()))
            })
            .collect();
        let prepared: Vec<BuildSettings> = to_compile
            .iter()
            .zip(&objects)
            .map(|(src, obj)| {
                let mut cbs = bs.clone();
                cbs.source_files = vec![src.clone()];
                compiler.prepare_build_settings(
                    &mut cbs,
                    platform,
                    CommandStyle::SeparateLinkerAndSources,
                );
                compiler.set_target(&mut cbs, platform, Some(obj));
                cbs
            })
            .collect();

        // naive work sharing: contiguous chunks, one worker each, writing
        // into index-disjoint result slots
        let parallel = self.settings.parallel_build
            && self.settings.compile_callback.is_none()
            && prepared.len() > 1;
        if parallel {
            let workers = std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1);
            let chunk = prepared.len().div_ceil(workers);
            let mut results: Vec<Option<anyhow::Result<()>>> = Vec::new();
            results.resize_with(prepared.len(), || None);
            std::thread::scope(|scope| {
                for (jobs, slots) in prepared.chunks(chunk).zip(results.chunks_mut(chunk)) {
                    scope.spawn(move || {
                        for (cbs, slot) in jobs.iter().zip(slots.iter_mut()) {
                            *slot = Some(compiler.invoke(cbs, platform, None));
                        }
                    });
                }
            });
            for result in results {
                result.unwrap_or(Ok(()))?;
            }
        } else {
            for cbs in &prepared {
                compiler.invoke(cbs, platform, self.compile_callback())?;
            }
        }

        let mut lbs = bs.clone();
        compiler.prepare_build_settings(&mut lbs, platform, CommandStyle::SeparateLinkerAndSources);
        lbs.source_files.clear();
        let mut link_inputs = objects;
        link_inputs.extend(linker_inputs);
        compiler.invoke_linker(&lbs, platform, &link_inputs, self.link_callback())
    }

    /// Copy (hard-link) the per-target copyFiles into the destination
    /// directory. Failures warn but never fail the build.
    fn perform_copy_files(&self, pack: &Package, bs: &BuildSettings, dest_dir: &Path) {
        for entry in &bs.copy_files {
            let result = if entry.contains(['*', '?', '{', '[']) {
                copy_matching_files(entry, &pack.path, dest_dir)
            } else {
                copy_file_or_dir(&in_package(&pack.path, Path::new(entry)), dest_dir)
            };
            if let Err(e) = result {
                eprintln!(
                    "{}: failed to copy `{}` to `{}`: {}",
                    "warning".yellow().bold(),
                    entry,
                    dest_dir.display(),
                    e
                );
            }
        }
    }
}

/// Spawn the finished executable with the configured run arguments, from the
/// target's working directory resolved against the original CWD.
pub(crate) fn spawn_target(
    project: &Project,
    targets: &IndexMap<String, TargetInfo>,
    settings: &GeneratorSettings,
    artifact: &Path,
) -> anyhow::Result<Child> {
    let bs = &targets[project.root_name()].build_settings;
    let exe = dunce::canonicalize(artifact).unwrap_or_else(|_| artifact.to_path_buf());
    let mut exe_str = exe.display().to_string();
    if !exe_str.contains('/') && !exe_str.contains('\\') {
        exe_str = if cfg!(windows) {
            format!(".\\{}", exe_str)
        } else {
            format!("./{}", exe_str)
        };
    }
    let mut command = Command::new(&exe_str);
    command.args(&settings.run_args);
    if !bs.working_directory.as_os_str().is_empty() {
        let cwd = std::env::current_dir().context("failed to read the working directory")?;
        command.current_dir(cwd.join(&bs.working_directory));
    }
    command
        .spawn()
        .with_context(|| format!("failed to run `{}`", exe_str))
}

pub(crate) fn run_target(
    project: &Project,
    targets: &IndexMap<String, TargetInfo>,
    settings: &GeneratorSettings,
    artifact: &Path,
) -> anyhow::Result<i32> {
    println!(
        "Running {}{}",
        artifact.display(),
        if settings.run_args.is_empty() {
            String::new()
        } else {
            format!(" {}", settings.run_args.join(" "))
        }
    );
    let mut child = spawn_target(project, targets, settings, artifact)?;
    let status = child.wait().context("failed to wait for the target")?;
    let code = status.code().unwrap_or(-1);
    if let Some(cb) = &settings.run_callback {
        cb(code, "");
        return Ok(0);
    }
    Ok(code)
}

/// Decide whether a cached artifact is newer than all of its input files.
///
/// A missing artifact or input forces a rebuild; an input stamped in the
/// future is reported but deliberately does not trigger one.
pub fn is_up_to_date(artifact: &Path, inputs: &[PathBuf]) -> bool {
    let target_time = match fs::metadata(artifact).and_then(|m| m.modified()) {
        Ok(time) => time,
        Err(_) => {
            log::debug!("target `{}` does not exist yet", artifact.display());
            return false;
        }
    };
    let now = SystemTime::now();
    for input in inputs {
        let mtime = match fs::metadata(input).and_then(|m| m.modified()) {
            Ok(time) => time,
            Err(_) => {
                log::debug!(
                    "triggering rebuild: input `{}` is missing",
                    input.display()
                );
                return false;
            }
        };
        if mtime > now {
            eprintln!(
                "{}: file `{}` was modified in the future, please re-save",
                "warning".yellow().bold(),
                input.display()
            );
        } else if mtime > target_time {
            log::debug!("triggering rebuild: `{}` is newer", input.display());
            return false;
        }
    }
    true
}

fn dest_dir(pack: &Package, bs: &BuildSettings) -> PathBuf {
    if bs.target_path.as_os_str().is_empty() {
        pack.path.clone()
    } else {
        in_package(&pack.path, &bs.target_path)
    }
}

fn in_package(pack_path: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        pack_path.join(path)
    }
}

fn make_paths_relative(bs: &mut BuildSettings, cwd: &Path) {
    let relativize = |paths: &mut Vec<PathBuf>| {
        for path in paths.iter_mut() {
            if let Ok(rel) = path.strip_prefix(cwd) {
                if !rel.as_os_str().is_empty() {
                    *path = rel.to_path_buf();
                }
            }
        }
    };
    relativize(&mut bs.source_files);
    relativize(&mut bs.import_files);
    relativize(&mut bs.string_import_files);
    relativize(&mut bs.import_paths);
    relativize(&mut bs.string_import_paths);
}

/// Derive a filename-safe, collision-resistant object name for one source
/// file compiled next to sources from entirely different directories.
pub(crate) fn object_file_name(source: &Path, obj_suffix: &str) -> String {
    let absolute = dunce::canonicalize(source).unwrap_or_else(|_| source.to_path_buf());
    let mut text = absolute.display().to_string();
    if text.len() >= 2 && text.as_bytes()[1] == b':' {
        text = text[2..].to_string();
    }
    let mapped: String = text
        .chars()
        .map(|c| if c == '/' || c == '\\' { '.' } else { c })
        .collect();
    format!("{}{}", mapped.trim_start_matches('.'), obj_suffix)
}

fn ensure_writable_dir(dir: &Path) -> bool {
    if fs::create_dir_all(dir).is_err() {
        return false;
    }
    tempfile::tempfile_in(dir).is_ok()
}

/// Hard-link the finished artifact out of the cache directory, copying when
/// linking is impossible (different file system, permissions).
fn copy_target_out(src: &Path, dest: &Path) -> anyhow::Result<()> {
    if src == dest {
        return Ok(());
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create `{}`", parent.display()))?;
    }
    if dest.exists() {
        fs::remove_file(dest)
            .with_context(|| format!("failed to replace `{}`", dest.display()))?;
    }
    if let Err(e) = fs::hard_link(src, dest) {
        log::debug!(
            "hard linking `{}` failed ({}), copying instead",
            src.display(),
            e
        );
        fs::copy(src, dest).with_context(|| {
            format!("failed to copy `{}` to `{}`", src.display(), dest.display())
        })?;
    }
    Ok(())
}

fn copy_matching_files(pattern: &str, pack_path: &Path, dest_dir: &Path) -> anyhow::Result<()> {
    let matcher = glob::Pattern::new(pattern)
        .with_context(|| format!("invalid copy pattern `{}`", pattern))?;
    for entry in walkdir::WalkDir::new(pack_path)
        .into_iter()
        .filter_map(Result::ok)
    {
        let Ok(rel) = entry.path().strip_prefix(pack_path) else {
            continue;
        };
        if !entry.file_type().is_file() || !matcher.matches_path(rel) {
            continue;
        }
        copy_file_or_dir(entry.path(), dest_dir)?;
    }
    Ok(())
}

fn copy_file_or_dir(src: &Path, dest_dir: &Path) -> anyhow::Result<()> {
    let name = src
        .file_name()
        .with_context(|| format!("`{}` has no file name", src.display()))?;
    if src.is_dir() {
        for entry in walkdir::WalkDir::new(src).into_iter().filter_map(Result::ok) {
            let rel = entry
                .path()
                .strip_prefix(src)
                .expect("walked entries live under their root");
            let dest = dest_dir.join(name).join(rel);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&dest)?;
            } else {
                copy_target_out(entry.path(), &dest)?;
            }
        }
        Ok(())
    } else {
        copy_target_out(src, &dest_dir.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::tests::test_settings;
    use crate::generate::{plan, GeneratorSettings};
    use dubutil::compiler::{Compiler, OutputCallback};
    use dubutil::package::{Dependency, Package};
    use dubutil::platform::BuildPlatform;
    use semver::Version;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Stands in for a real compiler: counts invocations and materializes
    /// the expected artifact.
    struct FakeCompiler {
        invocations: Arc<AtomicUsize>,
        order: Arc<Mutex<Vec<String>>>,
    }

    impl Compiler for FakeCompiler {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn prepare_build_settings(
            &self,
            _bs: &mut BuildSettings,
            _platform: &BuildPlatform,
            _style: CommandStyle,
        ) {
        }

        fn set_target(
            &self,
            _bs: &mut BuildSettings,
            _platform: &BuildPlatform,
            _obj_path: Option<&Path>,
        ) {
        }

        fn invoke(
            &self,
            bs: &BuildSettings,
            platform: &BuildPlatform,
            _cb: Option<OutputCallback>,
        ) -> anyhow::Result<()> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            self.order.lock().unwrap().push(bs.target_name.clone());
            let out = self.target_output_path(bs, platform);
            fs::write(&out, b"artifact")?;
            Ok(())
        }

        fn invoke_linker(
            &self,
            bs: &BuildSettings,
            platform: &BuildPlatform,
            _objects: &[PathBuf],
            cb: Option<OutputCallback>,
        ) -> anyhow::Result<()> {
            self.invoke(bs, platform, cb)
        }

        fn extract_build_options(&self, _bs: &mut BuildSettings) {}
    }

    struct Fixture {
        settings: GeneratorSettings,
        invocations: Arc<AtomicUsize>,
        order: Arc<Mutex<Vec<String>>>,
    }

    fn fake_settings() -> Fixture {
        let invocations = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut settings = test_settings();
        settings.compiler = Box::new(FakeCompiler {
            invocations: Arc::clone(&invocations),
            order: Arc::clone(&order),
        });
        Fixture {
            settings,
            invocations,
            order,
        }
    }

    fn disk_package(root: &Path, name: &str, deps: &[&str], target_type: TargetType) -> Package {
        let dir = root.join(name);
        fs::create_dir_all(dir.join("source")).unwrap();
        let source = dir.join("source").join(format!("{}.d", name));
        fs::write(&source, format!("module {};", name)).unwrap();
        let recipe = dir.join("dub.json");
        fs::write(&recipe, "{}").unwrap();
        Package {
            name: name.to_string(),
            version: Version::new(1, 0, 0),
            path: dir.clone(),
            recipe_path: recipe,
            dependencies: deps
                .iter()
                .map(|d| (d.to_string(), Dependency::default()))
                .collect(),
            settings: BuildSettings {
                target_type,
                target_path: "bin".into(),
                source_files: vec![source],
                ..Default::default()
            },
            configurations: IndexMap::new(),
        }
    }

    #[test]
    fn test_cached_build_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let pack = disk_package(tmp.path(), "foo", &[], TargetType::Executable);
        let project = Project::new("foo".into(), vec![pack], None).unwrap();
        let fixture = fake_settings();
        let (targets, _) = plan(&project, &fixture.settings).unwrap();

        let artifact = build_targets(&project, &targets, &fixture.settings)
            .unwrap()
            .artifact;
        assert!(artifact.exists());
        assert!(artifact.starts_with(tmp.path().join("foo").join("bin")));
        assert_eq!(fixture.invocations.load(Ordering::SeqCst), 1);
        // the cache entry lives under <pack>/.dub/build/<build-id>/
        assert!(tmp.path().join("foo").join(".dub").join("build").exists());

        // unchanged inputs: no compiler invocation the second time around
        let second = build_targets(&project, &targets, &fixture.settings)
            .unwrap()
            .artifact;
        assert_eq!(second, artifact);
        assert_eq!(fixture.invocations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_force_invalidates_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let pack = disk_package(tmp.path(), "foo", &[], TargetType::Executable);
        let project = Project::new("foo".into(), vec![pack], None).unwrap();
        let mut fixture = fake_settings();
        let (targets, _) = plan(&project, &fixture.settings).unwrap();

        build_targets(&project, &targets, &fixture.settings).unwrap();
        fixture.settings.force = true;
        build_targets(&project, &targets, &fixture.settings).unwrap();
        assert_eq!(fixture.invocations.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dependencies_build_before_dependents() {
        let tmp = tempfile::tempdir().unwrap();
        let app = disk_package(tmp.path(), "app", &["libx"], TargetType::Executable);
        let libx = disk_package(tmp.path(), "libx", &[], TargetType::Library);
        let project = Project::new("app".into(), vec![app, libx], None).unwrap();
        let fixture = fake_settings();
        let (targets, _) = plan(&project, &fixture.settings).unwrap();

        build_targets(&project, &targets, &fixture.settings).unwrap();
        let order = fixture.order.lock().unwrap().clone();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("libx") < pos("app"));
    }

    #[test]
    fn test_static_library_root_skips_dependency_builds() {
        let tmp = tempfile::tempdir().unwrap();
        let root = disk_package(tmp.path(), "toolkit", &["libx"], TargetType::StaticLibrary);
        let libx = disk_package(tmp.path(), "libx", &[], TargetType::Library);
        let project = Project::new("toolkit".into(), vec![root, libx], None).unwrap();
        let fixture = fake_settings();
        let (targets, _) = plan(&project, &fixture.settings).unwrap();

        build_targets(&project, &targets, &fixture.settings).unwrap();
        let order = fixture.order.lock().unwrap().clone();
        assert_eq!(order, vec!["toolkit"]);
    }

    #[test]
    fn test_up_to_date_rules() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact = tmp.path().join("app");
        let input = tmp.path().join("app.d");

        // missing artifact
        fs::write(&input, "x").unwrap();
        assert!(!is_up_to_date(&artifact, &[input.clone()]));

        // artifact newer than the input
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(&artifact, "bin").unwrap();
        assert!(is_up_to_date(&artifact, &[input.clone()]));

        // missing input
        let missing = tmp.path().join("gone.d");
        assert!(!is_up_to_date(&artifact, &[missing]));

        // input newer than the artifact
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(&input, "y").unwrap();
        assert!(!is_up_to_date(&artifact, &[input]));
    }

    #[test]
    fn test_object_file_name_mangling() {
        let name = object_file_name(Path::new("/work/app/source/app.d"), ".o");
        assert_eq!(name, "work.app.source.app.d.o");
        let win = object_file_name(Path::new("C:\\work\\app.d"), ".obj");
        assert_eq!(win, "work.app.d.obj");
    }

    #[test]
    fn test_copy_files_glob_and_plain() {
        let tmp = tempfile::tempdir().unwrap();
        let pack_dir = tmp.path().join("pack");
        fs::create_dir_all(pack_dir.join("assets")).unwrap();
        fs::write(pack_dir.join("assets").join("a.txt"), "a").unwrap();
        fs::write(pack_dir.join("assets").join("b.dat"), "b").unwrap();
        fs::write(pack_dir.join("LICENSE"), "l").unwrap();
        let dest = tmp.path().join("out");
        fs::create_dir_all(&dest).unwrap();

        copy_matching_files("assets/*.txt", &pack_dir, &dest).unwrap();
        copy_file_or_dir(&pack_dir.join("LICENSE"), &dest).unwrap();

        assert!(dest.join("a.txt").exists());
        assert!(!dest.join("b.dat").exists());
        assert!(dest.join("LICENSE").exists());
    }
}
