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
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

use crate::platform::BuildPlatform;
use crate::settings::{BuildOptions, BuildSettings, TargetType};

/// How the prepared settings will be handed to the tool.
///
/// `AllInline` folds everything, linker flags included, into one flag list
/// for a single compile+link invocation. `SeparateLinker` keeps lflags
/// structured for a later link step. `SeparateLinkerAndSources` additionally
/// keeps source files out of the flag list so the invocation can place them
/// itself.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommandStyle {
    AllInline,
    SeparateLinker,
    SeparateLinkerAndSources,
}

/// Compile or link phase returned a non-zero status and no callback was
/// installed to consume it.
#[derive(Debug, Error)]
pub enum BuildFailure {
    #[error("compiler exited with code {0}")]
    CompileFailed(i32),
    #[error("linker exited with code {0}")]
    LinkFailed(i32),
}

/// Receives `(exit_status, combined_output)` of a tool invocation instead of
/// the failure being raised.
pub type OutputCallback<'a> = &'a dyn Fn(i32, &str);

/// Capability set over one native compiler's compile and link operations.
/// Drivers are stateless, so they can be shared with compilation workers.
pub trait Compiler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Normalize structured settings fields into command-line flags for the
    /// given invocation style. Folded fields are cleared.
    fn prepare_build_settings(
        &self,
        bs: &mut BuildSettings,
        platform: &BuildPlatform,
        style: CommandStyle,
    );

    /// Inject the output-path flag (and the emit-mode flag the target type
    /// requires). `obj_path` overrides the destination for compile-to-object
    /// steps.
    fn set_target(&self, bs: &mut BuildSettings, platform: &BuildPlatform, obj_path: Option<&Path>);

    /// Run one compile invocation.
    fn invoke(
        &self,
        bs: &BuildSettings,
        platform: &BuildPlatform,
        cb: Option<OutputCallback>,
    ) -> anyhow::Result<()>;

    /// Link pre-produced object files into the target artifact.
    fn invoke_linker(
        &self,
        bs: &BuildSettings,
        platform: &BuildPlatform,
        objects: &[PathBuf],
        cb: Option<OutputCallback>,
    ) -> anyhow::Result<()>;

    /// Reverse-fold known dflags back into the options bitmask so later
    /// stages can reason structurally about them.
    fn extract_build_options(&self, bs: &mut BuildSettings);

    /// The platform-appropriate file name of the finished artifact.
    fn target_file_name(&self, bs: &BuildSettings, platform: &BuildPlatform) -> String {
        let name = &bs.target_name;
        match bs.target_type {
            TargetType::Executable => format!("{}{}", name, platform.exe_suffix()),
            TargetType::Library | TargetType::StaticLibrary => {
                if platform.is_windows() {
                    format!("{}.lib", name)
                } else {
                    format!("lib{}.a", name)
                }
            }
            TargetType::DynamicLibrary => {
                if platform.is_windows() {
                    format!("{}{}", name, platform.dynlib_suffix())
                } else {
                    format!("lib{}{}", name, platform.dynlib_suffix())
                }
            }
            TargetType::Object => format!("{}{}", name, platform.obj_suffix()),
            _ => name.clone(),
        }
    }

    /// Where the finished artifact lands for the current target path.
    fn target_output_path(&self, bs: &BuildSettings, platform: &BuildPlatform) -> PathBuf {
        bs.target_path.join(self.target_file_name(bs, platform))
    }
}

/// Resolve a compiler id string to a concrete driver.
pub fn lookup(id: &str) -> anyhow::Result<Box<dyn Compiler>> {
    match id {
        "dmd" => Ok(Box::new(Dmd)),
        "ldc" | "ldc2" => Ok(Box::new(Ldc)),
        other => bail!("unknown compiler id `{}` (supported: dmd, ldc)", other),
    }
}

/// Flag dialect of one compiler family. The option table doubles as the
/// reverse-extraction table, so generation and extraction cannot drift.
struct Dialect {
    version_flag: &'static str,
    debug_version_flag: &'static str,
    output_flag: &'static str,
    option_flags: &'static [(&'static str, BuildOptions)],
}

const DMD_DIALECT: Dialect = Dialect {
    version_flag: "-version=",
    debug_version_flag: "-debug=",
    output_flag: "-of",
    option_flags: &[
        ("-debug", BuildOptions::DEBUG_MODE),
        ("-release", BuildOptions::RELEASE_MODE),
        ("-cov", BuildOptions::COVERAGE),
        ("-g", BuildOptions::DEBUG_INFO),
        ("-inline", BuildOptions::INLINE),
        ("-boundscheck=off", BuildOptions::NO_BOUNDS_CHECK),
        ("-O", BuildOptions::OPTIMIZE),
        ("-profile", BuildOptions::PROFILE),
        ("-unittest", BuildOptions::UNITTESTS),
        ("-o-", BuildOptions::SYNTAX_ONLY),
        ("-w", BuildOptions::WARNINGS_AS_ERRORS),
        ("-gx", BuildOptions::STACK_STOMPING),
        ("-lowmem", BuildOptions::LOW_MEM),
        ("-fPIC", BuildOptions::PIC),
    ],
};

const LDC_DIALECT: Dialect = Dialect {
    version_flag: "-d-version=",
    debug_version_flag: "-d-debug=",
    output_flag: "-of=",
    option_flags: &[
        ("-d-debug", BuildOptions::DEBUG_MODE),
        ("-release", BuildOptions::RELEASE_MODE),
        ("-cov", BuildOptions::COVERAGE),
        ("-g", BuildOptions::DEBUG_INFO),
        ("-enable-inlining", BuildOptions::INLINE),
        ("-boundscheck=off", BuildOptions::NO_BOUNDS_CHECK),
        ("-O", BuildOptions::OPTIMIZE),
        ("-fprofile-generate", BuildOptions::PROFILE),
        ("-unittest", BuildOptions::UNITTESTS),
        ("-o-", BuildOptions::SYNTAX_ONLY),
        ("-w", BuildOptions::WARNINGS_AS_ERRORS),
        ("-lowmem", BuildOptions::LOW_MEM),
        ("-relocation-model=pic", BuildOptions::PIC),
    ],
};

fn prepare_with_dialect(
    dialect: &Dialect,
    bs: &mut BuildSettings,
    platform: &BuildPlatform,
    style: CommandStyle,
) {
    let mut dflags: Vec<String> = Vec::new();
    for (flag, option) in dialect.option_flags {
        if bs.options.contains(*option) {
            // PIC is meaningless to the object format on Windows
            if *option == BuildOptions::PIC && platform.is_windows() {
                continue;
            }
            dflags.push((*flag).to_string());
        }
    }
    dflags.extend(
        bs.versions
            .drain(..)
            .map(|v| format!("{}{}", dialect.version_flag, v)),
    );
    dflags.extend(
        bs.debug_versions
            .drain(..)
            .map(|v| format!("{}{}", dialect.debug_version_flag, v)),
    );
    dflags.extend(
        bs.import_paths
            .drain(..)
            .map(|p| format!("-I{}", p.display())),
    );
    dflags.extend(
        bs.string_import_paths
            .drain(..)
            .map(|p| format!("-J{}", p.display())),
    );
    for lib in bs.libs.drain(..) {
        if platform.is_windows() {
            bs.lflags.push(format!("{}.lib", lib));
        } else {
            bs.lflags.push(format!("-l{}", lib));
        }
    }
    dflags.extend(bs.dflags.drain(..));
    if style == CommandStyle::AllInline {
        dflags.extend(bs.lflags.drain(..).map(|l| format!("-L{}", l)));
    }
    if style != CommandStyle::SeparateLinkerAndSources {
        dflags.extend(bs.source_files.drain(..).map(|p| p.display().to_string()));
    }
    bs.dflags = dflags;
}

fn extract_with_dialect(dialect: &Dialect, bs: &mut BuildSettings) {
    let mut options = bs.options;
    bs.dflags.retain(|flag| {
        match dialect.option_flags.iter().find(|(f, _)| f == flag) {
            Some((_, option)) => {
                options.insert(*option);
                false
            }
            None => true,
        }
    });
    bs.options = options;
}

fn set_target_with_dialect(
    dialect: &Dialect,
    compiler: &dyn Compiler,
    bs: &mut BuildSettings,
    platform: &BuildPlatform,
    obj_path: Option<&Path>,
) {
    match obj_path {
        Some(obj) => {
            bs.dflags.push("-c".to_string());
            bs.dflags
                .push(format!("{}{}", dialect.output_flag, obj.display()));
        }
        None => {
            match bs.target_type {
                TargetType::Library | TargetType::StaticLibrary => {
                    bs.dflags.push("-lib".to_string())
                }
                TargetType::DynamicLibrary => bs.dflags.push("-shared".to_string()),
                TargetType::Object => bs.dflags.push("-c".to_string()),
                _ => {}
            }
            let out = compiler.target_output_path(bs, platform);
            bs.dflags
                .push(format!("{}{}", dialect.output_flag, out.display()));
        }
    }
}

fn link_with_dialect(
    dialect: &Dialect,
    compiler: &dyn Compiler,
    bs: &BuildSettings,
    platform: &BuildPlatform,
    objects: &[PathBuf],
    cb: Option<OutputCallback>,
) -> anyhow::Result<()> {
    let out = compiler.target_output_path(bs, platform);
    let mut args = Vec::new();
    if bs.target_type == TargetType::DynamicLibrary {
        args.push("-shared".to_string());
    }
    args.push(format!("{}{}", dialect.output_flag, out.display()));
    args.extend(objects.iter().map(|o| o.display().to_string()));
    args.extend(bs.lflags.iter().map(|l| format!("-L{}", l)));
    run_tool(
        &platform.compiler_binary,
        &args,
        cb,
        BuildFailure::LinkFailed,
    )
}

fn run_tool(
    binary: &str,
    args: &[String],
    cb: Option<OutputCallback>,
    make_failure: fn(i32) -> BuildFailure,
) -> anyhow::Result<()> {
    log::debug!("invoking: {} {}", binary, args.join(" "));
    let mut command = Command::new(binary);
    command.args(args);
    match cb {
        Some(cb) => {
            let output = command
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .context(format!("failed to execute `{}`", binary))?;
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            cb(output.status.code().unwrap_or(-1), &text);
            Ok(())
        }
        None => {
            let status = command
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .spawn()
                .context(format!("failed to execute `{}`", binary))?
                .wait()?;
            if status.success() {
                Ok(())
            } else {
                Err(make_failure(status.code().unwrap_or(-1)).into())
            }
        }
    }
}

pub struct Dmd;

impl Compiler for Dmd {
    fn name(&self) -> &'static str {
        "dmd"
    }

    fn prepare_build_settings(
        &self,
        bs: &mut BuildSettings,
        platform: &BuildPlatform,
        style: CommandStyle,
    ) {
        prepare_with_dialect(&DMD_DIALECT, bs, platform, style);
    }

    fn set_target(&self, bs: &mut BuildSettings, platform: &BuildPlatform, obj_path: Option<&Path>) {
        set_target_with_dialect(&DMD_DIALECT, self, bs, platform, obj_path);
    }

    fn invoke(
        &self,
        bs: &BuildSettings,
        platform: &BuildPlatform,
        cb: Option<OutputCallback>,
    ) -> anyhow::Result<()> {
        let mut args = bs.dflags.clone();
        args.extend(bs.source_files.iter().map(|p| p.display().to_string()));
        run_tool(
            &platform.compiler_binary,
            &args,
            cb,
            BuildFailure::CompileFailed,
        )
    }

    fn invoke_linker(
        &self,
        bs: &BuildSettings,
        platform: &BuildPlatform,
        objects: &[PathBuf],
        cb: Option<OutputCallback>,
    ) -> anyhow::Result<()> {
        link_with_dialect(&DMD_DIALECT, self, bs, platform, objects, cb)
    }

    fn extract_build_options(&self, bs: &mut BuildSettings) {
        extract_with_dialect(&DMD_DIALECT, bs);
    }
}

pub struct Ldc;

impl Compiler for Ldc {
    fn name(&self) -> &'static str {
        "ldc"
    }

    fn prepare_build_settings(
        &self,
        bs: &mut BuildSettings,
        platform: &BuildPlatform,
        style: CommandStyle,
    ) {
        prepare_with_dialect(&LDC_DIALECT, bs, platform, style);
    }

    fn set_target(&self, bs: &mut BuildSettings, platform: &BuildPlatform, obj_path: Option<&Path>) {
        set_target_with_dialect(&LDC_DIALECT, self, bs, platform, obj_path);
    }

    fn invoke(
        &self,
        bs: &BuildSettings,
        platform: &BuildPlatform,
        cb: Option<OutputCallback>,
    ) -> anyhow::Result<()> {
        let mut args = bs.dflags.clone();
        args.extend(bs.source_files.iter().map(|p| p.display().to_string()));
        run_tool(
            &platform.compiler_binary,
            &args,
            cb,
            BuildFailure::CompileFailed,
        )
    }

    fn invoke_linker(
        &self,
        bs: &BuildSettings,
        platform: &BuildPlatform,
        objects: &[PathBuf],
        cb: Option<OutputCallback>,
    ) -> anyhow::Result<()> {
        link_with_dialect(&LDC_DIALECT, self, bs, platform, objects, cb)
    }

    fn extract_build_options(&self, bs: &mut BuildSettings) {
        extract_with_dialect(&LDC_DIALECT, bs);
    }
}
