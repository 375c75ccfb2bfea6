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

pub mod build;
pub mod generate;
pub mod run;

pub use build::*;
pub use generate::*;
pub use run::*;

use std::path::PathBuf;

use dubbuild::generate::{BuildMode, GeneratorSettings};
use dubutil::package::{read_project_description, Project};
use dubutil::platform::BuildPlatform;

/// The resolved dependency graph the external resolver leaves next to the
/// root recipe.
pub const RESOLVED_PROJECT_JSON: &str = "dub.resolved.json";

#[derive(Debug, clap::Parser)]
#[clap(
    name = "dub",
    about = "The build system and package manager for the D language."
)]
pub struct DubCli {
    #[clap(subcommand)]
    pub subcommand: DubSubcommands,

    #[clap(flatten)]
    pub flags: UniversalFlags,
}

#[derive(Debug, clap::Parser)]
pub enum DubSubcommands {
    Build(BuildSubcommand),
    Run(RunSubcommand),
    Generate(GenerateSubcommand),
}

#[derive(Debug, clap::Parser)]
#[clap(next_display_order(2000), next_help_heading("Common options"))]
pub struct UniversalFlags {
    /// The directory holding the resolved project description
    #[clap(long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Suppress output
    #[clap(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Increase verbosity
    #[clap(long, short = 'v', global = true)]
    pub verbose: bool,
}

impl UniversalFlags {
    pub fn load_project(&self) -> anyhow::Result<Project> {
        read_project_description(&self.root.join(RESOLVED_PROJECT_JSON))
    }
}

#[derive(Debug, clap::Parser)]
pub struct BuildFlags {
    /// The build configuration of the root package
    #[clap(long, short = 'c', default_value = "")]
    pub config: String,

    /// Build type (plain, debug, release, unittest, cov, unittest-cov, ...)
    #[clap(long = "build", short = 'b', default_value = "debug")]
    pub build_type: String,

    /// Compiler id to build with
    #[clap(long, default_value = "dmd")]
    pub compiler: String,

    /// Compiler binary; the id is looked up in PATH when omitted
    #[clap(long)]
    pub compiler_binary: Option<String>,

    /// Frontend version the build cache is keyed against
    #[clap(long, default_value_t = 2105)]
    pub frontend_version: u32,

    /// How sources are grouped into compiler invocations
    #[clap(long, value_enum, default_value_t = BuildMode::Separate)]
    pub build_mode: BuildMode,

    /// Force rebuilding even if the cached target is up to date
    #[clap(long, short = 'f')]
    pub force: bool,

    /// Fold all dependencies into the root target as source libraries
    #[clap(long)]
    pub combined: bool,

    /// Let rdmd drive compilation of the root package
    #[clap(long)]
    pub rdmd: bool,

    /// Skip the build cache and write artifacts straight to the target path
    #[clap(long)]
    pub direct: bool,

    /// Build into a temporary directory that is cleaned up afterwards
    #[clap(long)]
    pub temp_build: bool,

    /// Compile independent source files in parallel (single-file mode)
    #[clap(long)]
    pub parallel: bool,
}

impl BuildFlags {
    pub fn to_generator_settings(&self) -> anyhow::Result<GeneratorSettings> {
        let compiler = dubutil::compiler::lookup(&self.compiler)?;
        let binary = match &self.compiler_binary {
            Some(path) => path.clone(),
            None => lookup_compiler_binary(&self.compiler),
        };
        Ok(GeneratorSettings {
            platform: BuildPlatform::host(&self.compiler, &binary, self.frontend_version),
            compiler,
            config: self.config.clone(),
            build_type: self.build_type.clone(),
            build_mode: self.build_mode,
            combined: self.combined,
            run: false,
            force: self.force,
            direct: self.direct,
            rdmd: self.rdmd,
            temp_build: self.temp_build,
            parallel_build: self.parallel,
            watch: false,
            run_args: Vec::new(),
            compile_callback: None,
            link_callback: None,
            run_callback: None,
        })
    }
}

fn lookup_compiler_binary(id: &str) -> String {
    let candidates: Vec<&str> = match id {
        "ldc" | "ldc2" => vec!["ldc2", "ldc"],
        other => vec![other],
    };
    candidates
        .into_iter()
        .find_map(|name| which::which(name).ok())
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| id.to_string())
}
