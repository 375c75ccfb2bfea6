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

use anyhow::bail;

use dubutil::settings::TargetType;

use super::{BuildFlags, UniversalFlags};

/// Build and run the root package
#[derive(Debug, clap::Parser)]
pub struct RunSubcommand {
    #[clap(flatten)]
    pub build_flags: BuildFlags,

    /// Rebuild and restart the program whenever a source file changes
    #[clap(long)]
    pub watch: bool,

    /// Arguments passed to the program
    #[clap(last = true)]
    pub args: Vec<String>,
}

pub fn run_run(cli: &UniversalFlags, cmd: RunSubcommand) -> anyhow::Result<i32> {
    let project = cli.load_project()?;
    let mut settings = cmd.build_flags.to_generator_settings()?;
    settings.run = true;
    settings.watch = cmd.watch;
    settings.run_args = cmd.args;

    let (targets, _) = dubbuild::generate::plan(&project, &settings)?;
    let root_type = targets[project.root_name()].build_settings.target_type;
    if root_type != TargetType::Executable {
        bail!(
            "`{}` is not an executable, its target type is `{}`",
            project.root_name(),
            root_type.to_str()
        );
    }
    dubbuild::build::build(&project, &targets, &settings)
}
