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

use super::{BuildFlags, UniversalFlags};

/// Compile the root package and all of its dependencies
#[derive(Debug, clap::Parser)]
pub struct BuildSubcommand {
    #[clap(flatten)]
    pub build_flags: BuildFlags,
}

pub fn run_build(cli: &UniversalFlags, cmd: &BuildSubcommand) -> anyhow::Result<i32> {
    let project = cli.load_project()?;
    let settings = cmd.build_flags.to_generator_settings()?;
    let (targets, _) = dubbuild::generate::plan(&project, &settings)?;
    dubbuild::build::build(&project, &targets, &settings)
}
