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

use dubbuild::generate::{create_generator, GeneratorKind};

use super::{BuildFlags, UniversalFlags};

/// Generate project files through a named backend
#[derive(Debug, clap::Parser)]
pub struct GenerateSubcommand {
    /// The generator to use (build, visuald, sublimetext, cmake)
    pub generator: String,

    #[clap(flatten)]
    pub build_flags: BuildFlags,
}

pub fn run_generate(cli: &UniversalFlags, cmd: &GenerateSubcommand) -> anyhow::Result<i32> {
    match create_generator(&cmd.generator)? {
        GeneratorKind::Build => {
            let project = cli.load_project()?;
            let settings = cmd.build_flags.to_generator_settings()?;
            let (targets, _) = dubbuild::generate::plan(&project, &settings)?;
            dubbuild::build::build(&project, &targets, &settings)
        }
    }
}
