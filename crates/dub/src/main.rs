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

#![warn(clippy::clone_on_ref_ptr)]

use clap::Parser;
use cli::DubSubcommands;

mod cli;

use colored::*;

fn init_log(flags: &cli::UniversalFlags) {
    use std::io::Write;
    // usage example: only show debug logs for the executor
    // env RUST_LOG=dubbuild::build=debug dub build

    // log level: error > warn > info > debug > trace
    let default_level = if flags.quiet {
        "error"
    } else if flags.verbose {
        "debug"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Stdout)
        .format(|buf, record| {
            let level_style = buf.default_level_style(record.level());
            writeln!(
                buf,
                "{} [{}] [{}:{}] {}",
                level_style.value(record.level()),
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .init();
}

pub fn main() {
    match main1() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}: {:?}", "error".red().bold(), e);
            std::process::exit(-1);
        }
    }
}

fn main1() -> anyhow::Result<i32> {
    let cli = cli::DubCli::parse();
    init_log(&cli.flags);
    use DubSubcommands::*;
    match cli.subcommand {
        Build(b) => cli::run_build(&cli.flags, &b),
        Run(r) => cli::run_run(&cli.flags, r),
        Generate(g) => cli::run_generate(&cli.flags, &g),
    }
}
