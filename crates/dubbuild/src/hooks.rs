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
use std::path::Path;
use std::process::Command;

use dubutil::package::{Package, Project};
use dubutil::settings::BuildSettings;

use crate::generate::GeneratorSettings;

/// The environment variable carrying the hook recursion guard. It is both an
/// input (read to detect a hook re-invoking the tool on the same package)
/// and an output (re-exported with the current package appended).
pub const PACKAGES_USED_VAR: &str = "DUB_PACKAGES_USED";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HookPhase {
    PreGenerate,
    PostGenerate,
    PreBuild,
    PostBuild,
}

impl HookPhase {
    fn announce(self) -> &'static str {
        match self {
            Self::PreGenerate => "Running pre-generate commands...",
            Self::PostGenerate => "Running post-generate commands...",
            Self::PreBuild => "Running pre-build commands...",
            Self::PostBuild => "Running post-build commands...",
        }
    }
}

/// Run user hook commands of one phase for one package.
///
/// Failures are reported as warnings and never abort the build. Recursive
/// invocations are suppressed through `DUB_PACKAGES_USED`.
pub fn run_build_commands(
    phase: HookPhase,
    commands: &[String],
    pack: &Package,
    project: &Project,
    settings: &GeneratorSettings,
    bs: &BuildSettings,
) {
    if commands.is_empty() {
        return;
    }
    let used = packages_used_from_env();
    if used.iter().any(|p| p == &pack.name) {
        log::debug!(
            "skipping hook commands of `{}`: already on the invocation chain",
            pack.name
        );
        return;
    }
    let mut chain = used;
    chain.push(pack.name.clone());

    let mut env = hook_environment(pack, project, settings, bs);
    env.push((PACKAGES_USED_VAR.to_string(), chain.join(",")));

    println!("{}", phase.announce());
    for command in commands {
        if let Err(e) = run_shell_command(command, &pack.path, &env) {
            eprintln!(
                "{}: command `{}` of package `{}` failed: {}",
                "warning".yellow().bold(),
                command,
                pack.name,
                e
            );
        }
    }
}

fn run_shell_command(
    command: &str,
    cwd: &Path,
    env: &[(String, String)],
) -> anyhow::Result<()> {
    let mut shell = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C");
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c");
        c
    };
    shell.arg(command);
    if !cwd.as_os_str().is_empty() {
        shell.current_dir(cwd);
    }
    for (key, value) in env {
        shell.env(key, value);
    }
    let status = shell.status()?;
    if !status.success() {
        anyhow::bail!("exited with code {}", status.code().unwrap_or(-1));
    }
    Ok(())
}

fn packages_used_from_env() -> Vec<String> {
    std::env::var(PACKAGES_USED_VAR)
        .unwrap_or_default()
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn bool_var(value: bool) -> String {
    if value { "TRUE" } else { "" }.to_string()
}

fn join_paths(paths: &[std::path::PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// The environment exported to every pre/post build/generate command.
pub fn hook_environment(
    pack: &Package,
    project: &Project,
    settings: &GeneratorSettings,
    bs: &BuildSettings,
) -> Vec<(String, String)> {
    let root = project.root_package();
    let run_args = shlex::try_join(settings.run_args.iter().map(String::as_str))
        .unwrap_or_else(|_| settings.run_args.join(" "));
    vec![
        ("DFLAGS".into(), bs.dflags.join(" ")),
        ("LFLAGS".into(), bs.lflags.join(" ")),
        ("VERSIONS".into(), bs.versions.join(" ")),
        ("LIBS".into(), bs.libs.join(" ")),
        ("IMPORT_PATHS".into(), join_paths(&bs.import_paths)),
        (
            "STRING_IMPORT_PATHS".into(),
            join_paths(&bs.string_import_paths),
        ),
        ("DC".into(), settings.platform.compiler_binary.clone()),
        ("DC_BASE".into(), settings.platform.compiler.clone()),
        (
            "D_FRONTEND_VER".into(),
            settings.platform.frontend_version.to_string(),
        ),
        ("DUB_PLATFORM".into(), settings.platform.platform.join(" ")),
        ("DUB_ARCH".into(), settings.platform.architecture.join(" ")),
        ("DUB_TARGET_TYPE".into(), bs.target_type.to_str().to_string()),
        ("DUB_TARGET_PATH".into(), bs.target_path.display().to_string()),
        ("DUB_TARGET_NAME".into(), bs.target_name.clone()),
        (
            "DUB_WORKING_DIRECTORY".into(),
            bs.working_directory.display().to_string(),
        ),
        (
            "DUB_MAIN_SOURCE_FILE".into(),
            bs.main_source_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        ),
        ("DUB_CONFIG".into(), settings.config.clone()),
        ("DUB_BUILD_TYPE".into(), settings.build_type.clone()),
        ("DUB_BUILD_MODE".into(), settings.build_mode.to_str().to_string()),
        ("DUB_PACKAGE".into(), pack.name.clone()),
        ("DUB_PACKAGE_DIR".into(), pack.path.display().to_string()),
        ("DUB_ROOT_PACKAGE".into(), root.name.clone()),
        ("DUB_ROOT_PACKAGE_DIR".into(), root.path.display().to_string()),
        ("DUB_COMBINED".into(), bool_var(settings.combined)),
        ("DUB_RUN".into(), bool_var(settings.run)),
        ("DUB_FORCE".into(), bool_var(settings.force)),
        ("DUB_DIRECT".into(), bool_var(settings.direct)),
        ("DUB_RDMD".into(), bool_var(settings.rdmd)),
        ("DUB_TEMP_BUILD".into(), bool_var(settings.temp_build)),
        ("DUB_PARALLEL_BUILD".into(), bool_var(settings.parallel_build)),
        ("DUB_RUN_ARGS".into(), run_args),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::tests::{executable_package, test_settings};
    use dubutil::package::Project;

    #[test]
    fn test_hook_environment_contents() {
        let pack = executable_package("app", &[]);
        let project = Project::new("app".into(), vec![pack.clone()], None).unwrap();
        let mut settings = test_settings();
        settings.run = true;
        settings.run_args = vec!["--port".into(), "80 80".into()];
        let bs = BuildSettings {
            versions: vec!["Have_app".into()],
            target_name: "app".into(),
            ..Default::default()
        };

        let env = hook_environment(&pack, &project, &settings, &bs);
        let get = |key: &str| {
            env.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(get("VERSIONS"), "Have_app");
        assert_eq!(get("DC_BASE"), "dmd");
        assert_eq!(get("DUB_PACKAGE"), "app");
        assert_eq!(get("DUB_ROOT_PACKAGE"), "app");
        assert_eq!(get("DUB_RUN"), "TRUE");
        assert_eq!(get("DUB_FORCE"), "");
        // shell-escaped so an embedded space survives a round trip
        assert_eq!(get("DUB_RUN_ARGS"), "--port '80 80'");
    }

    #[test]
    fn test_bool_var_rendering() {
        assert_eq!(bool_var(true), "TRUE");
        assert_eq!(bool_var(false), "");
    }
}
