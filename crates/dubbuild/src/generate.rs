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
use clap::ValueEnum;
use colored::Colorize;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

use dubutil::compiler::Compiler;
use dubutil::package::{Package, Project};
use dubutil::platform::BuildPlatform;
use dubutil::settings::{add_build_type_settings, is_linker_file, BuildOptions, BuildSettings, TargetType};

use crate::hooks::{self, HookPhase};

/// How source files of one target are grouped into compiler invocations.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum, Default)]
pub enum BuildMode {
    /// One invocation compiling all sources to a single object, then a link
    /// step (DMD binaries only).
    #[default]
    Separate,
    /// One compiler invocation doing compile and link together.
    AllAtOnce,
    /// One invocation per source file, then a link step.
    SingleFile,
}

impl BuildMode {
    pub fn to_str(self) -> &'static str {
        match self {
            Self::Separate => "separate",
            Self::AllAtOnce => "allAtOnce",
            Self::SingleFile => "singleFile",
        }
    }
}

/// Receives `(exit_status, combined_output)` of the corresponding phase
/// instead of the failure being raised.
pub type PhaseCallback = Box<dyn Fn(i32, &str)>;

/// Everything the generator needs besides the project itself.
pub struct GeneratorSettings {
    pub platform: BuildPlatform,
    pub compiler: Box<dyn Compiler>,
    pub config: String,
    pub build_type: String,
    pub build_mode: BuildMode,
    pub combined: bool,
    pub run: bool,
    pub force: bool,
    pub direct: bool,
    pub rdmd: bool,
    pub temp_build: bool,
    pub parallel_build: bool,
    pub watch: bool,
    pub run_args: Vec<String>,
    pub compile_callback: Option<PhaseCallback>,
    pub link_callback: Option<PhaseCallback>,
    pub run_callback: Option<PhaseCallback>,
}

/// Per-binary-target descriptor produced by planning.
#[derive(Debug, Clone)]
pub struct TargetInfo {
    /// The package this target is rooted at.
    pub pack: String,
    /// All packages whose sources are folded into this target, the root
    /// package of the target included.
    pub packages: Vec<String>,
    /// The configuration the target is built with.
    pub config: String,
    pub build_settings: BuildSettings,
    /// Direct dependencies that are binary targets themselves.
    pub dependencies: Vec<String>,
    /// Transitive closure of binary-target dependencies, ordered so that a
    /// dependency always appears after every target depending on it.
    pub link_dependencies: Vec<String>,
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("main package `{0}` has target type `{1}`, nothing to build")]
    NonBinaryRoot(String, &'static str),
    #[error("dependency `{0}` of package `{1}` is missing and not optional")]
    MissingDependency(String, String),
}

/// The generator backends selectable by name. Everything except `build` is
/// provided by external sub-generator backends.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GeneratorKind {
    Build,
}

pub fn create_generator(name: &str) -> anyhow::Result<GeneratorKind> {
    match name {
        "build" => Ok(GeneratorKind::Build),
        "visuald" | "sublimetext" | "cmake" => {
            bail!("the `{}` generator is provided by an external backend", name)
        }
        other => bail!("unknown generator `{}`", other),
    }
}

/// Transform the resolved dependency graph and the user settings into the
/// set of binary targets with merged build settings.
///
/// Returns the target map keyed by package name and the main source files
/// that were removed from non-executable targets.
pub fn plan(
    project: &Project,
    settings: &GeneratorSettings,
) -> anyhow::Result<(IndexMap<String, TargetInfo>, Vec<PathBuf>)> {
    let packs = project.topological_order()?;
    let root_name = project.root_name().to_string();
    let root_pack = project.root_package();

    // initial population: per-configuration settings with build variables
    // expanded
    let mut targets: IndexMap<String, TargetInfo> = IndexMap::new();
    for pack in &packs {
        let config = if pack.name == root_name && !settings.config.is_empty() {
            settings.config.clone()
        } else {
            pack.default_configuration()
        };
        let mut bs = pack.build_settings(&config);
        bs.expand_build_variables(&build_var_lookup(pack, root_pack));
        targets.insert(
            pack.name.clone(),
            TargetInfo {
                pack: pack.name.clone(),
                packages: vec![pack.name.clone()],
                config,
                build_settings: bs,
                dependencies: Vec::new(),
                link_dependencies: Vec::new(),
            },
        );
    }

    // pre-generate hooks run before target types are fixed, so generated
    // sources can still change the outcome
    for pack in &packs {
        let ti = &targets[&pack.name];
        if !ti.build_settings.pre_generate_commands.is_empty() {
            hooks::run_build_commands(
                HookPhase::PreGenerate,
                &ti.build_settings.pre_generate_commands.clone(),
                pack,
                project,
                settings,
                &ti.build_settings,
            );
        }
    }

    let mut main_source_files = Vec::new();
    determine_target_types(&mut targets, &root_name, settings, &mut main_source_files)?;

    // the set of packages that get their own compiler-emitted artifact
    let binary: HashSet<String> = targets
        .iter()
        .filter(|(name, ti)| {
            ti.build_settings.target_type.is_binary() || name.as_str() == root_name
        })
        .map(|(name, _)| name.clone())
        .collect();

    let mut visited = HashSet::new();
    collect_dependencies(
        project,
        &mut targets,
        &binary,
        &root_name,
        &root_name,
        &mut visited,
    )?;

    inherit_downwards(&mut targets, &root_name);

    // synthesized version identifiers for direct dependencies, absorbed or
    // binary, the target's own package included
    for (_, ti) in targets.iter_mut() {
        let idents: Vec<String> = ti
            .packages
            .iter()
            .chain(ti.dependencies.iter())
            .map(|name| format!("Have_{}", sanitize_version_ident(name)))
            .collect();
        ti.build_settings.add_versions(&idents);
    }

    let mut folded = HashSet::new();
    inherit_upwards(&mut targets, &root_name, &mut folded);

    override_string_imports(&mut targets, &root_name);

    targets.retain(|name, ti| *name == root_name || ti.build_settings.target_type.is_binary());

    for (_, ti) in targets.iter_mut() {
        add_build_type_settings(&mut ti.build_settings, &settings.build_type)?;
        settings.compiler.extract_build_options(&mut ti.build_settings);
    }

    debug_assert!(targets.contains_key(&root_name));
    Ok((targets, main_source_files))
}

fn build_var_lookup<'a>(
    pack: &'a Package,
    root: &'a Package,
) -> impl Fn(&str) -> Option<String> + 'a {
    move |name| match name {
        "PACKAGE_DIR" => Some(pack.path.display().to_string()),
        "ROOT_PACKAGE_DIR" => Some(root.path.display().to_string()),
        _ => None,
    }
}

fn determine_target_types(
    targets: &mut IndexMap<String, TargetInfo>,
    root_name: &str,
    settings: &GeneratorSettings,
    main_source_files: &mut Vec<PathBuf>,
) -> anyhow::Result<()> {
    for (name, ti) in targets.iter_mut() {
        let is_root = name == root_name;
        let bs = &mut ti.build_settings;
        match bs.target_type {
            TargetType::Autodetect | TargetType::Library => {
                bs.target_type = if !is_root && settings.combined {
                    TargetType::SourceLibrary
                } else {
                    TargetType::StaticLibrary
                };
            }
            TargetType::DynamicLibrary if !is_root => {
                eprintln!(
                    "{}: dynamic libraries are not yet supported as dependencies, building `{}` as a static library",
                    "warning".yellow().bold(),
                    name
                );
                bs.target_type = TargetType::StaticLibrary;
            }
            _ => {}
        }

        // a main source file only belongs to executable targets; everywhere
        // else it is removed and surfaced to the caller
        if let Some(main) = bs.main_source_file.clone() {
            if bs.target_type == TargetType::Executable {
                if !bs.source_files.contains(&main) {
                    bs.source_files.push(main);
                }
            } else {
                bs.source_files.retain(|f| f != &main);
                main_source_files.push(main);
            }
        }

        if bs.source_files.is_empty()
            && !matches!(bs.target_type, TargetType::SourceLibrary | TargetType::None)
        {
            log::debug!("target `{}` has no source files, demoting to none", name);
            bs.reset();
            bs.target_type = TargetType::None;
        }

        if bs.target_type == TargetType::DynamicLibrary {
            bs.options.insert(BuildOptions::PIC);
        }

        if is_root
            && matches!(bs.target_type, TargetType::SourceLibrary | TargetType::None)
        {
            return Err(PlanError::NonBinaryRoot(
                root_name.to_string(),
                bs.target_type.to_str(),
            )
            .into());
        }
    }
    Ok(())
}

/// Walk dependencies depth-first from the root, absorbing source libraries
/// into the nearest binary ancestor and wiring binary targets up as link
/// dependencies. Dependencies are visited in sorted name order, which makes
/// planning deterministic.
fn collect_dependencies(
    project: &Project,
    targets: &mut IndexMap<String, TargetInfo>,
    binary: &HashSet<String>,
    accumulator: &str,
    pack_name: &str,
    visited: &mut HashSet<(String, String)>,
) -> anyhow::Result<()> {
    let pack = project.get(pack_name).expect("collected package exists");
    let mut dep_names: Vec<&String> = pack.dependencies.keys().collect();
    dep_names.sort();
    for dep_name in dep_names {
        let spec = &pack.dependencies[dep_name];
        if project.get(dep_name).is_none() {
            if spec.optional {
                continue;
            }
            return Err(PlanError::MissingDependency(
                dep_name.clone(),
                pack_name.to_string(),
            )
            .into());
        }
        if !visited.insert((accumulator.to_string(), dep_name.clone())) {
            continue;
        }

        if !binary.contains(dep_name.as_str()) {
            // absorbed: sources compile into the accumulating target
            let ti = targets.get_mut(accumulator).expect("accumulator exists");
            if !ti.packages.contains(dep_name) {
                ti.packages.push(dep_name.clone());
            }
            collect_dependencies(project, targets, binary, accumulator, dep_name, visited)?;
        } else {
            let dep_type = targets[dep_name.as_str()].build_settings.target_type;
            if dep_type == TargetType::Executable {
                continue;
            }
            {
                let ti = targets.get_mut(accumulator).expect("accumulator exists");
                if !ti.dependencies.contains(dep_name) {
                    ti.dependencies.push(dep_name.clone());
                }
                if !ti.link_dependencies.contains(dep_name) {
                    ti.link_dependencies.push(dep_name.clone());
                }
            }
            collect_dependencies(project, targets, binary, dep_name, dep_name, visited)?;
            if dep_type == TargetType::StaticLibrary {
                // a static library cannot carry its own dependencies, so the
                // dependent links them; they must stay behind the library in
                // link order
                let dep_links = targets[dep_name.as_str()].link_dependencies.clone();
                let ti = targets.get_mut(accumulator).expect("accumulator exists");
                ti.link_dependencies.retain(|d| !dep_links.contains(d));
                ti.link_dependencies.extend(dep_links);
            }
        }
    }
    Ok(())
}

/// Copy versions, debug versions and the inheritable option subset from every
/// dependent into its dependencies, root to leaves. No visited set: a target
/// inherits from all of its dependents.
fn inherit_downwards(targets: &mut IndexMap<String, TargetInfo>, name: &str) {
    let (versions, debug_versions, options, deps) = {
        let ti = &targets[name];
        (
            ti.build_settings.versions.clone(),
            ti.build_settings.debug_versions.clone(),
            ti.build_settings.options & BuildOptions::INHERITABLE,
            ti.dependencies.clone(),
        )
    };
    for dep in deps {
        {
            let dep_ti = targets.get_mut(dep.as_str()).expect("dep target exists");
            dep_ti.build_settings.add_versions(&versions);
            dep_ti.build_settings.add_debug_versions(&debug_versions);
            dep_ti.build_settings.options.insert(options);
        }
        inherit_downwards(targets, &dep);
    }
}

/// Fold every dependency's exported build settings into its dependents,
/// leaves to root, binary dependencies before absorbed packages. This is
/// what propagates transitive ABI-relevant flags to compilers.
fn inherit_upwards(
    targets: &mut IndexMap<String, TargetInfo>,
    name: &str,
    folded: &mut HashSet<String>,
) {
    if !folded.insert(name.to_string()) {
        return;
    }
    let deps = targets[name].dependencies.clone();
    for dep in &deps {
        inherit_upwards(targets, dep, folded);
    }
    let mut bs = targets[name].build_settings.clone();
    for dep in &deps {
        merge_from_dependency(&mut bs, &targets[dep.as_str()].build_settings);
    }
    let absorbed = targets[name].packages.clone();
    for pack in absorbed.iter().skip(1) {
        merge_from_absorbed(&mut bs, &targets[pack.as_str()].build_settings);
    }
    targets[name].build_settings = bs;
}

/// What a binary dependency exports to its dependents. Its own sources and
/// import files stay with its own build; only pre-built linker inputs of a
/// static library flow up, since the dependent does the linking.
fn merge_from_dependency(parent: &mut BuildSettings, child: &BuildSettings) {
    let mut contribution = BuildSettings {
        versions: child.versions.clone(),
        debug_versions: child.debug_versions.clone(),
        import_paths: child.import_paths.clone(),
        string_import_paths: child.string_import_paths.clone(),
        dflags: child.dflags.clone(),
        ..Default::default()
    };
    if matches!(
        child.target_type,
        TargetType::StaticLibrary | TargetType::Library
    ) {
        contribution.source_files = child
            .source_files
            .iter()
            .filter(|f| is_linker_file(f))
            .cloned()
            .collect();
        contribution.libs = child.libs.clone();
        contribution.lflags = child.lflags.clone();
    }
    parent.add(&contribution);
}

/// An absorbed package contributes everything: its sources are compiled as
/// part of the accumulating target.
fn merge_from_absorbed(parent: &mut BuildSettings, child: &BuildSettings) {
    let contribution = BuildSettings {
        source_files: child.source_files.clone(),
        import_files: child.import_files.clone(),
        string_import_files: child.string_import_files.clone(),
        copy_files: child.copy_files.clone(),
        versions: child.versions.clone(),
        debug_versions: child.debug_versions.clone(),
        import_paths: child.import_paths.clone(),
        string_import_paths: child.string_import_paths.clone(),
        dflags: child.dflags.clone(),
        lflags: child.lflags.clone(),
        libs: child.libs.clone(),
        ..Default::default()
    };
    parent.add(&contribution);
}

/// Let the root override string imports of its dependencies: a dependency
/// string-import file whose basename matches one of the root's is replaced
/// by the root's copy, and the root's string import paths take precedence.
fn override_string_imports(targets: &mut IndexMap<String, TargetInfo>, root_name: &str) {
    let root_bs = targets[root_name].build_settings.clone();
    for (name, ti) in targets.iter_mut() {
        if name == root_name || ti.build_settings.string_import_paths.is_empty() {
            continue;
        }
        for file in ti.build_settings.string_import_files.iter_mut() {
            let Some(basename) = file.file_name() else {
                continue;
            };
            if let Some(root_file) = root_bs
                .string_import_files
                .iter()
                .find(|rf| rf.file_name() == Some(basename))
            {
                *file = root_file.clone();
            }
        }
        let mut paths = root_bs.string_import_paths.clone();
        for p in std::mem::take(&mut ti.build_settings.string_import_paths) {
            if !paths.contains(&p) {
                paths.push(p);
            }
        }
        ti.build_settings.string_import_paths = paths;
    }
}

pub(crate) fn sanitize_version_ident(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use dubutil::compiler::Dmd;
    use dubutil::package::Dependency;
    use expect_test::expect;
    use semver::Version;

    pub(crate) fn test_settings() -> GeneratorSettings {
        GeneratorSettings {
            platform: BuildPlatform {
                platform: vec!["linux".into(), "posix".into()],
                architecture: vec!["x86_64".into()],
                compiler: "dmd".into(),
                compiler_binary: "dmd".into(),
                frontend_version: 2105,
            },
            compiler: Box::new(Dmd),
            config: String::new(),
            build_type: "debug".into(),
            build_mode: BuildMode::default(),
            combined: false,
            run: false,
            force: false,
            direct: false,
            rdmd: false,
            temp_build: false,
            parallel_build: false,
            watch: false,
            run_args: Vec::new(),
            compile_callback: None,
            link_callback: None,
            run_callback: None,
        }
    }

    pub(crate) fn executable_package(name: &str, deps: &[&str]) -> Package {
        let mut pack = library_package(name, deps);
        pack.settings.target_type = TargetType::Executable;
        pack.settings.main_source_file = Some(format!("/work/{}/source/app.d", name).into());
        pack
    }

    pub(crate) fn library_package(name: &str, deps: &[&str]) -> Package {
        Package {
            name: name.to_string(),
            version: Version::new(1, 0, 0),
            path: format!("/work/{}", name).into(),
            recipe_path: format!("/work/{}/dub.json", name).into(),
            dependencies: deps
                .iter()
                .map(|d| (d.to_string(), Dependency::default()))
                .collect(),
            settings: BuildSettings {
                source_files: vec![format!("/work/{}/source/{}.d", name, name).into()],
                import_paths: vec![format!("/work/{}/source", name).into()],
                ..Default::default()
            },
            configurations: IndexMap::new(),
        }
    }

    #[test]
    fn test_plan_library_dependency() {
        // root `app` depends on `libx` declared as a library
        let project = Project::new(
            "app".into(),
            vec![executable_package("app", &["libx"]), library_package("libx", &[])],
            None,
        )
        .unwrap();
        let (targets, _) = plan(&project, &test_settings()).unwrap();

        let app = &targets["app"];
        assert_eq!(app.build_settings.target_type, TargetType::Executable);
        assert_eq!(app.link_dependencies, vec!["libx"]);
        assert!(app.build_settings.versions.contains(&"Have_libx".into()));

        let libx = &targets["libx"];
        assert_eq!(libx.build_settings.target_type, TargetType::StaticLibrary);
        assert!(libx.build_settings.versions.contains(&"Have_libx".into()));
    }

    #[test]
    fn test_plan_source_library_absorbed() {
        let mut helper = library_package("helper", &[]);
        helper.settings.target_type = TargetType::SourceLibrary;
        let project = Project::new(
            "app".into(),
            vec![executable_package("app", &["helper"]), helper],
            None,
        )
        .unwrap();
        let (targets, _) = plan(&project, &test_settings()).unwrap();

        assert!(!targets.contains_key("helper"));
        let app = &targets["app"];
        assert_eq!(app.packages, vec!["app", "helper"]);
        assert!(app
            .build_settings
            .source_files
            .contains(&"/work/helper/source/helper.d".into()));
        assert!(app.build_settings.versions.contains(&"Have_helper".into()));
        assert!(app.link_dependencies.is_empty());
    }

    #[test]
    fn test_plan_dynamic_library_downgrade() {
        let mut plugin = library_package("plugin", &[]);
        plugin.settings.target_type = TargetType::DynamicLibrary;
        let project = Project::new(
            "app".into(),
            vec![executable_package("app", &["plugin"]), plugin],
            None,
        )
        .unwrap();
        let (targets, _) = plan(&project, &test_settings()).unwrap();

        let plugin = &targets["plugin"];
        assert_eq!(plugin.build_settings.target_type, TargetType::StaticLibrary);
        assert!(!plugin.build_settings.options.contains(BuildOptions::PIC));
    }

    #[test]
    fn test_plan_root_library_becomes_static() {
        let project =
            Project::new("libx".into(), vec![library_package("libx", &[])], None).unwrap();
        let (targets, _) = plan(&project, &test_settings()).unwrap();
        assert_eq!(
            targets["libx"].build_settings.target_type,
            TargetType::StaticLibrary
        );
    }

    #[test]
    fn test_plan_root_without_sources_fails() {
        let mut pack = library_package("app", &[]);
        pack.settings.source_files.clear();
        let project = Project::new("app".into(), vec![pack], None).unwrap();
        let err = plan(&project, &test_settings()).unwrap_err();
        assert!(err.to_string().contains("nothing to build"));
    }

    #[test]
    fn test_plan_link_order_is_topological() {
        // app -> libb -> libc, app -> liba -> libc: libc must come last
        let project = Project::new(
            "app".into(),
            vec![
                executable_package("app", &["libb", "liba"]),
                library_package("liba", &["libc"]),
                library_package("libb", &["libc"]),
                library_package("libc", &[]),
            ],
            None,
        )
        .unwrap();
        let (targets, _) = plan(&project, &test_settings()).unwrap();
        expect![[r#"
            [
                "liba",
                "libb",
                "libc",
            ]
        "#]]
        .assert_debug_eq(&targets["app"].link_dependencies);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let mk = || {
            Project::new(
                "app".into(),
                vec![
                    executable_package("app", &["libz", "liba", "libm"]),
                    library_package("liba", &[]),
                    library_package("libm", &["liba"]),
                    library_package("libz", &["libm", "liba"]),
                ],
                None,
            )
            .unwrap()
        };
        let (a, _) = plan(&mk(), &test_settings()).unwrap();
        let (b, _) = plan(&mk(), &test_settings()).unwrap();
        let keys_a: Vec<&String> = a.keys().collect();
        let keys_b: Vec<&String> = b.keys().collect();
        assert_eq!(keys_a, keys_b);
        for (name, ti) in &a {
            assert_eq!(ti.dependencies, b[name].dependencies);
            assert_eq!(ti.link_dependencies, b[name].link_dependencies);
        }
    }

    #[test]
    fn test_downward_inheritance_of_versions_and_options() {
        let mut app = executable_package("app", &["libx"]);
        app.settings.versions = vec!["AppFeature".into()];
        app.settings.options = BuildOptions::COVERAGE | BuildOptions::INLINE;
        let project = Project::new(
            "app".into(),
            vec![app, library_package("libx", &[])],
            None,
        )
        .unwrap();
        let (targets, _) = plan(&project, &test_settings()).unwrap();
        let libx = &targets["libx"];
        assert!(libx.build_settings.versions.contains(&"AppFeature".into()));
        assert!(libx.build_settings.options.contains(BuildOptions::COVERAGE));
        // INLINE is not ABI relevant and stays with the root
        assert!(!libx.build_settings.options.contains(BuildOptions::INLINE));
    }

    #[test]
    fn test_upward_inheritance_of_import_paths() {
        let project = Project::new(
            "app".into(),
            vec![
                executable_package("app", &["libx"]),
                library_package("libx", &[]),
            ],
            None,
        )
        .unwrap();
        let (targets, _) = plan(&project, &test_settings()).unwrap();
        assert!(targets["app"]
            .build_settings
            .import_paths
            .contains(&"/work/libx/source".into()));
    }

    #[test]
    fn test_version_ident_synthesis_is_unique() {
        let project = Project::new(
            "app".into(),
            vec![
                executable_package("app", &["lib-x"]),
                library_package("lib-x", &[]),
            ],
            None,
        )
        .unwrap();
        let (targets, _) = plan(&project, &test_settings()).unwrap();
        let versions = &targets["app"].build_settings.versions;
        assert_eq!(
            versions.iter().filter(|v| *v == "Have_lib_x").count(),
            1
        );
    }

    #[test]
    fn test_string_import_override() {
        let mut app = executable_package("app", &["libx"]);
        app.settings.string_import_paths = vec!["/work/app/views".into()];
        app.settings.string_import_files = vec!["/work/app/views/banner.txt".into()];
        let mut libx = library_package("libx", &[]);
        libx.settings.string_import_paths = vec!["/work/libx/views".into()];
        libx.settings.string_import_files = vec!["/work/libx/views/banner.txt".into()];
        let project = Project::new("app".into(), vec![app, libx], None).unwrap();
        let (targets, _) = plan(&project, &test_settings()).unwrap();
        let libx = &targets["libx"];
        assert!(libx
            .build_settings
            .string_import_files
            .contains(&"/work/app/views/banner.txt".into()));
        assert_eq!(
            libx.build_settings.string_import_paths.first(),
            Some(&"/work/app/views".into())
        );
    }

    #[test]
    fn test_main_source_file_removed_from_library_target() {
        let mut libx = library_package("libx", &[]);
        libx.settings.main_source_file = Some("/work/libx/source/main.d".into());
        libx.settings
            .source_files
            .push("/work/libx/source/main.d".into());
        let project = Project::new(
            "app".into(),
            vec![executable_package("app", &["libx"]), libx],
            None,
        )
        .unwrap();
        let (targets, mains) = plan(&project, &test_settings()).unwrap();
        assert!(mains.contains(&"/work/libx/source/main.d".into()));
        assert!(!targets["libx"]
            .build_settings
            .source_files
            .contains(&"/work/libx/source/main.d".into()));
    }

    #[test]
    fn test_create_generator_dispatch() {
        assert_eq!(create_generator("build").unwrap(), GeneratorKind::Build);
        assert!(create_generator("visuald")
            .unwrap_err()
            .to_string()
            .contains("external backend"));
        assert!(create_generator("ninja").is_err());
    }

    #[test]
    fn test_sanitize_version_ident() {
        assert_eq!(sanitize_version_ident("vibe-d"), "vibe_d");
        assert_eq!(sanitize_version_ident("my/sub:pkg"), "my_sub_pkg");
        assert_eq!(sanitize_version_ident("plain"), "plain");
    }
}
