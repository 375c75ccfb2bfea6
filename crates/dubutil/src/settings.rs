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
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What kind of artifact a target produces.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum TargetType {
    #[default]
    Autodetect,
    None,
    Executable,
    Library,
    StaticLibrary,
    DynamicLibrary,
    SourceLibrary,
    Object,
}

impl TargetType {
    pub fn to_str(self) -> &'static str {
        match self {
            Self::Autodetect => "autodetect",
            Self::None => "none",
            Self::Executable => "executable",
            Self::Library => "library",
            Self::StaticLibrary => "staticLibrary",
            Self::DynamicLibrary => "dynamicLibrary",
            Self::SourceLibrary => "sourceLibrary",
            Self::Object => "object",
        }
    }

    /// A binary target makes the compiler emit a linked artifact.
    pub fn is_binary(self) -> bool {
        !matches!(self, Self::SourceLibrary | Self::None)
    }
}

/// Structured compile/link switches, kept as a bitmask so that settings can be
/// merged, inherited along dependency edges and reverse-extracted from dflags.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Default, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct BuildOptions(u32);

impl BuildOptions {
    pub const NONE: BuildOptions = BuildOptions(0);
    pub const DEBUG_MODE: BuildOptions = BuildOptions(1 << 0);
    pub const RELEASE_MODE: BuildOptions = BuildOptions(1 << 1);
    pub const COVERAGE: BuildOptions = BuildOptions(1 << 2);
    pub const DEBUG_INFO: BuildOptions = BuildOptions(1 << 3);
    pub const INLINE: BuildOptions = BuildOptions(1 << 4);
    pub const NO_BOUNDS_CHECK: BuildOptions = BuildOptions(1 << 5);
    pub const OPTIMIZE: BuildOptions = BuildOptions(1 << 6);
    pub const PROFILE: BuildOptions = BuildOptions(1 << 7);
    pub const UNITTESTS: BuildOptions = BuildOptions(1 << 8);
    pub const SYNTAX_ONLY: BuildOptions = BuildOptions(1 << 9);
    pub const WARNINGS_AS_ERRORS: BuildOptions = BuildOptions(1 << 10);
    pub const STACK_STOMPING: BuildOptions = BuildOptions(1 << 11);
    pub const LOW_MEM: BuildOptions = BuildOptions(1 << 12);
    pub const PIC: BuildOptions = BuildOptions(1 << 13);

    /// Options that must agree between a target and the targets linked into
    /// it (ABI and instrumentation relevant), so they flow root -> leaves.
    pub const INHERITABLE: BuildOptions = BuildOptions(
        Self::DEBUG_MODE.0
            | Self::RELEASE_MODE.0
            | Self::COVERAGE.0
            | Self::DEBUG_INFO.0
            | Self::UNITTESTS.0
            | Self::PROFILE.0
            | Self::STACK_STOMPING.0
            | Self::SYNTAX_ONLY.0
            | Self::PIC.0,
    );

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: BuildOptions) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: BuildOptions) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: BuildOptions) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: BuildOptions) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for BuildOptions {
    type Output = BuildOptions;
    fn bitor(self, rhs: BuildOptions) -> BuildOptions {
        BuildOptions(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for BuildOptions {
    fn bitor_assign(&mut self, rhs: BuildOptions) {
        self.0 |= rhs.0;
    }
}

impl std::ops::BitAnd for BuildOptions {
    type Output = BuildOptions;
    fn bitand(self, rhs: BuildOptions) -> BuildOptions {
        BuildOptions(self.0 & rhs.0)
    }
}

/// The merged, mutable bag of compile/link inputs for one target.
///
/// Planning copies these around freely; nothing here aliases the originating
/// package, so post-build mutation cannot leak back into plan state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildSettings {
    pub target_type: TargetType,
    pub target_path: PathBuf,
    pub target_name: String,
    pub working_directory: PathBuf,
    pub main_source_file: Option<PathBuf>,
    pub source_files: Vec<PathBuf>,
    pub import_files: Vec<PathBuf>,
    pub string_import_files: Vec<PathBuf>,
    pub copy_files: Vec<String>,
    pub versions: Vec<String>,
    pub debug_versions: Vec<String>,
    pub import_paths: Vec<PathBuf>,
    pub string_import_paths: Vec<PathBuf>,
    pub dflags: Vec<String>,
    pub lflags: Vec<String>,
    pub libs: Vec<String>,
    pub pre_generate_commands: Vec<String>,
    pub post_generate_commands: Vec<String>,
    pub pre_build_commands: Vec<String>,
    pub post_build_commands: Vec<String>,
    pub options: BuildOptions,
}

fn add_unique<T: PartialEq + Clone>(dst: &mut Vec<T>, src: &[T]) {
    for item in src {
        if !dst.contains(item) {
            dst.push(item.clone());
        }
    }
}

impl BuildSettings {
    /// Fold another settings bag into this one. Versions, paths and libraries
    /// are deduplicated; raw flag lists and commands are appended as-is.
    pub fn add(&mut self, other: &BuildSettings) {
        add_unique(&mut self.source_files, &other.source_files);
        add_unique(&mut self.import_files, &other.import_files);
        add_unique(&mut self.string_import_files, &other.string_import_files);
        add_unique(&mut self.versions, &other.versions);
        add_unique(&mut self.debug_versions, &other.debug_versions);
        add_unique(&mut self.import_paths, &other.import_paths);
        add_unique(&mut self.string_import_paths, &other.string_import_paths);
        add_unique(&mut self.libs, &other.libs);
        self.copy_files.extend(other.copy_files.iter().cloned());
        self.dflags.extend(other.dflags.iter().cloned());
        self.lflags.extend(other.lflags.iter().cloned());
        self.pre_generate_commands
            .extend(other.pre_generate_commands.iter().cloned());
        self.post_generate_commands
            .extend(other.post_generate_commands.iter().cloned());
        self.pre_build_commands
            .extend(other.pre_build_commands.iter().cloned());
        self.post_build_commands
            .extend(other.post_build_commands.iter().cloned());
        self.options.insert(other.options);
    }

    /// The upward-inheritance subset: everything a dependent needs to compile
    /// and link against this target, but none of its build inputs.
    pub fn add_exported(&mut self, other: &BuildSettings) {
        add_unique(&mut self.versions, &other.versions);
        add_unique(&mut self.debug_versions, &other.debug_versions);
        add_unique(&mut self.import_paths, &other.import_paths);
        add_unique(&mut self.string_import_paths, &other.string_import_paths);
        add_unique(&mut self.libs, &other.libs);
        self.dflags.extend(other.dflags.iter().cloned());
        self.lflags.extend(other.lflags.iter().cloned());
    }

    pub fn add_versions(&mut self, versions: &[String]) {
        add_unique(&mut self.versions, versions);
    }

    pub fn add_debug_versions(&mut self, versions: &[String]) {
        add_unique(&mut self.debug_versions, versions);
    }

    pub fn add_dflags<I, S>(&mut self, flags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dflags.extend(flags.into_iter().map(Into::into));
    }

    /// Drop everything except the target identity. Used when a target is
    /// demoted to `none` because no sources are left.
    pub fn reset(&mut self) {
        let target_type = self.target_type;
        let target_path = std::mem::take(&mut self.target_path);
        let target_name = std::mem::take(&mut self.target_name);
        *self = BuildSettings {
            target_type,
            target_path,
            target_name,
            ..Default::default()
        };
    }
}

/// A pre-built artifact that is handed to the linker as-is rather than
/// compiled.
pub fn is_linker_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("o" | "obj" | "a" | "lib" | "so" | "dylib" | "res")
    )
}

/// Expand `$VAR` / `${VAR}` build variables in a string. Unknown variables
/// are left untouched so that environment references survive into hook
/// commands.
pub fn expand_vars(input: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices();
    while let Some((idx, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let rest = &input[idx + 1..];
        let (name, consumed) = if let Some(stripped) = rest.strip_prefix('{') {
            match stripped.find('}') {
                Some(end) => (&stripped[..end], end + 2),
                None => (rest, 0),
            }
        } else {
            let end = rest
                .find(|ch: char| !ch.is_ascii_alphanumeric() && ch != '_')
                .unwrap_or(rest.len());
            (&rest[..end], end)
        };
        match lookup(name) {
            Some(value) if consumed > 0 => {
                out.push_str(&value);
                for _ in 0..consumed {
                    chars.next();
                }
            }
            _ => out.push(c),
        }
    }
    out
}

impl BuildSettings {
    /// Expand build variables in every path- and command-carrying field.
    pub fn expand_build_variables(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        let expand_path = |p: &mut PathBuf| {
            let s = p.to_string_lossy();
            let expanded = expand_vars(&s, lookup);
            if expanded != s {
                *p = PathBuf::from(expanded);
            }
        };
        let expand_strings = |v: &mut Vec<String>| {
            for s in v.iter_mut() {
                *s = expand_vars(s, lookup);
            }
        };
        let expand_paths = |v: &mut Vec<PathBuf>| {
            for p in v.iter_mut() {
                expand_path(p);
            }
        };
        expand_path(&mut self.target_path);
        expand_path(&mut self.working_directory);
        if let Some(main) = self.main_source_file.as_mut() {
            expand_path(main);
        }
        expand_paths(&mut self.source_files);
        expand_paths(&mut self.import_files);
        expand_paths(&mut self.string_import_files);
        expand_paths(&mut self.import_paths);
        expand_paths(&mut self.string_import_paths);
        expand_strings(&mut self.copy_files);
        expand_strings(&mut self.dflags);
        expand_strings(&mut self.lflags);
        expand_strings(&mut self.pre_generate_commands);
        expand_strings(&mut self.post_generate_commands);
        expand_strings(&mut self.pre_build_commands);
        expand_strings(&mut self.post_build_commands);
    }
}

/// Fold the option set of a named build type into the settings.
pub fn add_build_type_settings(bs: &mut BuildSettings, build_type: &str) -> anyhow::Result<()> {
    use BuildOptions as O;
    let options = match build_type {
        "plain" => O::NONE,
        "debug" => O::DEBUG_MODE | O::DEBUG_INFO,
        "release" => O::RELEASE_MODE | O::OPTIMIZE | O::INLINE,
        "release-debug" => O::RELEASE_MODE | O::OPTIMIZE | O::INLINE | O::DEBUG_INFO,
        "release-nobounds" => O::RELEASE_MODE | O::OPTIMIZE | O::INLINE | O::NO_BOUNDS_CHECK,
        "unittest" => O::UNITTESTS | O::DEBUG_MODE | O::DEBUG_INFO,
        "profile" => O::PROFILE | O::OPTIMIZE | O::INLINE | O::DEBUG_INFO,
        "cov" => O::COVERAGE | O::DEBUG_INFO,
        "unittest-cov" => O::UNITTESTS | O::COVERAGE | O::DEBUG_MODE | O::DEBUG_INFO,
        "syntax" => O::SYNTAX_ONLY,
        other => bail!("unknown build type `{}`", other),
    };
    bs.options.insert(options);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_dedups_versions_but_appends_flags() {
        let mut a = BuildSettings {
            versions: vec!["Have_foo".into()],
            dflags: vec!["-w".into()],
            ..Default::default()
        };
        let b = BuildSettings {
            versions: vec!["Have_foo".into(), "Have_bar".into()],
            dflags: vec!["-w".into()],
            ..Default::default()
        };
        a.add(&b);
        assert_eq!(a.versions, vec!["Have_foo", "Have_bar"]);
        assert_eq!(a.dflags, vec!["-w", "-w"]);
    }

    #[test]
    fn test_options_inheritable_subset() {
        let mut opts = BuildOptions::RELEASE_MODE | BuildOptions::INLINE | BuildOptions::PIC;
        opts = opts & BuildOptions::INHERITABLE;
        assert!(opts.contains(BuildOptions::RELEASE_MODE));
        assert!(opts.contains(BuildOptions::PIC));
        assert!(!opts.contains(BuildOptions::INLINE));
    }

    #[test]
    fn test_expand_vars() {
        let lookup = |name: &str| match name {
            "PACKAGE_DIR" => Some("/work/pkg".to_string()),
            _ => None,
        };
        assert_eq!(
            expand_vars("$PACKAGE_DIR/source", &lookup),
            "/work/pkg/source"
        );
        assert_eq!(
            expand_vars("${PACKAGE_DIR}/gen", &lookup),
            "/work/pkg/gen"
        );
        assert_eq!(expand_vars("echo $HOME", &lookup), "echo $HOME");
        assert_eq!(expand_vars("no dollars", &lookup), "no dollars");
    }

    #[test]
    fn test_linker_file_classification() {
        assert!(is_linker_file(Path::new("libfoo.a")));
        assert!(is_linker_file(Path::new("x.o")));
        assert!(is_linker_file(Path::new("r.res")));
        assert!(!is_linker_file(Path::new("app.d")));
        assert!(!is_linker_file(Path::new("README")));
    }

    #[test]
    fn test_build_type_settings() {
        let mut bs = BuildSettings::default();
        add_build_type_settings(&mut bs, "unittest-cov").unwrap();
        assert!(bs.options.contains(BuildOptions::UNITTESTS));
        assert!(bs.options.contains(BuildOptions::COVERAGE));
        assert!(add_build_type_settings(&mut bs, "bogus").is_err());
    }
}
