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

use serde::{Deserialize, Serialize};

/// The platform tuple a build is planned and keyed against: platform tags,
/// architecture tags, compiler id, compiler binary and frontend version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildPlatform {
    pub platform: Vec<String>,
    pub architecture: Vec<String>,
    pub compiler: String,
    pub compiler_binary: String,
    pub frontend_version: u32,
}

impl BuildPlatform {
    /// The host platform for a given compiler selection.
    pub fn host(compiler: &str, compiler_binary: &str, frontend_version: u32) -> Self {
        let mut platform = vec![std::env::consts::OS.to_string()];
        if cfg!(unix) {
            platform.push("posix".to_string());
        }
        // "macos" is spelled "osx" in recipe platform specifications
        if let Some(p) = platform.iter_mut().find(|p| *p == "macos") {
            *p = "osx".to_string();
        }
        BuildPlatform {
            platform,
            architecture: vec![std::env::consts::ARCH.to_string()],
            compiler: compiler.to_string(),
            compiler_binary: compiler_binary.to_string(),
            frontend_version,
        }
    }

    pub fn is_windows(&self) -> bool {
        self.platform.iter().any(|p| p == "windows")
    }

    pub fn is_osx(&self) -> bool {
        self.platform.iter().any(|p| p == "osx")
    }

    pub fn exe_suffix(&self) -> &'static str {
        if self.is_windows() {
            ".exe"
        } else {
            ""
        }
    }

    pub fn obj_suffix(&self) -> &'static str {
        if self.is_windows() {
            ".obj"
        } else {
            ".o"
        }
    }

    pub fn dynlib_suffix(&self) -> &'static str {
        if self.is_windows() {
            ".dll"
        } else if self.is_osx() {
            ".dylib"
        } else {
            ".so"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux(compiler: &str) -> BuildPlatform {
        BuildPlatform {
            platform: vec!["linux".into(), "posix".into()],
            architecture: vec!["x86_64".into()],
            compiler: compiler.into(),
            compiler_binary: compiler.into(),
            frontend_version: 2105,
        }
    }

    #[test]
    fn test_suffixes() {
        let p = linux("dmd");
        assert_eq!(p.exe_suffix(), "");
        assert_eq!(p.obj_suffix(), ".o");
        assert_eq!(p.dynlib_suffix(), ".so");

        let w = BuildPlatform {
            platform: vec!["windows".into()],
            ..linux("dmd")
        };
        assert_eq!(w.exe_suffix(), ".exe");
        assert_eq!(w.obj_suffix(), ".obj");
        assert_eq!(w.dynlib_suffix(), ".dll");
    }
}
