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

use sha2::{Digest, Sha256};

use crate::platform::BuildPlatform;
use crate::settings::BuildSettings;

/// A 16-character hexadecimal digest of the given byte chunks. Chunks are
/// NUL-separated so that ["ab","c"] and ["a","bc"] hash differently.
pub fn short_digest<I, B>(chunks: I) -> String
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update(chunk.as_ref());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Derive the cache directory name for one planned target.
///
/// Only the settings that affect the compiler's emitted bytes feed the key;
/// source and import file contents are covered by the mtime-based up-to-date
/// check instead.
pub fn build_id(
    config: &str,
    build_type: &str,
    platform: &BuildPlatform,
    bs: &BuildSettings,
) -> String {
    let mut chunks: Vec<String> = Vec::new();
    chunks.extend(bs.versions.iter().cloned());
    chunks.extend(bs.debug_versions.iter().cloned());
    chunks.extend(bs.dflags.iter().cloned());
    chunks.extend(bs.lflags.iter().cloned());
    chunks.push(bs.options.bits().to_string());
    chunks.extend(
        bs.string_import_paths
            .iter()
            .map(|p| p.display().to_string()),
    );
    let hash = short_digest(&chunks);
    format!(
        "{}-{}-{}-{}-{}_{}-{}",
        config,
        build_type,
        platform.platform.join("."),
        platform.architecture.join("."),
        platform.compiler,
        platform.frontend_version,
        hash
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform() -> BuildPlatform {
        BuildPlatform {
            platform: vec!["linux".into(), "posix".into()],
            architecture: vec!["x86_64".into()],
            compiler: "dmd".into(),
            compiler_binary: "dmd".into(),
            frontend_version: 2105,
        }
    }

    #[test]
    fn test_build_id_is_stable() {
        let bs = BuildSettings {
            versions: vec!["Have_foo".into()],
            dflags: vec!["-w".into()],
            ..Default::default()
        };
        let a = build_id("application", "debug", &platform(), &bs);
        let b = build_id("application", "debug", &platform(), &bs);
        assert_eq!(a, b);
        assert!(a.starts_with("application-debug-linux.posix-x86_64-dmd_2105-"));
    }

    #[test]
    fn test_build_id_changes_with_any_component() {
        let bs = BuildSettings::default();
        let base = build_id("application", "debug", &platform(), &bs);

        let mut other = bs.clone();
        other.versions.push("Have_foo".into());
        assert_ne!(base, build_id("application", "debug", &platform(), &other));

        let mut other = bs.clone();
        other.options.insert(crate::settings::BuildOptions::PIC);
        assert_ne!(base, build_id("application", "debug", &platform(), &other));

        assert_ne!(base, build_id("application", "release", &platform(), &bs));
    }

    #[test]
    fn test_chunk_boundaries_matter() {
        assert_ne!(short_digest(["ab", "c"]), short_digest(["a", "bc"]));
    }
}
