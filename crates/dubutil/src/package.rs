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

use anyhow::{bail, Context};
use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use semver::{Version, VersionReq};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::settings::{BuildSettings, TargetType};

/// A dependency specification as written in the package recipe.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Dependency {
    pub req: VersionReq,
    pub optional: bool,
}

impl Default for Dependency {
    fn default() -> Self {
        Dependency {
            req: VersionReq::STAR,
            optional: false,
        }
    }
}

/// One resolved package. Produced by the external resolver and read-only to
/// the build core.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub name: String,
    pub version: Version,
    /// Absolute fs path to the root directory of the package.
    pub path: PathBuf,
    /// The recipe file the resolver read this package from. An mtime input
    /// of every build the package participates in.
    pub recipe_path: PathBuf,
    #[serde(default)]
    pub dependencies: IndexMap<String, Dependency>,
    /// Configuration-independent base settings.
    #[serde(default)]
    pub settings: BuildSettings,
    /// Per-configuration overlays, merged on top of the base settings.
    #[serde(default)]
    pub configurations: IndexMap<String, BuildSettings>,
}

impl Package {
    /// Produce the merged build settings for one configuration.
    pub fn build_settings(&self, config: &str) -> BuildSettings {
        let mut bs = self.settings.clone();
        if let Some(overlay) = self.configurations.get(config) {
            if overlay.target_type != TargetType::Autodetect {
                bs.target_type = overlay.target_type;
            }
            if !overlay.target_name.is_empty() {
                bs.target_name = overlay.target_name.clone();
            }
            if !overlay.target_path.as_os_str().is_empty() {
                bs.target_path = overlay.target_path.clone();
            }
            if overlay.main_source_file.is_some() {
                bs.main_source_file = overlay.main_source_file.clone();
            }
            bs.add(overlay);
        }
        if bs.target_name.is_empty() {
            bs.target_name = self.name.replace(['/', ':'], "_");
        }
        bs
    }

    pub fn default_configuration(&self) -> String {
        if let Some(name) = self.configurations.keys().next() {
            return name.clone();
        }
        let app_like = self.settings.target_type == TargetType::Executable
            || self.settings.main_source_file.is_some();
        if app_like { "application" } else { "library" }.to_string()
    }
}

/// The resolved dependency graph the core operates on. Presence in
/// `packages` means the resolver selected the package; an optional
/// dependency that was not selected simply has no entry.
#[derive(Debug, Clone)]
pub struct Project {
    root: String,
    packages: IndexMap<String, Package>,
    /// The selected-versions manifest, an mtime input of the root target.
    pub selections_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectDesc {
    root: String,
    packages: Vec<Package>,
    #[serde(default)]
    selections_path: Option<PathBuf>,
}

impl Project {
    pub fn new(
        root: String,
        packages: Vec<Package>,
        selections_path: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let mut map = IndexMap::new();
        for pack in packages {
            if map.insert(pack.name.clone(), pack).is_some() {
                bail!("duplicate package in resolved graph");
            }
        }
        if !map.contains_key(&root) {
            bail!("root package `{}` is not part of the resolved graph", root);
        }
        Ok(Project {
            root,
            packages: map,
            selections_path,
        })
    }

    pub fn root_package(&self) -> &Package {
        &self.packages[&self.root]
    }

    pub fn root_name(&self) -> &str {
        &self.root
    }

    pub fn get(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    pub fn packages(&self) -> &IndexMap<String, Package> {
        &self.packages
    }

    /// All packages in topological order, roots first. A non-optional
    /// dependency missing from the resolved set is an error; the resolver
    /// guarantees acyclicity but the guard must still exist.
    pub fn topological_order(&self) -> anyhow::Result<Vec<&Package>> {
        let mut graph: DiGraph<String, usize> = DiGraph::new();
        let mut nodes: IndexMap<&str, NodeIndex> = IndexMap::new();
        for name in self.packages.keys() {
            nodes.insert(name, graph.add_node(name.clone()));
        }
        for (name, pack) in &self.packages {
            for (dep_name, dep) in &pack.dependencies {
                match nodes.get(dep_name.as_str()) {
                    Some(&dep_node) => {
                        graph.add_edge(nodes[name.as_str()], dep_node, 0);
                    }
                    None if dep.optional => {}
                    None => bail!(
                        "dependency `{}` of package `{}` is missing from the resolved graph",
                        dep_name,
                        name
                    ),
                }
            }
        }
        match petgraph::algo::toposort(&graph, None) {
            Ok(order) => Ok(order
                .into_iter()
                .map(|n| &self.packages[graph[n].as_str()])
                .collect()),
            Err(cycle) => {
                let chain = find_cycle(&graph, cycle.node_id());
                bail!("dependency cycle detected: {}", chain.join(" -> "))
            }
        }
    }
}

// the parent of each node in the spanning tree, used to walk a found back
// edge back to the cycle entry
fn find_cycle(graph: &DiGraph<String, usize>, start: NodeIndex) -> Vec<String> {
    let mut spanning_tree = vec![NodeIndex::default(); graph.capacity().0];
    let res = petgraph::visit::depth_first_search(&graph, [start], |ev| match ev {
        petgraph::visit::DfsEvent::TreeEdge(parent, n) => {
            spanning_tree[n.index()] = parent;
            petgraph::visit::Control::Continue
        }
        petgraph::visit::DfsEvent::BackEdge(u, v) if v == start => {
            petgraph::visit::Control::Break(u)
        }
        _ => petgraph::visit::Control::Continue,
    });
    let mut cycle = vec![start];
    if let Some(mut curr) = res.break_value() {
        loop {
            cycle.push(curr);
            if curr == start {
                break;
            }
            curr = spanning_tree[curr.index()];
        }
    }
    cycle.reverse();
    cycle.into_iter().map(|n| graph[n].clone()).collect()
}

/// Read a resolved project description, the narrow interface between the
/// external resolver and this core.
pub fn read_project_description(path: &Path) -> anyhow::Result<Project> {
    let file =
        File::open(path).with_context(|| format!("failed to open `{}`", path.display()))?;
    let desc: ProjectDesc = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse `{}`", path.display()))?;
    Project::new(desc.root, desc.packages, desc.selections_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn mk_package(name: &str, deps: &[&str]) -> Package {
        Package {
            name: name.to_string(),
            version: Version::new(1, 0, 0),
            path: PathBuf::from(format!("/work/{}", name)),
            recipe_path: PathBuf::from(format!("/work/{}/dub.json", name)),
            dependencies: deps
                .iter()
                .map(|d| (d.to_string(), Dependency::default()))
                .collect(),
            settings: BuildSettings::default(),
            configurations: IndexMap::new(),
        }
    }

    #[test]
    fn test_topological_order_roots_first() {
        let project = Project::new(
            "app".into(),
            vec![
                mk_package("libx", &["libz"]),
                mk_package("app", &["libx", "liby"]),
                mk_package("liby", &[]),
                mk_package("libz", &[]),
            ],
            None,
        )
        .unwrap();
        let order: Vec<&str> = project
            .topological_order()
            .unwrap()
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        let pos = |n: &str| order.iter().position(|x| *x == n).unwrap();
        assert!(pos("app") < pos("libx"));
        assert!(pos("app") < pos("liby"));
        assert!(pos("libx") < pos("libz"));
    }

    #[test]
    fn test_missing_non_optional_dependency_fails() {
        let project = Project::new("app".into(), vec![mk_package("app", &["gone"])], None).unwrap();
        let err = project.topological_order().unwrap_err();
        assert!(err.to_string().contains("`gone`"));
    }

    #[test]
    fn test_missing_optional_dependency_is_skipped() {
        let mut app = mk_package("app", &[]);
        app.dependencies.insert(
            "extra".into(),
            Dependency {
                req: VersionReq::STAR,
                optional: true,
            },
        );
        let project = Project::new("app".into(), vec![app], None).unwrap();
        assert_eq!(project.topological_order().unwrap().len(), 1);
    }

    #[test]
    fn test_cycle_is_reported() {
        let project = Project::new(
            "a".into(),
            vec![mk_package("a", &["b"]), mk_package("b", &["a"])],
            None,
        )
        .unwrap();
        let err = project.topological_order().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_build_settings_overlay() {
        let mut pack = mk_package("app", &[]);
        pack.settings.versions = vec!["Base".into()];
        pack.configurations.insert(
            "unittest".into(),
            BuildSettings {
                target_type: TargetType::Executable,
                versions: vec!["TestConfig".into()],
                ..Default::default()
            },
        );
        let bs = pack.build_settings("unittest");
        assert_eq!(bs.target_type, TargetType::Executable);
        assert_eq!(bs.versions, vec!["Base", "TestConfig"]);
        assert_eq!(bs.target_name, "app");
    }
}
