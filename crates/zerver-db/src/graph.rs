//! Dependency graph over migration units.
//!
//! Dependencies that name a migration known to the graph become edges.
//! Anything else is an external prerequisite: prior history shipped by an
//! earlier release, which has to be recorded as applied before its
//! dependants can run.

use std::collections::{BTreeMap, BTreeSet};

use zerver_common::{Error, MigrationKey, Result};

use crate::migration::Migration;

#[derive(Debug, Default)]
pub struct MigrationGraph {
    nodes: BTreeMap<MigrationKey, Migration>,
    parents: BTreeMap<MigrationKey, BTreeSet<MigrationKey>>,
    children: BTreeMap<MigrationKey, BTreeSet<MigrationKey>>,
    external: BTreeMap<MigrationKey, BTreeSet<MigrationKey>>,
}

impl MigrationGraph {
    pub fn build(migrations: impl IntoIterator<Item = Migration>) -> Result<Self> {
        let mut graph = Self::default();

        for migration in migrations {
            let key = migration.key();
            if graph.nodes.contains_key(&key) {
                return Err(Error::InconsistentHistory(format!(
                    "migration {key} is declared twice"
                )));
            }
            graph.parents.insert(key.clone(), BTreeSet::new());
            graph.children.insert(key.clone(), BTreeSet::new());
            graph.external.insert(key.clone(), BTreeSet::new());
            graph.nodes.insert(key, migration);
        }

        for (key, migration) in &graph.nodes {
            for dependency in &migration.dependencies {
                if graph.nodes.contains_key(dependency) {
                    graph
                        .parents
                        .entry(key.clone())
                        .or_default()
                        .insert(dependency.clone());
                    graph
                        .children
                        .entry(dependency.clone())
                        .or_default()
                        .insert(key.clone());
                } else {
                    graph
                        .external
                        .entry(key.clone())
                        .or_default()
                        .insert(dependency.clone());
                }
            }
        }

        graph.validate_acyclic()?;
        graph.validate_linear()?;
        Ok(graph)
    }

    fn validate_acyclic(&self) -> Result<()> {
        let mut done = BTreeSet::new();
        for key in self.nodes.keys() {
            let mut stack = Vec::new();
            self.visit_for_cycles(key, &mut stack, &mut done)?;
        }
        Ok(())
    }

    fn visit_for_cycles<'a>(
        &'a self,
        key: &'a MigrationKey,
        stack: &mut Vec<&'a MigrationKey>,
        done: &mut BTreeSet<&'a MigrationKey>,
    ) -> Result<()> {
        if done.contains(key) {
            return Ok(());
        }
        if let Some(start) = stack.iter().position(|k| *k == key) {
            let cycle: Vec<String> = stack[start..]
                .iter()
                .chain(std::iter::once(&key))
                .map(|k| k.to_string())
                .collect();
            return Err(Error::CircularDependency(cycle.join(" -> ")));
        }

        stack.push(key);
        for parent in self.parents_of(key) {
            self.visit_for_cycles(parent, stack, done)?;
        }
        stack.pop();
        done.insert(key);
        Ok(())
    }

    /// History must not fork: within one namespace, no two units may follow
    /// the same predecessor.
    fn validate_linear(&self) -> Result<()> {
        let mut followers: BTreeMap<&MigrationKey, &MigrationKey> = BTreeMap::new();
        for (key, migration) in &self.nodes {
            for dependency in &migration.dependencies {
                if dependency.app_label != key.app_label {
                    continue;
                }
                if let Some(other) = followers.insert(dependency, key) {
                    return Err(Error::InconsistentHistory(format!(
                        "conflicting migrations in {}: {} and {} both follow {}",
                        key.app_label, other.name, key.name, dependency.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn contains(&self, key: &MigrationKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn node(&self, key: &MigrationKey) -> Result<&Migration> {
        self.nodes
            .get(key)
            .ok_or_else(|| Error::NodeNotFound(key.to_string()))
    }

    pub fn migrations(&self) -> impl Iterator<Item = &Migration> {
        self.nodes.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &MigrationKey> {
        self.nodes.keys()
    }

    pub fn apps(&self) -> BTreeSet<&str> {
        self.nodes.keys().map(|k| k.app_label.as_str()).collect()
    }

    pub fn parents_of(&self, key: &MigrationKey) -> impl Iterator<Item = &MigrationKey> {
        self.parents.get(key).into_iter().flatten()
    }

    pub fn children_of(&self, key: &MigrationKey) -> impl Iterator<Item = &MigrationKey> {
        self.children.get(key).into_iter().flatten()
    }

    /// Dependencies of `key` that are not part of this graph.
    pub fn external_dependencies(&self, key: &MigrationKey) -> impl Iterator<Item = &MigrationKey> {
        self.external.get(key).into_iter().flatten()
    }

    pub fn all_external_dependencies(&self) -> BTreeSet<&MigrationKey> {
        self.external.values().flatten().collect()
    }

    /// Units of `app` that nothing in the same app depends on.
    pub fn leaf_nodes(&self, app_label: &str) -> Vec<&MigrationKey> {
        self.nodes
            .keys()
            .filter(|k| k.app_label == app_label)
            .filter(|k| !self.children_of(k).any(|c| c.app_label == app_label))
            .collect()
    }

    /// Units of `app` that depend on nothing local in the same app.
    pub fn root_nodes(&self, app_label: &str) -> Vec<&MigrationKey> {
        self.nodes
            .keys()
            .filter(|k| k.app_label == app_label)
            .filter(|k| !self.parents_of(k).any(|p| p.app_label == app_label))
            .collect()
    }

    /// `target` and everything it needs, dependencies first.
    pub fn forwards_plan(&self, target: &MigrationKey) -> Result<Vec<MigrationKey>> {
        self.node(target)?;
        let mut plan = Vec::new();
        let mut seen = BTreeSet::new();
        self.post_order(target, &mut plan, &mut seen, |g, k| g.parents_of(k).cloned().collect());
        Ok(plan)
    }

    /// `target` and everything depending on it, dependants first.
    pub fn backwards_plan(&self, target: &MigrationKey) -> Result<Vec<MigrationKey>> {
        self.node(target)?;
        let mut plan = Vec::new();
        let mut seen = BTreeSet::new();
        self.post_order(target, &mut plan, &mut seen, |g, k| g.children_of(k).cloned().collect());
        Ok(plan)
    }

    fn post_order(
        &self,
        key: &MigrationKey,
        plan: &mut Vec<MigrationKey>,
        seen: &mut BTreeSet<MigrationKey>,
        next: fn(&Self, &MigrationKey) -> Vec<MigrationKey>,
    ) {
        if !seen.insert(key.clone()) {
            return;
        }
        for neighbour in next(self, key) {
            self.post_order(&neighbour, plan, seen, next);
        }
        plan.push(key.clone());
    }
}
