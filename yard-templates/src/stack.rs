//! Tech-stack catalog and selection rules.
//!
//! A template's own stack selection is always closed under dependencies:
//! selecting a stack pulls in everything it needs that the parent image does
//! not already provide, and a stack cannot be removed while another selected
//! stack still needs it.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

const BUILTIN_CATALOG: &str = include_str!("../stacks.yaml");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TechStack {
    pub id: String,
    pub name: String,
    #[serde(default, alias = "depends_on")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub install: Vec<String>,
}

#[derive(Deserialize)]
struct CatalogFile {
    stacks: Vec<TechStack>,
}

#[derive(Debug, Clone)]
pub struct StackCatalog {
    stacks: BTreeMap<String, TechStack>,
}

impl StackCatalog {
    pub fn builtin() -> Result<Self> {
        Self::from_yaml_str(BUILTIN_CATALOG)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate a catalog: ids are unique, every dependency exists,
    /// and there are no dependency cycles.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: CatalogFile = serde_yaml_ng::from_str(yaml)?;

        let mut stacks = BTreeMap::new();
        for stack in file.stacks {
            if stack.id.trim().is_empty() {
                return Err(PipelineError::Catalog("stack with empty id".to_string()));
            }
            if let Some(dup) = stacks.insert(stack.id.clone(), stack) {
                return Err(PipelineError::Catalog(format!("duplicate stack id {}", dup.id)));
            }
        }

        let catalog = Self { stacks };
        for stack in catalog.stacks.values() {
            for dep in &stack.depends_on {
                if !catalog.stacks.contains_key(dep) {
                    return Err(PipelineError::Catalog(format!(
                        "{} depends on unknown stack {dep}",
                        stack.id
                    )));
                }
            }
        }
        let all: BTreeSet<String> = catalog.stacks.keys().cloned().collect();
        catalog.install_order(&all)?;

        Ok(catalog)
    }

    pub fn get(&self, id: &str) -> Option<&TechStack> {
        self.stacks.get(id)
    }

    pub fn list(&self) -> impl Iterator<Item = &TechStack> {
        self.stacks.values()
    }

    fn require(&self, id: &str) -> Result<&TechStack> {
        self.get(id)
            .ok_or_else(|| PipelineError::UnknownStack(id.to_string()))
    }

    /// Every stack `id` needs, directly or transitively, excluding itself.
    pub fn dependencies_of(&self, id: &str) -> Result<BTreeSet<String>> {
        let mut seen = BTreeSet::new();
        let mut pending: Vec<&str> = self.require(id)?.depends_on.iter().map(String::as_str).collect();

        while let Some(next) = pending.pop() {
            if next == id || !seen.insert(next.to_string()) {
                continue;
            }
            pending.extend(self.require(next)?.depends_on.iter().map(String::as_str));
        }

        Ok(seen)
    }

    /// Add `id` and its missing dependencies to `own`. Returns what was added.
    pub fn select(
        &self,
        own: &mut BTreeSet<String>,
        inherited: &BTreeSet<String>,
        id: &str,
    ) -> Result<Vec<String>> {
        if inherited.contains(id) {
            return Err(PipelineError::StackInherited(id.to_string()));
        }
        self.require(id)?;

        let mut added = Vec::new();
        let wanted = std::iter::once(id.to_string()).chain(self.dependencies_of(id)?);
        for stack in wanted {
            if inherited.contains(&stack) {
                continue;
            }
            if own.insert(stack.clone()) {
                added.push(stack);
            }
        }

        Ok(added)
    }

    /// Remove `id` from `own`, unless another selected stack depends on it.
    /// The error lists those stacks by display name.
    pub fn deselect(
        &self,
        own: &mut BTreeSet<String>,
        inherited: &BTreeSet<String>,
        id: &str,
    ) -> Result<()> {
        if inherited.contains(id) {
            return Err(PipelineError::StackInherited(id.to_string()));
        }

        let mut dependents = Vec::new();
        for other in own.iter().filter(|s| s.as_str() != id) {
            if self.dependencies_of(other)?.contains(id) {
                dependents.push(self.require(other)?.name.clone());
            }
        }
        if !dependents.is_empty() {
            return Err(PipelineError::StackRequired {
                stack: id.to_string(),
                dependents,
            });
        }

        own.remove(id);
        Ok(())
    }

    /// Stacks in `selection` ordered so every stack follows its dependencies.
    /// Dependencies outside the selection are assumed present already.
    pub fn install_order(&self, selection: &BTreeSet<String>) -> Result<Vec<&TechStack>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            catalog: &'a StackCatalog,
            selection: &BTreeSet<String>,
            id: &str,
            marks: &mut BTreeMap<String, Mark>,
            order: &mut Vec<&'a TechStack>,
        ) -> Result<()> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(PipelineError::Catalog(format!("dependency cycle through {id}")))
                }
                None => {}
            }
            marks.insert(id.to_string(), Mark::Visiting);

            let stack = catalog.require(id)?;
            for dep in &stack.depends_on {
                if selection.contains(dep) {
                    visit(catalog, selection, dep, marks, order)?;
                }
            }

            marks.insert(id.to_string(), Mark::Done);
            order.push(stack);
            Ok(())
        }

        let mut marks = BTreeMap::new();
        let mut order = Vec::with_capacity(selection.len());
        for id in selection {
            visit(self, selection, id, &mut marks, &mut order)?;
        }
        Ok(order)
    }
}
