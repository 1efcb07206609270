//! Module registry and selection.
//!
//! The registry holds every known recipe in registration order. That order
//! is the build order, so the catalog registers leaf dependencies first.
//!
//! A selection string is a CSV of tokens:
//! - `none` / `all`: start from nothing / every buildable module instead of
//!   the auto-detected set
//! - `name` or `+name`: add a module (explicit request)
//! - `-name`: remove a module

use anyhow::{bail, Result};
use std::collections::HashMap;

use super::{AutoUse, ModuleBuilder, ModuleRecipe};
use crate::target::TargetSystem;

/// All known recipes, in build order.
#[derive(Default)]
pub struct Registry {
    modules: Vec<&'static dyn ModuleRecipe>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry of every module in the built-in catalog.
    pub fn catalog() -> Result<Self> {
        let mut registry = Self::new();
        super::catalog::register(&mut registry)?;
        Ok(registry)
    }

    /// Register a recipe. Names must be unique.
    pub fn register(&mut self, recipe: &'static dyn ModuleRecipe) -> Result<()> {
        if self.get(recipe.name()).is_some() {
            bail!("Module '{}' registered twice", recipe.name());
        }
        self.modules.push(recipe);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&'static dyn ModuleRecipe> {
        self.modules.iter().copied().find(|m| m.name() == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static dyn ModuleRecipe> + '_ {
        self.modules.iter().copied()
    }

    /// Auto-detection decision for every registered module.
    pub fn decisions(&self, target: &TargetSystem) -> Vec<(&'static str, AutoUse)> {
        self.modules
            .iter()
            .map(|m| (m.name(), m.auto_use_with_reason(target)))
            .collect()
    }

    /// Resolve a selection string against `target`.
    ///
    /// Unknown names fail the whole selection, listing every unknown name.
    /// An explicitly requested module that can't be built on `target` fails
    /// too; an auto-candidate that can't be built is only logged.
    pub fn select(&self, target: &TargetSystem, spec: Option<&str>) -> Result<Selection> {
        let tokens = parse_tokens(spec.unwrap_or(""));

        let mut unknown: Vec<&str> = Vec::new();
        for token in &tokens {
            if let Token::Add(name) | Token::Remove(name) = token {
                if self.get(name).is_none() && !unknown.contains(name) {
                    unknown.push(name);
                }
            }
        }
        if !unknown.is_empty() {
            bail!(
                "Unknown module(s): {} (known: {})",
                unknown.join(", "),
                self.names().join(", ")
            );
        }

        let decisions = self.decisions(target);
        let decision = |name: &str| -> &AutoUse {
            &decisions
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, d)| d)
                .unwrap_or(&AutoUse::OnDemand)
        };

        let base = tokens
            .iter()
            .rev()
            .find_map(|t| match t {
                Token::None => Some(Base::Nothing),
                Token::All => Some(Base::All),
                _ => None,
            })
            .unwrap_or(Base::Auto);

        // name -> explicitly requested
        let mut chosen: HashMap<&'static str, bool> = HashMap::new();
        for (name, auto) in &decisions {
            let include = match base {
                Base::Nothing => false,
                Base::All => !auto.is_disqualified(),
                Base::Auto => auto.is_needed(),
            };
            if include {
                chosen.insert(*name, false);
            }
        }

        for token in &tokens {
            match token {
                Token::Add(name) => {
                    let recipe = match self.get(name) {
                        Some(recipe) => recipe,
                        None => continue,
                    };
                    if let AutoUse::Disqualified { reason } = decision(name) {
                        bail!(
                            "Module '{}' can't be built on {}: {}",
                            name,
                            target,
                            reason
                        );
                    }
                    chosen.insert(recipe.name(), true);
                }
                Token::Remove(name) => {
                    chosen.remove(*name);
                }
                Token::None | Token::All => {}
            }
        }

        for (name, auto) in &decisions {
            if auto.is_disqualified() && !chosen.contains_key(name) {
                tracing::info!("Not building {}: {}", name, auto);
            }
        }

        let modules = self
            .modules
            .iter()
            .filter_map(|recipe| {
                chosen.get(recipe.name()).map(|explicit| SelectedModule {
                    recipe: *recipe,
                    explicit: *explicit,
                })
            })
            .collect();

        Ok(Selection { modules, decisions })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Base {
    Auto,
    Nothing,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    None,
    All,
    Add(&'a str),
    Remove(&'a str),
}

fn parse_tokens(spec: &str) -> Vec<Token<'_>> {
    spec.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| match t {
            "none" => Token::None,
            "all" => Token::All,
            _ => match (t.strip_prefix('-'), t.strip_prefix('+')) {
                (Some(name), _) => Token::Remove(name.trim()),
                (_, Some(name)) => Token::Add(name.trim()),
                _ => Token::Add(t),
            },
        })
        .collect()
}

/// One selected recipe.
#[derive(Clone, Copy)]
pub struct SelectedModule {
    pub recipe: &'static dyn ModuleRecipe,
    /// Requested by name rather than picked by auto-detection.
    pub explicit: bool,
}

/// Resolved, ordered module selection.
pub struct Selection {
    pub modules: Vec<SelectedModule>,
    /// Auto-detection decision of every registered module.
    pub decisions: Vec<(&'static str, AutoUse)>,
}

impl Selection {
    /// Selected top-level module names, in build order.
    pub fn names(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.recipe.name()).collect()
    }

    /// Builders in build order, with group modules replaced by their
    /// submodules (which inherit the group's explicitness).
    pub fn builders(&self) -> Vec<ModuleBuilder> {
        let mut builders = Vec::new();
        for selected in &self.modules {
            let submodules = selected.recipe.descriptor().submodules;
            if submodules.is_empty() {
                builders.push(ModuleBuilder::new(selected.recipe, selected.explicit));
            } else {
                for sub in submodules {
                    builders.push(
                        ModuleBuilder::new(*sub, selected.explicit).in_group(selected.recipe.name()),
                    );
                }
            }
        }
        builders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleDescriptor;
    use std::path::Path;

    struct Plain(ModuleDescriptor);

    impl ModuleRecipe for Plain {
        fn descriptor(&self) -> &ModuleDescriptor {
            &self.0
        }
    }

    struct Blocked;

    impl ModuleRecipe for Blocked {
        fn descriptor(&self) -> &ModuleDescriptor {
            &BLOCKED_DESC
        }

        fn auto_use_with_reason(&self, _target: &TargetSystem) -> AutoUse {
            AutoUse::Disqualified {
                reason: "helper program missing".to_string(),
            }
        }
    }

    static BLOCKED_DESC: ModuleDescriptor = ModuleDescriptor {
        name: "blocked",
        ..ModuleDescriptor::BASE
    };

    // "needed" has a telltale that never exists, "present" one that always
    // does (relative to a sys include of "/"), "ondemand" none at all.
    static NEEDED: Plain = Plain(ModuleDescriptor {
        name: "needed",
        telltales: &["{include}/definitely/not/here.h"],
        ..ModuleDescriptor::BASE
    });
    static PRESENT: Plain = Plain(ModuleDescriptor {
        name: "present",
        telltales: &["{include}"],
        ..ModuleDescriptor::BASE
    });
    static ONDEMAND: Plain = Plain(ModuleDescriptor {
        name: "ondemand",
        ..ModuleDescriptor::BASE
    });
    static CHILD_A: Plain = Plain(ModuleDescriptor {
        name: "child-a",
        ..ModuleDescriptor::BASE
    });
    static CHILD_B: Plain = Plain(ModuleDescriptor {
        name: "child-b",
        ..ModuleDescriptor::BASE
    });
    static GROUP: Plain = Plain(ModuleDescriptor {
        name: "group",
        submodules: &[&CHILD_A, &CHILD_B],
        ..ModuleDescriptor::BASE
    });

    fn registry() -> Registry {
        let mut registry = Registry::new();
        for recipe in [
            &NEEDED as &'static dyn ModuleRecipe,
            &PRESENT,
            &ONDEMAND,
            &Blocked,
            &GROUP,
        ] {
            registry.register(recipe).unwrap();
        }
        registry
    }

    fn target() -> TargetSystem {
        TargetSystem::from_spec(Some("linux-x86_64"))
            .unwrap()
            .with_sys_include(Path::new("/"))
    }

    #[test]
    fn test_auto_selection() {
        let selection = registry().select(&target(), None).unwrap();
        assert_eq!(selection.names(), vec!["needed"]);
        assert!(!selection.modules[0].explicit);
    }

    #[test]
    fn test_none_and_all() {
        let registry = registry();
        assert!(registry.select(&target(), Some("none")).unwrap().names().is_empty());
        assert_eq!(
            registry.select(&target(), Some("all")).unwrap().names(),
            vec!["needed", "present", "ondemand", "group"]
        );
    }

    #[test]
    fn test_tokens_follow_registration_order() {
        let selection = registry()
            .select(&target(), Some("ondemand,-needed,+present"))
            .unwrap();
        assert_eq!(selection.names(), vec!["present", "ondemand"]);
        assert!(selection.modules.iter().all(|m| m.explicit));
    }

    #[test]
    fn test_selection_is_repeatable() {
        let registry = registry();
        let first = registry.select(&target(), Some("none,present,-ondemand,+group")).unwrap();
        let second = registry.select(&target(), Some("none,present,-ondemand,+group")).unwrap();
        assert_eq!(first.names(), second.names());
    }

    #[test]
    fn test_unknown_names_listed_exactly() {
        let err = registry()
            .select(&target(), Some("needed,bogus,-nope,+bogus"))
            .err()
            .unwrap();
        let msg = err.to_string();
        assert!(msg.starts_with("Unknown module(s): bogus, nope ("), "{}", msg);
    }

    #[test]
    fn test_explicit_disqualified_aborts() {
        let err = registry().select(&target(), Some("blocked")).err().unwrap();
        assert!(err.to_string().contains("helper program missing"));
    }

    #[test]
    fn test_disqualified_auto_candidate_is_silent() {
        let selection = registry().select(&target(), Some("all")).unwrap();
        assert!(!selection.names().contains(&"blocked"));
    }

    #[test]
    fn test_group_expands_into_submodules() {
        let selection = registry().select(&target(), Some("none,group")).unwrap();
        let builders = selection.builders();
        let names: Vec<&str> = builders.iter().map(|b| b.name()).collect();
        assert_eq!(names, vec!["child-a", "child-b"]);
        assert!(builders.iter().all(|b| b.explicit()));
        assert!(builders.iter().all(|b| b.group() == "group"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = registry();
        assert!(registry.register(&NEEDED).is_err());
    }
}
