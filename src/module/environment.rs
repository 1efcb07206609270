//! Per-module environment variables.
//!
//! A recipe declares its environment as an explicit list of
//! `(VARIABLE, producer)` pairs. All contributions are collected first, values
//! for the same variable are concatenated in declaration order, and each
//! variable is joined exactly once: `:` for `*PATH` variables, a single space
//! otherwise. A later contribution can extend a variable but never replace it.

use crate::session::BuildSession;

/// Produces the values one recipe adds to one variable.
pub type EnvProducer = fn(&BuildSession) -> Vec<String>;

/// One `{VARIABLE: producer}` entry.
#[derive(Clone, Copy)]
pub struct EnvContribution {
    pub var: &'static str,
    pub produce: EnvProducer,
}

impl EnvContribution {
    pub const fn new(var: &'static str, produce: EnvProducer) -> Self {
        Self { var, produce }
    }
}

impl std::fmt::Debug for EnvContribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvContribution").field("var", &self.var).finish()
    }
}

/// Default contributions every recipe starts from: make the shared deps
/// prefix visible to compilers, linkers, pkg-config and PATH lookups.
pub const DEFAULT_ENV: &[EnvContribution] = &[
    EnvContribution::new("CPATH", deps_include),
    EnvContribution::new("LDFLAGS", deps_ldflags),
    EnvContribution::new("PKG_CONFIG_PATH", deps_pkgconfig),
    EnvContribution::new("PATH", deps_path),
    EnvContribution::new("CFLAGS", position_independent),
    EnvContribution::new("MACOSX_DEPLOYMENT_TARGET", deployment_target),
];

fn deps_include(session: &BuildSession) -> Vec<String> {
    vec![session.folders.deps.join("include").display().to_string()]
}

fn deps_ldflags(session: &BuildSession) -> Vec<String> {
    vec![format!("-L{}", session.folders.deps.join("lib").display())]
}

fn deps_pkgconfig(session: &BuildSession) -> Vec<String> {
    vec![session.folders.deps.join("lib/pkgconfig").display().to_string()]
}

fn deps_path(session: &BuildSession) -> Vec<String> {
    let mut values = vec![session.folders.deps.join("bin").display().to_string()];
    if let Ok(path) = std::env::var("PATH") {
        values.push(path);
    }
    values
}

fn position_independent(session: &BuildSession) -> Vec<String> {
    if session.target.is_linux() {
        vec!["-fPIC".to_string()]
    } else {
        Vec::new()
    }
}

fn deployment_target(session: &BuildSession) -> Vec<String> {
    if session.target.is_macos() {
        session
            .config
            .get_str("macos-deployment-target")
            .into_iter()
            .collect()
    } else {
        Vec::new()
    }
}

/// Delimiter used to join values of `var`.
pub fn delimiter_for(var: &str) -> &'static str {
    if var.ends_with("PATH") {
        ":"
    } else {
        " "
    }
}

/// Collected environment, in first-declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: Vec<(String, Vec<String>)>,
}

impl Environment {
    /// Run every producer and collect its values.
    pub fn collect(session: &BuildSession, contributions: &[EnvContribution]) -> Self {
        let mut env = Self::default();
        for contribution in contributions {
            env.extend(contribution.var, (contribution.produce)(session));
        }
        env
    }

    /// Append values to a variable, keeping earlier values first.
    pub fn extend(&mut self, var: &str, values: impl IntoIterator<Item = String>) {
        let values: Vec<String> = values.into_iter().filter(|v| !v.is_empty()).collect();
        if values.is_empty() {
            return;
        }
        match self.vars.iter_mut().find(|(name, _)| name == var) {
            Some((_, existing)) => {
                for value in values {
                    if !existing.contains(&value) {
                        existing.push(value);
                    }
                }
            }
            None => self.vars.push((var.to_string(), values)),
        }
    }

    /// Final `(VARIABLE, value)` pairs, each joined once.
    pub fn rendered(&self) -> Vec<(String, String)> {
        self.vars
            .iter()
            .map(|(var, values)| (var.clone(), values.join(delimiter_for(var))))
            .collect()
    }

    #[cfg(test)]
    fn get(&self, var: &str) -> Option<String> {
        self.vars
            .iter()
            .find(|(name, _)| name == var)
            .map(|(name, values)| values.join(delimiter_for(name)))
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
