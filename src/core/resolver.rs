// src/core/resolver.rs

//! Resolves a name token against the children of a group.
//!
//! Exact canonical names win first, then exact aliases. Otherwise every name
//! (canonical or alias) that starts with the token is collected and mapped to
//! its target; the token resolves only when a single target remains.

use crate::models::GroupNode;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The canonical name of the matched child.
    Resolved(String),
    /// Canonical names of every matched target, sorted.
    Ambiguous(Vec<String>),
    NotFound,
}

impl Resolution {
    pub fn is_match(&self) -> bool {
        !matches!(self, Self::NotFound)
    }
}

/// Resolves `token` with prefix abbreviation enabled.
pub fn resolve(group: &GroupNode, token: &str) -> Resolution {
    resolve_with(group, token, true)
}

pub fn resolve_with(group: &GroupNode, token: &str, allow_prefix: bool) -> Resolution {
    if token.is_empty() {
        return Resolution::NotFound;
    }
    if group.children.contains_key(token) {
        return Resolution::Resolved(token.to_string());
    }
    if let Some(target) = group.names.get(token) {
        return Resolution::Resolved(target.clone());
    }
    if !allow_prefix {
        return Resolution::NotFound;
    }

    let targets: BTreeSet<&String> = group
        .names
        .iter()
        .filter(|(name, _)| name.starts_with(token))
        .map(|(_, target)| target)
        .collect();

    let mut targets = targets.into_iter();
    match (targets.next(), targets.next()) {
        (None, _) => Resolution::NotFound,
        (Some(target), None) => {
            log::trace!("Abbreviation '{}' resolved to '{}'", token, target);
            Resolution::Resolved(target.clone())
        }
        (Some(first), Some(second)) => {
            let mut candidates = vec![first.clone(), second.clone()];
            candidates.extend(targets.cloned());
            Resolution::Ambiguous(candidates)
        }
    }
}

/// Every name a child can be invoked by, canonical names first.
pub fn sibling_names(group: &GroupNode) -> Vec<String> {
    let mut names: Vec<String> = group.children.keys().cloned().collect();
    names.extend(
        group
            .names
            .iter()
            .filter(|(name, target)| name != target)
            .map(|(name, _)| name.clone()),
    );
    names
}
