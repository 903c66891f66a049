//! Module load order resolution
//!
//! Orders modules so that dependencies load first. Only dependencies that are
//! part of the set being loaded constrain the order; anything else is left to
//! the manager to warn about.

use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

/// Result of ordering a set of modules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOrder {
    /// Every input module, dependencies first
    pub order: Vec<String>,

    /// Modules caught in a dependency cycle (appended to `order` as-is)
    pub cyclic: Vec<String>,
}

/// Topologically sort `modules` using the dependency hints in `deps_of`
///
/// Kahn's algorithm. The queue is seeded and dependents are visited in input
/// order, so the result is deterministic. Modules left over by a cycle are
/// appended in input order and still loaded.
pub fn resolve_load_order(modules: &[String], deps_of: &HashMap<String, Vec<String>>) -> LoadOrder {
    let members: HashSet<&str> = modules.iter().map(String::as_str).collect();

    let mut in_degree: HashMap<&str, usize> = modules.iter().map(|m| (m.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    // Build reverse graph over members only
    for module in modules {
        let Some(deps) = deps_of.get(module) else {
            continue;
        };
        for dep in deps.iter().filter(|d| members.contains(d.as_str())) {
            if dep == module {
                continue;
            }
            dependents.entry(dep.as_str()).or_default().push(module.as_str());
            if let Some(degree) = in_degree.get_mut(module.as_str()) {
                *degree += 1;
            }
        }
    }

    let mut queue: VecDeque<&str> = modules
        .iter()
        .map(String::as_str)
        .filter(|m| in_degree.get(m) == Some(&0))
        .collect();

    let mut order: Vec<String> = Vec::with_capacity(modules.len());
    let mut placed: HashSet<&str> = HashSet::new();

    while let Some(module) = queue.pop_front() {
        if !placed.insert(module) {
            continue;
        }
        order.push(module.to_string());

        for &dependent in dependents.get(module).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    queue.push_back(dependent);
                }
            }
        }
    }

    let cyclic: Vec<String> = modules
        .iter()
        .filter(|m| !placed.contains(m.as_str()))
        .cloned()
        .collect();

    if !cyclic.is_empty() {
        warn!(
            "Circular dependency detected among modules: {}; loading them anyway",
            cyclic.join(", ")
        );
        order.extend(cyclic.iter().cloned());
    }

    debug!("Module load order: {:?}", order);

    LoadOrder { order, cyclic }
}
