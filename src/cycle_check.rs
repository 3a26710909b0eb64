use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Depth-first search over `edges` (task id -> downstream ids). Returns the
/// ids on the first cycle found, in path order, or `None` for a DAG.
pub fn find_cycle(edges: &BTreeMap<String, BTreeSet<String>>) -> Option<Vec<String>> {
    let mut visited = HashSet::new();
    let mut path: Vec<&str> = Vec::new();

    fn dfs<'a>(
        task_id: &'a str,
        edges: &'a BTreeMap<String, BTreeSet<String>>,
        visited: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = path.iter().position(|id| *id == task_id) {
            return Some(path[pos..].iter().map(|id| id.to_string()).collect());
        }
        if visited.contains(task_id) {
            return None;
        }

        visited.insert(task_id);
        path.push(task_id);

        if let Some(children) = edges.get(task_id) {
            for child in children {
                if let Some(cycle) = dfs(child, edges, visited, path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        None
    }

    for task_id in edges.keys() {
        if !visited.contains(task_id.as_str()) {
            if let Some(cycle) = dfs(task_id, edges, &mut visited, &mut path) {
                return Some(cycle);
            }
        }
    }

    None
}
