use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use crate::{StardagError, Task, find_cycle};

/// Dependency structure over tasks.
///
/// Building is incremental: `add_task` and `add_edge` never check for
/// cycles. `validate` must succeed before `topological_batches` will
/// produce an order, and any later mutation clears that validation.
#[derive(Debug, Default, Clone)]
pub struct TaskGraph {
    tasks: BTreeMap<String, Arc<Task>>,
    downstream: BTreeMap<String, BTreeSet<String>>,
    upstream: BTreeMap<String, BTreeSet<String>>,
    validated: bool,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&mut self, task: Task) -> Result<(), StardagError> {
        let id = task.id().to_string();
        if self.tasks.contains_key(&id) {
            return Err(StardagError::DuplicateTask(id));
        }

        self.downstream.insert(id.clone(), BTreeSet::new());
        self.upstream.insert(id.clone(), BTreeSet::new());
        self.tasks.insert(id, Arc::new(task));
        self.validated = false;
        Ok(())
    }

    pub fn add_edge(&mut self, upstream: &str, downstream: &str) -> Result<(), StardagError> {
        for id in [upstream, downstream] {
            if !self.tasks.contains_key(id) {
                return Err(StardagError::UnknownTask(id.to_string()));
            }
        }

        if let Some(children) = self.downstream.get_mut(upstream) {
            children.insert(downstream.to_string());
        }
        if let Some(parents) = self.upstream.get_mut(downstream) {
            parents.insert(upstream.to_string());
        }
        self.validated = false;
        Ok(())
    }

    /// Adds an edge between each consecutive pair of ids.
    pub fn chain(&mut self, ids: &[&str]) -> Result<(), StardagError> {
        for pair in ids.windows(2) {
            self.add_edge(pair[0], pair[1])?;
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<(), StardagError> {
        if let Some(cycle) = find_cycle(&self.downstream) {
            self.validated = false;
            return Err(StardagError::CircularDependency(cycle));
        }
        self.validated = true;
        Ok(())
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    /// Kahn's algorithm, one level at a time. Tasks in a batch have no
    /// dependency on each other; each batch is sorted by id.
    pub fn topological_batches(&self) -> Result<Vec<Vec<Arc<Task>>>, StardagError> {
        if !self.validated {
            return Err(StardagError::NotValidated);
        }

        let mut in_degrees: BTreeMap<&str, usize> = self
            .upstream
            .iter()
            .map(|(id, parents)| (id.as_str(), parents.len()))
            .collect();

        let mut ready: Vec<&str> = in_degrees
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut batches = Vec::new();
        while !ready.is_empty() {
            ready.sort_unstable();
            let mut next = Vec::new();

            for id in &ready {
                for child in self.downstream.get(*id).into_iter().flatten() {
                    if let Some(degree) = in_degrees.get_mut(child.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(child.as_str());
                        }
                    }
                }
            }

            batches.push(ready.iter().filter_map(|id| self.tasks.get(*id).cloned()).collect());
            ready = next;
        }

        Ok(batches)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Task>> {
        self.tasks.get(id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.downstream
            .iter()
            .flat_map(|(from, children)| children.iter().map(move |to| (from.as_str(), to.as_str())))
    }

    pub fn upstream(&self, id: &str) -> impl Iterator<Item = &str> {
        self.upstream.get(id).into_iter().flatten().map(String::as_str)
    }

    pub fn downstream(&self, id: &str) -> impl Iterator<Item = &str> {
        self.downstream.get(id).into_iter().flatten().map(String::as_str)
    }

    /// Tasks with no upstream dependency.
    pub fn entry_tasks(&self) -> Vec<&str> {
        self.upstream
            .iter()
            .filter(|(_, parents)| parents.is_empty())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Tasks nothing depends on.
    pub fn exit_tasks(&self) -> Vec<&str> {
        self.downstream
            .iter()
            .filter(|(_, children)| children.is_empty())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Every task reachable downstream of `id`, excluding `id` itself.
    pub fn descendants(&self, id: &str) -> BTreeSet<&str> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = self.downstream(id).collect();

        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(self.downstream(next));
            }
        }

        seen
    }

    /// Distinct connection names referenced by any task.
    pub fn connection_ids(&self) -> BTreeSet<&str> {
        self.tasks
            .values()
            .flat_map(|task| task.kind().connection_ids())
            .collect()
    }

    /// Text rendering of the dependency tree rooted at each entry task.
    pub fn render_tree(&self) -> String {
        let mut out = String::new();

        for root in self.entry_tasks() {
            out.push_str(root);
            out.push('\n');
            self.render_chain(root, "  ", &mut out);
            out.push('\n');
        }

        out
    }

    fn render_chain(&self, id: &str, prefix: &str, out: &mut String) {
        for child in self.downstream(id) {
            out.push_str(&format!("{}└─> {}\n", prefix, child));
            self.render_chain(child, &format!("{}    ", prefix), out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> TaskGraph {
        let mut g = TaskGraph::new();
        for n in nodes {
            g.add_task(Task::no_op(*n)).unwrap();
        }
        for (a, b) in edges {
            g.add_edge(a, b).unwrap();
        }
        g
    }

    fn ids(batches: &[Vec<Arc<Task>>]) -> Vec<Vec<&str>> {
        batches.iter().map(|b| b.iter().map(|t| t.id()).collect()).collect()
    }

    #[test]
    fn edge_to_missing_task_is_rejected() {
        let mut g = graph(&["a"], &[]);
        match g.add_edge("a", "ghost") {
            Err(StardagError::UnknownTask(id)) => assert_eq!(id, "ghost"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn duplicate_task_is_rejected() {
        let mut g = graph(&["a"], &[]);
        assert!(matches!(g.add_task(Task::no_op("a")), Err(StardagError::DuplicateTask(_))));
    }

    #[test]
    fn batches_require_validation() {
        let mut g = graph(&["a", "b"], &[("a", "b")]);
        assert!(matches!(g.topological_batches(), Err(StardagError::NotValidated)));

        g.validate().unwrap();
        assert!(g.topological_batches().is_ok());

        g.add_task(Task::no_op("c")).unwrap();
        assert!(matches!(g.topological_batches(), Err(StardagError::NotValidated)));
    }

    #[test]
    fn batches_are_levelled_and_sorted() {
        let mut g = graph(
            &["start", "z", "y", "x", "end"],
            &[("start", "z"), ("start", "y"), ("start", "x"), ("z", "end"), ("y", "end"), ("x", "end")],
        );
        g.validate().unwrap();
        let batches = g.topological_batches().unwrap();
        assert_eq!(ids(&batches), vec![vec!["start"], vec!["x", "y", "z"], vec!["end"]]);
    }

    #[test]
    fn uneven_branches_respect_every_edge() {
        let mut g = graph(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c"), ("a", "d"), ("d", "c")]);
        g.validate().unwrap();
        let batches = g.topological_batches().unwrap();
        assert_eq!(ids(&batches), vec![vec!["a"], vec!["b", "d"], vec!["c"]]);

        let position: BTreeMap<&str, usize> = batches
            .iter()
            .enumerate()
            .flat_map(|(i, b)| b.iter().map(move |t| (t.id(), i)))
            .collect();
        assert_eq!(position.len(), 4);
        for (from, to) in g.edges() {
            assert!(position[from] < position[to], "{from} -> {to}");
        }
    }

    #[test]
    fn cycle_is_reported_with_members() {
        let mut g = graph(&["a", "b", "c"], &[("a", "b"), ("b", "c"), ("c", "a")]);
        match g.validate() {
            Err(StardagError::CircularDependency(members)) => {
                assert_eq!(members, vec!["a", "b", "c"]);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(!g.is_validated());
    }

    #[test]
    fn entry_exit_and_descendants() {
        let g = graph(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c"), ("a", "d")]);
        assert_eq!(g.entry_tasks(), vec!["a"]);
        assert_eq!(g.exit_tasks(), vec!["c", "d"]);
        assert_eq!(g.descendants("b").into_iter().collect::<Vec<_>>(), vec!["c"]);
        assert_eq!(g.descendants("a").len(), 3);
    }

    #[test]
    fn empty_graph_has_no_batches() {
        let mut g = TaskGraph::new();
        g.validate().unwrap();
        assert!(g.topological_batches().unwrap().is_empty());
    }

    #[test]
    fn render_tree_lists_children() {
        let g = graph(&["a", "b"], &[("a", "b")]);
        assert_eq!(g.render_tree(), "a\n  └─> b\n\n");
    }
}
