//! Rebuilding control flow from a statement tree.
//!
//! [`linearize`] resolves every fallthrough, `break` and `continue` of a tree back
//! into block-to-block edges, and collects the catch clauses enclosing each block.
//! [`check_round_trip`] compares the result with the graph the tree was built
//! from. Both walk the tree with explicit stacks.

use std::collections::BTreeMap;

use crate::{
    bytecode::ClassOracle,
    ir::{BlockId, MethodGraph, Terminator},
    structuring::{ExceptionSet, Label, Statement},
    utils::graph::algorithms::reachable,
    Result,
};

/// Kind of a rebuilt control edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Continuation after a block ending in `goto`, `return` or `athrow`
    Next,
    /// Condition holds
    Taken,
    /// Condition fails
    Fallthrough,
    /// Switch key
    Case(i32),
    /// Switch default
    Default,
}

/// Control flow recovered from a statement tree.
#[derive(Debug, Clone, Default)]
pub struct Linearized {
    /// Edges of every block in the tree; `None` where control leaves the method
    pub edges: BTreeMap<BlockId, Vec<(Edge, Option<BlockId>)>>,
    /// Catch clauses enclosing every block, innermost first, with the block each
    /// clause starts at
    pub handlers: BTreeMap<BlockId, Vec<(ExceptionSet, Option<BlockId>)>>,
    /// Declared handler and actual first block of every catch clause
    pub catches: Vec<(BlockId, Option<BlockId>)>,
}

struct Node<'t> {
    statement: &'t Statement,
    parent: Option<(usize, usize)>,
    index: usize,
    slots: Vec<Vec<usize>>,
}

#[derive(Clone, Copy)]
enum Step {
    Entry(usize),
    Next(usize),
    Slot(usize, usize),
}

struct Tree<'t> {
    nodes: Vec<Node<'t>>,
    labels: BTreeMap<Label, usize>,
}

impl<'t> Tree<'t> {
    fn build(root: &'t Statement) -> Result<Self> {
        let mut nodes: Vec<Node<'t>> = Vec::new();
        let mut labels = BTreeMap::new();
        let mut stack: Vec<(&'t Statement, Option<(usize, usize)>)> = vec![(root, None)];

        while let Some((statement, parent)) = stack.pop() {
            let id = nodes.len();
            let index = match parent {
                Some((p, slot)) => {
                    let siblings = &mut nodes[p].slots[slot];
                    siblings.push(id);
                    siblings.len() - 1
                }
                None => 0,
            };
            let slots: Vec<Vec<&'t Statement>> = match statement {
                Statement::Block(_) | Statement::Break(_) | Statement::Continue(_) => Vec::new(),
                Statement::Scope { body, .. } | Statement::While { body, .. } => vec![body.iter().collect()],
                Statement::If {
                    then_branch,
                    else_branch,
                    ..
                } => vec![vec![then_branch.as_ref()], vec![else_branch.as_ref()]],
                Statement::Switch { cases, .. } => cases.iter().map(|c| c.body.iter().collect()).collect(),
                Statement::Try { body, catches } => std::iter::once(vec![body.as_ref()])
                    .chain(catches.iter().map(|c| c.body.iter().collect()))
                    .collect(),
            };
            let label = match statement {
                Statement::Scope { label, .. } => *label,
                Statement::While { label, .. } => Some(*label),
                _ => None,
            };
            if let Some(label) = label {
                if labels.insert(label, id).is_some() {
                    return Err(consistency_error!("label {} is defined twice", label));
                }
            }
            nodes.push(Node {
                statement,
                parent,
                index,
                slots: vec![Vec::new(); slots.len()],
            });
            // Children are pushed in reverse so each slot fills in order
            for (slot, children) in slots.iter().enumerate().rev() {
                for child in children.iter().rev() {
                    stack.push((child, Some((id, slot))));
                }
            }
        }
        Ok(Tree { nodes, labels })
    }

    fn is_ancestor(&self, ancestor: usize, mut node: usize) -> bool {
        while let Some((parent, _)) = self.nodes[node].parent {
            if parent == ancestor {
                return true;
            }
            node = parent;
        }
        false
    }

    fn target(&self, label: Label, from: usize) -> Result<usize> {
        match self.labels.get(&label) {
            Some(&target) if self.is_ancestor(target, from) => Ok(target),
            Some(_) => Err(consistency_error!("jump to {} from outside its statement", label)),
            None => Err(consistency_error!("jump to undefined label {}", label)),
        }
    }

    fn slot_exit(&self, node: usize, slot: usize) -> Step {
        match self.nodes[node].statement {
            Statement::While { .. } => Step::Entry(node),
            Statement::Switch { .. } if slot + 1 < self.nodes[node].slots.len() => Step::Slot(node, slot + 1),
            _ => Step::Next(node),
        }
    }

    /// Follows `step` to the first block it executes, `None` if control leaves the
    /// method first.
    fn resolve(&self, mut step: Step) -> Result<Option<BlockId>> {
        let limit = self.nodes.len() * 4 + 8;
        for _ in 0..limit {
            step = match step {
                Step::Entry(n) => match self.nodes[n].statement {
                    Statement::Block(b) | Statement::If { block: b, .. } | Statement::Switch { block: b, .. } => {
                        return Ok(Some(*b));
                    }
                    Statement::Scope { .. } | Statement::While { .. } | Statement::Try { .. } => Step::Slot(n, 0),
                    Statement::Break(label) => Step::Next(self.target(*label, n)?),
                    Statement::Continue(label) => {
                        let target = self.target(*label, n)?;
                        if !matches!(self.nodes[target].statement, Statement::While { .. }) {
                            return Err(consistency_error!("continue {} does not name a loop", label));
                        }
                        Step::Entry(target)
                    }
                },
                Step::Slot(n, slot) => match self.nodes[n].slots[slot].first() {
                    Some(&first) => Step::Entry(first),
                    None => self.slot_exit(n, slot),
                },
                Step::Next(n) => {
                    let node = &self.nodes[n];
                    let Some((parent, slot)) = node.parent else {
                        return Ok(None);
                    };
                    match self.nodes[parent].slots[slot].get(node.index + 1) {
                        Some(&sibling) => Step::Entry(sibling),
                        None => self.slot_exit(parent, slot),
                    }
                }
            };
        }
        Err(consistency_error!("control loops without reaching a block"))
    }

    /// Catch clauses around `node`, innermost first.
    fn handlers(&self, mut node: usize) -> Result<Vec<(ExceptionSet, Option<BlockId>)>> {
        let mut result = Vec::new();
        while let Some((parent, slot)) = self.nodes[node].parent {
            if let (Statement::Try { catches, .. }, 0) = (self.nodes[parent].statement, slot) {
                for (i, clause) in catches.iter().enumerate() {
                    result.push((clause.catches.clone(), self.resolve(Step::Slot(parent, i + 1))?));
                }
            }
            node = parent;
        }
        Ok(result)
    }
}

/// Rebuilds the control edges and exception dispatch of every block in `tree`.
///
/// # Errors
///
/// Returns [`crate::Error::InternalConsistency`] if a block appears twice, a label is
/// defined twice, a jump names a label that does not enclose it, or control cycles
/// through statements without reaching a block.
pub fn linearize(tree: &Statement) -> Result<Linearized> {
    let tree = Tree::build(tree)?;
    let mut result = Linearized::default();

    for (n, node) in tree.nodes.iter().enumerate() {
        let (block, edges) = match node.statement {
            Statement::Block(b) => (*b, vec![(Edge::Next, tree.resolve(Step::Next(n))?)]),
            Statement::If { block, .. } => (
                *block,
                vec![
                    (Edge::Taken, tree.resolve(Step::Slot(n, 0))?),
                    (Edge::Fallthrough, tree.resolve(Step::Slot(n, 1))?),
                ],
            ),
            Statement::Switch { block, cases } => {
                let mut edges = Vec::new();
                for (i, case) in cases.iter().enumerate() {
                    let target = tree.resolve(Step::Slot(n, i))?;
                    edges.extend(case.keys.iter().map(|&k| (Edge::Case(k), target)));
                    if case.is_default {
                        edges.push((Edge::Default, target));
                    }
                }
                (*block, edges)
            }
            Statement::Try { catches, .. } => {
                for (i, clause) in catches.iter().enumerate() {
                    result
                        .catches
                        .push((clause.handler, tree.resolve(Step::Slot(n, i + 1))?));
                }
                continue;
            }
            Statement::Scope { .. } | Statement::While { .. } | Statement::Break(_) | Statement::Continue(_) => {
                continue;
            }
        };
        if result.edges.insert(block, edges).is_some() {
            return Err(consistency_error!("{} appears twice in the statement tree", block));
        }
        result.handlers.insert(block, tree.handlers(n)?);
    }
    Ok(result)
}

/// Where each exception reaching a dispatch list ends up: handler to the set of
/// exceptions it receives. Earlier entries shadow later ones.
pub(crate) fn effective_dispatch<'a>(
    oracle: &dyn ClassOracle,
    entries: impl IntoIterator<Item = (&'a ExceptionSet, BlockId)>,
) -> BTreeMap<BlockId, ExceptionSet> {
    let mut covered = ExceptionSet::empty();
    let mut result: BTreeMap<BlockId, ExceptionSet> = BTreeMap::new();
    for (set, target) in entries {
        let reaching = set.difference(oracle, &covered);
        covered = covered.union(oracle, set);
        if reaching.is_empty() {
            continue;
        }
        let slot = result.entry(target).or_default();
        *slot = slot.union(oracle, &reaching);
    }
    result
}

/// Returns `true` if two dispatch results send every exception to the same handler.
pub(crate) fn same_dispatch(
    oracle: &dyn ClassOracle,
    a: &BTreeMap<BlockId, ExceptionSet>,
    b: &BTreeMap<BlockId, ExceptionSet>,
) -> bool {
    a.len() == b.len()
        && a.iter().all(|(target, set)| {
            b.get(target)
                .is_some_and(|other| set.is_subset(oracle, other) && other.is_subset(oracle, set))
        })
}

/// The handler edges of `block` that do not go to the rethrow block.
pub(crate) fn graph_dispatch(graph: &MethodGraph, block: BlockId) -> Vec<(&ExceptionSet, BlockId)> {
    graph
        .block(block)
        .handlers
        .iter()
        .filter(|e| Some(e.target) != graph.rethrow())
        .map(|e| (&e.catches, e.target))
        .collect()
}

/// Checks that `tree` describes exactly the control flow of `graph`.
///
/// The tree must contain every block reachable from the entry except the rethrow
/// block, each once; every block must reach the same successors; every catch
/// clause must start at its handler; and every block that can throw must dispatch
/// each exception class to the same handler. Exceptions sent to the rethrow block
/// count as leaving the method.
///
/// # Errors
///
/// Returns [`crate::Error::InternalConsistency`] describing the first difference.
pub fn check_round_trip(graph: &MethodGraph, tree: &Statement, oracle: &dyn ClassOracle) -> Result<()> {
    let linear = linearize(tree)?;

    let mut expected = reachable(graph, graph.entry());
    if let Some(rethrow) = graph.rethrow() {
        expected.remove(rethrow);
    }
    if let Some(missing) = expected.iter().find(|b| !linear.edges.contains_key(b)) {
        return Err(consistency_error!("{} is missing from the statement tree", missing));
    }
    if let Some(extra) = linear.edges.keys().find(|&&b| !expected.contains(b)) {
        return Err(consistency_error!("{} is in the statement tree but not reachable", extra));
    }

    for (&block, edges) in &linear.edges {
        let find = |kind: Edge| edges.iter().find(|(k, _)| *k == kind).and_then(|(_, t)| *t);
        let ok = match &graph.block(block).terminator {
            Terminator::Goto(target) => edges.len() == 1 && find(Edge::Next) == Some(*target),
            Terminator::Return(_) | Terminator::Throw(_) => edges.iter().all(|(k, _)| *k == Edge::Next),
            Terminator::If {
                taken, fallthrough, ..
            } => find(Edge::Taken) == Some(*taken) && find(Edge::Fallthrough) == Some(*fallthrough),
            Terminator::Switch { cases, default, .. } => {
                let case_edges = edges.iter().filter(|(k, _)| matches!(k, Edge::Case(_))).count();
                case_edges == cases.len()
                    && cases.iter().all(|&(key, target)| find(Edge::Case(key)) == Some(target))
                    && find(Edge::Default) == Some(*default)
            }
            Terminator::JsrCall { .. } | Terminator::Ret { .. } => false,
        };
        if !ok {
            return Err(consistency_error!(
                "control leaving {} differs between graph and tree: {:?}",
                block,
                edges
            ));
        }
    }

    for &(handler, start) in &linear.catches {
        if start != Some(handler) {
            return Err(consistency_error!(
                "catch clause for {} starts at {:?}",
                handler,
                start
            ));
        }
    }

    for block in expected.iter() {
        let edges = graph_dispatch(graph, block);
        if edges.is_empty() && !graph.throws(block) {
            continue;
        }
        let clauses = linear.handlers.get(&block).map(Vec::as_slice).unwrap_or_default();
        let mut tree_edges = Vec::with_capacity(clauses.len());
        for (set, target) in clauses {
            let Some(target) = target else {
                return Err(consistency_error!("a catch clause around {} leaves the method", block));
            };
            tree_edges.push((set, *target));
        }
        let wanted = effective_dispatch(oracle, edges);
        let actual = effective_dispatch(oracle, tree_edges);
        if !same_dispatch(oracle, &wanted, &actual) {
            return Err(consistency_error!(
                "exceptions thrown in {} are dispatched differently by the tree",
                block
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{ClassHierarchy, Cond},
        ir::{GraphBuilder, VarType},
        structuring::CatchClause,
        utils::graph::NodeId,
    };

    fn diamond() -> (MethodGraph, [BlockId; 4]) {
        let mut b = GraphBuilder::new("diamond");
        let x = b.input(VarType::Int);
        let blocks = b.blocks::<4>();
        let [entry, left, right, exit] = blocks;
        let zero = b.int(0);
        b.branch(entry, Cond::Lt, x, zero, left, right);
        b.goto(left, exit);
        b.goto(right, exit);
        b.ret(exit, None);
        (b.finish(), blocks)
    }

    #[test]
    fn test_if_with_breaks_round_trips() {
        let (graph, [entry, left, right, exit]) = diamond();
        let tree = Statement::scope(vec![
            Statement::Scope {
                label: Some(Label(0)),
                body: vec![Statement::If {
                    block: entry,
                    then_branch: Box::new(Statement::scope(vec![
                        Statement::Block(left),
                        Statement::Break(Label(0)),
                    ])),
                    else_branch: Box::new(Statement::scope(vec![Statement::Block(right)])),
                }],
            },
            Statement::Block(exit),
        ]);
        let oracle = ClassHierarchy::with_java_lang();
        check_round_trip(&graph, &tree, &oracle).unwrap();

        let linear = linearize(&tree).unwrap();
        assert_eq!(linear.edges[&left], vec![(Edge::Next, Some(exit))]);
        assert_eq!(linear.edges[&exit], vec![(Edge::Next, None)]);
    }

    #[test]
    fn test_wrong_successor_is_reported() {
        let (graph, [entry, left, right, exit]) = diamond();
        let tree = Statement::scope(vec![
            Statement::If {
                block: entry,
                then_branch: Box::new(Statement::scope(vec![Statement::Block(right)])),
                else_branch: Box::new(Statement::scope(vec![Statement::Block(left)])),
            },
            Statement::Block(exit),
        ]);
        let oracle = ClassHierarchy::with_java_lang();
        assert!(check_round_trip(&graph, &tree, &oracle).is_err());
    }

    #[test]
    fn test_break_outside_its_scope_is_rejected() {
        let b = NodeId::new;
        let tree = Statement::scope(vec![
            Statement::Scope {
                label: Some(Label(1)),
                body: vec![],
            },
            Statement::Block(b(0)),
            Statement::Break(Label(1)),
        ]);
        assert!(linearize(&tree).is_err());
    }

    #[test]
    fn test_empty_loop_is_rejected() {
        let tree = Statement::While {
            label: Label(0),
            body: vec![],
        };
        assert!(linearize(&tree).is_err());
    }

    #[test]
    fn test_switch_case_falls_into_next_case() {
        let b = NodeId::new;
        let tree = Statement::Switch {
            block: b(0),
            cases: vec![
                crate::structuring::SwitchCase {
                    keys: vec![1],
                    is_default: false,
                    body: vec![],
                },
                crate::structuring::SwitchCase {
                    keys: vec![2],
                    is_default: true,
                    body: vec![Statement::Block(b(2))],
                },
            ],
        };
        let linear = linearize(&tree).unwrap();
        assert_eq!(
            linear.edges[&b(0)],
            vec![
                (Edge::Case(1), Some(b(2))),
                (Edge::Case(2), Some(b(2))),
                (Edge::Default, Some(b(2)))
            ]
        );
    }

    #[test]
    fn test_catch_clauses_are_listed_innermost_first() {
        let b = NodeId::new;
        let clause = |class: &str, handler: usize| CatchClause {
            catches: ExceptionSet::of(class),
            handler: b(handler),
            body: vec![Statement::Block(b(handler))],
        };
        let tree = Statement::Try {
            body: Box::new(Statement::Try {
                body: Box::new(Statement::scope(vec![Statement::Block(b(0))])),
                catches: vec![clause("java/lang/RuntimeException", 1)],
            }),
            catches: vec![clause("java/lang/Exception", 2)],
        };
        let linear = linearize(&tree).unwrap();
        let handlers = &linear.handlers[&b(0)];
        assert_eq!(handlers.len(), 2);
        assert_eq!(handlers[0].1, Some(b(1)));
        assert_eq!(handlers[1].1, Some(b(2)));
        // The inner catch clause is still protected by the outer try
        assert_eq!(linear.handlers[&b(1)].len(), 1);
        assert!(linear.handlers[&b(2)].is_empty());
        assert_eq!(linear.catches, vec![(b(2), Some(b(2))), (b(1), Some(b(1)))]);
    }
}
