//! The structured statement tree handed to the source printer.
//!
//! Leaves reference blocks of the final [`crate::ir::MethodGraph`]. A block ending
//! in `goto`, `return` or `athrow` appears as [`Statement::Block`]; a block ending
//! in a two-way or multi-way branch is the head of [`Statement::If`] or
//! [`Statement::Switch`]. Control continues with the next statement of the
//! enclosing sequence unless a [`Statement::Break`] or [`Statement::Continue`]
//! says otherwise:
//!
//! - falling off the end of a [`Statement::While`] body starts the next iteration
//! - falling off the end of a switch case enters the next case
//! - falling off anything else continues after the enclosing statement

use std::fmt;

use crate::{ir::BlockId, structuring::ExceptionSet};

/// Name of a labeled [`Statement::Scope`] or [`Statement::While`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// One `case` group of a [`Statement::Switch`].
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    /// Keys selecting this case, ascending
    pub keys: Vec<i32>,
    /// Set if the case is also the `default` target
    pub is_default: bool,
    /// Statements of the case
    pub body: Vec<Statement>,
}

/// One `catch` clause of a [`Statement::Try`].
#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    /// Exceptions caught by the clause
    pub catches: ExceptionSet,
    /// Handler block receiving the exception
    pub handler: BlockId,
    /// Statements of the clause, starting at `handler`
    pub body: Vec<Statement>,
}

/// A structured statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// The operations of a block ending in `goto`, `return` or `athrow`
    Block(BlockId),
    /// A statement sequence, optionally named as a `break` target
    Scope {
        /// Label for `break`, `None` if nothing breaks out of the scope
        label: Option<Label>,
        /// Statements in order
        body: Vec<Statement>,
    },
    /// `while (true)` loop
    While {
        /// Label for `break` and `continue`
        label: Label,
        /// Loop body
        body: Vec<Statement>,
    },
    /// Two-way branch on the condition ending `block`
    If {
        /// Block holding the condition
        block: BlockId,
        /// Statements run when the condition holds
        then_branch: Box<Statement>,
        /// Statements run when it does not
        else_branch: Box<Statement>,
    },
    /// Multi-way branch on the value ending `block`
    Switch {
        /// Block holding the scrutinee
        block: BlockId,
        /// Case groups in bytecode order of the blocks they start at. A case
        /// whose body does not end in a jump falls into the next one.
        cases: Vec<SwitchCase>,
    },
    /// `try` with its catch clauses in dispatch order
    Try {
        /// Protected statements
        body: Box<Statement>,
        /// Clauses, the first matching one runs
        catches: Vec<CatchClause>,
    },
    /// Continues after the statement labeled with the label
    Break(Label),
    /// Starts the next iteration of the loop labeled with the label
    Continue(Label),
}

impl Statement {
    /// An unlabeled scope holding `body`.
    #[must_use]
    pub fn scope(body: Vec<Statement>) -> Statement {
        Statement::Scope { label: None, body }
    }

    /// Direct child statements in execution order of their sequences.
    #[must_use]
    pub fn children(&self) -> Vec<&Statement> {
        match self {
            Statement::Block(_) | Statement::Break(_) | Statement::Continue(_) => Vec::new(),
            Statement::Scope { body, .. } | Statement::While { body, .. } => body.iter().collect(),
            Statement::If {
                then_branch,
                else_branch,
                ..
            } => vec![then_branch.as_ref(), else_branch.as_ref()],
            Statement::Switch { cases, .. } => cases.iter().flat_map(|c| c.body.iter()).collect(),
            Statement::Try { body, catches } => std::iter::once(body.as_ref())
                .chain(catches.iter().flat_map(|c| c.body.iter()))
                .collect(),
        }
    }

    /// Iterates over the statement and all statements nested in it, in preorder.
    #[must_use]
    pub fn iter(&self) -> StatementIter<'_> {
        StatementIter { stack: vec![self] }
    }

    /// Blocks referenced by the tree, in preorder.
    #[must_use]
    pub fn blocks(&self) -> Vec<BlockId> {
        self.iter()
            .filter_map(|s| match s {
                Statement::Block(b) | Statement::If { block: b, .. } | Statement::Switch { block: b, .. } => {
                    Some(*b)
                }
                _ => None,
            })
            .collect()
    }
}

/// Preorder iterator returned by [`Statement::iter`].
pub struct StatementIter<'t> {
    stack: Vec<&'t Statement>,
}

impl<'t> Iterator for StatementIter<'t> {
    type Item = &'t Statement;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        self.stack.extend(next.children().into_iter().rev());
        Some(next)
    }
}

enum Line<'t> {
    Open(&'t Statement, usize),
    Text(String, usize),
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack = vec![Line::Open(self, 0)];
        while let Some(line) = stack.pop() {
            let (statement, depth) = match line {
                Line::Text(text, depth) => {
                    writeln!(f, "{:width$}{}", "", text, width = depth * 2)?;
                    continue;
                }
                Line::Open(statement, depth) => (statement, depth),
            };
            let pad = depth * 2;
            let mut nested: Vec<Line<'_>> = Vec::new();
            match statement {
                Statement::Block(block) => writeln!(f, "{:pad$}{}", "", block)?,
                Statement::Break(label) => writeln!(f, "{:pad$}break {}", "", label)?,
                Statement::Continue(label) => writeln!(f, "{:pad$}continue {}", "", label)?,
                Statement::Scope { label, body } => {
                    match label {
                        Some(label) => writeln!(f, "{:pad$}{}: {{", "", label)?,
                        None => writeln!(f, "{:pad$}{{", "")?,
                    }
                    nested.extend(body.iter().map(|s| Line::Open(s, depth + 1)));
                    nested.push(Line::Text("}".into(), depth));
                }
                Statement::While { label, body } => {
                    writeln!(f, "{:pad$}{}: while (true) {{", "", label)?;
                    nested.extend(body.iter().map(|s| Line::Open(s, depth + 1)));
                    nested.push(Line::Text("}".into(), depth));
                }
                Statement::If {
                    block,
                    then_branch,
                    else_branch,
                } => {
                    writeln!(f, "{:pad$}if ({})", "", block)?;
                    nested.push(Line::Open(then_branch, depth + 1));
                    nested.push(Line::Text("else".into(), depth));
                    nested.push(Line::Open(else_branch, depth + 1));
                }
                Statement::Switch { block, cases } => {
                    writeln!(f, "{:pad$}switch ({}) {{", "", block)?;
                    for case in cases {
                        let mut heads: Vec<String> = case.keys.iter().map(|k| format!("case {k}:")).collect();
                        if case.is_default {
                            heads.push("default:".into());
                        }
                        nested.push(Line::Text(heads.join(" "), depth + 1));
                        nested.extend(case.body.iter().map(|s| Line::Open(s, depth + 2)));
                    }
                    nested.push(Line::Text("}".into(), depth));
                }
                Statement::Try { body, catches } => {
                    writeln!(f, "{:pad$}try", "")?;
                    nested.push(Line::Open(body, depth + 1));
                    for clause in catches {
                        nested.push(Line::Text(
                            format!("catch ({}) -> {} {{", clause.catches, clause.handler),
                            depth,
                        ));
                        nested.extend(clause.body.iter().map(|s| Line::Open(s, depth + 1)));
                        nested.push(Line::Text("}".into(), depth));
                    }
                }
            }
            stack.extend(nested.into_iter().rev());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::NodeId;

    #[test]
    fn test_preorder_visits_every_statement() {
        let b = NodeId::new;
        let tree = Statement::scope(vec![
            Statement::If {
                block: b(0),
                then_branch: Box::new(Statement::scope(vec![Statement::Block(b(1))])),
                else_branch: Box::new(Statement::scope(vec![Statement::Block(b(2))])),
            },
            Statement::Block(b(3)),
        ]);
        assert_eq!(tree.blocks(), vec![b(0), b(1), b(2), b(3)]);
        assert_eq!(tree.iter().count(), 6);
    }

    #[test]
    fn test_display_indents_nested_statements() {
        let b = NodeId::new;
        let tree = Statement::While {
            label: Label(0),
            body: vec![Statement::Block(b(1)), Statement::Continue(Label(0))],
        };
        let text = tree.to_string();
        assert!(text.starts_with("L0: while (true) {"));
        assert!(text.contains("  continue L0"));
        assert!(text.trim_end().ends_with('}'));
    }
}
