use std::collections::BTreeSet;
use std::mem;

/// Byte range of an expression inside the script source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn to(self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Sequence,
    And,
    Or,
    Equal,
    NotEqual,
    Concat,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Sequence => ";",
            Self::And => "&&",
            Self::Or => "||",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Concat => "+",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(String),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Not(Box<Expr>),
    If {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn literal(value: impl Into<String>, span: Span) -> Self {
        Self {
            kind: ExprKind::Literal(value.into()),
            span,
        }
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>, span: Span) -> Self {
        Self {
            kind: ExprKind::Call {
                name: name.into(),
                args,
            },
            span,
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        let span = lhs.span.to(rhs.span);
        Self {
            kind: ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            span,
        }
    }

    /// Names of every function the expression calls.
    pub fn called_functions(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        let mut pending = vec![self];
        while let Some(expr) = pending.pop() {
            match &expr.kind {
                ExprKind::Literal(_) => {}
                ExprKind::Call { name, args } => {
                    names.insert(name.as_str());
                    pending.extend(args.iter());
                }
                ExprKind::Binary { lhs, rhs, .. } => {
                    pending.push(lhs);
                    pending.push(rhs);
                }
                ExprKind::Not(operand) => pending.push(operand),
                ExprKind::If {
                    condition,
                    then_branch,
                    else_branch,
                } => {
                    pending.push(condition);
                    pending.push(then_branch);
                    if let Some(else_branch) = else_branch {
                        pending.push(else_branch);
                    }
                }
            }
        }
        names
    }

    /// Top-level statements, i.e. the operands of the `;` chain.
    pub fn statements(&self) -> Vec<&Expr> {
        let mut statements = Vec::new();
        let mut current = self;
        while let ExprKind::Binary {
            op: BinaryOp::Sequence,
            lhs,
            rhs,
        } = &current.kind
        {
            statements.push(rhs.as_ref());
            current = lhs.as_ref();
        }
        statements.push(current);
        statements.reverse();
        statements
    }
}

impl Drop for Expr {
    // Statement lists are left-leaning trees as deep as the script is long;
    // tear them down without recursing.
    fn drop(&mut self) {
        let mut pending = Vec::new();
        take_children(&mut self.kind, &mut pending);
        while let Some(mut child) = pending.pop() {
            take_children(&mut child.kind, &mut pending);
        }
    }
}

fn take_children(kind: &mut ExprKind, pending: &mut Vec<Expr>) {
    if matches!(kind, ExprKind::Literal(_)) {
        return;
    }
    match mem::replace(kind, ExprKind::Literal(String::new())) {
        ExprKind::Literal(_) => {}
        ExprKind::Call { args, .. } => pending.extend(args),
        ExprKind::Binary { lhs, rhs, .. } => {
            pending.push(*lhs);
            pending.push(*rhs);
        }
        ExprKind::Not(operand) => pending.push(*operand),
        ExprKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            pending.push(*condition);
            pending.push(*then_branch);
            if let Some(else_branch) = else_branch {
                pending.push(*else_branch);
            }
        }
    }
}
