//! Syntax tree emitted by the parser.

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
    Plus,
}

/// Binary operators other than the short-circuiting ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
}

impl BinaryOp {
    pub(crate) fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "%" => Self::Rem,
            "<" => Self::Lt,
            ">" => Self::Gt,
            "<=" => Self::Le,
            ">=" => Self::Ge,
            "==" => Self::Eq,
            "!=" => Self::Ne,
            "===" => Self::StrictEq,
            "!==" => Self::StrictNe,
            _ => return None,
        })
    }
}

/// Short-circuiting operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Literal leaves.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

/// Expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Identifier(String),
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
}

impl Expr {
    /// A settable location: an identifier, or a member/index chain rooted at one.
    #[must_use]
    pub fn is_assignable(&self) -> bool {
        match self {
            Self::Identifier(_) => true,
            Self::Member { object, .. } | Self::Index { object, .. } => object.is_assignable(),
            _ => false,
        }
    }

    /// Length of the longest root-to-leaf path. Walks with an explicit
    /// stack, so it is safe on trees too deep to recurse over.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(self, 1)];
        while let Some((expr, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            expr.for_each_child(|child| stack.push((child, depth + 1)));
        }
        deepest
    }

    fn for_each_child<'a>(&'a self, mut visit: impl FnMut(&'a Expr)) {
        match self {
            Self::Literal(_) | Self::Identifier(_) => {}
            Self::Member { object, .. } => visit(object),
            Self::Index { object, index } => {
                visit(object);
                visit(index);
            }
            Self::Call { callee, args } => {
                visit(callee);
                args.iter().for_each(visit);
            }
            Self::Array(items) => items.iter().for_each(visit),
            Self::Object(entries) => entries.iter().for_each(|(_, v)| visit(v)),
            Self::Unary { operand, .. } => visit(operand),
            Self::Binary { left, right, .. } | Self::Logical { left, right, .. } => {
                visit(left);
                visit(right);
            }
            Self::Conditional {
                test,
                consequent,
                alternate,
            } => {
                visit(test);
                visit(consequent);
                visit(alternate);
            }
        }
    }

    /// Array or object literal at the top level.
    #[must_use]
    pub fn is_literal_composite(&self) -> bool {
        matches!(self, Self::Array(_) | Self::Object(_))
    }

    /// No identifier or call anywhere in the tree.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        match self {
            Self::Literal(_) => true,
            Self::Identifier(_) | Self::Call { .. } => false,
            Self::Member { object, .. } => object.is_constant(),
            Self::Index { object, index } => object.is_constant() && index.is_constant(),
            Self::Array(items) => items.iter().all(Expr::is_constant),
            Self::Object(entries) => entries.iter().all(|(_, v)| v.is_constant()),
            Self::Unary { operand, .. } => operand.is_constant(),
            Self::Binary { left, right, .. } | Self::Logical { left, right, .. } => {
                left.is_constant() && right.is_constant()
            }
            Self::Conditional {
                test,
                consequent,
                alternate,
            } => test.is_constant() && consequent.is_constant() && alternate.is_constant(),
        }
    }
}
