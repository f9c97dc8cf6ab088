// Expression syntax tree

use serde_json::Value;

/// A parsed expression.
///
/// Built once by [`super::parser::parse`] when a definition is compiled and
/// then evaluated any number of times against request scopes.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A constant value such as `1337`, `'text'` or `nil`
    Literal(Value),

    /// `$.a.b.c` - a path rooted at the scope. An empty path is the whole scope.
    ScopeRef(Vec<String>),

    /// A bare identifier, resolved as a top-level scope key
    Identifier(String),

    /// `target.field`
    Member { target: Box<Expr>, field: String },

    /// `target[key]` on objects (string key) or arrays (integer index)
    Index { target: Box<Expr>, key: Box<Expr> },

    /// `name(args)` or `namespace.name(args)`
    Call { function: String, args: Vec<Expr> },

    Unary { op: UnaryOp, operand: Box<Expr> },

    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    /// `condition ? then : otherwise`
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Remainder => "%",
        }
    }
}

impl Expr {
    /// Collect every function name referenced by this expression.
    ///
    /// Used at compile time so an unknown function fails the definition load
    /// instead of every request that reaches it.
    pub fn function_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) | Expr::ScopeRef(_) | Expr::Identifier(_) => {}
            Expr::Member { target, .. } => target.function_names(names),
            Expr::Index { target, key } => {
                target.function_names(names);
                key.function_names(names);
            }
            Expr::Call { function, args } => {
                names.push(function);
                for arg in args {
                    arg.function_names(names);
                }
            }
            Expr::Unary { operand, .. } => operand.function_names(names),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.function_names(names);
                rhs.function_names(names);
            }
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                condition.function_names(names);
                then.function_names(names);
                otherwise.function_names(names);
            }
        }
    }
}
