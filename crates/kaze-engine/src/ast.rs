//! SQL statement and expression trees.
//!
//! This module is the contract between the engine and the external
//! lexer/parser: the parser produces these trees, the executors consume
//! them. The constructor helpers exist so tests and embedders can build
//! statements directly.

use kaze_common::types::DataType;

// ---------------------------------------------------------------------------
// Literals and expressions
// ---------------------------------------------------------------------------

/// A literal as it appears in SQL text.
///
/// Numeric literals keep their text form; they are parsed against the
/// target column's type at evaluation time so that range checks can apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(String),
    Float(String),
    String(String),
}

impl Literal {
    pub fn int(value: i64) -> Self {
        Literal::Integer(value.to_string())
    }

    pub fn float(value: f64) -> Self {
        Literal::Float(value.to_string())
    }

    pub fn string(value: impl Into<String>) -> Self {
        Literal::String(value.into())
    }
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Null => write!(f, "NULL"),
            Literal::Boolean(true) => write!(f, "TRUE"),
            Literal::Boolean(false) => write!(f, "FALSE"),
            Literal::Integer(text) | Literal::Float(text) => write!(f, "{text}"),
            Literal::String(text) => write!(f, "'{text}'"),
        }
    }
}

/// A possibly-qualified column reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub column: String,
}

impl ColumnRef {
    pub fn bare(column: impl Into<String>) -> Self {
        Self {
            table: None,
            column: column.into(),
        }
    }

    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            column: column.into(),
        }
    }
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{table}.{}", self.column),
            None => write!(f, "{}", self.column),
        }
    }
}

/// Binary operators in predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            BinaryOp::Equal => "=",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        };
        write!(f, "{text}")
    }
}

/// An expression tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    Column(ColumnRef),
    Not(Box<Expression>),
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    NullTest {
        operand: Box<Expression>,
        negated: bool,
    },
}

impl Expression {
    pub fn literal(literal: Literal) -> Self {
        Expression::Literal(literal)
    }

    pub fn column(column: impl Into<String>) -> Self {
        Expression::Column(ColumnRef::bare(column))
    }

    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expression::Column(ColumnRef::qualified(table, column))
    }

    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expression, right: Expression) -> Self {
        Self::binary(BinaryOp::Equal, left, right)
    }

    pub fn and(left: Expression, right: Expression) -> Self {
        Self::binary(BinaryOp::And, left, right)
    }

    pub fn or(left: Expression, right: Expression) -> Self {
        Self::binary(BinaryOp::Or, left, right)
    }

    pub fn negate(operand: Expression) -> Self {
        Expression::Not(Box::new(operand))
    }

    pub fn is_null(operand: Expression) -> Self {
        Expression::NullTest {
            operand: Box::new(operand),
            negated: false,
        }
    }

    pub fn is_not_null(operand: Expression) -> Self {
        Expression::NullTest {
            operand: Box::new(operand),
            negated: true,
        }
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Literal(literal) => write!(f, "{literal}"),
            Expression::Column(column) => write!(f, "{column}"),
            Expression::Not(inner) => write!(f, "NOT ({inner})"),
            Expression::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            Expression::NullTest { operand, negated } => {
                write!(f, "{operand} IS {}NULL", if *negated { "NOT " } else { "" })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// DML statements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl std::fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        };
        write!(f, "{text}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateCall {
    pub function: AggregateFunction,
    pub distinct: bool,
    pub star: bool,
    pub column: Option<ColumnRef>,
}

impl AggregateCall {
    /// `COUNT(*)`.
    pub fn count_star() -> Self {
        Self {
            function: AggregateFunction::Count,
            distinct: false,
            star: true,
            column: None,
        }
    }

    /// An aggregate over one column.
    pub fn over(function: AggregateFunction, column: ColumnRef) -> Self {
        Self {
            function,
            distinct: false,
            star: false,
            column: Some(column),
        }
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Star,
    Column(ColumnRef),
    Aggregate(AggregateCall),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByTerm {
    pub column: ColumnRef,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub table: String,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn named(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: None,
        }
    }

    pub fn aliased(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: Some(alias.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JoinClause {
    pub table: TableRef,
    pub condition: Option<Expression>,
}

#[derive(Debug, Clone)]
pub struct SelectStatement {
    pub from: TableRef,
    pub joins: Vec<JoinClause>,
    pub distinct: bool,
    /// Empty is treated as `*`.
    pub items: Vec<SelectItem>,
    pub where_clause: Option<Expression>,
    pub order_by: Vec<OrderByTerm>,
    pub limit: Option<i64>,
}

impl SelectStatement {
    /// `SELECT * FROM table`.
    pub fn from_table(table: impl Into<String>) -> Self {
        Self {
            from: TableRef::named(table),
            joins: Vec::new(),
            distinct: false,
            items: Vec::new(),
            where_clause: None,
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn columns(mut self, names: &[&str]) -> Self {
        self.items = names
            .iter()
            .map(|n| SelectItem::Column(ColumnRef::bare(*n)))
            .collect();
        self
    }

    pub fn filter(mut self, predicate: Expression) -> Self {
        self.where_clause = Some(predicate);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order_by.push(OrderByTerm {
            column: ColumnRef::bare(column),
            ascending,
        });
        self
    }
}

#[derive(Debug, Clone)]
pub struct InsertStatement {
    pub table: String,
    /// Optional explicit column list; must still cover every column.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Literal>>,
}

impl InsertStatement {
    pub fn new(table: impl Into<String>, rows: Vec<Vec<Literal>>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            rows,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpdateStatement {
    pub table: String,
    pub assignments: Vec<(String, Expression)>,
    pub where_clause: Option<Expression>,
}

#[derive(Debug, Clone)]
pub struct DeleteStatement {
    pub table: String,
    pub where_clause: Option<Expression>,
}

#[derive(Debug, Clone)]
pub struct TruncateStatement {
    pub table: String,
}

// ---------------------------------------------------------------------------
// DDL statements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnConstraintAst {
    pub not_null: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub default_literal: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefAst {
    pub name: String,
    pub data_type: DataType,
    /// Declared length for VARCHAR(n); 0 otherwise.
    pub length: u32,
    pub constraint: ColumnConstraintAst,
}

impl ColumnDefAst {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            length: 0,
            constraint: ColumnConstraintAst::default(),
        }
    }

    pub fn varchar(name: impl Into<String>, length: u32) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::Varchar,
            length,
            constraint: ColumnConstraintAst::default(),
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.constraint.primary_key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.constraint.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.constraint.unique = true;
        self
    }

    pub fn default_literal(mut self, literal: impl Into<String>) -> Self {
        self.constraint.default_literal = Some(literal.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct CreateTableStatement {
    pub table: String,
    pub columns: Vec<ColumnDefAst>,
}

impl CreateTableStatement {
    pub fn new(table: impl Into<String>, columns: Vec<ColumnDefAst>) -> Self {
        Self {
            table: table.into(),
            columns,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DropTableStatement {
    pub table: String,
    pub if_exists: bool,
    pub cascade: bool,
}

#[derive(Debug, Clone)]
pub struct CreateIndexStatement {
    pub name: String,
    pub unique: bool,
    pub table: String,
    pub columns: Vec<String>,
    pub if_not_exists: bool,
}

#[derive(Debug, Clone)]
pub struct DropIndexStatement {
    pub name: String,
    pub if_exists: bool,
}

#[derive(Debug, Clone)]
pub enum AlterTableAction {
    AddColumn(ColumnDefAst),
    DropColumn(String),
}

#[derive(Debug, Clone)]
pub struct AlterTableStatement {
    pub table: String,
    pub action: AlterTableAction,
}
