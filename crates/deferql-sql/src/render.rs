//! Statement text for a compiled SQL program
//!
//! Hoisted relations become a leading `WITH` clause in program order, so a
//! common table expression only refers to the ones before it.

use crate::ast::{Expr, FromClause, OrderBy, Query, Relation, SelectItem, Source, Sql};
use crate::dialect::Dialect;
use crate::types::SqlTypes;
use deferql_compile::{NativeProgram, SharedFragment, TypeMapper};
use deferql_ir::{
    BinaryOp, DataType, Error, FrameBound, FrameMode, FrameSpec, IntervalUnit, JoinKind, Result, TypeKind,
    UnaryOp, Value,
};

macro_rules! fmt {
    ($f:expr, $( $fragments:expr )*) => {{
        $(
            $fragments.to_sql($f)?;
        )*
    }};
}

/// Render `program` as a single `SELECT` statement in `dialect`.
pub fn to_sql(program: &NativeProgram<Sql>, dialect: Dialect) -> Result<String> {
    let mut f = Formatter {
        dst: String::new(),
        dialect,
    };
    if !program.shared.is_empty() {
        fmt!(&mut f, "WITH " Comma(program.shared.iter().map(Cte)) " ");
    }
    match &program.root {
        Sql::Rel(rel) => fmt!(&mut f, Statement(rel)),
        Sql::Expr(expr) => {
            if references_columns(expr) {
                return Err(Error::Invariant(
                    "a value expression over a table renders only inside a relation".to_string(),
                ));
            }
            fmt!(&mut f, "SELECT " expr " AS " Ident("value"));
        }
    }
    tracing::debug!(%dialect, len = f.dst.len(), "Rendered SQL");
    Ok(f.dst)
}

/// Render one value expression, as it appears inside a statement.
pub fn expr_to_sql(expr: &Expr, dialect: Dialect) -> Result<String> {
    let mut f = Formatter {
        dst: String::new(),
        dialect,
    };
    fmt!(&mut f, expr);
    Ok(f.dst)
}

struct Formatter {
    dst: String,
    dialect: Dialect,
}

trait ToSql {
    fn to_sql(self, f: &mut Formatter) -> Result<()>;
}

impl ToSql for &str {
    fn to_sql(self, f: &mut Formatter) -> Result<()> {
        f.dst.push_str(self);
        Ok(())
    }
}

impl ToSql for String {
    fn to_sql(self, f: &mut Formatter) -> Result<()> {
        f.dst.push_str(&self);
        Ok(())
    }
}

struct Ident<'a>(&'a str);

impl ToSql for Ident<'_> {
    fn to_sql(self, f: &mut Formatter) -> Result<()> {
        let quoted = f.dialect.quote_ident(self.0);
        f.dst.push_str(&quoted);
        Ok(())
    }
}

/// Comma delimited
struct Comma<L>(L);

impl<L> ToSql for Comma<L>
where
    L: IntoIterator,
    L::Item: ToSql,
{
    fn to_sql(self, f: &mut Formatter) -> Result<()> {
        let mut s = "";
        for item in self.0 {
            fmt!(f, s item);
            s = ", ";
        }
        Ok(())
    }
}

/// `AND` delimited
struct Conjunction<'a>(&'a [Expr]);

impl ToSql for Conjunction<'_> {
    fn to_sql(self, f: &mut Formatter) -> Result<()> {
        let mut s = "";
        for expr in self.0 {
            fmt!(f, s expr);
            s = " AND ";
        }
        Ok(())
    }
}

struct Cte<'a>(&'a SharedFragment<Sql>);

impl ToSql for Cte<'_> {
    fn to_sql(self, f: &mut Formatter) -> Result<()> {
        let Sql::Rel(rel) = &self.0.fragment else {
            return Err(Error::Invariant(format!(
                "shared fragment {} is not a relation",
                self.0.name
            )));
        };
        fmt!(f, Ident(&self.0.name) " AS (" Statement(rel) ")");
        Ok(())
    }
}

/// A relation in statement position.
struct Statement<'a>(&'a Relation);

impl ToSql for Statement<'_> {
    fn to_sql(self, f: &mut Formatter) -> Result<()> {
        match self.0 {
            Relation::Named(name) => fmt!(f, "SELECT * FROM " Ident(name)),
            Relation::Query(query) => fmt!(f, &**query),
        }
        Ok(())
    }
}

impl ToSql for &Source {
    fn to_sql(self, f: &mut Formatter) -> Result<()> {
        match &self.rel {
            Relation::Named(name) => fmt!(f, Ident(name)),
            Relation::Query(query) => fmt!(f, "(" query ")"),
        }
        fmt!(f, " AS " self.alias.as_str());
        Ok(())
    }
}

impl ToSql for &Query {
    fn to_sql(self, f: &mut Formatter) -> Result<()> {
        fmt!(f, "SELECT ");
        if self.select.is_empty() {
            fmt!(f, "*");
        } else {
            fmt!(f, Comma(&self.select));
        }
        let from = &self.from;
        fmt!(f, " FROM " from);
        if !self.filter.is_empty() {
            fmt!(f, " WHERE " Conjunction(&self.filter));
        }
        if !self.group_by.is_empty() {
            fmt!(f, " GROUP BY " Comma(&self.group_by));
        }
        if !self.order_by.is_empty() {
            fmt!(f, " ORDER BY " Comma(&self.order_by));
        }
        if let Some(limit) = self.limit {
            fmt!(f, " LIMIT " limit.to_string());
        }
        if self.offset > 0 {
            fmt!(f, " OFFSET " self.offset.to_string());
        }
        Ok(())
    }
}

impl ToSql for &FromClause {
    fn to_sql(self, f: &mut Formatter) -> Result<()> {
        match self {
            FromClause::Source(source) => fmt!(f, source),
            FromClause::Join {
                kind,
                left,
                right,
                on,
            } => {
                let keyword = match kind {
                    JoinKind::Inner => "INNER JOIN",
                    JoinKind::Left => "LEFT OUTER JOIN",
                    JoinKind::Right => "RIGHT OUTER JOIN",
                    JoinKind::Outer => "FULL OUTER JOIN",
                    JoinKind::Semi | JoinKind::Anti => {
                        return Err(Error::Invariant(format!(
                            "{kind:?} joins render as EXISTS predicates"
                        )))
                    }
                };
                fmt!(f, left " " keyword " " right " ON ");
                if on.is_empty() {
                    fmt!(f, "TRUE");
                } else {
                    fmt!(f, Conjunction(on));
                }
            }
        }
        Ok(())
    }
}

impl ToSql for &SelectItem {
    fn to_sql(self, f: &mut Formatter) -> Result<()> {
        fmt!(f, &self.expr);
        if let Some(alias) = &self.alias {
            fmt!(f, " AS " Ident(alias));
        }
        Ok(())
    }
}

impl ToSql for &OrderBy {
    fn to_sql(self, f: &mut Formatter) -> Result<()> {
        fmt!(f, &self.expr);
        if self.descending {
            fmt!(f, " DESC");
        }
        Ok(())
    }
}

impl ToSql for &Box<Expr> {
    fn to_sql(self, f: &mut Formatter) -> Result<()> {
        let expr: &Expr = self;
        expr.to_sql(f)
    }
}

impl ToSql for &Box<Query> {
    fn to_sql(self, f: &mut Formatter) -> Result<()> {
        let query: &Query = self;
        query.to_sql(f)
    }
}

fn binary_operator(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Eq => "=",
        BinaryOp::Ne => "<>",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::And => "AND",
        BinaryOp::Or => "OR",
        BinaryOp::Like => "LIKE",
        BinaryOp::ILike => "ILIKE",
    }
}

impl ToSql for &Expr {
    fn to_sql(self, f: &mut Formatter) -> Result<()> {
        match self {
            Expr::Column { qualifier, name } => fmt!(f, qualifier.as_str() "." Ident(name)),
            Expr::Wildcard { qualifier } => fmt!(f, qualifier.as_str() ".*"),
            Expr::Literal { value, dtype } => fmt!(f, Literal(value, dtype)),
            Expr::Cast { expr, to } => fmt!(f, "CAST(" expr " AS " to.cast_target() ")"),
            Expr::Binary { op, left, right } => {
                fmt!(f, "(" left " " binary_operator(*op) " " right ")")
            }
            Expr::Unary { op, expr } => match op {
                UnaryOp::Not => fmt!(f, "(NOT " expr ")"),
                UnaryOp::Negate => fmt!(f, "(-" expr ")"),
                UnaryOp::IsNull => fmt!(f, "(" expr " IS NULL)"),
                UnaryOp::NotNull => fmt!(f, "(" expr " IS NOT NULL)"),
            },
            Expr::Function { name, args } => fmt!(f, name.as_str() "(" Comma(args) ")"),
            Expr::Aggregate {
                name,
                args,
                distinct,
                filter,
            } => {
                fmt!(f, name.as_str() "(");
                if *distinct {
                    fmt!(f, "DISTINCT ");
                }
                if args.is_empty() {
                    fmt!(f, "*");
                } else {
                    fmt!(f, Comma(args));
                }
                fmt!(f, ")");
                if let Some(filter) = filter {
                    fmt!(f, " FILTER (WHERE " filter ")");
                }
            }
            Expr::Case { when, otherwise } => {
                fmt!(f, "CASE");
                for (condition, value) in when {
                    fmt!(f, " WHEN " condition " THEN " value);
                }
                if let Some(otherwise) = otherwise {
                    fmt!(f, " ELSE " otherwise);
                }
                fmt!(f, " END");
            }
            Expr::Window {
                func,
                partition_by,
                order_by,
                frame,
            } => {
                fmt!(f, &**func " OVER (");
                let mut s = "";
                if !partition_by.is_empty() {
                    fmt!(f, "PARTITION BY " Comma(partition_by));
                    s = " ";
                }
                if !order_by.is_empty() {
                    fmt!(f, s "ORDER BY " Comma(order_by));
                    s = " ";
                }
                if let Some(frame) = frame {
                    fmt!(f, s Frame(frame));
                }
                fmt!(f, ")");
            }
            Expr::Exists { negated, query } => {
                if *negated {
                    fmt!(f, "NOT ");
                }
                fmt!(f, "EXISTS (" query ")");
            }
        }
        Ok(())
    }
}

struct Frame<'a>(&'a FrameSpec);

impl ToSql for Frame<'_> {
    fn to_sql(self, f: &mut Formatter) -> Result<()> {
        let bound = |b: FrameBound| match b {
            FrameBound::UnboundedPreceding => "UNBOUNDED PRECEDING".to_string(),
            FrameBound::UnboundedFollowing => "UNBOUNDED FOLLOWING".to_string(),
            FrameBound::CurrentRow => "CURRENT ROW".to_string(),
            FrameBound::Preceding(n) => format!("{n} PRECEDING"),
            FrameBound::Following(n) => format!("{n} FOLLOWING"),
        };
        let mode = match self.0.mode {
            FrameMode::Rows => "ROWS",
            FrameMode::Range => "RANGE",
        };
        fmt!(f, mode " BETWEEN " bound(self.0.start) " AND " bound(self.0.end));
        Ok(())
    }
}

fn references_columns(expr: &Expr) -> bool {
    match expr {
        Expr::Column { .. } | Expr::Wildcard { .. } => true,
        Expr::Literal { .. } | Expr::Exists { .. } => false,
        Expr::Cast { expr, .. } | Expr::Unary { expr, .. } => references_columns(expr),
        Expr::Binary { left, right, .. } => references_columns(left) || references_columns(right),
        Expr::Function { args, .. } => args.iter().any(references_columns),
        Expr::Aggregate { args, filter, .. } => {
            args.iter().any(references_columns) || filter.as_deref().is_some_and(references_columns)
        }
        Expr::Case { when, otherwise } => {
            when.iter().any(|(c, v)| references_columns(c) || references_columns(v))
                || otherwise.as_deref().is_some_and(references_columns)
        }
        Expr::Window {
            func,
            partition_by,
            order_by,
            ..
        } => {
            references_columns(func)
                || partition_by.iter().any(references_columns)
                || order_by.iter().any(|o| references_columns(&o.expr))
        }
    }
}

// Literals

struct Literal<'a>(&'a Value, &'a DataType);

fn unrenderable(value: &Value, dialect: Dialect) -> Error {
    Error::Type(format!("{dialect} has no literal syntax for {value:?}"))
}

fn quoted(s: &str, dialect: Dialect) -> String {
    let escaped = s.replace('\'', "''");
    match dialect {
        Dialect::MySql => format!("'{}'", escaped.replace('\\', "\\\\")),
        Dialect::DuckDb | Dialect::Snowflake => format!("'{escaped}'"),
    }
}

fn decimal_text(digits: i128, scale: u8) -> String {
    let sign = if digits < 0 { "-" } else { "" };
    let magnitude = digits.unsigned_abs().to_string();
    let scale = usize::from(scale);
    if scale == 0 {
        return format!("{sign}{magnitude}");
    }
    let padded = format!("{magnitude:0>width$}", width = scale + 1);
    let (whole, fraction) = padded.split_at(padded.len() - scale);
    format!("{sign}{whole}.{fraction}")
}

fn interval_unit(unit: IntervalUnit) -> &'static str {
    match unit {
        IntervalUnit::Year => "YEAR",
        IntervalUnit::Quarter => "QUARTER",
        IntervalUnit::Month => "MONTH",
        IntervalUnit::Week => "WEEK",
        IntervalUnit::Day => "DAY",
        IntervalUnit::Hour => "HOUR",
        IntervalUnit::Minute => "MINUTE",
        IntervalUnit::Second => "SECOND",
        IntervalUnit::Millisecond => "MILLISECOND",
        IntervalUnit::Microsecond => "MICROSECOND",
        IntervalUnit::Nanosecond => "NANOSECOND",
    }
}

fn element_type(dtype: &DataType) -> DataType {
    match &dtype.kind {
        TypeKind::Array(element) => (**element).clone(),
        _ => DataType::null(),
    }
}

fn entry_types(dtype: &DataType) -> (DataType, DataType) {
    match &dtype.kind {
        TypeKind::Map { key, value } => ((**key).clone(), (**value).clone()),
        _ => (DataType::null(), DataType::null()),
    }
}

fn field_type(dtype: &DataType, name: &str) -> DataType {
    match &dtype.kind {
        TypeKind::Struct(fields) => fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| field.data_type.clone())
            .unwrap_or_else(DataType::null),
        _ => DataType::null(),
    }
}

impl ToSql for Literal<'_> {
    fn to_sql(self, f: &mut Formatter) -> Result<()> {
        let Literal(value, dtype) = self;
        let dialect = f.dialect;
        match value {
            Value::Null if dtype.is_null() => fmt!(f, "NULL"),
            Value::Null => {
                let native = SqlTypes::new(dialect).to_native(dtype)?;
                fmt!(f, "CAST(NULL AS " native.cast_target() ")");
            }
            Value::Bool(true) => fmt!(f, "TRUE"),
            Value::Bool(false) => fmt!(f, "FALSE"),
            Value::Int(v) => fmt!(f, v.to_string()),
            Value::UInt(v) => fmt!(f, v.to_string()),
            Value::Float(v) if v.is_finite() => fmt!(f, format!("{v:?}")),
            Value::Float(v) => {
                let text = if v.is_nan() {
                    "NaN"
                } else if *v > 0.0 {
                    "Infinity"
                } else {
                    "-Infinity"
                };
                match dialect {
                    Dialect::MySql => return Err(unrenderable(value, dialect)),
                    Dialect::DuckDb | Dialect::Snowflake => {
                        fmt!(f, "CAST(" quoted(text, dialect) " AS DOUBLE)")
                    }
                }
            }
            Value::Decimal { digits, scale } => fmt!(f, decimal_text(*digits, *scale)),
            Value::String(s) => fmt!(f, quoted(s, dialect)),
            Value::Bytes(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
                match dialect {
                    Dialect::DuckDb => fmt!(f, "from_hex('" hex.as_str() "')"),
                    Dialect::MySql => fmt!(f, "X'" hex.as_str() "'"),
                    Dialect::Snowflake => fmt!(f, "TO_BINARY('" hex.as_str() "', 'HEX')"),
                }
            }
            Value::Date(d) => fmt!(f, "DATE '" d.format("%Y-%m-%d").to_string() "'"),
            Value::Time(t) => fmt!(f, "TIME '" t.format("%H:%M:%S%.f").to_string() "'"),
            Value::Timestamp { value: ts, timezone } => {
                let text = ts.format("%Y-%m-%d %H:%M:%S%.f").to_string();
                match (dialect, timezone) {
                    (Dialect::DuckDb, None) => fmt!(f, "TIMESTAMP '" text "'"),
                    (Dialect::DuckDb, Some(_)) => fmt!(f, "TIMESTAMPTZ '" text "+00:00'"),
                    (Dialect::MySql, _) => fmt!(f, "TIMESTAMP '" text "'"),
                    (Dialect::Snowflake, None) => fmt!(f, "TO_TIMESTAMP_NTZ('" text "')"),
                    (Dialect::Snowflake, Some(_)) => fmt!(f, "TO_TIMESTAMP_TZ('" text " +00:00')"),
                }
            }
            Value::Interval { count, unit } => match dialect {
                Dialect::DuckDb => fmt!(f, "INTERVAL " count.to_string() " " interval_unit(*unit)),
                Dialect::Snowflake => {
                    fmt!(f, "INTERVAL '" count.to_string() " " interval_unit(*unit) "'")
                }
                Dialect::MySql => return Err(unrenderable(value, dialect)),
            },
            Value::Array(items) => {
                let element = element_type(dtype);
                let items = items.iter().map(|item| Literal(item, &element));
                match dialect {
                    Dialect::DuckDb => fmt!(f, "[" Comma(items) "]"),
                    Dialect::Snowflake => fmt!(f, "ARRAY_CONSTRUCT(" Comma(items) ")"),
                    Dialect::MySql => return Err(unrenderable(value, dialect)),
                }
            }
            Value::Map(entries) => {
                let (key, val) = entry_types(dtype);
                match dialect {
                    Dialect::DuckDb => {
                        fmt!(f, "MAP {");
                        let mut s = "";
                        for (k, v) in entries {
                            fmt!(f, s Literal(k, &key) ": " Literal(v, &val));
                            s = ", ";
                        }
                        fmt!(f, "}");
                    }
                    Dialect::Snowflake => {
                        let args = entries
                            .iter()
                            .flat_map(|(k, v)| [Literal(k, &key), Literal(v, &val)]);
                        fmt!(f, "OBJECT_CONSTRUCT(" Comma(args) ")");
                    }
                    Dialect::MySql => return Err(unrenderable(value, dialect)),
                }
            }
            Value::Struct(fields) => match dialect {
                Dialect::DuckDb => {
                    fmt!(f, "{");
                    let mut s = "";
                    for (name, v) in fields {
                        let ty = field_type(dtype, name);
                        fmt!(f, s quoted(name, dialect) ": " Literal(v, &ty));
                        s = ", ";
                    }
                    fmt!(f, "}");
                }
                Dialect::Snowflake => {
                    fmt!(f, "OBJECT_CONSTRUCT(");
                    let mut s = "";
                    for (name, v) in fields {
                        let ty = field_type(dtype, name);
                        fmt!(f, s quoted(name, dialect) ", " Literal(v, &ty));
                        s = ", ";
                    }
                    fmt!(f, ")");
                }
                Dialect::MySql => return Err(unrenderable(value, dialect)),
            },
            Value::Json(text) => match dialect {
                Dialect::Snowflake => fmt!(f, "PARSE_JSON(" quoted(text, dialect) ")"),
                Dialect::DuckDb | Dialect::MySql => fmt!(f, "CAST(" quoted(text, dialect) " AS JSON)"),
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn lit(value: Value, dtype: DataType, dialect: Dialect) -> Result<String> {
        expr_to_sql(&Expr::literal(value, dtype), dialect)
    }

    #[test]
    fn test_decimal_text() {
        assert_eq!(decimal_text(12345, 2), "123.45");
        assert_eq!(decimal_text(-5, 3), "-0.005");
        assert_eq!(decimal_text(7, 0), "7");
    }

    #[test]
    fn test_string_escaping() {
        let s = Value::from("it's a\\b");
        assert_eq!(lit(s.clone(), DataType::string(), Dialect::DuckDb).unwrap(), "'it''s a\\b'");
        assert_eq!(lit(s, DataType::string(), Dialect::MySql).unwrap(), "'it''s a\\\\b'");
    }

    #[test]
    fn test_timestamp_literals() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        let naive = Value::Timestamp {
            value: ts,
            timezone: None,
        };
        let zoned = Value::Timestamp {
            value: ts,
            timezone: Some("UTC".to_string()),
        };
        assert_eq!(
            lit(naive.clone(), DataType::timestamp(), Dialect::DuckDb).unwrap(),
            "TIMESTAMP '2024-03-01 12:30:00'"
        );
        assert_eq!(
            lit(zoned.clone(), DataType::timestamp_with(Some("UTC"), None), Dialect::DuckDb).unwrap(),
            "TIMESTAMPTZ '2024-03-01 12:30:00+00:00'"
        );
        assert_eq!(
            lit(naive, DataType::timestamp(), Dialect::Snowflake).unwrap(),
            "TO_TIMESTAMP_NTZ('2024-03-01 12:30:00')"
        );
        assert_eq!(
            lit(zoned, DataType::timestamp_with(Some("UTC"), None), Dialect::MySql).unwrap(),
            "TIMESTAMP '2024-03-01 12:30:00'"
        );
    }

    #[test]
    fn test_nested_literals() {
        let array = Value::Array(vec![Value::Int(1), Value::Int(2)]);
        let dtype = DataType::array(DataType::int64());
        assert_eq!(lit(array.clone(), dtype.clone(), Dialect::DuckDb).unwrap(), "[1, 2]");
        assert_eq!(
            lit(array.clone(), dtype.clone(), Dialect::Snowflake).unwrap(),
            "ARRAY_CONSTRUCT(1, 2)"
        );
        assert!(matches!(lit(array, dtype, Dialect::MySql), Err(Error::Type(_))));

        let record = Value::Struct(vec![("a".to_string(), Value::from("x"))]);
        assert_eq!(
            lit(record.clone(), DataType::null(), Dialect::DuckDb).unwrap(),
            "{'a': 'x'}"
        );
        assert_eq!(
            lit(record, DataType::null(), Dialect::Snowflake).unwrap(),
            "OBJECT_CONSTRUCT('a', 'x')"
        );
    }

    #[test]
    fn test_special_floats() {
        let nan = Value::Float(f64::NAN);
        assert_eq!(
            lit(nan.clone(), DataType::float64(), Dialect::DuckDb).unwrap(),
            "CAST('NaN' AS DOUBLE)"
        );
        assert!(lit(nan, DataType::float64(), Dialect::MySql).is_err());
        assert_eq!(lit(Value::Float(1.0), DataType::float64(), Dialect::DuckDb).unwrap(), "1.0");
    }

    #[test]
    fn test_typed_null() {
        assert_eq!(lit(Value::Null, DataType::null(), Dialect::MySql).unwrap(), "NULL");
        assert_eq!(
            lit(Value::Null, DataType::int64(), Dialect::MySql).unwrap(),
            "CAST(NULL AS SIGNED)"
        );
    }

    #[test]
    fn test_window_frame() {
        let expr = Expr::Window {
            func: Box::new(Expr::function("row_number", vec![])),
            partition_by: vec![Expr::Column {
                qualifier: "t0".to_string(),
                name: "g".to_string(),
            }],
            order_by: vec![OrderBy {
                expr: Expr::Column {
                    qualifier: "t0".to_string(),
                    name: "x".to_string(),
                },
                descending: true,
            }],
            frame: Some(FrameSpec {
                mode: FrameMode::Rows,
                start: FrameBound::Preceding(2),
                end: FrameBound::CurrentRow,
            }),
        };
        assert_eq!(
            expr_to_sql(&expr, Dialect::DuckDb).unwrap(),
            "row_number() OVER (PARTITION BY t0.\"g\" ORDER BY t0.\"x\" DESC ROWS BETWEEN 2 PRECEDING AND CURRENT ROW)"
        );
    }

    #[test]
    fn test_column_value_root_rejected() {
        let program = NativeProgram {
            root: Sql::Expr(Expr::Column {
                qualifier: "t0".to_string(),
                name: "a".to_string(),
            }),
            shared: Vec::new(),
            memtables: Vec::new(),
            output: deferql_ir::Output::Value(DataType::int64()),
        };
        assert!(matches!(to_sql(&program, Dialect::DuckDb), Err(Error::Invariant(_))));
    }
}
