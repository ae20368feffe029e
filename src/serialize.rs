//! Serializer (C7): walks the Syntactic clause tree and emits dialect-
//! specific SQL text plus the ordered parameter-name list.
//!
//! Always renders a single-line, minimally-spaced "compact" form first;
//! the pretty path then runs that text through `sqlformat`, the same crate
//! `prql-compiler`'s `sql::compile` uses for its `options.format` path. The
//! two forms are guaranteed identical modulo whitespace because pretty mode
//! never touches token content, only layout.

use std::collections::HashMap;

use itertools::Itertools;

use crate::clause::{
    Cte, Expr as CExpr, From, Join, JoinKind, Limit, OverClause, Query, Select, SetOp, Sort,
    WindowSpec,
};
use crate::dialect::{Dialect, DateLiteralForm, FrameExclusionSupport, LimitStyle, StringConcatForm, VariableStyle};
use crate::error::{Error, Reason, Result};
use crate::ir::{Frame, FrameBound, FrameExclusion, FrameKind, Literal, NullsOrder, SortOrder};

/// Caller-facing knobs for serialization: the serializer supports a pretty
/// and a compact mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SerializeOptions {
    pub pretty: bool,
}

impl SerializeOptions {
    pub fn compact() -> SerializeOptions {
        SerializeOptions { pretty: false }
    }

    pub fn pretty() -> SerializeOptions {
        SerializeOptions { pretty: true }
    }

    /// Distinguishes compact/pretty renders of the same query under the
    /// same cache key, since they differ only in whitespace but are still
    /// two distinct cached strings (the cache key is structural, not
    /// text-identity, so this folds the option in alongside it).
    pub(crate) fn cache_tag(&self) -> u64 {
        self.pretty as u64
    }
}

struct Writer<'a> {
    dialect: &'a Dialect,
    buf: String,
    /// One entry per parameter *occurrence* in emission order (not
    /// deduplicated), so `pack` can repeat a value once per occurrence
    /// regardless of dialect.
    vars: Vec<String>,
    /// Numbered-dialect bookkeeping: first occurrence of a name gets the
    /// next index; later occurrences reuse it.
    numbered: HashMap<String, usize>,
    next_index: usize,
}

impl<'a> Writer<'a> {
    fn new(dialect: &'a Dialect) -> Writer<'a> {
        Writer {
            dialect,
            buf: String::new(),
            vars: Vec::new(),
            numbered: HashMap::new(),
            next_index: 1,
        }
    }

    fn push(&mut self, s: &str) {
        if !self.buf.is_empty() && !self.buf.ends_with(' ') && !self.buf.ends_with('(') {
            self.buf.push(' ');
        }
        self.buf.push_str(s);
    }

    fn push_raw(&mut self, s: &str) {
        self.buf.push_str(s);
    }

    fn quote_ident(&self, name: &str) -> String {
        let cased = match self.dialect.identifier_case {
            crate::dialect::IdentifierCase::AsWritten => name.to_string(),
            crate::dialect::IdentifierCase::Lower => name.to_lowercase(),
            crate::dialect::IdentifierCase::Upper => name.to_uppercase(),
        };
        let (open, close) = self.dialect.identifier_quotes;
        let escaped = cased.replace(close, &format!("{close}{close}"));
        format!("{open}{escaped}{close}")
    }

    /// Quotes each dot-separated segment of a (possibly schema-qualified)
    /// table name independently, e.g. `schema.person` -> `"schema"."person"`.
    fn quote_qualified(&self, name: &str) -> String {
        name.split('.').map(|part| self.quote_ident(part)).join(".")
    }

    fn param_token(&mut self, name: &str) -> String {
        self.vars.push(name.to_string());
        match self.dialect.variable_style {
            VariableStyle::Named => format!("{}{name}", self.dialect.variable_prefix),
            VariableStyle::Numbered => {
                let idx = *self.numbered.entry(name.to_string()).or_insert_with(|| {
                    let i = self.next_index;
                    self.next_index += 1;
                    i
                });
                format!("{}{idx}", self.dialect.variable_prefix)
            }
            VariableStyle::Positional => self.dialect.variable_prefix.to_string(),
        }
    }

    fn literal(&self, lit: &Literal) -> String {
        match lit {
            Literal::Null => "NULL".to_string(),
            Literal::Boolean(b) => {
                if self.dialect.has_boolean_type {
                    if *b { "TRUE".into() } else { "FALSE".into() }
                } else if *b {
                    "(1=1)".into()
                } else {
                    "(1=0)".into()
                }
            }
            Literal::Integer(i) => i.to_string(),
            Literal::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{f:.1}")
                } else {
                    f.to_string()
                }
            }
            Literal::String(s) => format!("'{}'", s.replace('\'', "''")),
            Literal::Date(s) => match self.dialect.date_literal {
                DateLiteralForm::PlainString => format!("'{}'", s.replace('\'', "''")),
                DateLiteralForm::Prefixed(kw) => format!("{kw} '{}'", s.replace('\'', "''")),
            },
        }
    }

    // ---- Query ------------------------------------------------------------

    fn query(&mut self, query: &Query) -> Result<()> {
        match query {
            Query::Select(select) => self.select(select),
            Query::SetOp { op, branches } => {
                let op_kw = match op {
                    SetOp::UnionAll => "UNION ALL",
                };
                for (i, branch) in branches.iter().enumerate() {
                    if i > 0 {
                        self.push(op_kw);
                    }
                    self.query(branch)?;
                }
                Ok(())
            }
            Query::With { ctes, body } => {
                let recursive = ctes.iter().any(|c| c.recursive);
                self.push(if recursive { "WITH RECURSIVE" } else { "WITH" });
                for (i, cte) in ctes.iter().enumerate() {
                    if i > 0 {
                        self.push_raw(",");
                    }
                    self.push(&self.quote_ident(&cte.name));
                    if !cte.columns.is_empty() {
                        let cols = cte
                            .columns
                            .iter()
                            .map(|c| self.quote_ident(c))
                            .join(", ");
                        self.push_raw(&format!(" ({cols})"));
                    }
                    self.push("AS");
                    if cte.materialized && self.dialect.has_generated_always {
                        self.push("MATERIALIZED");
                    }
                    self.push_raw(" (");
                    self.query(&cte.query)?;
                    self.push_raw(")");
                }
                self.query(body)
            }
        }
    }

    fn select(&mut self, select: &Select) -> Result<()> {
        self.push("SELECT");
        if select.distinct {
            self.push("DISTINCT");
        }
        if let LimitStyle::Top = self.dialect.limit_style {
            if let Some(limit) = &select.limit {
                if limit.offset.is_none() {
                    if let Some(count) = limit.count {
                        self.push(&format!("TOP ({count})"));
                    }
                }
            }
        }
        if select.projection.is_empty() {
            self.push_raw(" 1");
        } else {
            let cols = select
                .projection
                .iter()
                .map(|e| self.render_expr(e))
                .collect::<Result<Vec<_>>>()?
                .join(", ");
            self.push_raw(&format!(" {cols}"));
        }

        self.from_clause(&select.from)?;
        for join in &select.joins {
            self.join_clause(join)?;
        }
        if let Some(where_) = &select.where_ {
            self.push("WHERE");
            let rendered = self.render_expr(where_)?;
            self.push_raw(&format!(" {rendered}"));
        }
        if !select.group_by.is_empty() {
            self.push("GROUP BY");
            let cols = select
                .group_by
                .iter()
                .map(|e| self.render_expr(e))
                .collect::<Result<Vec<_>>>()?
                .join(", ");
            self.push_raw(&format!(" {cols}"));
        }
        if let Some(having) = &select.having {
            self.push("HAVING");
            let rendered = self.render_expr(having)?;
            self.push_raw(&format!(" {rendered}"));
        }
        if !select.windows.is_empty() {
            self.push("WINDOW");
            let mut parts = Vec::with_capacity(select.windows.len());
            for w in &select.windows {
                let spec = self.window_spec(&w.spec)?;
                parts.push(format!("{} AS ({spec})", self.quote_ident(&w.name)));
            }
            self.push_raw(&format!(" {}", parts.join(", ")));
        }
        if !select.order_by.is_empty() {
            self.push("ORDER BY");
            let mut parts = Vec::with_capacity(select.order_by.len());
            for s in &select.order_by {
                parts.push(self.sort(s)?);
            }
            self.push_raw(&format!(" {}", parts.join(", ")));
        }
        if let Some(limit) = &select.limit {
            self.limit_clause(limit)?;
        }
        Ok(())
    }

    fn limit_clause(&mut self, limit: &Limit) -> Result<()> {
        match self.dialect.limit_style {
            LimitStyle::LimitOffset => {
                if let Some(count) = limit.count {
                    self.push(&format!("LIMIT {count}"));
                    if limit.with_ties {
                        self.push_raw(" WITH TIES");
                    }
                }
                if let Some(offset) = limit.offset {
                    self.push(&format!("OFFSET {offset}"));
                }
            }
            LimitStyle::OffsetFetch => {
                let offset = limit.offset.unwrap_or(0);
                self.push(&format!("OFFSET {offset} ROWS"));
                if let Some(count) = limit.count {
                    let which = if limit.with_ties { "WITH TIES" } else { "ONLY" };
                    self.push(&format!("FETCH NEXT {count} ROWS {which}"));
                }
            }
            LimitStyle::Top => {
                // Plain TOP is emitted inline with SELECT; an OFFSET forces
                // the OFFSET/FETCH form instead, since TOP alone can't skip
                // rows (mirrors real SQL Server's own restriction).
                if limit.offset.is_some() {
                    let offset = limit.offset.unwrap_or(0);
                    self.push(&format!("OFFSET {offset} ROWS"));
                    if let Some(count) = limit.count {
                        let which = if limit.with_ties { "WITH TIES" } else { "ONLY" };
                        self.push(&format!("FETCH NEXT {count} ROWS {which}"));
                    }
                }
            }
        }
        Ok(())
    }

    fn from_clause(&mut self, from: &From) -> Result<()> {
        match from {
            From::Nothing => {}
            other => {
                self.push("FROM");
                let rendered = self.from_item(other)?;
                self.push_raw(&format!(" {rendered}"));
            }
        }
        Ok(())
    }

    fn from_item(&mut self, from: &From) -> Result<String> {
        Ok(match from {
            From::Nothing => String::new(),
            From::Table { name, alias } => {
                let as_kw = if self.dialect.has_as { "AS " } else { "" };
                format!("{} {as_kw}{}", self.quote_qualified(name), self.quote_ident(alias))
            }
            From::Subquery { query, alias } => {
                let saved = std::mem::take(&mut self.buf);
                self.query(query)?;
                let inner = std::mem::replace(&mut self.buf, saved);
                let as_kw = if self.dialect.has_as { "AS " } else { "" };
                format!("({inner}) {as_kw}{}", self.quote_ident(alias))
            }
            From::Values { rows, alias, columns } => {
                let rows_sql = rows
                    .iter()
                    .map(|row| format!("({})", row.iter().map(|l| self.literal(l)).join(", ")))
                    .join(", ");
                let as_kw = if self.dialect.has_as { "AS " } else { "" };
                let cols = if columns.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", columns.iter().map(|c| self.quote_ident(c)).join(", "))
                };
                format!("(VALUES {rows_sql}) {as_kw}{}{cols}", self.quote_ident(alias))
            }
            From::Function { name, args, alias } => {
                let targs = args
                    .iter()
                    .map(|a| self.render_expr(a))
                    .collect::<Result<Vec<_>>>()?
                    .join(", ");
                let as_kw = if self.dialect.has_as { "AS " } else { "" };
                format!("{name}({targs}) {as_kw}{}", self.quote_ident(alias))
            }
        })
    }

    fn join_clause(&mut self, join: &Join) -> Result<()> {
        if join.lateral && !self.dialect.has_lateral {
            return Err(Error::new(Reason::DialectCapability {
                feature: "LATERAL".to_string(),
            })
            .into());
        }
        let kind_kw = match join.kind {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL JOIN",
            JoinKind::Cross => "CROSS JOIN",
        };
        self.push(kind_kw);
        if join.lateral {
            self.push("LATERAL");
        }
        let rendered = self.from_item(&join.from)?;
        self.push_raw(&format!(" {rendered}"));
        if let Some(on) = &join.on {
            self.push("ON");
            let rendered = self.render_expr(on)?;
            self.push_raw(&format!(" {rendered}"));
        }
        Ok(())
    }

    fn window_spec(&mut self, spec: &WindowSpec) -> Result<String> {
        let mut parts = Vec::new();
        if !spec.partition_by.is_empty() {
            let cols = spec
                .partition_by
                .iter()
                .map(|e| self.render_expr(e))
                .collect::<Result<Vec<_>>>()?
                .join(", ");
            parts.push(format!("PARTITION BY {cols}"));
        }
        if !spec.order_by.is_empty() {
            let mut sorts = Vec::with_capacity(spec.order_by.len());
            for s in &spec.order_by {
                sorts.push(self.sort(s)?);
            }
            parts.push(format!("ORDER BY {}", sorts.join(", ")));
        }
        if let Some(frame) = &spec.frame {
            parts.push(self.frame(frame)?);
        }
        Ok(parts.join(" "))
    }

    fn frame(&self, frame: &Frame) -> Result<String> {
        let kind_kw = match frame.kind {
            FrameKind::Rows => "ROWS",
            FrameKind::Range => "RANGE",
            FrameKind::Groups => "GROUPS",
        };
        let start = self.frame_bound(&frame.start);
        let end = self.frame_bound(&frame.end);
        let mut out = format!("{kind_kw} BETWEEN {start} AND {end}");
        if let Some(exclusion) = &frame.exclusion {
            if self.dialect.frame_exclusion == FrameExclusionSupport::None {
                return Err(Error::new(Reason::DialectCapability {
                    feature: "frame EXCLUDE".to_string(),
                })
                .into());
            }
            let kw = match exclusion {
                FrameExclusion::Group => "EXCLUDE GROUP",
                FrameExclusion::Ties => "EXCLUDE TIES",
                FrameExclusion::NoOthers => "EXCLUDE NO OTHERS",
            };
            out.push(' ');
            out.push_str(kw);
        }
        Ok(out)
    }

    fn frame_bound(&self, bound: &FrameBound) -> String {
        match bound {
            FrameBound::UnboundedPreceding => "UNBOUNDED PRECEDING".to_string(),
            FrameBound::Preceding(n) => format!("{n} PRECEDING"),
            FrameBound::CurrentRow => "CURRENT ROW".to_string(),
            FrameBound::Following(n) => format!("{n} FOLLOWING"),
            FrameBound::UnboundedFollowing => "UNBOUNDED FOLLOWING".to_string(),
        }
    }

    fn sort(&mut self, sort: &Sort) -> Result<String> {
        let value = self.render_expr(&sort.value)?;
        let order_kw = match sort.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let mut out = format!("{value} {order_kw}");
        if let Some(nulls) = sort.nulls {
            out.push_str(match nulls {
                NullsOrder::First => " NULLS FIRST",
                NullsOrder::Last => " NULLS LAST",
            });
        }
        Ok(out)
    }

    // ---- Expressions --------------------------------------------------------

    fn render_expr(&mut self, expr: &CExpr) -> Result<String> {
        Ok(match expr {
            CExpr::Id { qualifier, name } => match qualifier {
                Some(q) => format!("{}.{}", self.quote_ident(q), self.quote_ident(name)),
                None => self.quote_ident(name),
            },
            CExpr::Lit(l) => self.literal(l),
            CExpr::Param(name) => self.param_token(name),
            CExpr::Op { name, args } => self.render_op(name, args)?,
            CExpr::Fun { name, args, template } => self.render_fun(name, args, template.as_deref())?,
            CExpr::Agg { name, args, filter, over } => self.render_agg(name, args, filter, over)?,
            CExpr::Case { branches, else_ } => {
                let mut out = String::from("CASE");
                for (cond, value) in branches {
                    let cond = self.render_expr(cond)?;
                    let value = self.render_expr(value)?;
                    out.push_str(&format!(" WHEN {cond} THEN {value}"));
                }
                if let Some(else_) = else_ {
                    let value = self.render_expr(else_)?;
                    out.push_str(&format!(" ELSE {value}"));
                }
                out.push_str(" END");
                out
            }
            CExpr::Sort(sort) => self.sort(sort)?,
            CExpr::Partition(spec) => format!("({})", self.window_spec(spec)?),
            CExpr::As { inner, name } => {
                let rendered = self.render_expr(inner)?;
                let as_kw = if self.dialect.has_as { "AS " } else { "" };
                format!("{rendered} {as_kw}{}", self.quote_ident(name))
            }
            CExpr::Kw(kw) => kw.clone(),
            CExpr::Note(text) => format!("/* {text} */"),
            CExpr::Subquery(query) => {
                let saved = std::mem::take(&mut self.buf);
                self.query(query)?;
                let inner = std::mem::replace(&mut self.buf, saved);
                format!("({inner})")
            }
        })
    }

    fn render_op(&mut self, name: &str, args: &[CExpr]) -> Result<String> {
        let kw = match name {
            "and" => "AND",
            "or" => "OR",
            "not" => "NOT",
            other => other,
        };
        if args.len() == 1 {
            let a = self.render_expr(&args[0])?;
            return Ok(format!("({kw} {a})"));
        }
        let parts = args
            .iter()
            .map(|a| self.render_expr(a))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!("({})", parts.join(&format!(" {kw} "))))
    }

    fn render_fun(&mut self, name: &str, args: &[CExpr], template: Option<&str>) -> Result<String> {
        if let Some(template) = template {
            let mut out = String::new();
            let mut it = args.iter();
            for part in template.split('?') {
                out.push_str(part);
                if let Some(a) = it.next() {
                    out.push_str(&self.render_expr(a)?);
                }
            }
            return Ok(out);
        }
        if name == "concat" {
            return self.render_concat(args);
        }
        if name == "in" {
            if args.is_empty() {
                return Ok("FALSE".to_string());
            }
            let lhs = self.render_expr(&args[0])?;
            // A single correlated-subquery argument already renders
            // parenthesized (`render_expr(Subquery)`); a list of scalars
            // needs its own enclosing parens.
            if let [CExpr::Subquery(_)] = &args[1..] {
                let rhs = self.render_expr(&args[1])?;
                return Ok(format!("{lhs} IN {rhs}"));
            }
            let rhs = args[1..]
                .iter()
                .map(|a| self.render_expr(a))
                .collect::<Result<Vec<_>>>()?;
            return Ok(format!("{lhs} IN ({})", rhs.join(", ")));
        }
        let targs = args
            .iter()
            .map(|a| self.render_expr(a))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        Ok(format!("{}({targs})", name.to_uppercase()))
    }

    fn render_concat(&mut self, args: &[CExpr]) -> Result<String> {
        let parts = args
            .iter()
            .map(|a| self.render_expr(a))
            .collect::<Result<Vec<_>>>()?;
        Ok(match self.dialect.string_concat {
            StringConcatForm::DoublePipe => format!("({})", parts.join(" || ")),
            StringConcatForm::Plus => format!("({})", parts.join(" + ")),
            StringConcatForm::ConcatFunction => format!("CONCAT({})", parts.join(", ")),
        })
    }

    fn render_agg(
        &mut self,
        name: &str,
        args: &[CExpr],
        filter: &Option<Box<CExpr>>,
        over: &Option<OverClause>,
    ) -> Result<String> {
        let targs = if args.is_empty() && name == "count" {
            "*".to_string()
        } else {
            args.iter()
                .map(|a| self.render_expr(a))
                .collect::<Result<Vec<_>>>()?
                .join(", ")
        };
        let mut out = format!("{}({targs})", name.to_uppercase());
        if let Some(filter) = filter {
            let rendered = self.render_expr(filter)?;
            out.push_str(&format!(" FILTER (WHERE {rendered})"));
        }
        if let Some(over) = over {
            match over {
                OverClause::Named(name) => {
                    out.push_str(&format!(" OVER {}", self.quote_ident(name)));
                }
                OverClause::Inline(spec) => {
                    let spec = self.window_spec(spec)?;
                    out.push_str(&format!(" OVER ({spec})"));
                }
            }
        }
        Ok(out)
    }
}

/// Walks `query` and emits dialect-specific SQL text plus the ordered
/// parameter-name list, per the caller's [SerializeOptions].
pub fn serialize(query: &Query, dialect: &Dialect, options: SerializeOptions) -> Result<crate::SqlString> {
    let mut writer = Writer::new(dialect);
    writer.query(query)?;
    let text = if options.pretty {
        sqlformat::format(
            &writer.buf,
            &sqlformat::QueryParams::default(),
            sqlformat::FormatOptions::default(),
        )
    } else {
        writer.buf.clone()
    };
    Ok(crate::SqlString {
        text,
        vars: writer.vars,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::catalog::{Catalog, Table};
    use crate::ir::build::*;

    fn catalog() -> Catalog {
        Catalog::new(
            [Table::new("person", ["person_id", "year_of_birth", "gender_concept_id"]).unwrap()],
            Dialect::sqlite(),
        )
        .unwrap()
    }

    fn compile(q: Expr, cat: &Catalog) -> crate::SqlString {
        let resolved = crate::resolver::resolve(q.node(), cat).unwrap();
        let linked = crate::linker::link(&resolved).unwrap();
        let translated = crate::translate::translate(&linked, cat).unwrap();
        serialize(&translated, &cat.dialect, SerializeOptions::compact()).unwrap()
    }

    #[test]
    fn basic_select_where() {
        let cat = catalog();
        let q = r#where(from("person"), get("year_of_birth").eq(1980i64));
        let q = select(q, get("person_id")).unwrap();
        let sql = compile(q, &cat);
        assert_eq!(
            sql.text,
            r#"SELECT "person_1"."person_id" FROM "person" AS "person_1" WHERE ("person_1"."year_of_birth" = 1980)"#
        );
    }

    #[test]
    fn named_param_occurs_once_per_use() {
        let cat = catalog();
        let q = r#where(from("person"), get("year_of_birth").eq(var("yob")));
        let q = select(q, get("person_id")).unwrap();
        let sql = compile(q, &cat);
        assert_eq!(sql.vars, vec!["yob".to_string()]);
        assert!(sql.text.contains(":yob"));
    }

    #[test]
    fn positional_dialect_duplicates_param_per_occurrence() {
        let cat = Catalog::new(
            [Table::new("person", ["person_id", "year_of_birth"]).unwrap()],
            Dialect::mysql(),
        )
        .unwrap();
        let q = r#where(
            from("person"),
            fun("or", [get("year_of_birth").eq(var("yob")), get("year_of_birth").eq(var("yob"))]).unwrap(),
        );
        let q = select(q, get("person_id")).unwrap();
        let sql = compile(q, &cat);
        assert_eq!(sql.vars, vec!["yob".to_string(), "yob".to_string()]);
        assert_eq!(sql.text.matches('?').count(), 2);
    }

    #[test]
    fn numbered_dialect_reuses_index_for_repeats() {
        let cat = Catalog::new(
            [Table::new("person", ["person_id", "year_of_birth"]).unwrap()],
            Dialect::postgres(),
        )
        .unwrap();
        let q = r#where(
            from("person"),
            fun("or", [get("year_of_birth").eq(var("yob")), get("year_of_birth").eq(var("yob"))]).unwrap(),
        );
        let q = select(q, get("person_id")).unwrap();
        let sql = compile(q, &cat);
        assert!(sql.text.contains("$1"));
        assert!(!sql.text.contains("$2"));
    }

    #[test]
    fn boolean_literal_on_dialect_without_boolean_type() {
        let cat = catalog();
        let q = select(from("person"), lit(true)).unwrap();
        let sql = compile(q, &cat);
        assert!(sql.text.contains("(1=1)"));
    }
}
