//! Rule-based validation of generated statements.
//!
//! This is a guard over the token stream, not a SQL parser. Rules run in a
//! fixed order and stop at the first violation.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::context::{QueryContext, TableRef, DEFAULT_SCHEMA};
use crate::db::Column;

use super::lexer::{self, Lexeme};
use super::{
    IdentifierColumn, Rejection, RejectionReason, ValidatedStatement, RESULT_GEOMETRY_ALIAS,
};

/// PostGIS functions whose result is a geometry.
const GEOMETRY_FUNCTIONS: &[&str] = &[
    "st_boundary",
    "st_buffer",
    "st_centroid",
    "st_closestpoint",
    "st_collect",
    "st_collectionextract",
    "st_concavehull",
    "st_convexhull",
    "st_difference",
    "st_endpoint",
    "st_envelope",
    "st_expand",
    "st_exteriorring",
    "st_force2d",
    "st_geometryn",
    "st_geomfromgeojson",
    "st_geomfromtext",
    "st_geomfromwkb",
    "st_intersection",
    "st_linemerge",
    "st_makeenvelope",
    "st_makeline",
    "st_makepoint",
    "st_makevalid",
    "st_multi",
    "st_point",
    "st_pointonsurface",
    "st_reverse",
    "st_segmentize",
    "st_setsrid",
    "st_shortestline",
    "st_simplify",
    "st_simplifypreservetopology",
    "st_snap",
    "st_snaptogrid",
    "st_startpoint",
    "st_symdifference",
    "st_transform",
    "st_translate",
    "st_unaryunion",
    "st_union",
];

/// Functions that test a relationship and must never be projected.
const SPATIAL_PREDICATES: &[&str] = &[
    "st_contains",
    "st_containsproperly",
    "st_coveredby",
    "st_covers",
    "st_crosses",
    "st_dfullywithin",
    "st_disjoint",
    "st_dwithin",
    "st_equals",
    "st_intersection",
    "st_intersects",
    "st_overlaps",
    "st_touches",
    "st_within",
];

const CONTAINMENT_PREDICATES: &[&str] = &[
    "st_within",
    "st_contains",
    "st_containsproperly",
    "st_covers",
    "st_coveredby",
];

const BINARY_PREDICATES: &[&str] = &[
    "st_intersects",
    "st_touches",
    "st_overlaps",
    "st_crosses",
    "st_disjoint",
    "st_equals",
];

const BUFFERING_FUNCTIONS: &[&str] = &["st_buffer", "st_expand"];

/// Aggregates that collapse a subquery to a single row when ungrouped.
const AGGREGATE_FUNCTIONS: &[&str] = &[
    "array_agg",
    "avg",
    "bool_and",
    "bool_or",
    "count",
    "max",
    "min",
    "st_collect",
    "st_extent",
    "st_memunion",
    "st_union",
    "sum",
];

/// Words that end an expression rather than alias it.
const NOT_AN_ALIAS: &[&str] = &["end", "null", "true", "false"];

/// Words that cannot precede an implicit alias.
const OPERATOR_WORDS: &[&str] = &[
    "and", "or", "not", "is", "in", "like", "ilike", "when", "then", "else", "case", "distinct",
    "over",
];

/// Leading words of multi-word type names such as `double precision`.
const TYPE_PREFIX_WORDS: &[&str] = &["double", "character", "bit", "time"];

/// Words before a parenthesized subquery that consume it as a set.
const SET_SUBQUERY_WORDS: &[&str] = &["exists", "in", "any", "some", "all", "array"];

/// Name PostgreSQL gives an unaliased expression column.
const UNNAMED_COLUMN: &str = "?column?";

/// First rule violation found in a statement.
struct Violation {
    reason: RejectionReason,
    detail: String,
}

fn violation(reason: RejectionReason, detail: impl Into<String>) -> Violation {
    Violation {
        reason,
        detail: detail.into(),
    }
}

type RuleResult<T> = std::result::Result<T, Violation>;

/// Validates generated statements against the result-table rule set.
#[derive(Debug, Clone, Default)]
pub struct StatementValidator {
    result_table: TableRef,
    max_extra_columns: Option<usize>,
}

impl StatementValidator {
    /// Creates a validator for statements that materialize `result_table`.
    pub fn new(result_table: TableRef) -> Self {
        Self {
            result_table,
            max_extra_columns: None,
        }
    }

    /// Sets a hard ceiling on output columns beyond `geom` and the identifier.
    ///
    /// Without a ceiling, unrequested columns only produce warnings.
    pub fn with_max_extra_columns(mut self, limit: Option<usize>) -> Self {
        self.max_extra_columns = limit;
        self
    }

    /// Returns the table validated statements must create.
    pub fn result_table(&self) -> &TableRef {
        &self.result_table
    }

    /// Validates a sanitized candidate statement.
    ///
    /// `source_columns` are the introspected columns of the context's table.
    pub fn validate(
        &self,
        candidate: &str,
        context: &QueryContext,
        source_columns: &[Column],
    ) -> Result<ValidatedStatement, Rejection> {
        let sql = normalize(candidate);
        self.check(sql, context, source_columns).map_err(|v| {
            debug!(rule = v.reason.rule(), reason = %v.reason, "Candidate statement rejected");
            Rejection::new(v.reason, v.detail, candidate)
        })
    }

    fn check(
        &self,
        sql: String,
        context: &QueryContext,
        source_columns: &[Column],
    ) -> RuleResult<ValidatedStatement> {
        let toks = lexer::tokenize(&sql).map_err(|e| {
            violation(
                RejectionReason::NotCreateTableAsSelect,
                format!("statement could not be tokenized: {e}"),
            )
        })?;

        let list_start = self.check_shape(&toks)?;
        let from_at = lexer::find_top_level_kw(&toks, "FROM", list_start);
        let list = &toks[list_start..from_at.unwrap_or(toks.len())];
        let items: Vec<SelectItem<'_>> = lexer::split_top_level(list)
            .into_iter()
            .map(SelectItem::parse)
            .collect();
        if items.is_empty() || items.iter().any(|item| item.expr.is_empty()) {
            return Err(violation(
                RejectionReason::NotCreateTableAsSelect,
                "select list is empty or has an empty item",
            ));
        }

        check_wildcard(&items)?;
        let scope = SourceScope::new(&toks, from_at, context, source_columns);
        check_geometry_alias(&items, &scope, &context.geom_column)?;
        let identifier = check_identifier(&items, source_columns)?;
        check_composite_access(&toks, &context.geom_column)?;
        check_projected_predicates(&items)?;
        check_base_table(&toks, from_at, context)?;
        check_subquery_arguments(&toks)?;
        check_join_forms(&toks)?;
        check_predicate_shapes(&toks, &context.geom_column)?;
        let warnings = self.check_extra_columns(&items, identifier, &context.question)?;

        Ok(ValidatedStatement {
            sql,
            identifier_column: identifier,
            output_columns: items.iter().map(|item| item.output_name()).collect(),
            warnings,
        })
    }

    /// Rule 1: one `CREATE TABLE <result> AS SELECT` statement.
    ///
    /// Returns the index of the first select-list token.
    fn check_shape(&self, toks: &[Lexeme]) -> RuleResult<usize> {
        if toks.contains(&Lexeme::Semicolon) {
            return Err(violation(
                RejectionReason::NotCreateTableAsSelect,
                "expected exactly one statement, found a statement separator",
            ));
        }

        let shaped = toks.len() > 7
            && toks[0].is_kw("CREATE")
            && toks[1].is_kw("TABLE")
            && toks[2].names(&self.result_table.schema)
            && toks[3] == Lexeme::Period
            && toks[4].names(&self.result_table.name)
            && toks[5].is_kw("AS")
            && toks[6].is_kw("SELECT");
        if !shaped {
            return Err(violation(
                RejectionReason::NotCreateTableAsSelect,
                format!(
                    "statement must begin with `CREATE TABLE {} AS SELECT`",
                    self.result_table
                ),
            ));
        }

        let mut start = 7;
        if toks[start].is_kw("DISTINCT") {
            start += 1;
            if toks.get(start).is_some_and(|t| t.is_kw("ON")) {
                start = lexer::matching_paren(toks, start + 1).map_or(toks.len(), |c| c + 1);
            }
        } else if toks[start].is_kw("ALL") {
            start += 1;
        }
        Ok(start)
    }

    /// Rule 11: columns beyond `geom` and the identifier.
    fn check_extra_columns(
        &self,
        items: &[SelectItem<'_>],
        identifier: IdentifierColumn,
        question: &str,
    ) -> RuleResult<Vec<String>> {
        let extras: Vec<String> = items
            .iter()
            .map(SelectItem::output_name)
            .filter(|name| name != RESULT_GEOMETRY_ALIAS && name != identifier.as_str())
            .collect();

        if let Some(limit) = self.max_extra_columns {
            if extras.len() > limit {
                return Err(violation(
                    RejectionReason::ExtraneousColumns,
                    format!(
                        "{} extra output columns ({}), at most {limit} allowed",
                        extras.len(),
                        extras.join(", ")
                    ),
                ));
            }
        }

        let question = question.to_lowercase();
        Ok(extras
            .iter()
            .filter(|name| !mentioned_in(&question, name))
            .map(|name| format!("column `{name}` was not requested by the question"))
            .collect())
    }
}

/// Returns the output column names of a `CREATE TABLE ... AS SELECT` statement.
///
/// Best effort: returns an empty list when the statement has no select list.
pub fn projected_columns(sql: &str) -> Vec<String> {
    let Ok(toks) = lexer::tokenize(&normalize(sql)) else {
        return Vec::new();
    };
    let Some(select_at) = lexer::find_top_level_kw(&toks, "SELECT", 0) else {
        return Vec::new();
    };
    let end = lexer::find_top_level_kw(&toks, "FROM", select_at).unwrap_or(toks.len());
    lexer::split_top_level(&toks[select_at + 1..end])
        .into_iter()
        .map(|item| SelectItem::parse(item).output_name())
        .collect()
}

/// Repairs syntactic near-misses only; never changes what a statement means.
fn normalize(candidate: &str) -> String {
    static OVER_ZERO: OnceLock<Regex> = OnceLock::new();
    let over_zero = OVER_ZERO.get_or_init(|| {
        Regex::new(r"(?i)\brow_number\s*\(\s*\)\s*over\s+0\b").expect("valid regex")
    });
    let repaired = over_zero.replace_all(candidate.trim(), "row_number() OVER ()");
    repaired
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .to_string()
}

/// One item of a select list, split into expression and output name.
struct SelectItem<'a> {
    expr: &'a [Lexeme],
    name: Option<String>,
}

impl<'a> SelectItem<'a> {
    fn parse(toks: &'a [Lexeme]) -> Self {
        let n = toks.len();
        if n >= 3 && toks[n - 2].is_kw("AS") {
            if let Some(alias) = toks[n - 1].ident() {
                return Self {
                    expr: &toks[..n - 2],
                    name: Some(alias),
                };
            }
        }
        if !lexer::is_column_ref(toks) && n >= 2 && is_implicit_alias(&toks[n - 2], &toks[n - 1])
        {
            return Self {
                expr: &toks[..n - 1],
                name: toks[n - 1].ident(),
            };
        }
        Self {
            expr: toks,
            name: figure_colname(toks),
        }
    }

    fn output_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| UNNAMED_COLUMN.to_string())
    }

    fn is_named(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name)
    }

    fn is_wildcard(&self) -> bool {
        match self.expr {
            [Lexeme::Star] => true,
            [qualifier @ .., Lexeme::Period, Lexeme::Star] => lexer::is_column_ref(qualifier),
            _ => false,
        }
    }
}

fn is_implicit_alias(prev: &Lexeme, last: &Lexeme) -> bool {
    let Lexeme::Word { .. } = last else {
        return false;
    };
    if NOT_AN_ALIAS.iter().any(|kw| last.is_kw(kw)) {
        return false;
    }
    match prev {
        Lexeme::RParen | Lexeme::Number(_) | Lexeme::Str(_) => true,
        Lexeme::Word { .. } => !OPERATOR_WORDS
            .iter()
            .chain(TYPE_PREFIX_WORDS)
            .any(|kw| prev.is_kw(kw)),
        _ => false,
    }
}

/// Name PostgreSQL gives an unaliased select item, if any.
fn figure_colname(expr: &[Lexeme]) -> Option<String> {
    ranked_colname(expr).map(|(name, _)| name)
}

/// Figures a column name the way PostgreSQL does. The flag is true for names
/// taken from a column, function or subquery, which outrank a cast's type name.
fn ranked_colname(expr: &[Lexeme]) -> Option<(String, bool)> {
    if lexer::is_column_ref(expr) {
        return expr.last()?.ident().map(|name| (name, true));
    }
    if let Some(body) = scalar_subquery(expr) {
        let select_at = lexer::find_top_level_kw(body, "SELECT", 0)?;
        let end = lexer::find_top_level_kw(body, "FROM", select_at).unwrap_or(body.len());
        let first = lexer::split_top_level(&body[select_at + 1..end])
            .into_iter()
            .next()?;
        return SelectItem::parse(first).name.map(|name| (name, true));
    }
    if let Some(inner) = strip_parens(expr) {
        return ranked_colname(inner);
    }
    if let Some((inner, type_name)) = split_cast(expr) {
        return match ranked_colname(inner) {
            Some((name, true)) => Some((name, true)),
            _ => type_name.ident().map(|t| (canonical_type_name(&t), false)),
        };
    }
    if is_case_expr(expr) {
        return Some(("case".to_string(), false));
    }
    if expr.first().is_some_and(|t| t.is_kw("ARRAY"))
        && matches!(expr.get(1), Some(Lexeme::Other(s)) if s == "[")
    {
        return Some(("array".to_string(), true));
    }
    call_name(expr).map(|name| (name, true))
}

/// Internal type name PostgreSQL reports for a cast target.
fn canonical_type_name(name: &str) -> String {
    let canonical = match name {
        "int" | "integer" | "int4" => "int4",
        "bigint" | "int8" => "int8",
        "smallint" | "int2" => "int2",
        "real" | "float4" => "float4",
        "float" | "double" | "float8" => "float8",
        "boolean" | "bool" => "bool",
        "decimal" | "numeric" => "numeric",
        other => other,
    };
    canonical.to_string()
}

/// Returns the body of `expr` when it is exactly one parenthesized subquery.
fn scalar_subquery(expr: &[Lexeme]) -> Option<&[Lexeme]> {
    if !lexer::starts_subquery(expr, 0) || lexer::matching_paren(expr, 0)? != expr.len() - 1 {
        return None;
    }
    Some(&expr[1..expr.len() - 1])
}

/// Returns the inside of `( ... )` when the parens wrap all of `expr`.
fn strip_parens(expr: &[Lexeme]) -> Option<&[Lexeme]> {
    if expr.first() != Some(&Lexeme::LParen) || lexer::starts_subquery(expr, 0) {
        return None;
    }
    (lexer::matching_paren(expr, 0)? == expr.len() - 1).then(|| &expr[1..expr.len() - 1])
}

fn is_case_expr(expr: &[Lexeme]) -> bool {
    expr.first().is_some_and(|t| t.is_kw("CASE")) && expr.last().is_some_and(|t| t.is_kw("END"))
}

/// Splits `x::type` or `CAST(x AS type)` into the operand and the type word.
///
/// A trailing `::` only counts when it applies to the whole item, so
/// `a + b::int` is not a cast of `a + b`.
fn split_cast(expr: &[Lexeme]) -> Option<(&[Lexeme], &Lexeme)> {
    if expr.first().is_some_and(|t| t.is_kw("CAST"))
        && expr.get(1) == Some(&Lexeme::LParen)
        && lexer::matching_paren(expr, 1)? == expr.len() - 1
    {
        let body = &expr[2..expr.len() - 1];
        let as_at = lexer::find_top_level_kw(body, "AS", 0)?;
        return Some((&body[..as_at], body.get(as_at + 1)?));
    }

    let mut depth = 0usize;
    let mut cast_at = None;
    for (i, tok) in expr.iter().enumerate() {
        match tok {
            Lexeme::LParen => depth += 1,
            Lexeme::RParen => depth = depth.saturating_sub(1),
            Lexeme::Cast if depth == 0 => cast_at = Some(i),
            _ => {}
        }
    }
    let cast_at = cast_at?;
    let inner = &expr[..cast_at];
    let type_name = expr.get(cast_at + 1)?;
    (is_primary(inner) && is_type_tail(&expr[cast_at + 2..])).then_some((inner, type_name))
}

/// Returns true for operands a trailing cast binds to as a whole.
fn is_primary(expr: &[Lexeme]) -> bool {
    match expr {
        [] => false,
        [Lexeme::Number(_)] | [Lexeme::Str(_)] => true,
        [Lexeme::LParen, ..] => lexer::matching_paren(expr, 0) == Some(expr.len() - 1),
        _ => {
            lexer::is_column_ref(expr)
                || is_case_expr(expr)
                || call_name(expr).is_some()
                || split_cast(expr).is_some()
        }
    }
}

/// Type modifiers after the type word: `(10, 2)`, `precision`, `[]`.
fn is_type_tail(tail: &[Lexeme]) -> bool {
    tail.iter().all(|tok| match tok {
        Lexeme::Word { .. } => !tok.is_kw("AS") && !OPERATOR_WORDS.iter().any(|kw| tok.is_kw(kw)),
        Lexeme::LParen | Lexeme::RParen | Lexeme::Comma | Lexeme::Number(_) => true,
        Lexeme::Other(s) => s == "[" || s == "]",
        _ => false,
    })
}

/// Returns the name of the function when `expr` is one call, e.g.
/// `count(*)`, `public.f(x)` or `sum(x) OVER (...)`.
fn call_name(expr: &[Lexeme]) -> Option<String> {
    let open = expr.iter().position(|t| *t == Lexeme::LParen)?;
    let name_part = &expr[..open];
    if !lexer::is_column_ref(name_part) {
        return None;
    }
    let close = lexer::matching_paren(expr, open)?;
    if !is_call_suffix(&expr[close + 1..]) {
        return None;
    }
    name_part.last()?.ident()
}

fn is_call_suffix(mut rest: &[Lexeme]) -> bool {
    loop {
        let open = match rest {
            [] => return true,
            [kw, Lexeme::LParen, ..] if kw.is_kw("OVER") || kw.is_kw("FILTER") => 1,
            [within, group, Lexeme::LParen, ..]
                if within.is_kw("WITHIN") && group.is_kw("GROUP") =>
            {
                2
            }
            [over, Lexeme::Word { .. }, tail @ ..] if over.is_kw("OVER") => {
                rest = tail;
                continue;
            }
            _ => return false,
        };
        let Some(close) = lexer::matching_paren(rest, open) else {
            return false;
        };
        rest = &rest[close + 1..];
    }
}

/// Returns true if `expr` is a call to one of `names`, e.g. `ST_Buffer(...)`.
fn starts_with_call(expr: &[Lexeme], names: &[&str]) -> bool {
    expr.get(1) == Some(&Lexeme::LParen)
        && expr
            .first()
            .and_then(Lexeme::ident)
            .is_some_and(|f| names.contains(&f.to_ascii_lowercase().as_str()))
}

fn is_spatial_type(type_name: &Lexeme) -> bool {
    type_name.is_kw("geometry") || type_name.is_kw("geography")
}

/// Column names that hold geometries by convention when no type is known.
fn looks_like_geometry(name: &str, geom_column: &str) -> bool {
    name.eq_ignore_ascii_case(geom_column)
        || name.contains("geom")
        || matches!(name, "geog" | "geography" | "shape")
}

fn is_geometry_expr(expr: &[Lexeme], geom_column: &str) -> bool {
    if lexer::is_column_ref(expr) {
        return expr
            .last()
            .is_some_and(|t| t.names(geom_column) || t.names(RESULT_GEOMETRY_ALIAS));
    }
    starts_with_call(expr, GEOMETRY_FUNCTIONS)
        || split_cast(expr).is_some_and(|(_, type_name)| is_spatial_type(type_name))
}

/// Relation the statement reads from, as select items see it.
struct SourceScope<'a> {
    /// Names that qualify columns of the bound table: its alias, or its
    /// bare name when it has none.
    qualifiers: Vec<String>,
    columns: &'a [Column],
}

impl<'a> SourceScope<'a> {
    fn new(
        toks: &[Lexeme],
        from_at: Option<usize>,
        context: &QueryContext,
        columns: &'a [Column],
    ) -> Self {
        Self {
            qualifiers: bound_qualifiers(toks, from_at, context),
            columns,
        }
    }

    /// Resolves a column reference to a column of the bound table.
    fn bound_column(&self, column_ref: &[Lexeme]) -> Option<&'a Column> {
        let parts: Vec<&Lexeme> = column_ref.iter().step_by(2).collect();
        let (name, qualifiers) = parts.split_last()?;
        let bound = match qualifiers.last() {
            None => true,
            Some(qualifier) => self.qualifiers.iter().any(|q| qualifier.names(q)),
        };
        if !bound {
            return None;
        }
        self.columns.iter().find(|c| name.names(&c.name))
    }

    /// Whether `expr` yields a geometry; `None` when that cannot be told.
    fn geometry_kind(&self, expr: &[Lexeme], geom_column: &str) -> Option<bool> {
        if let Some(inner) = strip_parens(expr) {
            return self.geometry_kind(inner, geom_column);
        }
        if let Some((_, type_name)) = split_cast(expr) {
            return Some(is_spatial_type(type_name));
        }
        if lexer::is_column_ref(expr) {
            if let Some(column) = self.bound_column(expr) {
                return Some(column.is_geometry());
            }
            let name = expr.last()?.ident()?.to_ascii_lowercase();
            return looks_like_geometry(&name, geom_column).then_some(true);
        }
        starts_with_call(expr, GEOMETRY_FUNCTIONS).then_some(true)
    }
}

/// Words that end a relation reference instead of aliasing it.
const RELATION_END: &[&str] = &[
    "where", "join", "inner", "left", "right", "full", "cross", "natural", "on", "using",
    "group", "having", "window", "order", "limit", "offset", "fetch", "for", "union",
    "intersect", "except", "tablesample",
];

fn bound_qualifiers(
    toks: &[Lexeme],
    from_at: Option<usize>,
    context: &QueryContext,
) -> Vec<String> {
    let Some(from_at) = from_at else {
        return Vec::new();
    };
    let mut relation = &toks[from_at + 1..];
    if relation.first().is_some_and(|t| t.is_kw("ONLY")) {
        relation = &relation[1..];
    }
    let (table, rest) = match relation {
        [schema, Lexeme::Period, table, rest @ ..] if schema.names(&context.schema) => (table, rest),
        [table, rest @ ..] if rest.first() != Some(&Lexeme::Period) => (table, rest),
        _ => return Vec::new(),
    };
    if !table.names(&context.table) {
        return Vec::new();
    }
    let rest = match rest {
        [as_kw, tail @ ..] if as_kw.is_kw("AS") => tail,
        _ => rest,
    };
    let alias = rest.first().filter(|t| {
        matches!(t, Lexeme::Word { .. }) && !RELATION_END.iter().any(|kw| t.is_kw(kw))
    });
    alias.unwrap_or(table).ident().into_iter().collect()
}

fn mentioned_in(question: &str, column: &str) -> bool {
    let column = column.to_lowercase();
    question.contains(&column)
        || column
            .split('_')
            .filter(|part| part.len() >= 3)
            .any(|part| question.contains(part))
}

/// Rule 2: no `*` or `alias.*` projection.
fn check_wildcard(items: &[SelectItem<'_>]) -> RuleResult<()> {
    if items.iter().any(SelectItem::is_wildcard) {
        return Err(violation(
            RejectionReason::WildcardSelect,
            "select list must name its columns instead of using `*`",
        ));
    }
    Ok(())
}

/// Rule 3: exactly one geometry output, aliased `geom`.
///
/// Columns of the bound table are typed from introspection. Other items are
/// judged by casts, geometry-returning functions and column naming, and an
/// item of unknown type aliased `geom` is taken at its word.
fn check_geometry_alias(
    items: &[SelectItem<'_>],
    scope: &SourceScope<'_>,
    geom_column: &str,
) -> RuleResult<()> {
    let mut geometries = Vec::new();
    for item in items {
        match scope.geometry_kind(item.expr, geom_column) {
            Some(true) => geometries.push(item),
            Some(false) if item.is_named(RESULT_GEOMETRY_ALIAS) => {
                return Err(violation(
                    RejectionReason::GeometryAliasViolation,
                    "output column `geom` is not a geometry; alias the geometry column `geom` instead",
                ));
            }
            None if item.is_named(RESULT_GEOMETRY_ALIAS) => geometries.push(item),
            _ => {}
        }
    }
    match geometries.as_slice() {
        [only] if only.is_named(RESULT_GEOMETRY_ALIAS) => Ok(()),
        [] => Err(violation(
            RejectionReason::GeometryAliasViolation,
            "select list has no geometry column aliased `geom`",
        )),
        [only] => Err(violation(
            RejectionReason::GeometryAliasViolation,
            format!(
                "geometry column must be aliased `geom`, found `{}`",
                only.output_name()
            ),
        )),
        many => Err(violation(
            RejectionReason::GeometryAliasViolation,
            format!(
                "select list has {} geometry columns, exactly one is allowed",
                many.len()
            ),
        )),
    }
}

/// Rule 4: `gid` is never redeclared; some identifier column is present.
fn check_identifier(
    items: &[SelectItem<'_>],
    source_columns: &[Column],
) -> RuleResult<IdentifierColumn> {
    let source_has_gid = source_columns
        .iter()
        .any(|c| c.name.eq_ignore_ascii_case(IdentifierColumn::Gid.as_str()));
    let projects = |id: IdentifierColumn| items.iter().any(|item| item.is_named(id.as_str()));

    if source_has_gid {
        if projects(IdentifierColumn::Gid) {
            return Err(violation(
                RejectionReason::IdentifierCollision,
                "source table already has `gid`; use `row_number() OVER ()::integer AS result_id` instead",
            ));
        }
        if !projects(IdentifierColumn::ResultId) {
            return Err(violation(
                RejectionReason::IdentifierCollision,
                "source table already has `gid`; the result needs a `result_id` column",
            ));
        }
        return Ok(IdentifierColumn::ResultId);
    }

    if projects(IdentifierColumn::ResultId) {
        Ok(IdentifierColumn::ResultId)
    } else if projects(IdentifierColumn::Gid) {
        Ok(IdentifierColumn::Gid)
    } else {
        Err(violation(
            RejectionReason::IdentifierCollision,
            "result needs an identifier column (`result_id` or `gid`)",
        ))
    }
}

/// Rule 5: no `(record).geom` dereference.
fn check_composite_access(toks: &[Lexeme], geom_column: &str) -> RuleResult<()> {
    let composite = toks.windows(3).any(|w| {
        w[0] == Lexeme::RParen
            && w[1] == Lexeme::Period
            && (w[2].names(geom_column)
                || w[2].names(RESULT_GEOMETRY_ALIAS)
                || w[2].names("geometry"))
    });
    if composite {
        return Err(violation(
            RejectionReason::CompositeGeometryAccess,
            "geometry columns are not composite types; reference the column directly instead of `(...).geom`",
        ));
    }
    Ok(())
}

/// Rule 6: spatial predicates stay out of the select list.
fn check_projected_predicates(items: &[SelectItem<'_>]) -> RuleResult<()> {
    for item in items {
        let projected = lexer::function_calls(item.expr, false)
            .into_iter()
            .find(|call| SPATIAL_PREDICATES.contains(&call.name.as_str()));
        if let Some(call) = projected {
            return Err(violation(
                RejectionReason::PredicateProjected,
                format!(
                    "`{}` is a predicate and cannot be selected as column `{}`",
                    call.name,
                    item.output_name()
                ),
            ));
        }
    }
    Ok(())
}

/// Rule 7: the first relation of the top-level FROM is the caller's table.
fn check_base_table(
    toks: &[Lexeme],
    from_at: Option<usize>,
    context: &QueryContext,
) -> RuleResult<()> {
    let expected = context.full_table();
    let Some(from_at) = from_at else {
        return Err(violation(
            RejectionReason::BaseTableMismatch,
            format!("statement has no FROM clause; expected `{expected}`"),
        ));
    };

    for set_op in ["UNION", "INTERSECT", "EXCEPT"] {
        if lexer::find_top_level_kw(toks, set_op, from_at).is_some() {
            return Err(violation(
                RejectionReason::BaseTableMismatch,
                format!("{set_op} combines rows from outside `{expected}`"),
            ));
        }
    }

    let mut relation = &toks[from_at + 1..];
    if relation.first().is_some_and(|t| t.is_kw("ONLY")) {
        relation = &relation[1..];
    }
    let chain = relation
        .iter()
        .enumerate()
        .take_while(|(i, t)| {
            if i % 2 == 0 {
                matches!(t, Lexeme::Word { .. })
            } else {
                **t == Lexeme::Period
            }
        })
        .count();
    let chain = if chain % 2 == 0 {
        chain.saturating_sub(1)
    } else {
        chain
    };
    if chain == 0 || relation.get(chain) == Some(&Lexeme::LParen) {
        return Err(violation(
            RejectionReason::BaseTableMismatch,
            format!("FROM must start with the table `{expected}`, not a derived relation"),
        ));
    }

    let parts: Vec<&Lexeme> = relation[..chain].iter().step_by(2).collect();
    let Some((table, qualifiers)) = parts.split_last() else {
        return Err(violation(
            RejectionReason::BaseTableMismatch,
            format!("FROM must start with the table `{expected}`"),
        ));
    };
    let schema_matches = match qualifiers.last() {
        Some(schema) => schema.names(&context.schema),
        None => context.schema.eq_ignore_ascii_case(DEFAULT_SCHEMA),
    };
    if !(schema_matches && table.names(&context.table)) {
        let found: Vec<String> = parts.iter().filter_map(|t| t.ident()).collect();
        return Err(violation(
            RejectionReason::BaseTableMismatch,
            format!(
                "FROM binds to `{}` instead of `{expected}`",
                found.join(".")
            ),
        ));
    }
    Ok(())
}

/// Rule 8: spatial arguments are never multi-row scalar subqueries.
fn check_subquery_arguments(toks: &[Lexeme]) -> RuleResult<()> {
    for call in lexer::function_calls(toks, true) {
        if !call.name.starts_with("st_") {
            continue;
        }
        let unsafe_arg = call
            .args
            .iter()
            .flat_map(|arg| scalar_subqueries(arg))
            .any(|query| !is_single_row(query));
        if unsafe_arg {
            return Err(violation(
                RejectionReason::UnsafeSubqueryArgument,
                format!(
                    "an argument of `{}` is a subquery that can return more than one row; use a JOIN or EXISTS instead",
                    call.name
                ),
            ));
        }
    }
    Ok(())
}

/// Subqueries in `arg` that are used as a value, at any nesting depth.
///
/// `EXISTS (...)`, `IN (...)` and the like consume a whole set and are skipped.
fn scalar_subqueries(arg: &[Lexeme]) -> Vec<&[Lexeme]> {
    lexer::outer_subqueries(arg)
        .into_iter()
        .filter(|(open, _)| {
            let consumed = open
                .checked_sub(1)
                .and_then(|prev| arg.get(prev))
                .is_some_and(|prev| SET_SUBQUERY_WORDS.iter().any(|kw| prev.is_kw(kw)));
            !consumed
        })
        .map(|(_, body)| body)
        .collect()
}

/// Returns true if a subquery provably yields at most one row.
fn is_single_row(query: &[Lexeme]) -> bool {
    if let Some(limit) = lexer::find_top_level_kw(query, "LIMIT", 0) {
        if matches!(query.get(limit + 1), Some(Lexeme::Number(n)) if n == "1") {
            return true;
        }
    }
    if lexer::find_top_level_kw(query, "GROUP", 0).is_some() {
        return false;
    }
    let Some(select_at) = lexer::find_top_level_kw(query, "SELECT", 0) else {
        return false;
    };
    let Some(from_at) = lexer::find_top_level_kw(query, "FROM", select_at) else {
        return true;
    };
    let items = lexer::split_top_level(&query[select_at + 1..from_at]);
    !items.is_empty()
        && items
            .into_iter()
            .all(|item| is_plain_aggregate(SelectItem::parse(item).expr))
}

/// An aggregate call with no `OVER` window, which collapses to one row.
fn is_plain_aggregate(expr: &[Lexeme]) -> bool {
    starts_with_call(expr, AGGREGATE_FUNCTIONS)
        && lexer::matching_paren(expr, 1)
            .is_some_and(|close| !expr.get(close + 1).is_some_and(|t| t.is_kw("OVER")))
}

/// Rule 9: no LATERAL joins.
fn check_join_forms(toks: &[Lexeme]) -> RuleResult<()> {
    if toks.iter().any(|t| t.is_kw("LATERAL")) {
        return Err(violation(
            RejectionReason::UnsupportedJoinForm,
            "LATERAL joins are not supported; use a JOIN or EXISTS",
        ));
    }
    Ok(())
}

/// Rule 10: predicate arity and misuse.
fn check_predicate_shapes(toks: &[Lexeme], geom_column: &str) -> RuleResult<()> {
    for call in lexer::function_calls(toks, true) {
        let name = call.name.as_str();
        let arity = call.args.len();
        if name == "st_dwithin" {
            if arity != 3 {
                return Err(violation(
                    RejectionReason::PredicateArityViolation,
                    format!(
                        "ST_DWithin takes exactly three arguments (geometry, geometry, distance), found {arity}"
                    ),
                ));
            }
            if !is_distance_arg(call.args[2], geom_column) {
                return Err(violation(
                    RejectionReason::PredicateArityViolation,
                    "third argument of ST_DWithin must be a numeric distance",
                ));
            }
            if call.args_call_any(BUFFERING_FUNCTIONS) {
                return Err(violation(
                    RejectionReason::PredicateMisuse,
                    "ST_DWithin already measures distance; do not combine it with ST_Buffer",
                ));
            }
        } else if CONTAINMENT_PREDICATES.contains(&name) {
            if arity != 2 || call.args.iter().any(|arg| is_literal(arg)) {
                return Err(violation(
                    RejectionReason::PredicateArityViolation,
                    format!("`{name}` takes exactly two geometry arguments"),
                ));
            }
            if call.args_call_any(BUFFERING_FUNCTIONS) {
                return Err(violation(
                    RejectionReason::PredicateMisuse,
                    format!(
                        "`{name}` over a buffered geometry expresses a distance; use ST_DWithin"
                    ),
                ));
            }
        } else if BINARY_PREDICATES.contains(&name) && arity != 2 {
            return Err(violation(
                RejectionReason::PredicateArityViolation,
                format!("`{name}` takes exactly two geometry arguments, found {arity}"),
            ));
        }
    }
    Ok(())
}

fn is_literal(arg: &[Lexeme]) -> bool {
    matches!(arg, [Lexeme::Number(_)] | [Lexeme::Str(_)])
}

fn is_distance_arg(arg: &[Lexeme], geom_column: &str) -> bool {
    !arg.is_empty() && !matches!(arg, [Lexeme::Str(_)]) && !is_geometry_expr(arg, geom_column)
}
