//! Prompt construction for SQL generation requests.
//!
//! The prompt is a fixed rule block bound to the caller's table, geometry
//! column and result table, followed by the question verbatim.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::context::{QueryContext, TableRef};

/// Prompt template. Placeholders are filled by [`compose`].
const PROMPT_TEMPLATE: &str = r#"You are an expert PostGIS SQL generator.

ABSOLUTE RULES (MUST FOLLOW STRICTLY):

1. Output ONLY valid SQL.
2. Output EXACTLY ONE statement.
3. The output MUST start with:
   CREATE TABLE {result_table} AS SELECT ...
4. Use ONLY this table:
   {full_table}
5. Geometry column name is: {geom_column}
6. NEVER use SELECT *.
7. Select ONLY ONE geometry column and alias it as:
   geom
8. If a column named "gid" already exists:
   - DO NOT create another "gid".
   - Use "result_id" instead.
9. If an identifier is required, use:
   row_number() OVER ()::integer AS result_id
10. Geometry columns are NOT composite types:
    - NEVER use (geom).geom
    - ALWAYS use geom
11. ST_DWithin, ST_Intersects, ST_Intersection are predicates:
    - NEVER select them as columns.
12. Ensure geometries use the same SRID
    (apply ST_Transform only if required).
13. Do NOT add extra columns unless explicitly requested.
14. Do NOT include explanations, comments, or markdown.
15. NEVER use subqueries returning multiple rows
    as spatial function arguments.
16. Distance-based queries MUST use JOIN or EXISTS,
    NOT scalar subqueries.
17. The base table in FROM MUST match the main entity
    mentioned in the user request.
18. NEVER change the base table to an unrelated table.
19. NEVER use JOIN LATERAL.
20. ST_DWithin MUST have exactly three arguments:
    geometry, geometry, distance (numeric).
21. Do NOT combine ST_Buffer with ST_DWithin.
22. ST_Within MUST have exactly two geometry arguments
    and MUST NOT be used for distance queries.

User request:
{question}

Return ONLY the SQL."#;

/// Builds the generation prompt for `context`.
///
/// Pure and deterministic: the same inputs always produce the same prompt.
/// An empty table binds the prompt to the `public.UNKNOWN_TABLE` sentinel.
pub fn compose(context: &QueryContext, result_table: &TableRef) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let placeholder = PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{(result_table|full_table|geom_column|question)\}").expect("valid regex")
    });

    // Single pass over the template: substituted values are never rescanned.
    placeholder
        .replace_all(PROMPT_TEMPLATE, |caps: &Captures<'_>| match &caps[1] {
            "result_table" => result_table.qualified(),
            "full_table" => context.full_table(),
            "geom_column" => context.geom_column.clone(),
            _ => context.question.clone(),
        })
        .into_owned()
}
