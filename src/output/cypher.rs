use std::collections::BTreeMap;

use crate::merge::{LabelGroup, MergedRecord};
use crate::types::{FieldConflictBehavior, FieldShape};

/// Maximum characters of an old or new value embedded in a log entry.
pub const LOG_VALUE_LIMIT: usize = 200;

/// Rows deleted per statement when truncating.
pub const TRUNCATE_BATCH_SIZE: usize = 50_000;

/// Quotes an identifier with backticks.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Renders a single-quoted Cypher string literal.
pub fn string_literal(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

/// `:`A`:`B`` label expression.
fn label_expr(labels: &[String]) -> String {
    labels.iter().map(|l| format!(":{}", quote_ident(l))).collect()
}

/// Index name for a label/field pair: lower-cased with `:`, spaces and `-`
/// replaced by `_`.
pub fn index_name(label: &str, field: &str) -> String {
    format!("{label}_{field}_index")
        .to_lowercase()
        .replace([':', ' ', '-'], "_")
}

pub fn create_index_statement(label: &str, field: &str) -> String {
    format!(
        "CREATE INDEX {} IF NOT EXISTS FOR (n:{}) ON (n.{})",
        quote_ident(&index_name(label, field)),
        quote_ident(label),
        quote_ident(field)
    )
}

/// Attribute shapes of one generated statement.
pub type FieldShapes = BTreeMap<String, FieldShape>;

/// Splits a label group so that no field has two shapes within one part.
///
/// Different entities may use different shapes for the same field; each
/// part gets its own statement. Records keep their relative order.
pub fn shape_groups(records: &[MergedRecord]) -> Vec<(FieldShapes, Vec<MergedRecord>)> {
    let mut groups: Vec<(FieldShapes, Vec<MergedRecord>)> = Vec::new();
    for record in records {
        let fits = |shapes: &FieldShapes| {
            record
                .fields
                .iter()
                .all(|(name, value)| shapes.get(name).map_or(true, |s| *s == value.shape()))
        };
        let pos = match groups.iter().position(|(shapes, _)| fits(shapes)) {
            Some(pos) => pos,
            None => {
                groups.push((FieldShapes::new(), Vec::new()));
                groups.len() - 1
            }
        };
        let (shapes, members) = &mut groups[pos];
        for (name, value) in &record.fields {
            shapes.entry(name.clone()).or_insert_with(|| value.shape());
        }
        members.push(record.clone());
    }
    groups
}

/// `MATCH` clause binding the stored entity of a group to `var`.
fn match_existing(group: &LabelGroup, var: &str) -> String {
    match group {
        LabelGroup::Node { labels } => {
            format!("MATCH ({var}{} {{id: rec.id}})", label_expr(labels))
        }
        LabelGroup::Edge {
            start_labels,
            label,
            end_labels,
        } => format!(
            "MATCH ({} {{id: rec.start_id}})-[{var}:{}]->({} {{id: rec.end_id}})",
            label_expr(start_labels),
            quote_ident(label),
            label_expr(end_labels)
        ),
    }
}

/// Generates a read-only statement returning `[key, field, stored type]`
/// for every incoming field whose stored value has the other shape. `None`
/// when the group carries no attribute fields.
pub fn shape_check_statement(group: &LabelGroup, shapes: &FieldShapes) -> Option<String> {
    if shapes.is_empty() {
        return None;
    }
    let var = "e";
    let checks: Vec<String> = shapes
        .iter()
        .map(|(name, shape)| {
            let field = quote_ident(name);
            let negate = if shape.is_collection() { "NOT " } else { "" };
            format!(
                "CASE WHEN rec.{field} IS NOT NULL AND {var}.{field} IS NOT NULL \
                 AND {negate}valueType({var}.{field}) STARTS WITH 'LIST' THEN {} END",
                string_literal(name)
            )
        })
        .collect();
    let key = match group {
        LabelGroup::Node { .. } => "rec.id".to_string(),
        LabelGroup::Edge { .. } => "rec.start_id + '->' + rec.end_id".to_string(),
    };
    Some(format!(
        "UNWIND $records AS rec\n{}\n\
         UNWIND [f IN [{}] WHERE f IS NOT NULL] AS field\n\
         RETURN {key} AS key, field, valueType({var}[field]) AS stored",
        match_existing(group, var),
        checks.join(", ")
    ))
}

/// Builds the shared tail of an upsert: the idempotence filter, the update
/// log, and the field assignments for variable `var`.
fn merge_body(
    var: &str,
    shapes: &FieldShapes,
    behavior: FieldConflictBehavior,
) -> String {
    let mut query = String::new();
    query.push_str(&format!(
        "WITH {var}, rec, {var}.creation IS NULL AS created, \
         [x IN coalesce(rec.resolved_ids, []) WHERE NOT x IN coalesce({var}.resolved_ids, [])] AS fresh\n"
    ));
    query.push_str("WHERE created OR size(fresh) > 0\n");
    query.push_str(&format!(
        "WITH {var}, rec, created, fresh, \
         [u IN coalesce(rec.updates, []) WHERE NOT u IN coalesce({var}.updates, [])] AS carried\n"
    ));

    let policy = string_literal(behavior.as_str());
    let mut log_entries = Vec::new();
    for (name, shape) in shapes {
        if shape.is_collection() {
            continue;
        }
        let field = quote_ident(name);
        log_entries.push(format!(
            "CASE WHEN NOT created AND rec.{field} IS NOT NULL \
             AND ({var}.{field} IS NULL OR {var}.{field} <> rec.{field}) \
             THEN {name_lit} + '\\t' + coalesce(left(toString({var}.{field}), {limit}), 'NULL') \
             + '\\t' + left(toString(rec.{field}), {limit}) \
             + '\\t' + coalesce(rec.field_sources.{field}, rec.creation, '') + '\\t' + {policy} END",
            name_lit = string_literal(name),
            limit = LOG_VALUE_LIMIT,
        ));
    }

    if log_entries.is_empty() {
        query.push_str(&format!(
            "SET {var}.updates = coalesce({var}.updates, []) + carried\n"
        ));
    } else {
        query.push_str(&format!(
            "SET {var}.updates = coalesce({var}.updates, []) + carried \
             + [u IN [{}] WHERE u IS NOT NULL AND NOT u IN carried \
             AND NOT u IN coalesce({var}.updates, [])]\n",
            log_entries.join(", ")
        ));
    }

    let mut assignments = Vec::new();
    for (name, shape) in shapes {
        let field = quote_ident(name);
        let value = if shape.is_collection() {
            format!("coalesce({var}.{field}, []) + coalesce(rec.{field}, [])")
        } else {
            match behavior {
                FieldConflictBehavior::KeepLast => format!("coalesce(rec.{field}, {var}.{field})"),
                FieldConflictBehavior::KeepFirst => format!("coalesce({var}.{field}, rec.{field})"),
            }
        };
        assignments.push(format!("{var}.{field} = {value}"));
    }
    assignments.push(format!("{var}.creation = coalesce({var}.creation, rec.creation)"));
    assignments.push(format!("{var}.xref = coalesce({var}.xref, rec.xref)"));
    assignments.push(format!(
        "{var}.resolved_ids = coalesce({var}.resolved_ids, []) + fresh"
    ));
    query.push_str(&format!("SET {}", assignments.join(",\n    ")));
    query
}

/// Generates the bulk upsert for one node label set. Records are passed as
/// the `$records` parameter.
pub fn node_upsert_statement(
    labels: &[String],
    shapes: &FieldShapes,
    behavior: FieldConflictBehavior,
) -> String {
    format!(
        "UNWIND $records AS rec\nMERGE (n{} {{id: rec.id}})\n{}",
        label_expr(labels),
        merge_body("n", shapes, behavior)
    )
}

/// Generates the bulk upsert for one `(start labels, label, end labels)`
/// group. Both endpoints must already exist.
pub fn relationship_upsert_statement(
    start_labels: &[String],
    label: &str,
    end_labels: &[String],
    shapes: &FieldShapes,
    behavior: FieldConflictBehavior,
) -> String {
    format!(
        "UNWIND $records AS rec\n\
         MATCH (source{} {{id: rec.start_id}})\n\
         MATCH (target{} {{id: rec.end_id}})\n\
         MERGE (source)-[rel:{}]->(target)\n{}",
        label_expr(start_labels),
        label_expr(end_labels),
        quote_ident(label),
        merge_body("rel", shapes, behavior)
    )
}

/// Generates the upsert statement for a label group.
pub fn upsert_statement(
    group: &LabelGroup,
    shapes: &FieldShapes,
    behavior: FieldConflictBehavior,
) -> String {
    match group {
        LabelGroup::Node { labels } => node_upsert_statement(labels, shapes, behavior),
        LabelGroup::Edge {
            start_labels,
            label,
            end_labels,
        } => relationship_upsert_statement(start_labels, label, end_labels, shapes, behavior),
    }
}

pub fn delete_relationships_statement() -> String {
    format!(
        "MATCH ()-[r]->() WITH r LIMIT {TRUNCATE_BATCH_SIZE} DELETE r RETURN count(r) AS deleted"
    )
}

pub fn delete_nodes_statement() -> String {
    format!(
        "MATCH (n) WITH n LIMIT {TRUNCATE_BATCH_SIZE} DETACH DELETE n RETURN count(n) AS deleted"
    )
}
