//! Structural model builder.
//!
//! Turns the flat [`RawCatalog`] records into a [`Schema`]: columns grouped
//! under their tables, constraints attached, types resolved. Pure and
//! deterministic. Anything that breaks basic referential assumptions is a
//! [`MalformedCatalogError`].

use crate::catalog::{ConstraintKind, RawCatalog, RawConstraint, RawIndex};
use crate::error::MalformedCatalogError;
use dredge_db_schema::{
    Column, EnumType, FkAction, ForeignKey, Index, IndexColumn, PgType, Schema, Table,
    UniqueConstraint, is_sequence_default,
};

/// Build the structural model of a schema from its raw catalog.
pub fn build(raw: &RawCatalog) -> Result<Schema, MalformedCatalogError> {
    let mut schema = Schema::new(&raw.schema);

    for e in &raw.enums {
        schema.enums.insert(
            e.name.clone(),
            EnumType {
                name: e.name.clone(),
                variants: e.variants.clone(),
            },
        );
    }

    for t in &raw.tables {
        if schema.tables.contains_key(&t.name) {
            return Err(MalformedCatalogError::DuplicateTable {
                table: t.name.clone(),
            });
        }
        schema.tables.insert(t.name.clone(), Table::new(&t.name));
    }

    let is_enum = |name: &str| raw.enums.iter().any(|e| e.name == name);
    for c in &raw.columns {
        let Some(table) = schema.tables.get_mut(&c.table) else {
            return Err(MalformedCatalogError::UnknownTable {
                table: c.table.clone(),
                context: format!("column '{}'", c.name),
            });
        };
        if table.has_column(&c.name) {
            return Err(MalformedCatalogError::DuplicateColumn {
                table: c.table.clone(),
                column: c.name.clone(),
            });
        }
        table.columns.push(Column {
            name: c.name.clone(),
            pg_type: PgType::from_catalog(&c.udt_name, &c.formatted_type, is_enum),
            nullable: c.nullable,
            default: c.default.clone(),
            position: c.position,
            auto_generated: c.is_identity || is_sequence_default(c.default.as_deref()),
        });
    }
    for table in schema.tables.values_mut() {
        table.columns.sort_by_key(|c| c.position);
    }

    for constraint in &raw.constraints {
        match constraint.kind {
            ConstraintKind::PrimaryKey => {
                let table = owning_table(&mut schema, constraint)?;
                if !table.primary_key.is_empty() {
                    return Err(MalformedCatalogError::DuplicatePrimaryKey {
                        table: table.name.clone(),
                    });
                }
                table.primary_key = constraint.columns.clone();
            }
            ConstraintKind::Unique => {
                let table = owning_table(&mut schema, constraint)?;
                table.uniques.push(UniqueConstraint {
                    name: constraint.name.clone(),
                    columns: constraint.columns.clone(),
                });
            }
            ConstraintKind::ForeignKey => {
                let Some(fk) = resolve_foreign_key(&schema, raw, constraint)? else {
                    continue;
                };
                add_foreign_key(owning_table(&mut schema, constraint)?, fk);
            }
        }
    }

    for index in &raw.indexes {
        add_index(&mut schema, index)?;
    }

    tracing::debug!(
        schema = %schema.name,
        tables = schema.tables.len(),
        enums = schema.enums.len(),
        "built structural model"
    );

    Ok(schema)
}

/// Look up the table a constraint is declared on and check its columns exist.
fn owning_table<'s>(
    schema: &'s mut Schema,
    constraint: &RawConstraint,
) -> Result<&'s mut Table, MalformedCatalogError> {
    let context = format!("constraint '{}'", constraint.name);
    let Some(table) = schema.tables.get_mut(&constraint.table) else {
        return Err(MalformedCatalogError::UnknownTable {
            table: constraint.table.clone(),
            context,
        });
    };
    if constraint.columns.is_empty() {
        return Err(MalformedCatalogError::EmptyConstraint {
            table: constraint.table.clone(),
            constraint: constraint.name.clone(),
        });
    }
    check_columns(table, &constraint.columns, &context)?;
    Ok(table)
}

fn check_columns(
    table: &Table,
    columns: &[String],
    context: &str,
) -> Result<(), MalformedCatalogError> {
    match columns.iter().find(|c| !table.has_column(c)) {
        Some(missing) => Err(MalformedCatalogError::ColumnNotFound {
            table: table.name.clone(),
            column: missing.clone(),
            context: context.to_string(),
        }),
        None => Ok(()),
    }
}

/// Validate a foreign key against the schema built so far.
///
/// Returns `None` for keys into another schema, which a single-schema snapshot
/// cannot represent.
fn resolve_foreign_key(
    schema: &Schema,
    raw: &RawCatalog,
    constraint: &RawConstraint,
) -> Result<Option<ForeignKey>, MalformedCatalogError> {
    let Some(reference) = &constraint.references else {
        return Err(MalformedCatalogError::ForeignKeyTargetNotFound {
            table: constraint.table.clone(),
            constraint: constraint.name.clone(),
            target: String::new(),
        });
    };

    if let Some(other) = reference.schema.as_deref().filter(|s| *s != raw.schema) {
        tracing::warn!(
            schema = %raw.schema,
            table = %constraint.table,
            constraint = %constraint.name,
            target = %format!("{}.{}", other, reference.table),
            "dropping foreign key into another schema"
        );
        return Ok(None);
    }

    let Some(target) = schema.get_table(&reference.table) else {
        return Err(MalformedCatalogError::ForeignKeyTargetNotFound {
            table: constraint.table.clone(),
            constraint: constraint.name.clone(),
            target: reference.table.clone(),
        });
    };

    let missing: Vec<String> = reference
        .columns
        .iter()
        .filter(|c| !target.has_column(c))
        .cloned()
        .collect();
    if !missing.is_empty() || reference.columns.is_empty() {
        return Err(MalformedCatalogError::ForeignKeyColumnsNotFound {
            table: constraint.table.clone(),
            constraint: constraint.name.clone(),
            target: reference.table.clone(),
            columns: missing,
        });
    }

    if constraint.columns.len() != reference.columns.len() {
        return Err(MalformedCatalogError::ForeignKeyArity {
            table: constraint.table.clone(),
            constraint: constraint.name.clone(),
            from_len: constraint.columns.len(),
            to_len: reference.columns.len(),
        });
    }

    let action = |code: &str| {
        FkAction::from_pg_code(code).ok_or_else(|| MalformedCatalogError::UnknownAction {
            table: constraint.table.clone(),
            constraint: constraint.name.clone(),
            code: code.to_string(),
        })
    };

    Ok(Some(ForeignKey {
        name: constraint.name.clone(),
        columns: constraint.columns.clone(),
        references_table: reference.table.clone(),
        references_columns: reference.columns.clone(),
        on_delete: action(&reference.on_delete)?,
        on_update: action(&reference.on_update)?,
    }))
}

/// Postgres accepts the same foreign key declared twice under different
/// names. Only the copy whose constraint name sorts first is kept.
fn add_foreign_key(table: &mut Table, fk: ForeignKey) {
    let duplicate = table.foreign_keys.iter_mut().find(|existing| {
        existing.columns == fk.columns
            && existing.references_table == fk.references_table
            && existing.references_columns == fk.references_columns
    });
    match duplicate {
        Some(existing) => {
            let (kept, dropped) = if fk.name < existing.name {
                (fk.name.clone(), std::mem::replace(existing, fk).name)
            } else {
                (existing.name.clone(), fk.name)
            };
            tracing::warn!(
                table = %table.name,
                kept = %kept,
                dropped = %dropped,
                "dropping redundant foreign key"
            );
        }
        None => table.foreign_keys.push(fk),
    }
}

fn add_index(schema: &mut Schema, index: &RawIndex) -> Result<(), MalformedCatalogError> {
    let context = format!("index '{}'", index.name);
    let Some(table) = schema.tables.get_mut(&index.table) else {
        return Err(MalformedCatalogError::UnknownTable {
            table: index.table.clone(),
            context,
        });
    };
    check_columns(table, &index.columns, &context)?;

    let columns = index
        .columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            IndexColumn::from_indoption(name, index.options.get(i).copied().unwrap_or(0))
        })
        .collect();

    table.indices.push(Index {
        name: index.name.clone(),
        columns,
        unique: index.unique,
        where_clause: index.predicate.clone(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{RawColumn, RawIndex, RawReference};
    use dredge_db_schema::SortOrder;

    fn blog() -> RawCatalog {
        RawCatalog::new("public")
            .with_table("post")
            .with_table("user")
            .with_column(RawColumn::new("post", "title", 2, "text"))
            .with_column(
                RawColumn::new("post", "id", 1, "int4").default("nextval('post_id_seq'::regclass)"),
            )
            .with_column(RawColumn::new("post", "author_id", 3, "int4"))
            .with_column(RawColumn::new("user", "id", 1, "int4").identity())
            .with_column(RawColumn::new("user", "mood", 2, "mood").nullable())
            .with_constraint(RawConstraint::primary_key("post", "post_pkey", &["id"]))
            .with_constraint(
                RawConstraint::foreign_key(
                    "post",
                    "post_author_id_fkey",
                    &["author_id"],
                    "user",
                    &["id"],
                )
                .on_delete("c"),
            )
            .with_constraint(RawConstraint::primary_key("user", "user_pkey", &["id"]))
            .with_enum("mood", &["happy", "sad"])
    }

    #[test]
    fn test_build_groups_and_orders_columns() {
        let schema = build(&blog()).unwrap();

        let names: Vec<_> = schema.iter_tables().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["post", "user"]);

        let post = schema.get_table("post").unwrap();
        let columns: Vec<_> = post.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(columns, vec!["id", "title", "author_id"]);
        assert!(post.column("id").unwrap().auto_generated);
        assert!(!post.column("title").unwrap().auto_generated);
        assert_eq!(post.primary_key, vec!["id"]);

        let user = schema.get_table("user").unwrap();
        assert!(user.column("id").unwrap().auto_generated);
        assert_eq!(
            user.column("mood").unwrap().pg_type,
            PgType::Enum("mood".to_string())
        );
    }

    #[test]
    fn test_build_foreign_key_actions() {
        let schema = build(&blog()).unwrap();
        let fk = &schema.get_table("post").unwrap().foreign_keys[0];
        assert_eq!(fk.references_table, "user");
        assert_eq!(fk.on_delete, FkAction::Cascade);
        assert_eq!(fk.on_update, FkAction::NoAction);
    }

    #[test]
    fn test_build_indexes() {
        let raw = blog().with_index(RawIndex {
            table: "post".to_string(),
            name: "post_title_idx".to_string(),
            columns: vec!["title".to_string(), "id".to_string()],
            options: vec![3],
            unique: false,
            predicate: None,
        });
        let schema = build(&raw).unwrap();
        let index = &schema.get_table("post").unwrap().indices[0];
        assert_eq!(index.columns[0].order, SortOrder::Desc);
        // missing indoption entries fall back to ascending
        assert_eq!(index.columns[1].order, SortOrder::Asc);
    }

    #[test]
    fn test_fk_to_missing_column_fails() {
        let raw = blog().with_constraint(RawConstraint::foreign_key(
            "post",
            "post_editor_fkey",
            &["author_id"],
            "user",
            &["uuid"],
        ));
        let err = build(&raw).unwrap_err();
        assert_eq!(
            err,
            MalformedCatalogError::ForeignKeyColumnsNotFound {
                table: "post".to_string(),
                constraint: "post_editor_fkey".to_string(),
                target: "user".to_string(),
                columns: vec!["uuid".to_string()],
            }
        );
    }

    #[test]
    fn test_fk_to_missing_table_fails() {
        let raw = blog().with_constraint(RawConstraint::foreign_key(
            "post",
            "post_blog_fkey",
            &["author_id"],
            "blog",
            &["id"],
        ));
        assert!(matches!(
            build(&raw),
            Err(MalformedCatalogError::ForeignKeyTargetNotFound { target, .. }) if target == "blog"
        ));
    }

    #[test]
    fn test_fk_arity_mismatch_fails() {
        let raw = blog().with_constraint(RawConstraint::foreign_key(
            "post",
            "post_pair_fkey",
            &["author_id", "title"],
            "user",
            &["id"],
        ));
        assert!(matches!(
            build(&raw),
            Err(MalformedCatalogError::ForeignKeyArity {
                from_len: 2,
                to_len: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_action_code_fails() {
        let raw = blog().with_constraint(
            RawConstraint::foreign_key("post", "post_odd_fkey", &["author_id"], "user", &["id"])
                .on_delete("?"),
        );
        assert!(matches!(
            build(&raw),
            Err(MalformedCatalogError::UnknownAction { code, .. }) if code == "?"
        ));
    }

    #[test]
    fn test_duplicate_table_and_primary_key_fail() {
        let raw = blog().with_table("post");
        assert_eq!(
            build(&raw).unwrap_err(),
            MalformedCatalogError::DuplicateTable {
                table: "post".to_string()
            }
        );

        let raw =
            blog().with_constraint(RawConstraint::primary_key("post", "post_pkey2", &["title"]));
        assert_eq!(
            build(&raw).unwrap_err(),
            MalformedCatalogError::DuplicatePrimaryKey {
                table: "post".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_table_and_column_fail() {
        let raw = blog().with_column(RawColumn::new("comment", "id", 1, "int4"));
        assert!(matches!(
            build(&raw),
            Err(MalformedCatalogError::UnknownTable { table, .. }) if table == "comment"
        ));

        let raw = blog().with_constraint(RawConstraint::unique("post", "post_slug_key", &["slug"]));
        assert!(matches!(
            build(&raw),
            Err(MalformedCatalogError::ColumnNotFound { column, .. }) if column == "slug"
        ));

        let raw = blog().with_column(RawColumn::new("post", "title", 4, "text"));
        assert!(matches!(
            build(&raw),
            Err(MalformedCatalogError::DuplicateColumn { column, .. }) if column == "title"
        ));
    }

    #[test]
    fn test_cross_schema_fk_is_dropped() {
        let mut fk = RawConstraint::foreign_key(
            "post",
            "post_tenant_fkey",
            &["author_id"],
            "tenant",
            &["id"],
        );
        fk.references = Some(RawReference {
            schema: Some("auth".to_string()),
            ..fk.references.unwrap()
        });
        let schema = build(&blog().with_constraint(fk)).unwrap();
        assert_eq!(schema.get_table("post").unwrap().foreign_keys.len(), 1);
    }

    #[test]
    fn test_redundant_fk_keeps_first_name() {
        let copy = |name: &str| {
            RawConstraint::foreign_key("post", name, &["author_id"], "user", &["id"])
        };
        let forward = build(&blog().with_constraint(copy("a_author_fkey"))).unwrap();
        let mut reversed = blog().with_constraint(copy("a_author_fkey"));
        reversed.constraints.reverse();
        let backward = build(&reversed).unwrap();

        for schema in [forward, backward] {
            let fks = &schema.get_table("post").unwrap().foreign_keys;
            assert_eq!(fks.len(), 1);
            assert_eq!(fks[0].name, "a_author_fkey");
        }

        // same columns, different target: both stay
        let raw = blog()
            .with_table("person")
            .with_column(RawColumn::new("person", "id", 1, "int4"))
            .with_constraint(RawConstraint::foreign_key(
                "post",
                "post_author_person_fkey",
                &["author_id"],
                "person",
                &["id"],
            ));
        let schema = build(&raw).unwrap();
        assert_eq!(schema.get_table("post").unwrap().foreign_keys.len(), 2);
    }

    #[test]
    fn test_empty_catalog_builds_empty_schema() {
        let schema = build(&RawCatalog::new("public")).unwrap();
        assert!(schema.tables.is_empty());
        assert_eq!(schema.name, "public");
    }
}
