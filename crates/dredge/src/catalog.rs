//! Catalog reader.
//!
//! Reads tables, columns, constraints, indexes and enum types of one schema
//! straight out of `pg_catalog` and returns them as [`RawCatalog`] records,
//! without interpreting them. Ordering is whatever the queries below ask
//! Postgres for (tables by name, columns by `attnum`, constraints by name) and
//! is preserved by every later stage.
//!
//! This is the only stage that performs I/O. Dropping the returned future
//! cancels the in-flight query; the connection itself is left open.

use crate::error::CatalogError;
use crate::traced::{Connection, ConnectionExt};
use tokio_postgres::Row;

/// Raw structural records for one schema, exactly as the catalog reports them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCatalog {
    /// Schema (namespace) that was read
    pub schema: String,
    pub tables: Vec<RawTable>,
    pub columns: Vec<RawColumn>,
    pub constraints: Vec<RawConstraint>,
    pub indexes: Vec<RawIndex>,
    pub enums: Vec<RawEnum>,
}

impl RawCatalog {
    /// An empty catalog for `schema`.
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            ..Self::default()
        }
    }

    /// Whether the schema has no tables at all.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Add a table.
    pub fn with_table(mut self, name: impl Into<String>) -> Self {
        self.tables.push(RawTable { name: name.into() });
        self
    }

    /// Add a column.
    pub fn with_column(mut self, column: RawColumn) -> Self {
        self.columns.push(column);
        self
    }

    /// Add a constraint.
    pub fn with_constraint(mut self, constraint: RawConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Add an index.
    pub fn with_index(mut self, index: RawIndex) -> Self {
        self.indexes.push(index);
        self
    }

    /// Add an enum type.
    pub fn with_enum(mut self, name: impl Into<String>, variants: &[&str]) -> Self {
        self.enums.push(RawEnum {
            name: name.into(),
            variants: variants.iter().map(|v| v.to_string()).collect(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawColumn {
    pub table: String,
    pub name: String,
    /// `pg_attribute.attnum`
    pub position: i32,
    /// `pg_type.typname`, e.g. `int4` or `_text`
    pub udt_name: String,
    /// `format_type()` output, e.g. `character varying(255)`
    pub formatted_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    /// `GENERATED ... AS IDENTITY`
    pub is_identity: bool,
}

impl RawColumn {
    /// A NOT NULL column without default whose formatted type is its `udt_name`.
    pub fn new(
        table: impl Into<String>,
        name: impl Into<String>,
        position: i32,
        udt_name: impl Into<String>,
    ) -> Self {
        let udt_name = udt_name.into();
        Self {
            table: table.into(),
            name: name.into(),
            position,
            formatted_type: udt_name.clone(),
            udt_name,
            nullable: false,
            default: None,
            is_identity: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    pub fn formatted(mut self, formatted_type: impl Into<String>) -> Self {
        self.formatted_type = formatted_type.into();
        self
    }

    pub fn identity(mut self) -> Self {
        self.is_identity = true;
        self
    }
}

/// Constraint kinds the reader asks for (`pg_constraint.contype`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
}

impl ConstraintKind {
    pub fn from_pg_code(code: &str) -> Option<Self> {
        match code {
            "p" => Some(ConstraintKind::PrimaryKey),
            "u" => Some(ConstraintKind::Unique),
            "f" => Some(ConstraintKind::ForeignKey),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawConstraint {
    pub table: String,
    pub name: String,
    pub kind: ConstraintKind,
    /// Constrained columns, in key order
    pub columns: Vec<String>,
    /// Only set for foreign keys
    pub references: Option<RawReference>,
}

impl RawConstraint {
    pub fn primary_key(
        table: impl Into<String>,
        name: impl Into<String>,
        columns: &[&str],
    ) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            kind: ConstraintKind::PrimaryKey,
            columns: to_strings(columns),
            references: None,
        }
    }

    pub fn unique(table: impl Into<String>, name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            kind: ConstraintKind::Unique,
            columns: to_strings(columns),
            references: None,
        }
    }

    /// A foreign key into the same schema with `NO ACTION` on both events.
    pub fn foreign_key(
        table: impl Into<String>,
        name: impl Into<String>,
        columns: &[&str],
        target: impl Into<String>,
        target_columns: &[&str],
    ) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            kind: ConstraintKind::ForeignKey,
            columns: to_strings(columns),
            references: Some(RawReference {
                schema: None,
                table: target.into(),
                columns: to_strings(target_columns),
                on_delete: "a".to_string(),
                on_update: "a".to_string(),
            }),
        }
    }

    /// Set the `ON DELETE` action code of a foreign key.
    pub fn on_delete(mut self, code: &str) -> Self {
        if let Some(reference) = &mut self.references {
            reference.on_delete = code.to_string();
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReference {
    /// Schema of the referenced table; `None` means the schema being read
    pub schema: Option<String>,
    pub table: String,
    pub columns: Vec<String>,
    /// `confdeltype` action code
    pub on_delete: String,
    /// `confupdtype` action code
    pub on_update: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawIndex {
    pub table: String,
    pub name: String,
    /// Key columns, in index order
    pub columns: Vec<String>,
    /// `pg_index.indoption` flags, parallel to `columns`
    pub options: Vec<i32>,
    pub unique: bool,
    /// Partial index predicate
    pub predicate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEnum {
    pub name: String,
    /// Labels, in sort order
    pub variants: Vec<String>,
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

const SCHEMA_SQL: &str = "SELECT n.oid FROM pg_catalog.pg_namespace n WHERE n.nspname = $1";

const TABLES_SQL: &str = r#"
SELECT c.relname::text AS table_name
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1
  AND c.relkind IN ('r', 'p')
  AND NOT c.relispartition
ORDER BY c.relname
"#;

const COLUMNS_SQL: &str = r#"
SELECT c.relname::text AS table_name,
       a.attname::text AS column_name,
       a.attnum::int4 AS position,
       t.typname::text AS udt_name,
       pg_catalog.format_type(a.atttypid, a.atttypmod) AS formatted_type,
       NOT a.attnotnull AS nullable,
       pg_catalog.pg_get_expr(d.adbin, d.adrelid) AS column_default,
       a.attidentity <> '' AS is_identity
FROM pg_catalog.pg_attribute a
JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
JOIN pg_catalog.pg_type t ON t.oid = a.atttypid
LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
WHERE n.nspname = $1
  AND c.relkind IN ('r', 'p')
  AND NOT c.relispartition
  AND a.attnum > 0
  AND NOT a.attisdropped
ORDER BY c.relname, a.attnum
"#;

const CONSTRAINTS_SQL: &str = r#"
SELECT rel.relname::text AS table_name,
       con.conname::text AS constraint_name,
       con.contype::text AS kind,
       ARRAY(
           SELECT att.attname::text
           FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
           JOIN pg_catalog.pg_attribute att
             ON att.attrelid = con.conrelid AND att.attnum = k.attnum
           ORDER BY k.ord
       ) AS columns,
       fns.nspname::text AS referenced_schema,
       frel.relname::text AS referenced_table,
       ARRAY(
           SELECT att.attname::text
           FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
           JOIN pg_catalog.pg_attribute att
             ON att.attrelid = con.confrelid AND att.attnum = k.attnum
           ORDER BY k.ord
       ) AS referenced_columns,
       con.confdeltype::text AS on_delete,
       con.confupdtype::text AS on_update
FROM pg_catalog.pg_constraint con
JOIN pg_catalog.pg_class rel ON rel.oid = con.conrelid
JOIN pg_catalog.pg_namespace n ON n.oid = rel.relnamespace
LEFT JOIN pg_catalog.pg_class frel ON frel.oid = con.confrelid
LEFT JOIN pg_catalog.pg_namespace fns ON fns.oid = frel.relnamespace
WHERE n.nspname = $1
  AND con.contype IN ('p', 'u', 'f')
  AND rel.relkind IN ('r', 'p')
  AND NOT rel.relispartition
ORDER BY rel.relname, con.conname
"#;

// Indexes backing PRIMARY KEY / UNIQUE / EXCLUDE constraints are already
// covered by the constraint query. Expression indexes have a zero in `indkey`
// and are skipped.
const INDEXES_SQL: &str = r#"
SELECT t.relname::text AS table_name,
       i.relname::text AS index_name,
       ix.indisunique AS is_unique,
       ARRAY(
           SELECT a.attname::text
           FROM unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
           JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
           WHERE k.ord <= ix.indnkeyatts
           ORDER BY k.ord
       ) AS columns,
       ARRAY(
           SELECT o.opt::int4
           FROM unnest(ix.indoption::int2[]) WITH ORDINALITY AS o(opt, ord)
           ORDER BY o.ord
       ) AS options,
       pg_catalog.pg_get_expr(ix.indpred, ix.indrelid) AS predicate
FROM pg_catalog.pg_index ix
JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid
JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid
JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
WHERE n.nspname = $1
  AND t.relkind IN ('r', 'p')
  AND NOT t.relispartition
  AND NOT ix.indisprimary
  AND NOT (0 = ANY (ix.indkey::int2[]))
  AND NOT EXISTS (
      SELECT 1
      FROM pg_catalog.pg_constraint con
      WHERE con.conindid = ix.indexrelid
        AND con.conrelid = ix.indrelid
        AND con.contype IN ('p', 'u', 'x')
  )
ORDER BY t.relname, i.relname
"#;

const ENUMS_SQL: &str = r#"
SELECT t.typname::text AS enum_name,
       ARRAY(
           SELECT e.enumlabel::text
           FROM pg_catalog.pg_enum e
           WHERE e.enumtypid = t.oid
           ORDER BY e.enumsortorder
       ) AS variants
FROM pg_catalog.pg_type t
JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace
WHERE n.nspname = $1
  AND t.typtype = 'e'
ORDER BY t.typname
"#;

/// Read the raw catalog of `schema`.
///
/// Fails with [`CatalogError::SchemaNotFound`] if the namespace doesn't exist.
/// A schema without tables yields an empty catalog.
pub async fn read_catalog<C: Connection>(
    conn: &C,
    schema: &str,
) -> Result<RawCatalog, CatalogError> {
    let traced = conn.traced(schema);
    let classify = |e: tokio_postgres::Error| CatalogError::from_postgres(schema, e);

    if traced
        .query_opt("schema", SCHEMA_SQL, &[&schema])
        .await
        .map_err(classify)?
        .is_none()
    {
        return Err(CatalogError::SchemaNotFound(schema.to_string()));
    }

    let tables = decode_all(
        traced.query("tables", TABLES_SQL, &[&schema]).await,
        decode_table,
    )
    .map_err(classify)?;
    let columns = decode_all(
        traced.query("columns", COLUMNS_SQL, &[&schema]).await,
        decode_column,
    )
    .map_err(classify)?;
    let constraints = decode_all(
        traced.query("constraints", CONSTRAINTS_SQL, &[&schema]).await,
        |row| decode_constraint(row, schema),
    )
    .map_err(classify)?
    .into_iter()
    .flatten()
    .collect();
    let indexes = decode_all(
        traced.query("indexes", INDEXES_SQL, &[&schema]).await,
        decode_index,
    )
    .map_err(classify)?;
    let enums = decode_all(
        traced.query("enums", ENUMS_SQL, &[&schema]).await,
        decode_enum,
    )
    .map_err(classify)?;

    let catalog = RawCatalog {
        schema: schema.to_string(),
        tables,
        columns,
        constraints,
        indexes,
        enums,
    };

    tracing::info!(
        schema,
        tables = catalog.tables.len(),
        columns = catalog.columns.len(),
        constraints = catalog.constraints.len(),
        indexes = catalog.indexes.len(),
        enums = catalog.enums.len(),
        "read catalog"
    );

    Ok(catalog)
}

fn decode_all<T>(
    rows: Result<Vec<Row>, tokio_postgres::Error>,
    decode: impl Fn(&Row) -> Result<T, tokio_postgres::Error>,
) -> Result<Vec<T>, tokio_postgres::Error> {
    rows?.iter().map(decode).collect()
}

fn decode_table(row: &Row) -> Result<RawTable, tokio_postgres::Error> {
    Ok(RawTable {
        name: row.try_get("table_name")?,
    })
}

fn decode_column(row: &Row) -> Result<RawColumn, tokio_postgres::Error> {
    Ok(RawColumn {
        table: row.try_get("table_name")?,
        name: row.try_get("column_name")?,
        position: row.try_get("position")?,
        udt_name: row.try_get("udt_name")?,
        formatted_type: row.try_get("formatted_type")?,
        nullable: row.try_get("nullable")?,
        default: row.try_get("column_default")?,
        is_identity: row.try_get("is_identity")?,
    })
}

/// Decode a constraint row. Kinds other than the three we ask for are skipped.
fn decode_constraint(
    row: &Row,
    schema: &str,
) -> Result<Option<RawConstraint>, tokio_postgres::Error> {
    let kind: String = row.try_get("kind")?;
    let Some(kind) = ConstraintKind::from_pg_code(&kind) else {
        return Ok(None);
    };

    let references = if kind == ConstraintKind::ForeignKey {
        let referenced_schema: Option<String> = row.try_get("referenced_schema")?;
        let referenced_table: Option<String> = row.try_get("referenced_table")?;
        match referenced_table {
            Some(table) => Some(RawReference {
                schema: referenced_schema.filter(|s| s != schema),
                table,
                columns: row.try_get("referenced_columns")?,
                on_delete: row.try_get("on_delete")?,
                on_update: row.try_get("on_update")?,
            }),
            None => None,
        }
    } else {
        None
    };

    Ok(Some(RawConstraint {
        table: row.try_get("table_name")?,
        name: row.try_get("constraint_name")?,
        kind,
        columns: row.try_get("columns")?,
        references,
    }))
}

fn decode_index(row: &Row) -> Result<RawIndex, tokio_postgres::Error> {
    Ok(RawIndex {
        table: row.try_get("table_name")?,
        name: row.try_get("index_name")?,
        columns: row.try_get("columns")?,
        options: row.try_get("options")?,
        unique: row.try_get("is_unique")?,
        predicate: row.try_get("predicate")?,
    })
}

fn decode_enum(row: &Row) -> Result<RawEnum, tokio_postgres::Error> {
    Ok(RawEnum {
        name: row.try_get("enum_name")?,
        variants: row.try_get("variants")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_kind_codes() {
        assert_eq!(ConstraintKind::from_pg_code("p"), Some(ConstraintKind::PrimaryKey));
        assert_eq!(ConstraintKind::from_pg_code("u"), Some(ConstraintKind::Unique));
        assert_eq!(ConstraintKind::from_pg_code("f"), Some(ConstraintKind::ForeignKey));
        assert_eq!(ConstraintKind::from_pg_code("c"), None);
    }

    #[test]
    fn test_raw_catalog_builders() {
        let catalog = RawCatalog::new("public")
            .with_table("user")
            .with_column(RawColumn::new("user", "id", 1, "int8"))
            .with_column(
                RawColumn::new("user", "name", 2, "varchar")
                    .formatted("character varying(40)")
                    .nullable(),
            )
            .with_constraint(RawConstraint::primary_key("user", "user_pkey", &["id"]));

        assert!(!catalog.is_empty());
        assert_eq!(catalog.columns[1].formatted_type, "character varying(40)");
        assert!(catalog.columns[1].nullable);
        assert_eq!(catalog.constraints[0].columns, vec!["id"]);
        assert!(RawCatalog::new("empty").is_empty());
    }

    #[test]
    fn test_foreign_key_builder_defaults() {
        let fk = RawConstraint::foreign_key(
            "post",
            "post_author_id_fkey",
            &["author_id"],
            "user",
            &["id"],
        )
        .on_delete("c");
        let reference = fk.references.expect("foreign keys carry a reference");
        assert_eq!(reference.schema, None);
        assert_eq!(reference.on_delete, "c");
        assert_eq!(reference.on_update, "a");
    }
}
