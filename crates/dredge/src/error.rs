use thiserror::Error;
use tokio_postgres::error::SqlState;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    MalformedCatalog(#[from] MalformedCatalogError),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

/// Failure while reading the catalog. Always fatal, never retried here.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("connection error while reading the catalog of schema '{schema}': {source}")]
    Connection {
        schema: String,
        #[source]
        source: tokio_postgres::Error,
    },

    #[error("permission denied while reading the catalog of schema '{schema}': {source}")]
    Permission {
        schema: String,
        #[source]
        source: tokio_postgres::Error,
    },

    #[error("schema '{0}' not found")]
    SchemaNotFound(String),
}

impl CatalogError {
    /// Classify a driver error raised while querying the catalog of `schema`.
    pub(crate) fn from_postgres(schema: &str, source: tokio_postgres::Error) -> Self {
        if source.code() == Some(&SqlState::INSUFFICIENT_PRIVILEGE) {
            CatalogError::Permission {
                schema: schema.to_string(),
                source,
            }
        } else {
            CatalogError::Connection {
                schema: schema.to_string(),
                source,
            }
        }
    }
}

/// The catalog violates basic referential assumptions.
///
/// This points at a driver or server-version incompatibility: Postgres itself
/// never reports a foreign key to a column that doesn't exist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedCatalogError {
    #[error("table '{table}' is reported more than once")]
    DuplicateTable { table: String },

    #[error("{context} references unknown table '{table}'")]
    UnknownTable { table: String, context: String },

    #[error("column '{table}.{column}' is reported more than once")]
    DuplicateColumn { table: String, column: String },

    #[error("{context} references unknown column '{table}.{column}'")]
    ColumnNotFound {
        table: String,
        column: String,
        context: String,
    },

    #[error("table '{table}' has more than one primary key")]
    DuplicatePrimaryKey { table: String },

    #[error("constraint '{constraint}' on '{table}' has no columns")]
    EmptyConstraint { table: String, constraint: String },

    #[error("foreign key '{constraint}' on '{table}' references non-existent table '{target}'")]
    ForeignKeyTargetNotFound {
        table: String,
        constraint: String,
        target: String,
    },

    #[error("foreign key '{constraint}' on '{table}' references columns {columns:?} not found in '{target}'")]
    ForeignKeyColumnsNotFound {
        table: String,
        constraint: String,
        target: String,
        columns: Vec<String>,
    },

    #[error("foreign key '{constraint}' on '{table}' maps {from_len} column(s) onto {to_len}")]
    ForeignKeyArity {
        table: String,
        constraint: String,
        from_len: usize,
        to_len: usize,
    },

    #[error("foreign key '{constraint}' on '{table}' has unknown action code '{code}'")]
    UnknownAction {
        table: String,
        constraint: String,
        code: String,
    },
}

/// A datamodel would be internally inconsistent. Always an engine bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("duplicate model name '{0}'")]
    DuplicateModel(String),

    #[error("duplicate enum name '{0}'")]
    DuplicateEnum(String),

    #[error("duplicate relation name '{0}'")]
    DuplicateRelation(String),

    #[error("duplicate field '{field}' on model '{model}'")]
    DuplicateField { model: String, field: String },

    #[error("relation field '{model}.{field}' references unknown relation '{relation}'")]
    UnknownRelation {
        model: String,
        field: String,
        relation: String,
    },

    #[error("relation field '{model}.{field}' targets unknown model '{target}'")]
    UnknownTargetModel {
        model: String,
        field: String,
        target: String,
    },

    #[error("relation '{relation}' endpoint '{model}.{field}' does not exist")]
    DanglingEndpoint {
        relation: String,
        model: String,
        field: String,
    },

    #[error("relation '{relation}' endpoint '{model}.{field}' is not a field of that relation")]
    EndpointMismatch {
        relation: String,
        model: String,
        field: String,
    },

    #[error("relation field '{model}.{field}' is not an endpoint of relation '{relation}'")]
    OrphanRelationField {
        model: String,
        field: String,
        relation: String,
    },

    #[error("model '{model}' attribute references unknown field '{field}'")]
    UnknownAttributeField { model: String, field: String },

    #[error("field '{model}.{field}' references unknown enum '{name}'")]
    UnknownEnum {
        model: String,
        field: String,
        name: String,
    },
}
