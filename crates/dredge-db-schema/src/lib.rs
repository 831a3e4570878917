//! Physical database schema types for dredge.
//!
//! This crate contains the structural model that sits between the raw catalog
//! rows read from Postgres and the normalized datamodel: tables with typed
//! columns, primary keys, unique constraints, foreign keys and indexes, with
//! no relational semantics attached yet.
//!
//! Tables and enums are kept in [`IndexMap`]s so that the order in which the
//! catalog reported them survives every later stage.

use indexmap::IndexMap;
use std::fmt;

/// Postgres column types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PgType {
    /// SMALLINT (2 bytes)
    SmallInt,
    /// INTEGER (4 bytes)
    Integer,
    /// BIGINT (8 bytes)
    BigInt,
    /// REAL (4 bytes floating point)
    Real,
    /// DOUBLE PRECISION (8 bytes floating point)
    DoublePrecision,
    /// NUMERIC, with optional (precision, scale)
    Numeric(Option<(u32, u32)>),
    /// BOOLEAN
    Boolean,
    /// TEXT
    Text,
    /// VARCHAR, with optional length
    Varchar(Option<u32>),
    /// CHAR, with optional length
    Char(Option<u32>),
    /// BYTEA (binary)
    Bytea,
    /// TIMESTAMP (without time zone)
    Timestamp,
    /// TIMESTAMPTZ
    Timestamptz,
    /// DATE
    Date,
    /// TIME
    Time,
    /// UUID
    Uuid,
    /// JSON
    Json,
    /// JSONB
    Jsonb,
    /// A user-defined enum type, by name
    Enum(String),
    /// A one-dimensional array of another type
    Array(Box<PgType>),
    /// Anything we don't model, as reported by `format_type`
    Other(String),
}

impl PgType {
    /// Resolve a column type from its catalog description.
    ///
    /// `udt_name` is the `pg_type.typname` (`int4`, `_text`, `varchar`, ...) and
    /// `formatted` is the `format_type()` output, which carries type modifiers
    /// such as `character varying(255)`. Array types are recognized by the
    /// leading underscore Postgres gives their `typname`.
    pub fn from_catalog(udt_name: &str, formatted: &str, is_enum: impl Fn(&str) -> bool) -> Self {
        if let Some(element) = udt_name.strip_prefix('_') {
            let element_formatted = formatted.strip_suffix("[]").unwrap_or(formatted);
            return PgType::Array(Box::new(Self::from_catalog(
                element,
                element_formatted,
                is_enum,
            )));
        }

        match udt_name {
            "int2" => PgType::SmallInt,
            "int4" => PgType::Integer,
            "int8" => PgType::BigInt,
            "float4" => PgType::Real,
            "float8" => PgType::DoublePrecision,
            "numeric" => PgType::Numeric(match type_modifiers(formatted).as_slice() {
                [precision, scale] => Some((*precision, *scale)),
                [precision] => Some((*precision, 0)),
                _ => None,
            }),
            "bool" => PgType::Boolean,
            "text" => PgType::Text,
            "varchar" => PgType::Varchar(type_modifiers(formatted).first().copied()),
            "bpchar" => PgType::Char(type_modifiers(formatted).first().copied()),
            "bytea" => PgType::Bytea,
            "timestamp" => PgType::Timestamp,
            "timestamptz" => PgType::Timestamptz,
            "date" => PgType::Date,
            "time" => PgType::Time,
            "uuid" => PgType::Uuid,
            "json" => PgType::Json,
            "jsonb" => PgType::Jsonb,
            other if is_enum(other) => PgType::Enum(other.to_string()),
            _ => PgType::Other(formatted.to_string()),
        }
    }

    /// Returns the enum name if this type is (an array of) a user-defined enum.
    pub fn enum_name(&self) -> Option<&str> {
        match self {
            PgType::Enum(name) => Some(name),
            PgType::Array(inner) => inner.enum_name(),
            _ => None,
        }
    }
}

/// Parse the numeric modifiers out of a formatted type, e.g. `numeric(10,2)`.
fn type_modifiers(formatted: &str) -> Vec<u32> {
    let Some(open) = formatted.find('(') else {
        return Vec::new();
    };
    let Some(close) = formatted[open..].find(')') else {
        return Vec::new();
    };
    formatted[open + 1..open + close]
        .split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

impl fmt::Display for PgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PgType::SmallInt => write!(f, "SMALLINT"),
            PgType::Integer => write!(f, "INTEGER"),
            PgType::BigInt => write!(f, "BIGINT"),
            PgType::Real => write!(f, "REAL"),
            PgType::DoublePrecision => write!(f, "DOUBLE PRECISION"),
            PgType::Numeric(None) => write!(f, "NUMERIC"),
            PgType::Numeric(Some((p, s))) => write!(f, "NUMERIC({}, {})", p, s),
            PgType::Boolean => write!(f, "BOOLEAN"),
            PgType::Text => write!(f, "TEXT"),
            PgType::Varchar(None) => write!(f, "VARCHAR"),
            PgType::Varchar(Some(len)) => write!(f, "VARCHAR({})", len),
            PgType::Char(None) => write!(f, "CHAR"),
            PgType::Char(Some(len)) => write!(f, "CHAR({})", len),
            PgType::Bytea => write!(f, "BYTEA"),
            PgType::Timestamp => write!(f, "TIMESTAMP"),
            PgType::Timestamptz => write!(f, "TIMESTAMPTZ"),
            PgType::Date => write!(f, "DATE"),
            PgType::Time => write!(f, "TIME"),
            PgType::Uuid => write!(f, "UUID"),
            PgType::Json => write!(f, "JSON"),
            PgType::Jsonb => write!(f, "JSONB"),
            PgType::Enum(name) => write!(f, "{}", name),
            PgType::Array(inner) => write!(f, "{}[]", inner),
            PgType::Other(name) => write!(f, "{}", name),
        }
    }
}

/// A database column definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Postgres type
    pub pg_type: PgType,
    /// Whether the column allows NULL
    pub nullable: bool,
    /// Default value expression (if any), verbatim from the catalog
    pub default: Option<String>,
    /// Ordinal position reported by the catalog (1-based)
    pub position: i32,
    /// Whether values come from a sequence or identity (serial, `GENERATED ... AS IDENTITY`)
    pub auto_generated: bool,
}

/// Check if a default value expression draws from a sequence.
pub fn is_sequence_default(default: Option<&str>) -> bool {
    default.is_some_and(|def| def.to_lowercase().contains("nextval("))
}

/// Referential action of a foreign key (`ON DELETE` / `ON UPDATE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FkAction {
    /// NO ACTION (the Postgres default)
    #[default]
    NoAction,
    /// RESTRICT
    Restrict,
    /// CASCADE
    Cascade,
    /// SET NULL
    SetNull,
    /// SET DEFAULT
    SetDefault,
}

impl FkAction {
    /// Decode the single-character action code stored in
    /// `pg_constraint.confdeltype` / `confupdtype`.
    pub fn from_pg_code(code: &str) -> Option<Self> {
        match code {
            "a" => Some(FkAction::NoAction),
            "r" => Some(FkAction::Restrict),
            "c" => Some(FkAction::Cascade),
            "n" => Some(FkAction::SetNull),
            "d" => Some(FkAction::SetDefault),
            _ => None,
        }
    }
}

/// A foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKey {
    /// Constraint name
    pub name: String,
    /// Column(s) in this table
    pub columns: Vec<String>,
    /// Referenced table
    pub references_table: String,
    /// Referenced column(s)
    pub references_columns: Vec<String>,
    /// ON DELETE action
    pub on_delete: FkAction,
    /// ON UPDATE action
    pub on_update: FkAction,
}

/// A UNIQUE constraint over one or more columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueConstraint {
    /// Constraint name
    pub name: String,
    /// Constrained columns, in constraint order
    pub columns: Vec<String>,
}

/// Sort order for index columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Ascending order (default)
    #[default]
    Asc,
    /// Descending order
    Desc,
}

/// Nulls ordering for index columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullsOrder {
    /// Use database default (NULLS LAST for ASC, NULLS FIRST for DESC)
    #[default]
    Default,
    /// Sort nulls before non-null values
    First,
    /// Sort nulls after non-null values
    Last,
}

/// A column in an index with optional sort order and nulls ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumn {
    /// Column name
    pub name: String,
    /// Sort order (ASC or DESC)
    pub order: SortOrder,
    /// Nulls ordering (NULLS FIRST, NULLS LAST, or default)
    pub nulls: NullsOrder,
}

impl IndexColumn {
    /// Create a new index column with default (ASC) ordering and default nulls.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: SortOrder::Asc,
            nulls: NullsOrder::Default,
        }
    }

    /// Create a new index column with DESC ordering and default nulls.
    pub fn desc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: SortOrder::Desc,
            nulls: NullsOrder::Default,
        }
    }

    /// Decode a column from its `pg_index.indoption` flags.
    ///
    /// Bit 0 is `INDOPTION_DESC`, bit 1 is `INDOPTION_NULLS_FIRST`. Nulls
    /// ordering is only reported when it differs from the direction's default.
    pub fn from_indoption(name: impl Into<String>, option: i32) -> Self {
        let desc = option & 1 != 0;
        let nulls_first = option & 2 != 0;
        let (order, nulls) = match (desc, nulls_first) {
            (false, false) => (SortOrder::Asc, NullsOrder::Default),
            (false, true) => (SortOrder::Asc, NullsOrder::First),
            (true, true) => (SortOrder::Desc, NullsOrder::Default),
            (true, false) => (SortOrder::Desc, NullsOrder::Last),
        };
        Self {
            name: name.into(),
            order,
            nulls,
        }
    }
}

/// A database index that does not back a constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    /// Index name
    pub name: String,
    /// Column(s) in the index with sort order
    pub columns: Vec<IndexColumn>,
    /// Whether this is a unique index
    pub unique: bool,
    /// Optional WHERE clause for partial indexes
    pub where_clause: Option<String>,
}

/// A user-defined enum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumType {
    /// Type name
    pub name: String,
    /// Labels, in `enumsortorder`
    pub variants: Vec<String>,
}

/// A database table definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Table name
    pub name: String,
    /// Columns, in catalog position order
    pub columns: Vec<Column>,
    /// Primary key columns, in key order (empty if the table has no primary key)
    pub primary_key: Vec<String>,
    /// UNIQUE constraints
    pub uniques: Vec<UniqueConstraint>,
    /// Foreign keys
    pub foreign_keys: Vec<ForeignKey>,
    /// Indices
    pub indices: Vec<Index>,
}

impl Table {
    /// Create an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            uniques: Vec::new(),
            foreign_keys: Vec::new(),
            indices: Vec::new(),
        }
    }

    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether a column with this name exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Whether the given column set is guaranteed unique in this table.
    ///
    /// True when it matches the primary key, a UNIQUE constraint, or a
    /// non-partial unique index, compared as sets.
    pub fn is_unique_set(&self, columns: &[String]) -> bool {
        if columns.is_empty() {
            return false;
        }
        if same_columns(&self.primary_key, columns) {
            return true;
        }
        if self.uniques.iter().any(|u| same_columns(&u.columns, columns)) {
            return true;
        }
        self.indices.iter().any(|idx| {
            idx.unique
                && idx.where_clause.is_none()
                && idx.columns.len() == columns.len()
                && columns
                    .iter()
                    .all(|c| idx.columns.iter().any(|ic| &ic.name == c))
        })
    }
}

/// Compare two column lists as sets.
pub fn same_columns(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().all(|c| b.contains(c))
}

/// A complete database schema snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    /// Schema (namespace) name, e.g. `public`
    pub name: String,
    /// Tables in the schema, indexed by name, in discovery order
    pub tables: IndexMap<String, Table>,
    /// Enum types in the schema, indexed by name, in discovery order
    pub enums: IndexMap<String, EnumType>,
}

impl Schema {
    /// Create a new empty schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Get a table by name.
    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Get an enum type by name.
    pub fn get_enum(&self, name: &str) -> Option<&EnumType> {
        self.enums.get(name)
    }

    /// Iterate over all tables.
    pub fn iter_tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }
}
