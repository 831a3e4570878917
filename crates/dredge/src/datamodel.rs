//! The normalized datamodel and its canonical rendering.
//!
//! A [`Datamodel`] can only be obtained from the normalizer. It is checked for
//! internal consistency when it's constructed and never changes afterwards.
//! Its [`Display`](fmt::Display) output is the canonical text: two datamodels
//! are equal exactly when they render to the same bytes.

use crate::error::InvariantViolation;
use crate::relations::{AmbiguousRelation, Confidence};
use dredge_db_schema::{FkAction, IndexColumn, NullsOrder, PgType, SortOrder};
use indexmap::IndexMap;
use std::fmt;

/// Stable physical identifier of a relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RelationKey {
    /// A foreign key, by owning table, column list and referenced columns
    ForeignKey {
        table: String,
        columns: Vec<String>,
        references_table: String,
        references_columns: Vec<String>,
    },
    /// A many-to-many relation, by junction table
    Junction { table: String },
}

impl RelationKey {
    pub fn foreign_key(
        table: impl Into<String>,
        columns: &[&str],
        references_table: impl Into<String>,
        references_columns: &[&str],
    ) -> Self {
        RelationKey::ForeignKey {
            table: table.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            references_table: references_table.into(),
            references_columns: references_columns.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Which end of a relation a field sits on.
///
/// For foreign key relations `Left` is the referencing model and `Right` the
/// referenced one. For many-to-many relations they follow the junction's
/// primary key order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    OneToOne,
    OneToMany,
    ManyToMany,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationEndpoint {
    pub model: String,
    pub field: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub name: String,
    pub key: RelationKey,
    pub kind: RelationKind,
    pub left: RelationEndpoint,
    pub right: RelationEndpoint,
    pub confidence: Confidence,
}

impl Relation {
    pub fn endpoint(&self, side: Side) -> &RelationEndpoint {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn is_self(&self) -> bool {
        self.left.model == self.right.model
    }

    /// Whether `model.field` is one of this relation's endpoints.
    pub fn has_endpoint(&self, model: &str, field: &str) -> bool {
        [&self.left, &self.right]
            .iter()
            .any(|e| e.model == model && e.field == field)
    }
}

/// Logical scalar types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Int,
    BigInt,
    Float,
    Decimal,
    Boolean,
    String,
    DateTime,
    Json,
    Bytes,
    /// A datamodel enum, by logical name
    Enum(String),
    /// A physical type with no logical counterpart, by its Postgres name
    Unsupported(String),
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarType::Int => write!(f, "Int"),
            ScalarType::BigInt => write!(f, "BigInt"),
            ScalarType::Float => write!(f, "Float"),
            ScalarType::Decimal => write!(f, "Decimal"),
            ScalarType::Boolean => write!(f, "Boolean"),
            ScalarType::String => write!(f, "String"),
            ScalarType::DateTime => write!(f, "DateTime"),
            ScalarType::Json => write!(f, "Json"),
            ScalarType::Bytes => write!(f, "Bytes"),
            ScalarType::Enum(name) => write!(f, "{}", name),
            ScalarType::Unsupported(name) => write!(f, "Unsupported({})", quote(name)),
        }
    }
}

/// Map a physical type to its scalar type and, where the mapping loses
/// information, a native type hint (`VarChar(255)` for `@db.VarChar(255)`).
///
/// `enum_name` resolves a Postgres enum name to its datamodel name.
pub fn scalar_type(
    pg_type: &PgType,
    enum_name: impl Fn(&str) -> String,
) -> (ScalarType, Option<String>) {
    match pg_type {
        PgType::SmallInt => (ScalarType::Int, Some("SmallInt".to_string())),
        PgType::Integer => (ScalarType::Int, None),
        PgType::BigInt => (ScalarType::BigInt, None),
        PgType::Real => (ScalarType::Float, Some("Real".to_string())),
        PgType::DoublePrecision => (ScalarType::Float, None),
        PgType::Numeric(None) => (ScalarType::Decimal, None),
        PgType::Numeric(Some((p, s))) => {
            (ScalarType::Decimal, Some(format!("Decimal({}, {})", p, s)))
        }
        PgType::Boolean => (ScalarType::Boolean, None),
        PgType::Text => (ScalarType::String, None),
        PgType::Varchar(None) => (ScalarType::String, Some("VarChar".to_string())),
        PgType::Varchar(Some(n)) => (ScalarType::String, Some(format!("VarChar({})", n))),
        PgType::Char(None) => (ScalarType::String, Some("Char".to_string())),
        PgType::Char(Some(n)) => (ScalarType::String, Some(format!("Char({})", n))),
        PgType::Bytea => (ScalarType::Bytes, None),
        PgType::Timestamp => (ScalarType::DateTime, Some("Timestamp".to_string())),
        PgType::Timestamptz => (ScalarType::DateTime, None),
        PgType::Date => (ScalarType::DateTime, Some("Date".to_string())),
        PgType::Time => (ScalarType::DateTime, Some("Time".to_string())),
        PgType::Uuid => (ScalarType::String, Some("Uuid".to_string())),
        PgType::Json => (ScalarType::Json, Some("Json".to_string())),
        PgType::Jsonb => (ScalarType::Json, None),
        PgType::Enum(name) => (ScalarType::Enum(enum_name(name)), None),
        PgType::Array(inner) => match inner.as_ref() {
            PgType::Array(_) => (ScalarType::Unsupported(pg_type.to_string()), None),
            inner => scalar_type(inner, enum_name),
        },
        PgType::Other(name) => (ScalarType::Unsupported(name.clone()), None),
    }
}

/// A classified column default.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    /// Sequence or identity column
    Autoincrement,
    /// `now()` / `CURRENT_TIMESTAMP`
    Now,
    Int(i64),
    /// Kept as written so rendering is exact
    Float(String),
    Boolean(bool),
    String(String),
    EnumVariant(String),
    /// Anything else, verbatim
    DbGenerated(String),
}

impl DefaultValue {
    /// Classify a column default for a field of type `scalar`.
    pub fn classify(
        expr: Option<&str>,
        auto_generated: bool,
        scalar: &ScalarType,
        enum_variants: &[String],
    ) -> Option<Self> {
        if auto_generated {
            return Some(DefaultValue::Autoincrement);
        }
        let expr = expr?.trim();

        let lower = expr.to_ascii_lowercase();
        if matches!(*scalar, ScalarType::DateTime)
            && matches!(lower.as_str(), "now()" | "current_timestamp" | "current_timestamp()")
        {
            return Some(DefaultValue::Now);
        }

        let literal = parse_literal(expr);
        let classified = match (scalar, literal) {
            (ScalarType::Int | ScalarType::BigInt, Some(value)) => {
                value.parse().ok().map(DefaultValue::Int)
            }
            (ScalarType::Float | ScalarType::Decimal, Some(value)) => value
                .parse::<f64>()
                .ok()
                .map(|_| DefaultValue::Float(value)),
            (ScalarType::Boolean, Some(value)) => match value.as_str() {
                "true" => Some(DefaultValue::Boolean(true)),
                "false" => Some(DefaultValue::Boolean(false)),
                _ => None,
            },
            (ScalarType::String, Some(value)) if expr.starts_with('\'') => {
                Some(DefaultValue::String(value))
            }
            (ScalarType::Enum(_), Some(value)) if enum_variants.contains(&value) => {
                Some(DefaultValue::EnumVariant(value))
            }
            _ => None,
        };

        Some(classified.unwrap_or_else(|| DefaultValue::DbGenerated(expr.to_string())))
    }
}

/// Extract a literal from a Postgres default expression: `'foo'::text`,
/// `'-1'::integer`, `42`, `true`. Returns `None` for anything that isn't a
/// bare literal, optionally cast.
fn parse_literal(expr: &str) -> Option<String> {
    if let Some(rest) = expr.strip_prefix('\'') {
        let mut value = String::new();
        let mut chars = rest.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == '\'' {
                if chars.peek().is_some_and(|(_, next)| *next == '\'') {
                    chars.next();
                    value.push('\'');
                    continue;
                }
                let tail = &rest[i + 1..];
                return (tail.is_empty() || is_cast(tail)).then_some(value);
            }
            value.push(c);
        }
        return None;
    }

    let bare = match expr.find("::") {
        Some(i) if is_cast(&expr[i..]) => &expr[..i],
        Some(_) => return None,
        None => expr,
    };
    let bare = bare
        .strip_prefix('(')
        .and_then(|b| b.strip_suffix(')'))
        .unwrap_or(bare);
    let is_literal = bare == "true"
        || bare == "false"
        || (!bare.is_empty()
            && bare
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '-' | '.' | 'e' | 'E' | '+')));
    is_literal.then(|| bare.to_string())
}

/// `::text`, `::character varying`, `::timestamp(3) without time zone`,
/// `::shop.order_status`
fn is_cast(tail: &str) -> bool {
    tail.strip_prefix("::").is_some_and(|ty| {
        !ty.is_empty()
            && ty.chars().all(|c| {
                c.is_ascii_alphanumeric()
                    || matches!(c, ' ' | '_' | '.' | '(' | ')' | ',' | '[' | ']' | '"')
            })
    })
}

impl fmt::Display for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Autoincrement => write!(f, "autoincrement()"),
            DefaultValue::Now => write!(f, "now()"),
            DefaultValue::Int(v) => write!(f, "{}", v),
            DefaultValue::Float(v) => write!(f, "{}", v),
            DefaultValue::Boolean(v) => write!(f, "{}", v),
            DefaultValue::String(v) => write!(f, "{}", quote(v)),
            DefaultValue::EnumVariant(v) => write!(f, "{}", v),
            DefaultValue::DbGenerated(v) => write!(f, "dbgenerated({})", quote(v)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Required,
    Optional,
    List,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalarField {
    pub column: String,
    pub r#type: ScalarType,
    /// `@db.*` hint
    pub native_type: Option<String>,
    pub default: Option<DefaultValue>,
    /// Single-column primary key
    pub is_id: bool,
    /// Single-column unique constraint
    pub is_unique: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationField {
    pub relation: String,
    /// Target model name
    pub target: String,
    /// Owned columns; empty unless this is the referencing side
    pub fields: Vec<String>,
    /// Referenced columns, parallel to `fields`
    pub references: Vec<String>,
    pub on_delete: FkAction,
    pub on_update: FkAction,
    /// Junction table of a many-to-many relation
    pub through: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Scalar(ScalarField),
    Relation(RelationField),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub arity: Arity,
    pub kind: FieldKind,
}

impl Field {
    pub fn as_scalar(&self) -> Option<&ScalarField> {
        match &self.kind {
            FieldKind::Scalar(scalar) => Some(scalar),
            FieldKind::Relation(_) => None,
        }
    }

    pub fn as_relation(&self) -> Option<&RelationField> {
        match &self.kind {
            FieldKind::Relation(relation) => Some(relation),
            FieldKind::Scalar(_) => None,
        }
    }

    /// Columns this field stands for.
    pub fn columns(&self) -> &[String] {
        match &self.kind {
            FieldKind::Scalar(scalar) => std::slice::from_ref(&scalar.column),
            FieldKind::Relation(relation) => &relation.fields,
        }
    }
}

/// A model-level index or unique constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelIndex {
    pub columns: Vec<IndexColumn>,
    pub unique: bool,
    /// Partial index predicate
    pub where_clause: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub name: String,
    /// Backing table
    pub table: String,
    pub fields: Vec<Field>,
    /// Composite (or folded) primary key columns; empty when `@id` is on a field
    pub primary_key: Vec<String>,
    pub indexes: Vec<ModelIndex>,
}

impl Model {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn has_column(&self, column: &str) -> bool {
        self.fields.iter().any(|f| f.columns().iter().any(|c| c == column))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enum {
    pub name: String,
    /// Postgres type name
    pub db_name: String,
    pub variants: Vec<String>,
}

/// The normalized, invariant-checked datamodel.
#[derive(Debug, Clone)]
pub struct Datamodel {
    models: IndexMap<String, Model>,
    enums: IndexMap<String, Enum>,
    relations: IndexMap<String, Relation>,
    low_confidence: Vec<AmbiguousRelation>,
}

impl Datamodel {
    pub(crate) fn new(
        models: Vec<Model>,
        enums: Vec<Enum>,
        relations: Vec<Relation>,
        low_confidence: Vec<AmbiguousRelation>,
    ) -> Result<Self, InvariantViolation> {
        let mut model_map = IndexMap::new();
        for model in models {
            if model_map.contains_key(&model.name) {
                return Err(InvariantViolation::DuplicateModel(model.name));
            }
            model_map.insert(model.name.clone(), model);
        }

        let mut enum_map = IndexMap::new();
        for e in enums {
            if enum_map.contains_key(&e.name) || model_map.contains_key(&e.name) {
                return Err(InvariantViolation::DuplicateEnum(e.name));
            }
            enum_map.insert(e.name.clone(), e);
        }

        let mut relation_map = IndexMap::new();
        for relation in relations {
            if relation_map.contains_key(&relation.name) {
                return Err(InvariantViolation::DuplicateRelation(relation.name));
            }
            relation_map.insert(relation.name.clone(), relation);
        }

        let datamodel = Self {
            models: model_map,
            enums: enum_map,
            relations: relation_map,
            low_confidence,
        };
        datamodel.validate()?;
        Ok(datamodel)
    }

    fn validate(&self) -> Result<(), InvariantViolation> {
        for model in self.models.values() {
            for (i, field) in model.fields.iter().enumerate() {
                if model.fields[..i].iter().any(|f| f.name == field.name) {
                    return Err(InvariantViolation::DuplicateField {
                        model: model.name.clone(),
                        field: field.name.clone(),
                    });
                }

                match &field.kind {
                    FieldKind::Scalar(scalar) => {
                        if let ScalarType::Enum(name) = &scalar.r#type {
                            if !self.enums.contains_key(name) {
                                return Err(InvariantViolation::UnknownEnum {
                                    model: model.name.clone(),
                                    field: field.name.clone(),
                                    name: name.clone(),
                                });
                            }
                        }
                    }
                    FieldKind::Relation(rf) => {
                        let Some(relation) = self.relations.get(&rf.relation) else {
                            return Err(InvariantViolation::UnknownRelation {
                                model: model.name.clone(),
                                field: field.name.clone(),
                                relation: rf.relation.clone(),
                            });
                        };
                        if !self.models.contains_key(&rf.target) {
                            return Err(InvariantViolation::UnknownTargetModel {
                                model: model.name.clone(),
                                field: field.name.clone(),
                                target: rf.target.clone(),
                            });
                        }
                        if !relation.has_endpoint(&model.name, &field.name) {
                            return Err(InvariantViolation::OrphanRelationField {
                                model: model.name.clone(),
                                field: field.name.clone(),
                                relation: relation.name.clone(),
                            });
                        }
                    }
                }
            }

            let attribute_columns = model
                .primary_key
                .iter()
                .chain(model.indexes.iter().flat_map(|i| i.columns.iter().map(|c| &c.name)));
            for column in attribute_columns {
                if !model.has_column(column) {
                    return Err(InvariantViolation::UnknownAttributeField {
                        model: model.name.clone(),
                        field: column.clone(),
                    });
                }
            }
        }

        for relation in self.relations.values() {
            for endpoint in [&relation.left, &relation.right] {
                let field = self
                    .models
                    .get(&endpoint.model)
                    .and_then(|m| m.field(&endpoint.field));
                let Some(field) = field else {
                    return Err(InvariantViolation::DanglingEndpoint {
                        relation: relation.name.clone(),
                        model: endpoint.model.clone(),
                        field: endpoint.field.clone(),
                    });
                };
                let named = field.as_relation().map(|rf| rf.relation.as_str());
                if named != Some(relation.name.as_str()) {
                    return Err(InvariantViolation::EndpointMismatch {
                        relation: relation.name.clone(),
                        model: endpoint.model.clone(),
                        field: endpoint.field.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.models.values()
    }

    pub fn model(&self, name: &str) -> Option<&Model> {
        self.models.get(name)
    }

    /// Find the model backed by `table`.
    pub fn model_for_table(&self, table: &str) -> Option<&Model> {
        self.models.values().find(|m| m.table == table)
    }

    pub fn enums(&self) -> impl Iterator<Item = &Enum> {
        self.enums.values()
    }

    pub fn get_enum(&self, name: &str) -> Option<&Enum> {
        self.enums.get(name)
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.get(name)
    }

    /// Relations that were inferred under ambiguity.
    pub fn low_confidence_relations(&self) -> &[AmbiguousRelation] {
        &self.low_confidence
    }

    /// The canonical text.
    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Whether a relation's name has to be spelled out to tell it apart.
    fn is_named(&self, relation: &Relation) -> bool {
        if relation.is_self() {
            return true;
        }
        let this = model_pair(relation);
        self.relations
            .values()
            .filter(|r| model_pair(r) == this)
            .count()
            > 1
    }

    fn render_model(&self, f: &mut fmt::Formatter<'_>, model: &Model) -> fmt::Result {
        writeln!(f, "model {} {{", model.name)?;
        for field in &model.fields {
            write!(f, "  {} ", field.name)?;
            match &field.kind {
                FieldKind::Scalar(scalar) => {
                    write!(f, "{}{}", scalar.r#type, arity_suffix(field.arity))?;
                    if scalar.is_id {
                        write!(f, " @id")?;
                    }
                    if scalar.is_unique {
                        write!(f, " @unique")?;
                    }
                    if let Some(default) = &scalar.default {
                        write!(f, " @default({})", default)?;
                    }
                    if scalar.column != field.name {
                        write!(f, " @map({})", quote(&scalar.column))?;
                    }
                    if let Some(native) = &scalar.native_type {
                        write!(f, " @db.{}", native)?;
                    }
                }
                FieldKind::Relation(rf) => {
                    write!(f, "{}{}", rf.target, arity_suffix(field.arity))?;
                    let mut args = Vec::new();
                    if let Some(relation) = self.relations.get(&rf.relation) {
                        if self.is_named(relation) {
                            args.push(quote(&relation.name));
                        }
                    }
                    if !rf.fields.is_empty() {
                        args.push(format!("fields: [{}]", rf.fields.join(", ")));
                        args.push(format!("references: [{}]", rf.references.join(", ")));
                        if rf.on_delete != FkAction::NoAction {
                            args.push(format!("onDelete: {}", action_name(rf.on_delete)));
                        }
                        if rf.on_update != FkAction::NoAction {
                            args.push(format!("onUpdate: {}", action_name(rf.on_update)));
                        }
                    }
                    if let Some(junction) = &rf.through {
                        args.push(format!("through: {}", quote(junction)));
                    }
                    if !args.is_empty() {
                        write!(f, " @relation({})", args.join(", "))?;
                    }
                }
            }
            writeln!(f)?;
        }

        if !model.primary_key.is_empty() {
            writeln!(f, "  @@id([{}])", model.primary_key.join(", "))?;
        }
        for index in &model.indexes {
            let columns: Vec<String> = index
                .columns
                .iter()
                .map(index_column)
                .collect();
            let attribute = if index.unique { "unique" } else { "index" };
            write!(f, "  @@{}([{}]", attribute, columns.join(", "))?;
            if let Some(predicate) = &index.where_clause {
                write!(f, ", where: {}", quote(predicate))?;
            }
            writeln!(f, ")")?;
        }
        if model.name != model.table {
            writeln!(f, "  @@map({})", quote(&model.table))?;
        }
        writeln!(f, "}}")
    }
}

/// `name`, `name(sort: Desc)`, `name(nulls: First)` or both arguments.
fn index_column(column: &IndexColumn) -> String {
    let mut args = Vec::new();
    if column.order == SortOrder::Desc {
        args.push("sort: Desc");
    }
    match column.nulls {
        NullsOrder::Default => {}
        NullsOrder::First => args.push("nulls: First"),
        NullsOrder::Last => args.push("nulls: Last"),
    }
    if args.is_empty() {
        column.name.clone()
    } else {
        format!("{}({})", column.name, args.join(", "))
    }
}

impl PartialEq for Datamodel {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl fmt::Display for Datamodel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for model in self.models.values() {
            if !first {
                writeln!(f)?;
            }
            first = false;
            self.render_model(f, model)?;
        }
        for e in self.enums.values() {
            if !first {
                writeln!(f)?;
            }
            first = false;
            writeln!(f, "enum {} {{", e.name)?;
            for variant in &e.variants {
                writeln!(f, "  {}", variant)?;
            }
            if e.name != e.db_name {
                writeln!(f, "  @@map({})", quote(&e.db_name))?;
            }
            writeln!(f, "}}")?;
        }
        Ok(())
    }
}

/// The two models of a relation, in name order.
fn model_pair(relation: &Relation) -> (&str, &str) {
    let (a, b) = (relation.left.model.as_str(), relation.right.model.as_str());
    if a <= b { (a, b) } else { (b, a) }
}

fn arity_suffix(arity: Arity) -> &'static str {
    match arity {
        Arity::Required => "",
        Arity::Optional => "?",
        Arity::List => "[]",
    }
}

fn action_name(action: FkAction) -> &'static str {
    match action {
        FkAction::NoAction => "NoAction",
        FkAction::Restrict => "Restrict",
        FkAction::Cascade => "Cascade",
        FkAction::SetNull => "SetNull",
        FkAction::SetDefault => "SetDefault",
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}
