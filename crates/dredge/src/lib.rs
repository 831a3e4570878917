//! Postgres schema introspection and datamodel normalization.
//!
//! dredge reads the catalog of one Postgres schema and turns it into a
//! canonical, engine-agnostic datamodel. The pipeline runs in five stages,
//! each consuming only the output of the previous one:
//!
//! 1. [`read_catalog`] pulls raw records out of `pg_catalog` (the only I/O)
//! 2. [`build`] assembles them into a structural [`Schema`]
//! 3. [`infer`] turns foreign keys into relations and spots junction tables
//! 4. [`normalize`] names and orders everything, optionally against a
//!    [`ReferenceDatamodel`]
//! 5. the resulting [`Datamodel`] validates itself and renders canonical text
//!
//! # Naming Convention
//!
//! With the default [`NamingPolicy`], table `blog_posts` becomes model
//! `BlogPost`, column `created_at` becomes field `createdAt`, and a foreign key
//! column `author_id` becomes relation field `author`. The referenced model
//! gets a back relation field named after the pluralized referencing model
//! (`posts`).
//!
//! # Round trips
//!
//! Rendering is stable across regenerations: derive a reference from a
//! previous datamodel and pass it back in, and the output is byte-identical
//! as long as the database didn't change.
//!
//! ```ignore
//! let introspection = dredge::introspect(&client, "public").await?;
//! let first = introspection.datamodel()?;
//! let again = introspection.datamodel_with_reference(&ReferenceDatamodel::from(&first))?;
//! assert_eq!(first.render(), again.render());
//! ```

mod build;
mod catalog;
pub mod config;
mod datamodel;
mod error;
pub mod naming;
mod normalize;
mod reference;
mod relations;
mod traced;

pub use build::build;
pub use catalog::{
    ConstraintKind, RawCatalog, RawColumn, RawConstraint, RawEnum, RawIndex, RawReference,
    RawTable, read_catalog,
};
pub use config::{Config, ConfigError};
pub use datamodel::{
    Arity, Datamodel, DefaultValue, Enum, Field, FieldKind, Model, ModelIndex, Relation,
    RelationEndpoint, RelationField, RelationKey, RelationKind, ScalarField, ScalarType, Side,
};
pub use error::{CatalogError, Error, InvariantViolation, MalformedCatalogError};
pub use naming::{DefaultNaming, NamingPolicy};
pub use normalize::normalize;
pub use reference::{
    FieldKey, ReferenceDatamodel, ReferenceEnum, ReferenceField, ReferenceModel,
    ReferenceRelation,
};
pub use relations::{
    Ambiguity, AmbiguousRelation, Confidence, InferredRelation, RelationGraph, RelationShape,
    infer,
};
pub use traced::{Connection, ConnectionExt, Params, QueryFuture, TracedConn};

pub use dredge_db_schema::{FkAction, IndexColumn, NullsOrder, PgType, Schema, SortOrder};

/// Result type for dredge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Introspect `schema` over `conn`: read the catalog, build the structural
/// model and infer relations.
pub async fn introspect<C: Connection>(conn: &C, schema: &str) -> Result<Introspection> {
    let raw = read_catalog(conn, schema).await?;
    Introspection::from_catalog(&raw)
}

/// The inferred relation graph of one schema, ready to be normalized.
///
/// Immutable; normalizing it any number of times never changes it.
#[derive(Debug, Clone)]
pub struct Introspection {
    graph: RelationGraph,
    naming: DefaultNaming,
}

impl Introspection {
    /// Run the pure stages over an already-read catalog.
    pub fn from_catalog(raw: &RawCatalog) -> Result<Self> {
        let schema = build(raw)?;
        let graph = infer(schema);
        Ok(Self {
            graph,
            naming: DefaultNaming::default(),
        })
    }

    /// Use different default naming knobs.
    pub fn with_naming(mut self, naming: DefaultNaming) -> Self {
        self.naming = naming;
        self
    }

    pub fn graph(&self) -> &RelationGraph {
        &self.graph
    }

    pub fn schema(&self) -> &Schema {
        self.graph.schema()
    }

    /// Normalize without a reference.
    pub fn datamodel(&self) -> Result<Datamodel> {
        Ok(normalize(&self.graph, None, &self.naming)?)
    }

    /// Normalize, keeping the names and order of `reference`.
    pub fn datamodel_with_reference(&self, reference: &ReferenceDatamodel) -> Result<Datamodel> {
        Ok(normalize(&self.graph, Some(reference), &self.naming)?)
    }

    /// Normalize with a custom naming policy.
    pub fn datamodel_with(
        &self,
        reference: Option<&ReferenceDatamodel>,
        naming: &dyn NamingPolicy,
    ) -> Result<Datamodel> {
        Ok(normalize(&self.graph, reference, naming)?)
    }
}

/// Runs introspections with the settings of a [`Config`].
#[derive(Debug, Clone, Default)]
pub struct Introspector {
    config: Config,
}

impl Introspector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Load `.config/dredge.styx` from the current directory or a parent.
    pub fn from_config_file() -> Result<Self> {
        let (config, _) = config::load()?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Introspect the configured schema.
    pub async fn introspect<C: Connection>(&self, conn: &C) -> Result<Introspection> {
        let raw = read_catalog(conn, self.config.schema()).await?;
        self.introspect_catalog(&raw)
    }

    /// Run the pure stages over an already-read catalog with configured naming.
    pub fn introspect_catalog(&self, raw: &RawCatalog) -> Result<Introspection> {
        Ok(Introspection::from_catalog(raw)?.with_naming(DefaultNaming::from_config(&self.config)))
    }
}
