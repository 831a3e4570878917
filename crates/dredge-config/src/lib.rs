//! Facet types for the dredge configuration schema.
//!
//! The configuration lives in `.config/dredge.styx`:
//!
//! ```styx
//! schema public
//! naming {
//!     singularize-models true
//!     camel-case-fields true
//! }
//! ```

use facet::Facet;

/// Schema used when neither the caller nor the config names one.
pub const DEFAULT_SCHEMA: &str = "public";

/// Top-level dredge configuration.
#[derive(Debug, Clone, Default, Facet)]
#[facet(rename_all = "kebab-case")]
pub struct Config {
    /// Postgres schema (namespace) to introspect.
    #[facet(default)]
    pub schema: Option<String>,

    /// Naming policy knobs.
    #[facet(default)]
    pub naming: Option<NamingConfig>,
}

impl Config {
    /// The schema to introspect, falling back to `public`.
    pub fn schema(&self) -> &str {
        self.schema.as_deref().unwrap_or(DEFAULT_SCHEMA)
    }

    /// Whether model names are singularized (`users` → `User`).
    pub fn singularize_models(&self) -> bool {
        self.naming
            .as_ref()
            .and_then(|n| n.singularize_models)
            .unwrap_or(true)
    }

    /// Whether scalar field names are camelCased (`created_at` → `createdAt`).
    pub fn camel_case_fields(&self) -> bool {
        self.naming
            .as_ref()
            .and_then(|n| n.camel_case_fields)
            .unwrap_or(true)
    }
}

/// Naming policy configuration.
#[derive(Debug, Clone, Default, Facet)]
#[facet(rename_all = "kebab-case")]
pub struct NamingConfig {
    /// Singularize table names when deriving model names.
    #[facet(default)]
    pub singularize_models: Option<bool>,

    /// Convert column names to camelCase when deriving field names.
    #[facet(default)]
    pub camel_case_fields: Option<bool>,
}
