//! Naming policies.
//!
//! The normalizer asks a [`NamingPolicy`] for every logical name it emits.
//! Names coming from a reference datamodel bypass the policy entirely; the
//! policy only ever names things the reference doesn't know about.

/// Derives logical names from physical identifiers.
///
/// Implementations must be deterministic: the same inputs always give the same
/// name. Collisions are resolved by the normalizer, not the policy.
pub trait NamingPolicy: Send + Sync {
    /// Model name for a table.
    fn model_name(&self, table: &str) -> String;

    /// Enum name for a Postgres enum type.
    fn enum_name(&self, pg_enum: &str) -> String;

    /// Field name for a scalar column.
    fn scalar_field_name(&self, column: &str) -> String;

    /// Field on the referencing model pointing at the referenced one.
    fn forward_relation_field(&self, columns: &[String], target_model: &str) -> String;

    /// Field on the referenced model pointing back at the referencing one.
    ///
    /// `qualifier` is the forward field's name when the relation needs to be
    /// told apart from others between the same models (or is a self relation).
    fn back_relation_field(&self, source_model: &str, to_many: bool, qualifier: Option<&str>)
    -> String;

    /// Field on one side of a many-to-many relation.
    ///
    /// `junction` is set when several junctions connect the same models.
    fn many_to_many_field(&self, other_model: &str, junction: Option<&str>) -> String;
}

/// The default naming rules.
///
/// Models are singularized PascalCase (`blog_posts` becomes `BlogPost`), enums
/// PascalCase, fields camelCase. Forward relation fields drop the `_id` suffix
/// of their column, back relations use the pluralized source model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultNaming {
    pub singularize_models: bool,
    pub camel_case_fields: bool,
}

impl Default for DefaultNaming {
    fn default() -> Self {
        Self {
            singularize_models: true,
            camel_case_fields: true,
        }
    }
}

impl DefaultNaming {
    pub fn from_config(config: &dredge_config::Config) -> Self {
        Self {
            singularize_models: config.singularize_models(),
            camel_case_fields: config.camel_case_fields(),
        }
    }

    fn field(&self, name: &str) -> String {
        if self.camel_case_fields {
            to_camel_case(name)
        } else {
            name.to_string()
        }
    }
}

impl NamingPolicy for DefaultNaming {
    fn model_name(&self, table: &str) -> String {
        if self.singularize_models {
            to_pascal_case(&singularize(table))
        } else {
            to_pascal_case(table)
        }
    }

    fn enum_name(&self, pg_enum: &str) -> String {
        to_pascal_case(pg_enum)
    }

    fn scalar_field_name(&self, column: &str) -> String {
        self.field(column)
    }

    fn forward_relation_field(&self, columns: &[String], target_model: &str) -> String {
        if let [column] = columns {
            let stem = column
                .strip_suffix("_id")
                .or_else(|| column.strip_suffix("Id"))
                .unwrap_or(column);
            if !stem.is_empty() {
                return self.field(stem);
            }
        }
        lower_first(target_model)
    }

    fn back_relation_field(
        &self,
        source_model: &str,
        to_many: bool,
        qualifier: Option<&str>,
    ) -> String {
        let base = if to_many {
            lower_first(&pluralize(source_model))
        } else {
            lower_first(source_model)
        };
        match qualifier {
            Some(forward) => format!("{}As{}", base, upper_first(forward)),
            None => base,
        }
    }

    fn many_to_many_field(&self, other_model: &str, junction: Option<&str>) -> String {
        let base = lower_first(&pluralize(other_model));
        match junction {
            Some(junction) => format!("{}Via{}", base, to_pascal_case(junction)),
            None => base,
        }
    }
}

/// `user_tag` -> `UserTag`
pub fn to_pascal_case(s: &str) -> String {
    let mut result = String::new();
    let mut capitalize_next = true;

    for c in s.chars() {
        if c == '_' || c == '-' || c == ' ' {
            capitalize_next = true;
        } else if capitalize_next {
            result.push(c.to_ascii_uppercase());
            capitalize_next = false;
        } else {
            result.push(c);
        }
    }

    result
}

/// `created_at` -> `createdAt`
pub fn to_camel_case(s: &str) -> String {
    // keep leading underscores, they're usually significant (`_version`)
    let trimmed = s.trim_start_matches('_');
    let prefix = &s[..s.len() - trimmed.len()];
    format!("{}{}", prefix, lower_first(&to_pascal_case(trimmed)))
}

fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn upper_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// Singularize the last `_`-separated segment of a name.
///
/// `users` -> `user`, `post_categories` -> `post_category`. Words that only
/// look plural (`status`, `address`) are left alone.
pub fn singularize(name: &str) -> String {
    let (prefix, last) = match name.rfind('_') {
        Some(i) => name.split_at(i + 1),
        None => ("", name),
    };
    format!("{}{}", prefix, singularize_word(last))
}

fn singularize_word(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    if word.len() <= 2 {
        return word.to_string();
    }
    if let Some(stem) = lower.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{}y", &word[..stem.len()]);
        }
    }
    for suffix in ["sses", "xes", "ches", "shes", "zzes"] {
        if lower.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if lower.ends_with("ss") || lower.ends_with("us") || lower.ends_with("is") {
        return word.to_string();
    }
    match word.strip_suffix('s').or_else(|| word.strip_suffix('S')) {
        Some(stem) => stem.to_string(),
        None => word.to_string(),
    }
}

/// Pluralize a (PascalCase or snake_case) name.
///
/// `Post` -> `Posts`, `Category` -> `Categories`, `Box` -> `Boxes`.
pub fn pluralize(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    if let Some(stem) = name.strip_suffix('y') {
        let before = stem.chars().last().map(|c| c.to_ascii_lowercase());
        if !matches!(before, Some('a' | 'e' | 'i' | 'o' | 'u') | None) {
            return format!("{}ies", stem);
        }
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
        return format!("{}es", name);
    }
    format!("{}s", name)
}
