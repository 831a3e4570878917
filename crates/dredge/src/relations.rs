//! Relation inference.
//!
//! Reads foreign keys off the structural model and decides what they mean:
//! one-to-one or one-to-many, or, for pure junction tables, a single
//! many-to-many relation. Nothing here is fatal. Foreign keys that can't be
//! classified with certainty are still turned into relations, marked
//! [`Confidence::Low`] and recorded as [`AmbiguousRelation`]s.

use dredge_db_schema::{ForeignKey, Schema, Table};
use thiserror::Error;

/// Why a relation was inferred with low confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Ambiguity {
    /// The referenced columns are not guaranteed unique in the target table,
    /// so the "one" side of the relation may actually match several rows.
    #[error("referenced columns are not unique in the target table")]
    TargetNotUnique,

    /// Composite foreign key mixing nullable and non-nullable columns.
    #[error("composite foreign key mixes nullable and required columns")]
    MixedNullability,
}

/// A foreign key that could not be classified with certainty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("relation '{relation}' from foreign key '{constraint}' on '{table}': {reason}")]
pub struct AmbiguousRelation {
    /// Name of the relation that was emitted anyway
    pub relation: String,
    pub table: String,
    pub constraint: String,
    pub reason: Ambiguity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Confidence {
    High,
    Low(Ambiguity),
}

impl Confidence {
    pub fn is_low(&self) -> bool {
        matches!(self, Confidence::Low(_))
    }
}

/// Cardinality and backing structure of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationShape {
    /// The foreign key columns are themselves unique in `table`.
    OneToOne { table: String, foreign_key: ForeignKey },
    /// Many rows of `table` point at one row of the target.
    OneToMany { table: String, foreign_key: ForeignKey },
    /// A pure junction table with one foreign key to each side.
    ManyToMany {
        junction: String,
        left: ForeignKey,
        right: ForeignKey,
    },
}

impl RelationShape {
    /// Whether both ends of the relation are the same table.
    pub fn is_self(&self) -> bool {
        match self {
            RelationShape::OneToOne { table, foreign_key }
            | RelationShape::OneToMany { table, foreign_key } => {
                *table == foreign_key.references_table
            }
            RelationShape::ManyToMany { left, right, .. } => {
                left.references_table == right.references_table
            }
        }
    }

    /// The foreign key backing a one-to-one or one-to-many relation.
    pub fn foreign_key(&self) -> Option<(&str, &ForeignKey)> {
        match self {
            RelationShape::OneToOne { table, foreign_key }
            | RelationShape::OneToMany { table, foreign_key } => Some((table, foreign_key)),
            RelationShape::ManyToMany { .. } => None,
        }
    }

    /// The two tables the relation connects.
    ///
    /// For foreign key relations this is `(source, target)`; for many-to-many
    /// relations it's the targets of the left and right foreign keys.
    pub fn endpoints(&self) -> (&str, &str) {
        match self {
            RelationShape::OneToOne { table, foreign_key }
            | RelationShape::OneToMany { table, foreign_key } => {
                (table, &foreign_key.references_table)
            }
            RelationShape::ManyToMany { left, right, .. } => {
                (&left.references_table, &right.references_table)
            }
        }
    }
}

/// A relation inferred from the structural model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferredRelation {
    /// Deterministic name, derived from physical identifiers only
    pub name: String,
    pub shape: RelationShape,
    pub confidence: Confidence,
}

/// The structural model plus everything inferred from it.
#[derive(Debug, Clone)]
pub struct RelationGraph {
    schema: Schema,
    relations: Vec<InferredRelation>,
    junctions: Vec<String>,
    ambiguities: Vec<AmbiguousRelation>,
}

impl RelationGraph {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Inferred relations, ordered by source table then constraint name.
    pub fn relations(&self) -> &[InferredRelation] {
        &self.relations
    }

    /// Tables elided as pure junctions, in table order.
    pub fn junctions(&self) -> &[String] {
        &self.junctions
    }

    pub fn is_junction(&self, table: &str) -> bool {
        self.junctions.iter().any(|j| j == table)
    }

    pub fn ambiguities(&self) -> &[AmbiguousRelation] {
        &self.ambiguities
    }

    pub fn relation(&self, name: &str) -> Option<&InferredRelation> {
        self.relations.iter().find(|r| r.name == name)
    }
}

/// Infer relations from a structural model.
pub fn infer(schema: Schema) -> RelationGraph {
    let junctions: Vec<String> = schema
        .iter_tables()
        .filter(|t| is_pure_junction(&schema, t))
        .map(|t| t.name.clone())
        .collect();

    // (relation, constraint) pairs, named with their base names for now
    let mut inferred: Vec<(InferredRelation, &str)> = Vec::new();

    for table in schema.iter_tables() {
        if junctions.contains(&table.name) {
            let (left, right) = junction_sides(table);
            inferred.push((
                InferredRelation {
                    name: table.name.clone(),
                    shape: RelationShape::ManyToMany {
                        junction: table.name.clone(),
                        left: left.clone(),
                        right: right.clone(),
                    },
                    confidence: Confidence::High,
                },
                "",
            ));
            continue;
        }

        let mut foreign_keys: Vec<&ForeignKey> = table.foreign_keys.iter().collect();
        foreign_keys.sort_by(|a, b| a.name.cmp(&b.name));

        for fk in foreign_keys {
            let Some(target) = schema.get_table(&fk.references_table) else {
                tracing::warn!(
                    table = %table.name,
                    constraint = %fk.name,
                    target = %fk.references_table,
                    "skipping foreign key to a table outside the model"
                );
                continue;
            };

            let confidence = if !target.is_unique_set(&fk.references_columns) {
                Confidence::Low(Ambiguity::TargetNotUnique)
            } else if has_mixed_nullability(table, fk) {
                Confidence::Low(Ambiguity::MixedNullability)
            } else {
                Confidence::High
            };

            let shape = if table.is_unique_set(&fk.columns) {
                RelationShape::OneToOne {
                    table: table.name.clone(),
                    foreign_key: fk.clone(),
                }
            } else {
                RelationShape::OneToMany {
                    table: table.name.clone(),
                    foreign_key: fk.clone(),
                }
            };

            inferred.push((
                InferredRelation {
                    name: relation_name(table, fk),
                    shape,
                    confidence,
                },
                &fk.name,
            ));
        }
    }

    assign_names(&mut inferred);

    let mut ambiguities = Vec::new();
    for (relation, constraint) in &inferred {
        let (Confidence::Low(reason), Some((table, _))) =
            (relation.confidence, relation.shape.foreign_key())
        else {
            continue;
        };
        let ambiguity = AmbiguousRelation {
            relation: relation.name.clone(),
            table: table.to_string(),
            constraint: constraint.to_string(),
            reason,
        };
        tracing::warn!(%ambiguity, "low-confidence relation");
        ambiguities.push(ambiguity);
    }

    let relations: Vec<InferredRelation> = inferred.into_iter().map(|(r, _)| r).collect();

    tracing::debug!(
        schema = %schema.name,
        relations = relations.len(),
        junctions = junctions.len(),
        ambiguous = ambiguities.len(),
        "inferred relations"
    );

    RelationGraph {
        schema,
        relations,
        junctions,
        ambiguities,
    }
}

/// `{table}_{columns}To{target}`.
fn relation_name(table: &Table, fk: &ForeignKey) -> String {
    format!(
        "{}_{}To{}",
        table.name,
        fk.columns.join("_"),
        fk.references_table
    )
}

/// Make base names unique. A base name shared by several relations stays
/// with the one whose (table, constraint) sorts first; the others get `_2`,
/// `_3`, ... in that same order, skipping anything already in use.
fn assign_names(inferred: &mut [(InferredRelation, &str)]) {
    let mut taken: Vec<String> = inferred.iter().map(|(r, _)| r.name.clone()).collect();
    taken.sort();
    taken.dedup();

    let table = |r: &InferredRelation| match &r.shape {
        RelationShape::ManyToMany { junction, .. } => junction.clone(),
        shape => shape.foreign_key().map(|(t, _)| t.to_string()).unwrap_or_default(),
    };
    let mut order: Vec<usize> = (0..inferred.len()).collect();
    order.sort_by(|&a, &b| {
        let (ra, ca) = &inferred[a];
        let (rb, cb) = &inferred[b];
        (&ra.name, table(ra), ca).cmp(&(&rb.name, table(rb), cb))
    });

    let mut previous: Option<String> = None;
    for i in order {
        let base = inferred[i].0.name.clone();
        if previous.as_deref() != Some(base.as_str()) {
            previous = Some(base);
            continue;
        }
        let mut n = 2;
        let name = loop {
            let candidate = format!("{}_{}", base, n);
            if !taken.contains(&candidate) {
                break candidate;
            }
            n += 1;
        };
        taken.push(name.clone());
        inferred[i].0.name = name;
    }
}

/// A table is a pure junction when it consists of nothing but two foreign
/// keys, to two distinct other tables, that together form its primary key.
fn is_pure_junction(schema: &Schema, table: &Table) -> bool {
    let [a, b] = table.foreign_keys.as_slice() else {
        return false;
    };
    if a.references_table == b.references_table
        || a.references_table == table.name
        || b.references_table == table.name
    {
        return false;
    }
    if table.primary_key.is_empty() || table.columns.len() != table.primary_key.len() {
        return false;
    }
    // something else points at it, so it has to stay a model
    let referenced = schema
        .iter_tables()
        .any(|other| other.foreign_keys.iter().any(|fk| fk.references_table == table.name));
    if referenced {
        return false;
    }

    let covered: Vec<String> = a.columns.iter().chain(&b.columns).cloned().collect();
    let overlapping = a.columns.iter().any(|c| b.columns.contains(c));
    if overlapping || !dredge_db_schema::same_columns(&covered, &table.primary_key) {
        return false;
    }

    // both sides must point at something unique, otherwise the foreign keys
    // are reported as ambiguous relations instead
    [a, b].iter().all(|fk| {
        schema
            .get_table(&fk.references_table)
            .is_some_and(|target| target.is_unique_set(&fk.references_columns))
    })
}

/// Order the two junction foreign keys by where their first column sits in
/// the primary key.
fn junction_sides(table: &Table) -> (&ForeignKey, &ForeignKey) {
    let rank = |fk: &ForeignKey| {
        fk.columns
            .first()
            .and_then(|c| table.primary_key.iter().position(|pk| pk == c))
            .unwrap_or(usize::MAX)
    };
    let (a, b) = (&table.foreign_keys[0], &table.foreign_keys[1]);
    if rank(b) < rank(a) { (b, a) } else { (a, b) }
}

fn has_mixed_nullability(table: &Table, fk: &ForeignKey) -> bool {
    if fk.columns.len() < 2 {
        return false;
    }
    let nullable: Vec<bool> = fk
        .columns
        .iter()
        .filter_map(|c| table.column(c))
        .map(|c| c.nullable)
        .collect();
    nullable.iter().any(|n| *n) && nullable.iter().any(|n| !*n)
}
