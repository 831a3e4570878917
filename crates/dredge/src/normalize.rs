//! Normalizer: relation graph in, datamodel out.
//!
//! Decides every logical name and every ordering of the datamodel. Without a
//! reference, models follow table order and fields follow column order, with
//! foreign key columns folded into their relation field. With a reference,
//! whatever the reference knows keeps its name and position and everything
//! new is appended after it.
//!
//! Names are claimed in a fixed order (reference names first, then policy
//! names in model/field order), so collisions always resolve the same way.

use crate::datamodel::{
    Arity, Datamodel, DefaultValue, Enum, Field, FieldKind, Model, ModelIndex, Relation,
    RelationEndpoint, RelationField, RelationKey, RelationKind, ScalarField, Side, scalar_type,
};
use crate::error::InvariantViolation;
use crate::naming::NamingPolicy;
use crate::reference::{FieldKey, ReferenceDatamodel, ReferenceModel};
use crate::relations::{InferredRelation, RelationGraph, RelationShape};
use dredge_db_schema::{Column, FkAction, ForeignKey, IndexColumn, PgType, Table, same_columns};
use indexmap::IndexMap;
use std::collections::HashMap;

/// Produce the datamodel for `graph`, optionally reconciled against a
/// reference.
pub fn normalize(
    graph: &RelationGraph,
    reference: Option<&ReferenceDatamodel>,
    naming: &dyn NamingPolicy,
) -> Result<Datamodel, InvariantViolation> {
    Normalizer::new(graph, reference, naming).run()
}

/// Claims names within one namespace.
#[derive(Debug, Default)]
struct Names {
    taken: Vec<String>,
}

impl Names {
    fn reserve(&mut self, name: &str) {
        if !self.is_taken(name) {
            self.taken.push(name.to_string());
        }
    }

    fn is_taken(&self, name: &str) -> bool {
        self.taken.iter().any(|t| t == name)
    }

    /// Take `base`, or `base2`, `base3`, ... if it's already taken.
    fn claim(&mut self, base: String) -> String {
        let name = if self.is_taken(&base) {
            let mut n = 2;
            loop {
                let candidate = format!("{}{}", base, n);
                if !self.is_taken(&candidate) {
                    break candidate;
                }
                n += 1;
            }
        } else {
            base
        };
        self.taken.push(name.clone());
        name
    }
}

enum SlotKind<'g> {
    Scalar(&'g Column),
    Forward(&'g InferredRelation),
    Back(&'g InferredRelation),
    ManyToMany(&'g InferredRelation, Side),
}

/// A field whose position is known but whose name may not be yet.
struct Slot<'g> {
    key: FieldKey,
    kind: SlotKind<'g>,
    name: Option<String>,
}

struct Draft<'g> {
    table: &'g Table,
    name: String,
    reference: Option<&'g ReferenceModel>,
    slots: Vec<Slot<'g>>,
    names: Names,
}

struct Normalizer<'g> {
    graph: &'g RelationGraph,
    reference: Option<&'g ReferenceDatamodel>,
    naming: &'g dyn NamingPolicy,
    /// table -> model name
    model_names: IndexMap<String, String>,
    /// Postgres enum -> enum name
    enum_names: IndexMap<String, String>,
    /// inferred relation name -> final relation name
    relation_names: IndexMap<String, String>,
    /// (inferred relation name, side) -> endpoint
    endpoints: HashMap<(String, Side), RelationEndpoint>,
}

fn relation_key(relation: &InferredRelation) -> RelationKey {
    match &relation.shape {
        RelationShape::OneToOne { table, foreign_key }
        | RelationShape::OneToMany { table, foreign_key } => RelationKey::ForeignKey {
            table: table.clone(),
            columns: foreign_key.columns.clone(),
            references_table: foreign_key.references_table.clone(),
            references_columns: foreign_key.references_columns.clone(),
        },
        RelationShape::ManyToMany { junction, .. } => RelationKey::Junction {
            table: junction.clone(),
        },
    }
}

impl<'g> Normalizer<'g> {
    fn new(
        graph: &'g RelationGraph,
        reference: Option<&'g ReferenceDatamodel>,
        naming: &'g dyn NamingPolicy,
    ) -> Self {
        Self {
            graph,
            reference,
            naming,
            model_names: IndexMap::new(),
            enum_names: IndexMap::new(),
            relation_names: IndexMap::new(),
            endpoints: HashMap::new(),
        }
    }

    fn run(mut self) -> Result<Datamodel, InvariantViolation> {
        self.name_types();
        self.name_relations();

        let mut drafts = self.draft_models();
        for draft in &mut drafts {
            self.name_owned_fields(draft);
        }
        for draft in &mut drafts {
            self.name_back_fields(draft);
        }

        let mut models = Vec::new();
        for draft in &drafts {
            models.push(self.build_model(draft));
        }
        let models = self.reference_order(models, |r, m| {
            r.models.iter().position(|rm| rm.table == m.table)
        });

        let enums = self.build_enums();
        let relations = self.build_relations();

        let low_confidence = self
            .graph
            .ambiguities()
            .iter()
            .map(|a| {
                let mut a = a.clone();
                if let Some(name) = self.relation_names.get(&a.relation) {
                    a.relation = name.clone();
                }
                a
            })
            .collect();

        tracing::debug!(
            models = models.len(),
            enums = enums.len(),
            relations = relations.len(),
            reference = self.reference.is_some(),
            "normalized datamodel"
        );

        Datamodel::new(models, enums, relations, low_confidence)
    }

    /// Model and enum names. They share a namespace.
    fn name_types(&mut self) {
        let graph = self.graph;
        let schema = graph.schema();
        let mut names = Names::default();

        if let Some(reference) = self.reference {
            for model in &reference.models {
                if schema.get_table(&model.table).is_some() && !graph.is_junction(&model.table) {
                    names.reserve(&model.name);
                } else {
                    tracing::warn!(
                        model = %model.name,
                        table = %model.table,
                        "ignoring reference model without a table"
                    );
                }
            }
            for e in &reference.enums {
                if schema.get_enum(&e.db_name).is_some() {
                    names.reserve(&e.name);
                } else {
                    tracing::warn!(
                        name = %e.name,
                        db_name = %e.db_name,
                        "ignoring reference enum without a type"
                    );
                }
            }
        }

        for table in schema.iter_tables() {
            if graph.is_junction(&table.name) {
                continue;
            }
            let name = match self.reference.and_then(|r| r.model_for_table(&table.name)) {
                Some(known) => known.name.clone(),
                None => names.claim(self.naming.model_name(&table.name)),
            };
            self.model_names.insert(table.name.clone(), name);
        }

        for e in schema.enums.values() {
            let name = match self.reference.and_then(|r| r.enum_for_type(&e.name)) {
                Some(known) => known.name.clone(),
                None => names.claim(self.naming.enum_name(&e.name)),
            };
            self.enum_names.insert(e.name.clone(), name);
        }
    }

    fn name_relations(&mut self) {
        let mut names = Names::default();
        let keys: Vec<(String, RelationKey)> = self
            .graph
            .relations()
            .iter()
            .map(|r| (r.name.clone(), relation_key(r)))
            .collect();

        if let Some(reference) = self.reference {
            for known in &reference.relations {
                if keys.iter().any(|(_, key)| *key == known.key) {
                    names.reserve(&known.name);
                } else {
                    tracing::warn!(
                        relation = %known.name,
                        "ignoring reference relation without a foreign key"
                    );
                }
            }
        }

        for (inferred, key) in keys {
            let name = match self.reference.and_then(|r| r.relation_by_key(&key)) {
                Some(known) => known.name.clone(),
                None => names.claim(inferred.clone()),
            };
            self.relation_names.insert(inferred, name);
        }
    }

    fn model_name(&self, table: &str) -> String {
        self.model_names
            .get(table)
            .cloned()
            .unwrap_or_else(|| self.naming.model_name(table))
    }

    /// Lay out the fields of every model, without naming them.
    fn draft_models(&self) -> Vec<Draft<'g>> {
        let graph = self.graph;
        let mut drafts = Vec::new();

        for table in graph.schema().iter_tables() {
            if graph.is_junction(&table.name) {
                continue;
            }

            let owned: Vec<&InferredRelation> = graph
                .relations()
                .iter()
                .filter(|r| r.shape.foreign_key().is_some_and(|(t, _)| t == table.name))
                .collect();
            let folds = |fk: &ForeignKey| {
                fk.columns.iter().all(|c| {
                    table
                        .foreign_keys
                        .iter()
                        .filter(|other| other.columns.contains(c))
                        .count()
                        == 1
                })
            };

            let mut slots = Vec::new();
            let mut folded: Vec<&str> = Vec::new();
            for column in &table.columns {
                let folding = owned.iter().copied().find(|r| {
                    r.shape
                        .foreign_key()
                        .is_some_and(|(_, fk)| fk.columns.contains(&column.name) && folds(fk))
                });
                match folding {
                    Some(relation) => {
                        if !folded.contains(&relation.name.as_str()) {
                            folded.push(&relation.name);
                            slots.push(Slot {
                                key: FieldKey::Relation {
                                    relation: relation_key(relation),
                                    side: Side::Left,
                                },
                                kind: SlotKind::Forward(relation),
                                name: None,
                            });
                        }
                    }
                    None => slots.push(Slot {
                        key: FieldKey::Column(column.name.clone()),
                        kind: SlotKind::Scalar(column),
                        name: None,
                    }),
                }
            }

            for relation in owned {
                if !folded.contains(&relation.name.as_str()) {
                    slots.push(Slot {
                        key: FieldKey::Relation {
                            relation: relation_key(relation),
                            side: Side::Left,
                        },
                        kind: SlotKind::Forward(relation),
                        name: None,
                    });
                }
            }

            for relation in graph.relations() {
                let key = relation_key(relation);
                match &relation.shape {
                    RelationShape::OneToOne { foreign_key, .. }
                    | RelationShape::OneToMany { foreign_key, .. } => {
                        if foreign_key.references_table == table.name {
                            slots.push(Slot {
                                key: FieldKey::Relation {
                                    relation: key,
                                    side: Side::Right,
                                },
                                kind: SlotKind::Back(relation),
                                name: None,
                            });
                        }
                    }
                    RelationShape::ManyToMany { left, right, .. } => {
                        for (fk, side) in [(left, Side::Left), (right, Side::Right)] {
                            if fk.references_table == table.name {
                                slots.push(Slot {
                                    key: FieldKey::Relation {
                                        relation: key.clone(),
                                        side,
                                    },
                                    kind: SlotKind::ManyToMany(relation, side),
                                    name: None,
                                });
                            }
                        }
                    }
                }
            }

            let reference = self.reference.and_then(|r| r.model_for_table(&table.name));
            let mut names = Names::default();
            if let Some(reference) = reference {
                for slot in &slots {
                    if let Some(known) = reference.field_by_key(&slot.key) {
                        names.reserve(&known.name);
                    }
                }
            }

            drafts.push(Draft {
                table,
                name: self.model_name(&table.name),
                reference,
                slots,
                names,
            });
        }

        drafts
    }

    /// Name scalar fields and the forward side of foreign key relations.
    fn name_owned_fields(&mut self, draft: &mut Draft<'g>) {
        for slot in &mut draft.slots {
            let known = draft.reference.and_then(|r| r.field_by_key(&slot.key));
            let name = match (&slot.kind, known) {
                (SlotKind::Scalar(_) | SlotKind::Forward(_), Some(known)) => known.name.clone(),
                (SlotKind::Scalar(column), None) => {
                    draft.names.claim(self.naming.scalar_field_name(&column.name))
                }
                (SlotKind::Forward(relation), None) => {
                    let Some((_, fk)) = relation.shape.foreign_key() else {
                        continue;
                    };
                    let target = self.model_name(&fk.references_table);
                    draft
                        .names
                        .claim(self.naming.forward_relation_field(&fk.columns, &target))
                }
                _ => continue,
            };

            if let SlotKind::Forward(relation) = slot.kind {
                self.endpoints.insert(
                    (relation.name.clone(), Side::Left),
                    RelationEndpoint {
                        model: draft.name.clone(),
                        field: name.clone(),
                    },
                );
            }
            slot.name = Some(name);
        }
    }

    /// Name back relation fields and many-to-many fields. Runs after every
    /// forward field has its name, since back fields may be qualified by it.
    fn name_back_fields(&mut self, draft: &mut Draft<'g>) {
        for slot in &mut draft.slots {
            let known = draft.reference.and_then(|r| r.field_by_key(&slot.key));
            let (relation, side, name) = match (&slot.kind, known) {
                (SlotKind::Back(relation), Some(known)) => {
                    (*relation, Side::Right, known.name.clone())
                }
                (SlotKind::ManyToMany(relation, side), Some(known)) => {
                    (*relation, *side, known.name.clone())
                }
                (SlotKind::Back(relation), None) => {
                    let (source, _) = relation.shape.endpoints();
                    let qualifier = self
                        .needs_qualifier(relation)
                        .then(|| self.endpoints.get(&(relation.name.clone(), Side::Left)))
                        .flatten()
                        .map(|e| e.field.clone());
                    let to_many = matches!(relation.shape, RelationShape::OneToMany { .. });
                    let name = draft.names.claim(self.naming.back_relation_field(
                        &self.model_name(source),
                        to_many,
                        qualifier.as_deref(),
                    ));
                    (*relation, Side::Right, name)
                }
                (SlotKind::ManyToMany(relation, side), None) => {
                    let (left, right) = relation.shape.endpoints();
                    let other = match side {
                        Side::Left => right,
                        Side::Right => left,
                    };
                    let junction = match &relation.shape {
                        RelationShape::ManyToMany { junction, .. }
                            if self.needs_qualifier(relation) =>
                        {
                            Some(junction.as_str())
                        }
                        _ => None,
                    };
                    let name = draft
                        .names
                        .claim(self.naming.many_to_many_field(&self.model_name(other), junction));
                    (*relation, *side, name)
                }
                _ => continue,
            };

            self.endpoints.insert(
                (relation.name.clone(), side),
                RelationEndpoint {
                    model: draft.name.clone(),
                    field: name.clone(),
                },
            );
            slot.name = Some(name);
        }
    }

    /// Self relations and relations sharing their pair of tables with another
    /// relation need qualified field names.
    fn needs_qualifier(&self, relation: &InferredRelation) -> bool {
        if relation.shape.is_self() {
            return true;
        }
        let pair = |r: &InferredRelation| {
            let (a, b) = r.shape.endpoints();
            if a <= b {
                (a.to_string(), b.to_string())
            } else {
                (b.to_string(), a.to_string())
            }
        };
        let this = pair(relation);
        self.graph
            .relations()
            .iter()
            .filter(|r| pair(r) == this)
            .count()
            > 1
    }

    fn build_model(&self, draft: &Draft<'g>) -> Model {
        let table = draft.table;
        let scalar_columns: Vec<&str> = draft
            .slots
            .iter()
            .filter_map(|s| match s.kind {
                SlotKind::Scalar(column) => Some(column.name.as_str()),
                _ => None,
            })
            .collect();

        let (id_column, primary_key) = match table.primary_key.as_slice() {
            [single] if scalar_columns.contains(&single.as_str()) => {
                (Some(single.clone()), Vec::new())
            }
            pk => (None, pk.to_vec()),
        };

        let mut unique_columns: Vec<String> = Vec::new();
        let mut indexes: Vec<ModelIndex> = Vec::new();
        let mut add_unique = |columns: &[String], indexes: &mut Vec<ModelIndex>| {
            if same_columns(columns, &table.primary_key) {
                return;
            }
            if let [single] = columns {
                if scalar_columns.contains(&single.as_str()) {
                    if !unique_columns.contains(single) {
                        unique_columns.push(single.clone());
                    }
                    return;
                }
            }
            let exists = indexes.iter().any(|i| {
                i.unique
                    && i.where_clause.is_none()
                    && i.columns.len() == columns.len()
                    && columns.iter().all(|c| i.columns.iter().any(|ic| &ic.name == c))
            });
            if !exists {
                indexes.push(ModelIndex {
                    columns: columns.iter().map(IndexColumn::new).collect(),
                    unique: true,
                    where_clause: None,
                });
            }
        };
        for unique in &table.uniques {
            add_unique(&unique.columns, &mut indexes);
        }
        for index in &table.indices {
            if index.unique && index.where_clause.is_none() {
                let columns: Vec<String> = index.columns.iter().map(|c| c.name.clone()).collect();
                add_unique(&columns, &mut indexes);
            } else {
                indexes.push(ModelIndex {
                    columns: index.columns.clone(),
                    unique: index.unique,
                    where_clause: index.where_clause.clone(),
                });
            }
        }

        let mut fields: Vec<(&FieldKey, Field)> = Vec::new();
        for slot in &draft.slots {
            let Some(name) = slot.name.clone() else {
                continue;
            };
            let field = match slot.kind {
                SlotKind::Scalar(column) => self.scalar_field(
                    name,
                    column,
                    id_column.as_deref() == Some(column.name.as_str()),
                    unique_columns.contains(&column.name),
                ),
                SlotKind::Forward(relation) => self.forward_field(name, table, relation),
                SlotKind::Back(relation) => self.back_field(name, relation),
                SlotKind::ManyToMany(relation, side) => {
                    self.many_to_many_field(name, relation, side)
                }
            };
            fields.push((&slot.key, field));
        }

        let fields = match draft.reference {
            Some(reference) => {
                let mut ordered: Vec<(Option<usize>, Field)> = fields
                    .into_iter()
                    .map(|(key, field)| {
                        (reference.fields.iter().position(|f| &f.key == key), field)
                    })
                    .collect();
                // known fields first, in reference order; stable sort keeps new ones in place
                ordered.sort_by_key(|(position, _)| position.unwrap_or(usize::MAX));
                ordered.into_iter().map(|(_, field)| field).collect()
            }
            None => fields.into_iter().map(|(_, field)| field).collect(),
        };

        Model {
            name: draft.name.clone(),
            table: table.name.clone(),
            fields,
            primary_key,
            indexes,
        }
    }

    fn scalar_field(&self, name: String, column: &Column, is_id: bool, is_unique: bool) -> Field {
        let schema = self.graph.schema();
        let (r#type, native_type) = scalar_type(&column.pg_type, |pg_enum| {
            self.enum_names
                .get(pg_enum)
                .cloned()
                .unwrap_or_else(|| self.naming.enum_name(pg_enum))
        });

        let is_list = matches!(column.pg_type, PgType::Array(_));
        let arity = if is_list {
            Arity::List
        } else if column.nullable {
            Arity::Optional
        } else {
            Arity::Required
        };

        let default = if is_list {
            column.default.clone().map(DefaultValue::DbGenerated)
        } else {
            let variants = column
                .pg_type
                .enum_name()
                .and_then(|e| schema.get_enum(e))
                .map(|e| e.variants.as_slice())
                .unwrap_or_default();
            DefaultValue::classify(
                column.default.as_deref(),
                column.auto_generated,
                &r#type,
                variants,
            )
        };

        Field {
            name,
            arity,
            kind: FieldKind::Scalar(ScalarField {
                column: column.name.clone(),
                r#type,
                native_type,
                default,
                is_id,
                is_unique,
            }),
        }
    }

    fn forward_field(&self, name: String, table: &Table, relation: &InferredRelation) -> Field {
        let (fields, references, target, on_delete, on_update, optional) =
            match relation.shape.foreign_key() {
                Some((_, fk)) => (
                    fk.columns.clone(),
                    fk.references_columns.clone(),
                    self.model_name(&fk.references_table),
                    fk.on_delete,
                    fk.on_update,
                    fk.columns
                        .iter()
                        .any(|c| table.column(c).is_some_and(|c| c.nullable)),
                ),
                None => (
                    Vec::new(),
                    Vec::new(),
                    String::new(),
                    FkAction::NoAction,
                    FkAction::NoAction,
                    false,
                ),
            };

        Field {
            name,
            arity: if optional {
                Arity::Optional
            } else {
                Arity::Required
            },
            kind: FieldKind::Relation(RelationField {
                relation: self.final_relation_name(relation),
                target,
                fields,
                references,
                on_delete,
                on_update,
                through: None,
            }),
        }
    }

    fn back_field(&self, name: String, relation: &InferredRelation) -> Field {
        let (source, _) = relation.shape.endpoints();
        let arity = match relation.shape {
            RelationShape::OneToOne { .. } => Arity::Optional,
            _ => Arity::List,
        };
        Field {
            name,
            arity,
            kind: FieldKind::Relation(RelationField {
                relation: self.final_relation_name(relation),
                target: self.model_name(source),
                fields: Vec::new(),
                references: Vec::new(),
                on_delete: FkAction::NoAction,
                on_update: FkAction::NoAction,
                through: None,
            }),
        }
    }

    fn many_to_many_field(&self, name: String, relation: &InferredRelation, side: Side) -> Field {
        let (left, right) = relation.shape.endpoints();
        let other = match side {
            Side::Left => right,
            Side::Right => left,
        };
        let through = match &relation.shape {
            RelationShape::ManyToMany { junction, .. } => Some(junction.clone()),
            _ => None,
        };
        Field {
            name,
            arity: Arity::List,
            kind: FieldKind::Relation(RelationField {
                relation: self.final_relation_name(relation),
                target: self.model_name(other),
                fields: Vec::new(),
                references: Vec::new(),
                on_delete: FkAction::NoAction,
                on_update: FkAction::NoAction,
                through,
            }),
        }
    }

    fn final_relation_name(&self, relation: &InferredRelation) -> String {
        self.relation_names
            .get(&relation.name)
            .cloned()
            .unwrap_or_else(|| relation.name.clone())
    }

    fn build_enums(&self) -> Vec<Enum> {
        let enums = self
            .graph
            .schema()
            .enums
            .values()
            .map(|e| Enum {
                name: self
                    .enum_names
                    .get(&e.name)
                    .cloned()
                    .unwrap_or_else(|| self.naming.enum_name(&e.name)),
                db_name: e.name.clone(),
                variants: e.variants.clone(),
            })
            .collect();
        self.reference_order(enums, |r, e| r.enums.iter().position(|re| re.db_name == e.db_name))
    }

    fn build_relations(&self) -> Vec<Relation> {
        let missing = |relation: &InferredRelation, side: Side| RelationEndpoint {
            model: String::new(),
            field: format!("<{} {:?}>", relation.name, side),
        };

        let relations = self
            .graph
            .relations()
            .iter()
            .map(|relation| {
                let endpoint = |side: Side| {
                    self.endpoints
                        .get(&(relation.name.clone(), side))
                        .cloned()
                        .unwrap_or_else(|| missing(relation, side))
                };
                Relation {
                    name: self.final_relation_name(relation),
                    key: relation_key(relation),
                    kind: match relation.shape {
                        RelationShape::OneToOne { .. } => RelationKind::OneToOne,
                        RelationShape::OneToMany { .. } => RelationKind::OneToMany,
                        RelationShape::ManyToMany { .. } => RelationKind::ManyToMany,
                    },
                    left: endpoint(Side::Left),
                    right: endpoint(Side::Right),
                    confidence: relation.confidence,
                }
            })
            .collect();
        self.reference_order(relations, |r, rel| {
            r.relations.iter().position(|rr| rr.key == rel.key)
        })
    }

    /// Move reference-known items to the front, in reference order. Unknown
    /// items keep their relative order after them.
    fn reference_order<T>(
        &self,
        items: Vec<T>,
        position: impl Fn(&ReferenceDatamodel, &T) -> Option<usize>,
    ) -> Vec<T> {
        let Some(reference) = self.reference else {
            return items;
        };
        let mut keyed: Vec<(usize, T)> = items
            .into_iter()
            .map(|item| (position(reference, &item).unwrap_or(usize::MAX), item))
            .collect();
        keyed.sort_by_key(|(position, _)| *position);
        keyed.into_iter().map(|(_, item)| item).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::build;
    use crate::catalog::{RawCatalog, RawColumn, RawConstraint};
    use crate::naming::DefaultNaming;
    use crate::relations::infer;

    fn datamodel(raw: &RawCatalog, reference: Option<&ReferenceDatamodel>) -> Datamodel {
        let graph = infer(build(raw).unwrap());
        normalize(&graph, reference, &DefaultNaming::default()).unwrap()
    }

    fn blog() -> RawCatalog {
        RawCatalog::new("public")
            .with_table("user")
            .with_table("post")
            .with_column(
                RawColumn::new("user", "id", 1, "int4").default("nextval('user_id_seq'::regclass)"),
            )
            .with_column(
                RawColumn::new("user", "email", 2, "varchar").formatted("character varying(255)"),
            )
            .with_column(
                RawColumn::new("post", "id", 1, "int4").default("nextval('post_id_seq'::regclass)"),
            )
            .with_column(RawColumn::new("post", "author_id", 2, "int4"))
            .with_column(RawColumn::new("post", "created_at", 3, "timestamptz").default("now()"))
            .with_constraint(RawConstraint::primary_key("user", "user_pkey", &["id"]))
            .with_constraint(RawConstraint::unique("user", "user_email_key", &["email"]))
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
    }

    #[test]
    fn test_folds_foreign_key_columns() {
        let dm = datamodel(&blog(), None);
        insta::assert_snapshot!(dm.render(), @r#"
        model User {
          id Int @id @default(autoincrement())
          email String @unique @db.VarChar(255)
          posts Post[]
          @@map("user")
        }

        model Post {
          id Int @id @default(autoincrement())
          author User @relation(fields: [author_id], references: [id], onDelete: Cascade)
          createdAt DateTime @default(now()) @map("created_at")
          @@map("post")
        }
        "#);
    }

    #[test]
    fn test_reference_names_and_order_win() {
        let reference = ReferenceDatamodel {
            models: vec![
                ReferenceModel::new("Article", "post")
                    .column("published", "created_at")
                    .relation(
                        "writer",
                        RelationKey::foreign_key("post", &["author_id"], "user", &["id"]),
                        Side::Left,
                    ),
                ReferenceModel::new("Member", "user"),
            ],
            ..ReferenceDatamodel::default()
        };
        let dm = datamodel(&blog(), Some(&reference));
        insta::assert_snapshot!(dm.render(), @r#"
        model Article {
          published DateTime @default(now()) @map("created_at")
          writer Member @relation(fields: [author_id], references: [id], onDelete: Cascade)
          id Int @id @default(autoincrement())
          @@map("post")
        }

        model Member {
          id Int @id @default(autoincrement())
          email String @unique @db.VarChar(255)
          articles Article[]
          @@map("user")
        }
        "#);
    }

    #[test]
    fn test_stale_reference_entries_are_ignored() {
        let reference = ReferenceDatamodel {
            models: vec![ReferenceModel::new("Comment", "comment").column("body", "body")],
            ..ReferenceDatamodel::default()
        };
        let with_stale = datamodel(&blog(), Some(&reference));
        assert_eq!(with_stale, datamodel(&blog(), None));
    }

    #[test]
    fn test_policy_names_avoid_reference_names() {
        // the reference already uses `author` for the plain column
        let raw = blog().with_column(RawColumn::new("post", "author", 4, "text").nullable());
        let reference = ReferenceDatamodel {
            models: vec![ReferenceModel::new("Post", "post").column("author", "author")],
            ..ReferenceDatamodel::default()
        };
        let dm = datamodel(&raw, Some(&reference));
        let post = dm.model("Post").unwrap();
        let names: Vec<_> = post.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["author", "id", "author2", "createdAt"]);
    }

    #[test]
    fn test_self_relation_fields() {
        let raw = RawCatalog::new("public")
            .with_table("employee")
            .with_column(RawColumn::new("employee", "id", 1, "int4"))
            .with_column(RawColumn::new("employee", "manager_id", 2, "int4").nullable())
            .with_constraint(RawConstraint::primary_key("employee", "employee_pkey", &["id"]))
            .with_constraint(RawConstraint::foreign_key(
                "employee",
                "employee_manager_id_fkey",
                &["manager_id"],
                "employee",
                &["id"],
            ));
        let dm = datamodel(&raw, None);
        insta::assert_snapshot!(dm.render(), @r#"
        model Employee {
          id Int @id
          manager Employee? @relation("employee_manager_idToemployee", fields: [manager_id], references: [id])
          employeesAsManager Employee[] @relation("employee_manager_idToemployee")
          @@map("employee")
        }
        "#);
    }

    #[test]
    fn test_two_relations_between_same_models_are_named() {
        let raw = RawCatalog::new("public")
            .with_table("user")
            .with_table("message")
            .with_column(RawColumn::new("user", "id", 1, "int4"))
            .with_column(RawColumn::new("message", "id", 1, "int4"))
            .with_column(RawColumn::new("message", "sender_id", 2, "int4"))
            .with_column(RawColumn::new("message", "recipient_id", 3, "int4"))
            .with_constraint(RawConstraint::primary_key("user", "user_pkey", &["id"]))
            .with_constraint(RawConstraint::primary_key("message", "message_pkey", &["id"]))
            .with_constraint(RawConstraint::foreign_key(
                "message",
                "message_recipient_id_fkey",
                &["recipient_id"],
                "user",
                &["id"],
            ))
            .with_constraint(RawConstraint::foreign_key(
                "message",
                "message_sender_id_fkey",
                &["sender_id"],
                "user",
                &["id"],
            ));
        let dm = datamodel(&raw, None);
        insta::assert_snapshot!(dm.render(), @r#"
        model User {
          id Int @id
          messagesAsRecipient Message[] @relation("message_recipient_idTouser")
          messagesAsSender Message[] @relation("message_sender_idTouser")
          @@map("user")
        }

        model Message {
          id Int @id
          sender User @relation("message_sender_idTouser", fields: [sender_id], references: [id])
          recipient User @relation("message_recipient_idTouser", fields: [recipient_id], references: [id])
          @@map("message")
        }
        "#);
    }

    #[test]
    fn test_composite_keys_and_shared_columns() {
        // `country` belongs to two foreign keys, so neither folds
        let raw = RawCatalog::new("public")
            .with_table("region")
            .with_table("city")
            .with_table("store")
            .with_column(RawColumn::new("region", "country", 1, "text"))
            .with_column(RawColumn::new("region", "code", 2, "text"))
            .with_column(RawColumn::new("city", "country", 1, "text"))
            .with_column(RawColumn::new("city", "name", 2, "text"))
            .with_column(RawColumn::new("store", "country", 1, "text"))
            .with_column(RawColumn::new("store", "region_code", 2, "text"))
            .with_column(RawColumn::new("store", "city_name", 3, "text"))
            .with_constraint(RawConstraint::primary_key(
                "region",
                "region_pkey",
                &["country", "code"],
            ))
            .with_constraint(RawConstraint::primary_key("city", "city_pkey", &["country", "name"]))
            .with_constraint(RawConstraint::primary_key(
                "store",
                "store_pkey",
                &["country", "region_code", "city_name"],
            ))
            .with_constraint(RawConstraint::foreign_key(
                "store",
                "store_city_fkey",
                &["country", "city_name"],
                "city",
                &["country", "name"],
            ))
            .with_constraint(RawConstraint::foreign_key(
                "store",
                "store_region_fkey",
                &["country", "region_code"],
                "region",
                &["country", "code"],
            ));
        let dm = datamodel(&raw, None);
        let store = dm.model("Store").unwrap();
        let names: Vec<_> = store.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["country", "regionCode", "cityName", "city", "region"]);
        assert!(dm.render().contains("@@id([country, region_code, city_name])"));
    }

    #[test]
    fn test_many_to_many() {
        let raw = RawCatalog::new("public")
            .with_table("post")
            .with_table("tag")
            .with_table("post_tags")
            .with_column(RawColumn::new("post", "id", 1, "int4"))
            .with_column(RawColumn::new("tag", "id", 1, "int4"))
            .with_column(RawColumn::new("post_tags", "post_id", 1, "int4"))
            .with_column(RawColumn::new("post_tags", "tag_id", 2, "int4"))
            .with_constraint(RawConstraint::primary_key("post", "post_pkey", &["id"]))
            .with_constraint(RawConstraint::primary_key("tag", "tag_pkey", &["id"]))
            .with_constraint(RawConstraint::primary_key(
                "post_tags",
                "post_tags_pkey",
                &["post_id", "tag_id"],
            ))
            .with_constraint(RawConstraint::foreign_key(
                "post_tags",
                "post_tags_post_id_fkey",
                &["post_id"],
                "post",
                &["id"],
            ))
            .with_constraint(RawConstraint::foreign_key(
                "post_tags",
                "post_tags_tag_id_fkey",
                &["tag_id"],
                "tag",
                &["id"],
            ));
        let dm = datamodel(&raw, None);
        insta::assert_snapshot!(dm.render(), @r#"
        model Post {
          id Int @id
          tags Tag[] @relation(through: "post_tags")
          @@map("post")
        }

        model Tag {
          id Int @id
          posts Post[] @relation(through: "post_tags")
          @@map("tag")
        }
        "#);
        assert_eq!(dm.relations().count(), 1);
    }

    #[test]
    fn test_enums_and_unsupported_types() {
        let raw = RawCatalog::new("public")
            .with_table("ticket")
            .with_column(RawColumn::new("ticket", "id", 1, "uuid").default("gen_random_uuid()"))
            .with_column(
                RawColumn::new("ticket", "status", 2, "ticket_status")
                    .default("'open'::ticket_status"),
            )
            .with_column(RawColumn::new("ticket", "labels", 3, "_text").formatted("text[]"))
            .with_column(RawColumn::new("ticket", "search", 4, "tsvector").nullable())
            .with_constraint(RawConstraint::primary_key("ticket", "ticket_pkey", &["id"]))
            .with_enum("ticket_status", &["open", "closed"]);
        let dm = datamodel(&raw, None);
        insta::assert_snapshot!(dm.render(), @r#"
        model Ticket {
          id String @id @default(dbgenerated("gen_random_uuid()")) @db.Uuid
          status TicketStatus @default(open)
          labels String[]
          search Unsupported("tsvector")?
          @@map("ticket")
        }

        enum TicketStatus {
          open
          closed
          @@map("ticket_status")
        }
        "#);
    }

    #[test]
    fn test_name_collisions_get_suffixes() {
        // `author_id` folds into `author`, which is also a plain column
        let raw = blog().with_column(RawColumn::new("post", "author", 4, "text"));
        let dm = datamodel(&raw, None);
        let post = dm.model("Post").unwrap();
        let names: Vec<_> = post.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "author", "createdAt", "author2"]);
    }
}
