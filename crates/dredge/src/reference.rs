//! Reference datamodels.
//!
//! A reference is the presentation layer of a datamodel seen before: which
//! logical names were given to which physical things, and in what order they
//! appeared. Everything is keyed by physical identifiers (table names, column
//! lists, junction tables), so the reference can be built by hand or by an
//! external parser just as well as derived from a [`Datamodel`].
//!
//! A reference never adds or removes anything. Entries with no counterpart in
//! the database are ignored.

use crate::datamodel::{Datamodel, FieldKind, RelationKey, Side};

/// What a reference field stands for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldKey {
    /// A scalar field, by column
    Column(String),
    /// One end of a relation
    Relation { relation: RelationKey, side: Side },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceField {
    pub name: String,
    pub key: FieldKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceModel {
    pub name: String,
    pub table: String,
    pub fields: Vec<ReferenceField>,
}

impl ReferenceModel {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            fields: Vec::new(),
        }
    }

    /// Add a scalar field.
    pub fn column(mut self, name: impl Into<String>, column: impl Into<String>) -> Self {
        self.fields.push(ReferenceField {
            name: name.into(),
            key: FieldKey::Column(column.into()),
        });
        self
    }

    /// Add a relation field.
    pub fn relation(mut self, name: impl Into<String>, relation: RelationKey, side: Side) -> Self {
        self.fields.push(ReferenceField {
            name: name.into(),
            key: FieldKey::Relation { relation, side },
        });
        self
    }

    pub fn field_by_key(&self, key: &FieldKey) -> Option<&ReferenceField> {
        self.fields.iter().find(|f| &f.key == key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceEnum {
    pub name: String,
    /// Postgres type name
    pub db_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceRelation {
    pub name: String,
    pub key: RelationKey,
}

/// Names and order of a previously known datamodel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceDatamodel {
    pub models: Vec<ReferenceModel>,
    pub enums: Vec<ReferenceEnum>,
    pub relations: Vec<ReferenceRelation>,
}

impl ReferenceDatamodel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model_for_table(&self, table: &str) -> Option<&ReferenceModel> {
        self.models.iter().find(|m| m.table == table)
    }

    pub fn enum_for_type(&self, db_name: &str) -> Option<&ReferenceEnum> {
        self.enums.iter().find(|e| e.db_name == db_name)
    }

    pub fn relation_by_key(&self, key: &RelationKey) -> Option<&ReferenceRelation> {
        self.relations.iter().find(|r| &r.key == key)
    }
}

impl From<&Datamodel> for ReferenceDatamodel {
    fn from(datamodel: &Datamodel) -> Self {
        let models = datamodel
            .models()
            .map(|model| ReferenceModel {
                name: model.name.clone(),
                table: model.table.clone(),
                fields: model
                    .fields
                    .iter()
                    .filter_map(|field| {
                        let key = match &field.kind {
                            FieldKind::Scalar(scalar) => FieldKey::Column(scalar.column.clone()),
                            FieldKind::Relation(rf) => {
                                let relation = datamodel.relation(&rf.relation)?;
                                let side = if relation.left.model == model.name
                                    && relation.left.field == field.name
                                {
                                    Side::Left
                                } else {
                                    Side::Right
                                };
                                FieldKey::Relation {
                                    relation: relation.key.clone(),
                                    side,
                                }
                            }
                        };
                        Some(ReferenceField {
                            name: field.name.clone(),
                            key,
                        })
                    })
                    .collect(),
            })
            .collect();

        let enums = datamodel
            .enums()
            .map(|e| ReferenceEnum {
                name: e.name.clone(),
                db_name: e.db_name.clone(),
            })
            .collect();

        let relations = datamodel
            .relations()
            .map(|r| ReferenceRelation {
                name: r.name.clone(),
                key: r.key.clone(),
            })
            .collect();

        Self {
            models,
            enums,
            relations,
        }
    }
}
