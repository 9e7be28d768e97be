use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QuarryError, QuarryResult};

/// The primary key name used when a model declares none.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// Storage metadata attached to a declared field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldMeta {
    /// The column accepts NULL.
    pub nullable: bool,
    /// A unique index is maintained on the column.
    pub unique: bool,
    /// A plain index is maintained on the column.
    pub index: bool,
    /// The column is an auto-incrementing primary key.
    pub auto: bool,
    /// The column is the primary key.
    pub primary_key: bool,
    /// Literal default value.
    pub default: Option<Value>,
    /// Raw SQL default expression, emitted verbatim.
    pub default_expression: Option<String>,
    /// Maximum length for string columns.
    pub length: Option<u32>,
    /// Numeric precision.
    pub precision: Option<u32>,
    /// Numeric scale.
    pub scale: Option<u32>,
    /// Closed set of allowed string values.
    pub enum_values: Vec<String>,
    /// Inline CHECK expression.
    pub check: Option<String>,
    /// Column comment.
    pub comment: Option<String>,
    /// Column collation.
    pub collate: Option<String>,
    /// Expression for a generated column.
    pub generated_expression: Option<String>,
    /// The column is refreshed to the current timestamp on update.
    pub on_update_now: bool,
    /// The column stores JSON.
    pub json: bool,
    /// Foreign key target: a model name, a table name, or `table.column`.
    pub foreign_key_target: Option<String>,
    /// The column stores an array of the declared type.
    pub array: bool,
}

/// A declared field: its semantic type name plus storage metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Semantic type name as written in the source declaration (`string`, `number`, `boolean`, `Date`, ...).
    #[serde(rename = "type")]
    pub ty: String,
    /// Storage metadata.
    #[serde(default)]
    pub meta: FieldMeta,
}

impl FieldDescriptor {
    /// Creates a field of the given semantic type with default metadata.
    pub fn new(ty: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            meta: FieldMeta::default(),
        }
    }

    /// Replaces the metadata.
    pub fn with_meta(mut self, meta: FieldMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Returns true if the declared type is boolean.
    pub fn is_boolean(&self) -> bool {
        self.ty.to_ascii_lowercase().contains("boolean")
    }

    /// Returns true if the declared type is a date or time.
    pub fn is_temporal(&self) -> bool {
        let ty = self.ty.to_ascii_lowercase();
        ty.contains("date") || ty.contains("time")
    }

    /// Returns true if the declared type admits a missing value.
    pub fn is_optional(&self) -> bool {
        let ty = self.ty.to_ascii_lowercase();
        self.meta.nullable || ty.contains("undefined") || ty.contains("null") || ty.ends_with('?')
    }

    /// Returns true if the field is (or is part of) the primary key.
    pub const fn is_primary(&self) -> bool {
        self.meta.primary_key || self.meta.auto
    }
}

/// The four relation shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationKind {
    /// The target rows carry a foreign key to the source.
    #[serde(alias = "oneToMany", alias = "hasMany")]
    OneToMany,
    /// The source row carries a foreign key to the target.
    #[serde(alias = "manyToOne", alias = "belongsTo")]
    ManyToOne,
    /// Either side carries a unique foreign key to the other.
    #[serde(alias = "oneToOne", alias = "hasOne")]
    OneToOne,
    /// Rows are paired through a junction table.
    #[serde(alias = "manyToMany", alias = "belongsToMany")]
    ManyToMany,
}

impl RelationKind {
    /// Returns true if the relation resolves to an array of rows.
    pub const fn is_many(self) -> bool {
        matches!(self, Self::OneToMany | Self::ManyToMany)
    }

    /// Returns the value assigned to a parent with no related rows.
    pub fn empty_value(self) -> Value {
        if self.is_many() {
            Value::Array(Vec::new())
        } else {
            Value::Null
        }
    }
}

/// Referential actions attached to a relation's foreign key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelationMeta {
    /// `ON DELETE` action.
    pub on_delete: Option<String>,
    /// `ON UPDATE` action.
    pub on_update: Option<String>,
    /// Emit `DEFERRABLE INITIALLY DEFERRED` where supported.
    pub deferrable: bool,
    /// `MATCH` kind (`FULL`, `SIMPLE`, `PARTIAL`).
    #[serde(rename = "match")]
    pub match_kind: Option<String>,
}

/// A relation declared on a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDescriptor {
    /// Declaring model. Filled in by [`Schema::new`] when omitted.
    #[serde(default)]
    pub source_model: String,
    /// Row key the resolved relation is written to.
    pub field_name: String,
    /// Relation shape.
    pub kind: RelationKind,
    /// Related model name.
    pub target_model: String,
    /// Foreign key column (on the junction table for many-to-many).
    #[serde(default)]
    pub foreign_key: Option<String>,
    /// Junction column referencing the target (many-to-many only).
    #[serde(default)]
    pub related_key: Option<String>,
    /// Junction table (many-to-many only).
    #[serde(default)]
    pub through: Option<String>,
    /// Referential actions.
    #[serde(default)]
    pub meta: RelationMeta,
}

impl RelationDescriptor {
    /// Creates a relation with the given shape and foreign key.
    pub fn new(
        field_name: impl Into<String>,
        kind: RelationKind,
        target_model: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            source_model: String::new(),
            field_name: field_name.into(),
            kind,
            target_model: target_model.into(),
            foreign_key: Some(foreign_key.into()),
            related_key: None,
            through: None,
            meta: RelationMeta::default(),
        }
    }

    /// Creates a many-to-many relation through a junction table.
    pub fn many_to_many(
        field_name: impl Into<String>,
        target_model: impl Into<String>,
        through: impl Into<String>,
        foreign_key: impl Into<String>,
        related_key: impl Into<String>,
    ) -> Self {
        Self {
            source_model: String::new(),
            field_name: field_name.into(),
            kind: RelationKind::ManyToMany,
            target_model: target_model.into(),
            foreign_key: Some(foreign_key.into()),
            related_key: Some(related_key.into()),
            through: Some(through.into()),
            meta: RelationMeta::default(),
        }
    }

    /// Replaces the referential actions.
    pub fn with_meta(mut self, meta: RelationMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Returns the foreign key column. Validated schemas always have one.
    pub fn foreign_key(&self) -> &str {
        self.foreign_key.as_deref().unwrap_or_default()
    }

    /// Returns the visited-set key `"<model>:<field>"`.
    pub fn visit_key(&self) -> String {
        format!("{}:{}", self.source_model, self.field_name)
    }
}

/// Which side of a one-to-one or many-to-one relation stores the foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The declaring model's rows carry the foreign key.
    Parent,
    /// The target model's rows carry the foreign key.
    Child,
}

/// Table-level description of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSchema {
    /// Table name.
    pub table: String,
    /// Explicit primary key column.
    #[serde(default)]
    pub primary_key: Option<String>,
    /// Declared fields, in declaration order.
    #[serde(default)]
    pub fields: IndexMap<String, FieldDescriptor>,
    /// Declared relations.
    #[serde(default)]
    pub relations: Vec<RelationDescriptor>,
}

impl ModelSchema {
    /// Creates an empty model backed by `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            primary_key: None,
            fields: IndexMap::new(),
            relations: Vec::new(),
        }
    }

    /// Adds a field.
    pub fn field(mut self, name: impl Into<String>, field: FieldDescriptor) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    /// Adds a relation.
    pub fn relation(mut self, relation: RelationDescriptor) -> Self {
        self.relations.push(relation);
        self
    }

    /// Returns the primary key column name, defaulting to `id`.
    pub fn primary_key(&self) -> &str {
        if let Some(pk) = &self.primary_key {
            return pk;
        }
        self.fields
            .iter()
            .find(|(_, field)| field.is_primary())
            .map_or(DEFAULT_PRIMARY_KEY, |(name, _)| name.as_str())
    }

    /// Looks up a declared relation by field name.
    pub fn relation_named(&self, field_name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.field_name == field_name)
    }

    /// Returns true if the model declares a field with this name.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Iterates over the names of boolean-typed fields.
    pub fn boolean_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, field)| field.is_boolean())
            .map(|(name, _)| name.as_str())
    }

    /// Decides which side of `relation` (declared on this model) owns the foreign key.
    ///
    /// The parent owns it when this model declares the foreign key field. When
    /// neither side declares it, many-to-one falls back to the parent and
    /// one-to-one to the child.
    pub fn ownership(&self, relation: &RelationDescriptor, target: &ModelSchema) -> Ownership {
        let fk = relation.foreign_key();
        if self.has_field(fk) {
            Ownership::Parent
        } else if target.has_field(fk) {
            Ownership::Child
        } else if relation.kind == RelationKind::ManyToOne {
            Ownership::Parent
        } else {
            Ownership::Child
        }
    }

    fn normalize(&mut self, name: &str) -> QuarryResult<()> {
        let primaries = self.fields.values().filter(|f| f.is_primary()).count();
        if primaries > 1 {
            return Err(QuarryError::InvalidSchema(format!(
                "model `{name}` declares {primaries} primary key fields"
            )));
        }
        if primaries == 0 {
            let pk = self
                .primary_key
                .clone()
                .unwrap_or_else(|| DEFAULT_PRIMARY_KEY.to_owned());
            match self.fields.get_mut(&pk) {
                Some(field) => field.meta.primary_key = true,
                None => {
                    let id = FieldDescriptor::new("number").with_meta(FieldMeta {
                        auto: true,
                        primary_key: true,
                        ..FieldMeta::default()
                    });
                    self.fields.shift_insert(0, pk, id);
                }
            }
        }

        for relation in &mut self.relations {
            if relation.source_model.is_empty() {
                relation.source_model = name.to_owned();
            }
            if relation.foreign_key.as_deref().is_none_or(str::is_empty) {
                return Err(QuarryError::InvalidSchema(format!(
                    "relation `{name}.{}` has no foreign key",
                    relation.field_name
                )));
            }
            if relation.kind == RelationKind::ManyToMany
                && (relation.through.is_none() || relation.related_key.is_none())
            {
                return Err(QuarryError::InvalidSchema(format!(
                    "many-to-many relation `{name}.{}` needs `through` and `relatedKey`",
                    relation.field_name
                )));
            }
        }
        Ok(())
    }
}

/// The full schema description: model name to model schema.
///
/// Constructed once, validated, then shared read-only (usually behind an [`Arc`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    models: IndexMap<String, ModelSchema>,
}

impl Schema {
    /// Validates and normalizes a set of models.
    ///
    /// Synthesizes the implicit `id` primary key where none is declared and fills
    /// in each relation's `source_model`.
    pub fn new<I, S>(models: I) -> QuarryResult<Self>
    where
        I: IntoIterator<Item = (S, ModelSchema)>,
        S: Into<String>,
    {
        let mut map = IndexMap::new();
        for (name, mut model) in models {
            let name = name.into();
            model.normalize(&name)?;
            map.insert(name, model);
        }
        Ok(Self { models: map })
    }

    /// Parses and validates a JSON schema description.
    pub fn from_json(text: &str) -> QuarryResult<Self> {
        let raw: IndexMap<String, ModelSchema> = serde_json::from_str(text)?;
        Self::new(raw)
    }

    /// Wraps the schema for sharing between builders.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Looks up a model by name.
    pub fn model(&self, name: &str) -> QuarryResult<&ModelSchema> {
        self.models
            .get(name)
            .ok_or_else(|| QuarryError::ModelNotFound(name.to_owned()))
    }

    /// Looks up a model by name without failing.
    pub fn get(&self, name: &str) -> Option<&ModelSchema> {
        self.models.get(name)
    }

    /// Looks up a model by its table name.
    pub fn model_by_table(&self, table: &str) -> Option<(&str, &ModelSchema)> {
        self.models
            .iter()
            .find(|(_, model)| model.table == table)
            .map(|(name, model)| (name.as_str(), model))
    }

    /// Iterates over `(name, model)` pairs in declaration order.
    pub fn models(&self) -> impl Iterator<Item = (&str, &ModelSchema)> {
        self.models.iter().map(|(name, model)| (name.as_str(), model))
    }

    /// Returns the number of models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Returns true if the schema has no models.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
