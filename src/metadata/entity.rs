use serde::{Deserialize, Serialize};
use crate::utils::types::DataType;

/// Scalar field of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    pub column: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub primary_key: bool,
}

impl FieldMeta {
    /// Nullable field stored in a column of the same name
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            data_type,
            nullable: true,
            primary_key: false,
        }
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    ToOne,
    ToMany,
}

/// Default fetch strategy of an association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchStrategy {
    Lazy,
    Eager,
}

/// Association field pointing at another registered entity
///
/// A to-one association owns a foreign key column (`join_column`). A to-many
/// association is the inverse side and names the to-one association on the
/// target that owns the key (`mapped_by`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationMeta {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    pub join_column: Option<String>,
    pub mapped_by: Option<String>,
    pub fetch: FetchStrategy,
}

impl AssociationMeta {
    /// Owning to-one side, lazy by default
    pub fn to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        join_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::ToOne,
            join_column: Some(join_column.into()),
            mapped_by: None,
            fetch: FetchStrategy::Lazy,
        }
    }

    /// Inverse to-many side, lazy by default
    pub fn to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::ToMany,
            join_column: None,
            mapped_by: Some(mapped_by.into()),
            fetch: FetchStrategy::Lazy,
        }
    }

    pub fn eager(mut self) -> Self {
        self.fetch = FetchStrategy::Eager;
        self
    }

    pub fn is_to_one(&self) -> bool {
        self.cardinality == Cardinality::ToOne
    }
}

/// Hand-declared description of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMeta {
    pub name: String,
    pub table: String,
    pub fields: Vec<FieldMeta>,
    pub associations: Vec<AssociationMeta>,
}

impl EntityMeta {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            fields: Vec::new(),
            associations: Vec::new(),
        }
    }

    /// Integer primary key stored in a column of the same name
    pub fn with_id(self, name: impl Into<String>) -> Self {
        self.with_field(FieldMeta::new(name, DataType::Integer).primary_key())
    }

    /// Integer primary key stored in `column`
    pub fn with_id_column(self, name: impl Into<String>, column: impl Into<String>) -> Self {
        self.with_field(
            FieldMeta::new(name, DataType::Integer)
                .with_column(column)
                .primary_key(),
        )
    }

    pub fn with_field(mut self, field: FieldMeta) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_association(mut self, association: AssociationMeta) -> Self {
        self.associations.push(association);
        self
    }

    /// The primary key; registration guarantees exactly one
    pub fn primary_key(&self) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.primary_key)
    }

    pub fn field(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn association(&self, name: &str) -> Option<&AssociationMeta> {
        self.associations.iter().find(|a| a.name == name)
    }

    /// Fields that are not the primary key, in declaration order
    pub fn scalar_fields(&self) -> impl Iterator<Item = &FieldMeta> {
        self.fields.iter().filter(|f| !f.primary_key)
    }

    /// Owning to-one associations, in declaration order
    pub fn to_one_associations(&self) -> impl Iterator<Item = &AssociationMeta> {
        self.associations.iter().filter(|a| a.is_to_one())
    }

    /// Number of columns selected when the entity is projected: key, fields, foreign keys
    pub fn column_count(&self) -> usize {
        self.fields.len() + self.to_one_associations().count()
    }
}
