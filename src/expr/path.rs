use crate::expr::expression::{AggregateFunc, Expr, Expression};
use crate::expr::kinds::{Int, SqlKind};
use crate::metadata::registry::MetadataRegistry;
use crate::utils::error::MetadataError;

/// An entity bound to a query alias, e.g. `Member` as `member`
///
/// Two paths over the same entity with different aliases are independent;
/// subqueries use this to range over a second copy of a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityPath {
    entity: String,
    alias: String,
}

impl EntityPath {
    pub fn new(entity: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            alias: alias.into(),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Typed column reference without a metadata check; the compiler validates the field
    pub fn column<T: SqlKind>(&self, field: &str) -> Expression<T> {
        Expression::from_expr(Expr::Column {
            alias: self.alias.clone(),
            field: field.to_string(),
            data_type: T::DATA_TYPE,
        })
    }

    /// Typed column reference checked against the registered field type
    pub fn field<T: SqlKind>(
        &self,
        registry: &MetadataRegistry,
        field: &str,
    ) -> Result<Expression<T>, MetadataError> {
        let meta = registry.entity(&self.entity)?;
        let declared = meta.field(field).ok_or_else(|| MetadataError::UnknownField {
            entity: self.entity.clone(),
            field: field.to_string(),
        })?;

        if declared.data_type != T::DATA_TYPE {
            return Err(MetadataError::FieldTypeMismatch {
                entity: self.entity.clone(),
                field: field.to_string(),
                declared: declared.data_type.to_string(),
                requested: T::DATA_TYPE.to_string(),
            });
        }

        Ok(self.column(field))
    }

    /// Association edge starting at this alias, used by joins
    pub fn association(&self, name: &str) -> AssociationPath {
        AssociationPath {
            source_alias: self.alias.clone(),
            source_entity: self.entity.clone(),
            name: name.to_string(),
        }
    }

    /// The entity as a whole
    pub fn as_expr(&self) -> Expr {
        Expr::Entity {
            alias: self.alias.clone(),
            entity: self.entity.clone(),
        }
    }

    /// `COUNT(alias.pk)`
    pub fn count(&self) -> Expression<Int> {
        Expression::from_expr(Expr::aggregate(AggregateFunc::Count, self.as_expr(), false))
    }

    pub fn count_distinct(&self) -> Expression<Int> {
        Expression::from_expr(Expr::aggregate(AggregateFunc::Count, self.as_expr(), true))
    }
}

impl AsRef<EntityPath> for EntityPath {
    fn as_ref(&self) -> &EntityPath {
        self
    }
}

/// Named association reached from a source alias
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssociationPath {
    pub source_alias: String,
    pub source_entity: String,
    pub name: String,
}

impl AssociationPath {
    pub fn describe(&self) -> String {
        format!("{}.{}", self.source_alias, self.name)
    }
}
