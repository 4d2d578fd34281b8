use std::collections::BTreeMap;
use std::fmt;
use crate::expr::kinds::FromValue;
use crate::utils::types::Value;

/// Materialized state of an association
#[derive(Debug, Clone, PartialEq)]
pub enum LoadedAssociation {
    One(Option<Box<EntityRecord>>),
    Many(Vec<EntityRecord>),
}

/// Explicit two-state association handle
///
/// `Unloaded` carries what a second query needs: the target entity and the key
/// to look it up by (the foreign key for to-one, the owner's id for to-many).
#[derive(Debug, Clone, PartialEq)]
pub enum AssociationHandle {
    Unloaded { target: String, key: Value },
    Loaded(LoadedAssociation),
}

impl AssociationHandle {
    pub fn is_loaded(&self) -> bool {
        matches!(self, AssociationHandle::Loaded(_))
    }
}

/// A row decoded into an entity instance
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    entity: String,
    id: Value,
    values: Vec<(String, Value)>,
    associations: BTreeMap<String, AssociationHandle>,
}

impl EntityRecord {
    /// New transient record without an identifier
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            id: Value::Null,
            values: Vec::new(),
            associations: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_value(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn id(&self) -> &Value {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<Value>) {
        self.id = id.into();
    }

    /// Scalar value of `field`; `None` when the field was never set
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.iter().find(|(name, _)| name == field).map(|(_, v)| v)
    }

    /// Typed scalar value; `None` for missing, null or differently typed values
    pub fn get_as<T: FromValue>(&self, field: &str) -> Option<T> {
        self.get(field).and_then(T::from_value)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        match self.values.iter_mut().find(|(name, _)| *name == field) {
            Some(slot) => slot.1 = value,
            None => self.values.push((field, value)),
        }
    }

    /// Scalar values in the order they were set
    pub fn values(&self) -> &[(String, Value)] {
        &self.values
    }

    pub fn association(&self, name: &str) -> Option<&AssociationHandle> {
        self.associations.get(name)
    }

    pub fn association_mut(&mut self, name: &str) -> Option<&mut AssociationHandle> {
        self.associations.get_mut(name)
    }

    pub fn set_association(&mut self, name: impl Into<String>, handle: AssociationHandle) {
        self.associations.insert(name.into(), handle);
    }

    pub fn associations(&self) -> impl Iterator<Item = (&String, &AssociationHandle)> {
        self.associations.iter()
    }

    pub fn is_loaded(&self, association: &str) -> bool {
        self.associations
            .get(association)
            .map(AssociationHandle::is_loaded)
            .unwrap_or(false)
    }

    /// Loaded to-one target; `None` when unloaded, absent or null
    pub fn to_one(&self, association: &str) -> Option<&EntityRecord> {
        match self.associations.get(association) {
            Some(AssociationHandle::Loaded(LoadedAssociation::One(Some(target)))) => Some(target),
            _ => None,
        }
    }

    /// Loaded to-many collection; `None` when unloaded or absent
    pub fn to_many(&self, association: &str) -> Option<&[EntityRecord]> {
        match self.associations.get(association) {
            Some(AssociationHandle::Loaded(LoadedAssociation::Many(items))) => Some(items),
            _ => None,
        }
    }

    /// Key a to-one association currently points at
    pub fn association_key(&self, association: &str) -> Value {
        match self.associations.get(association) {
            Some(AssociationHandle::Unloaded { key, .. }) => key.clone(),
            Some(AssociationHandle::Loaded(LoadedAssociation::One(Some(target)))) => {
                target.id.clone()
            }
            _ => Value::Null,
        }
    }

    /// Copy of identifier and scalar values without association handles
    pub fn shallow_copy(&self) -> EntityRecord {
        Self {
            entity: self.entity.clone(),
            id: self.id.clone(),
            values: self.values.clone(),
            associations: BTreeMap::new(),
        }
    }
}

impl fmt::Display for EntityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(id={}", self.entity, self.id)?;
        for (name, value) in &self.values {
            write!(f, ", {}={}", name, value)?;
        }
        write!(f, ")")
    }
}
