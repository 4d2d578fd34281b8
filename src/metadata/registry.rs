use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use crate::engine::dialect::Dialect;
use crate::metadata::entity::{AssociationMeta, Cardinality, EntityMeta};
use crate::metadata::record::{AssociationHandle, EntityRecord, LoadedAssociation};
use crate::utils::error::MetadataError;

/// Registered entities, looked up by name
///
/// Entities are registered once at startup and the registry is then frozen
/// into an `Arc` shared by builders, the compiler and sessions.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    entities: HashMap<String, Arc<EntityMeta>>,
    order: Vec<String>,
}

fn check_identifier(identifier: &str) -> Result<(), MetadataError> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$"))
        .as_ref()
        .map_err(|e| MetadataError::InvalidIdentifier(format!("{} ({})", identifier, e)))?;

    if pattern.is_match(identifier) {
        Ok(())
    } else {
        Err(MetadataError::InvalidIdentifier(identifier.to_string()))
    }
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity after checking its own declaration
    pub fn register(&mut self, meta: EntityMeta) -> Result<(), MetadataError> {
        if self.entities.contains_key(&meta.name) {
            return Err(MetadataError::DuplicateEntity(meta.name));
        }

        check_identifier(&meta.name)?;
        check_identifier(&meta.table)?;

        let primary_keys = meta.fields.iter().filter(|f| f.primary_key).count();
        if primary_keys != 1 {
            return Err(MetadataError::PrimaryKeyCount {
                entity: meta.name,
                found: primary_keys,
            });
        }

        let mut members = HashSet::new();
        let names = meta
            .fields
            .iter()
            .map(|f| &f.name)
            .chain(meta.associations.iter().map(|a| &a.name));
        for name in names {
            check_identifier(name)?;
            if !members.insert(name.clone()) {
                return Err(MetadataError::DuplicateMember {
                    entity: meta.name.clone(),
                    name: name.clone(),
                });
            }
        }

        for column in meta
            .fields
            .iter()
            .map(|f| &f.column)
            .chain(meta.associations.iter().filter_map(|a| a.join_column.as_ref()))
        {
            check_identifier(column)?;
        }

        self.order.push(meta.name.clone());
        self.entities.insert(meta.name.clone(), Arc::new(meta));
        Ok(())
    }

    /// Check cross-entity references: association targets and `mapped_by` back-references
    pub fn validate(&self) -> Result<(), MetadataError> {
        for meta in self.entities() {
            for association in &meta.associations {
                let target = self.entities.get(&association.target).ok_or_else(|| {
                    MetadataError::UnregisteredTarget {
                        entity: meta.name.clone(),
                        association: association.name.clone(),
                        target: association.target.clone(),
                    }
                })?;

                if association.cardinality == Cardinality::ToMany {
                    let mapped_by = association.mapped_by.clone().unwrap_or_default();
                    let points_back = target
                        .association(&mapped_by)
                        .map(|inverse| inverse.is_to_one() && inverse.target == meta.name)
                        .unwrap_or(false);

                    if !points_back {
                        return Err(MetadataError::InvalidMappedBy {
                            entity: meta.name.clone(),
                            association: association.name.clone(),
                            mapped_by,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate and make the registry immutable
    pub fn freeze(self) -> Result<Arc<Self>, MetadataError> {
        self.validate()?;
        Ok(Arc::new(self))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<EntityMeta>> {
        self.entities.get(name)
    }

    pub fn entity(&self, name: &str) -> Result<&Arc<EntityMeta>, MetadataError> {
        self.entities
            .get(name)
            .ok_or_else(|| MetadataError::UnknownEntity(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Entities in registration order
    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityMeta>> {
        self.order.iter().filter_map(|name| self.entities.get(name))
    }

    pub fn association(&self, entity: &str, name: &str) -> Result<&AssociationMeta, MetadataError> {
        self.entity(entity)?
            .association(name)
            .ok_or_else(|| MetadataError::UnknownAssociation {
                entity: entity.to_string(),
                association: name.to_string(),
            })
    }

    /// The to-many association on the target that is mapped by `entity.association`
    pub fn inverse_of(&self, entity: &str, association: &str) -> Option<&AssociationMeta> {
        let owning = self.association(entity, association).ok()?;
        let target = self.get(&owning.target)?;
        target.associations.iter().find(|candidate| {
            candidate.cardinality == Cardinality::ToMany
                && candidate.target == entity
                && candidate.mapped_by.as_deref() == Some(association)
        })
    }

    /// Point `owner.association` at `target` and keep the inverse collection in step
    ///
    /// This is the only supported way to change a to-one association on a
    /// record. The owner gets a loaded handle to a snapshot of `target`; when
    /// the target's inverse collection is loaded (or the target is new and has
    /// none yet) a snapshot of the owner is appended to it.
    pub fn link(
        &self,
        owner: &mut EntityRecord,
        association: &str,
        target: &mut EntityRecord,
    ) -> Result<(), MetadataError> {
        let meta = self.association(owner.entity(), association)?;
        if !meta.is_to_one() {
            return Err(MetadataError::NotOwningSide {
                entity: owner.entity().to_string(),
                association: association.to_string(),
            });
        }
        if meta.target != target.entity() {
            return Err(MetadataError::AssociationTargetMismatch {
                entity: owner.entity().to_string(),
                association: association.to_string(),
                expected: meta.target.clone(),
                found: target.entity().to_string(),
            });
        }

        owner.set_association(
            association,
            AssociationHandle::Loaded(LoadedAssociation::One(Some(Box::new(target.shallow_copy())))),
        );

        if let Some(inverse) = self.inverse_of(owner.entity(), association) {
            let snapshot = owner.shallow_copy();
            match target.association_mut(&inverse.name) {
                Some(AssociationHandle::Loaded(LoadedAssociation::Many(items))) => {
                    if !snapshot.id().is_null() {
                        items.retain(|item| item.id() != snapshot.id());
                    }
                    items.push(snapshot);
                }
                Some(_) => {}
                None => target.set_association(
                    inverse.name.clone(),
                    AssociationHandle::Loaded(LoadedAssociation::Many(vec![snapshot])),
                ),
            }
        }

        Ok(())
    }

    /// CREATE TABLE statements, referenced tables first
    pub fn create_table_statements(&self, dialect: Dialect) -> Vec<String> {
        let mut emitted: Vec<&str> = Vec::new();
        let mut pending: Vec<&Arc<EntityMeta>> = self.entities().collect();

        while !pending.is_empty() {
            let ready = pending.iter().position(|meta| {
                meta.to_one_associations().all(|a| {
                    a.target == meta.name || emitted.contains(&a.target.as_str())
                })
            });
            // A reference cycle falls back to registration order
            let next = pending.remove(ready.unwrap_or(0));
            emitted.push(&next.name);
        }

        emitted
            .into_iter()
            .filter_map(|name| self.get(name))
            .map(|meta| self.create_table_statement(meta, dialect))
            .collect()
    }

    fn create_table_statement(&self, meta: &EntityMeta, dialect: Dialect) -> String {
        let mut columns = Vec::new();

        for field in &meta.fields {
            if field.primary_key {
                columns.push(format!("{} {}", field.column, dialect.primary_key_definition()));
            } else {
                let mut column = format!("{} {}", field.column, dialect.column_type(field.data_type));
                if !field.nullable {
                    column.push_str(" NOT NULL");
                }
                columns.push(column);
            }
        }

        for association in meta.to_one_associations() {
            let Some(join_column) = &association.join_column else {
                continue;
            };
            let reference = self
                .get(&association.target)
                .and_then(|target| target.primary_key().map(|pk| (target.table.clone(), pk.column.clone())));

            let mut column = format!(
                "{} {}",
                join_column,
                dialect.column_type(crate::utils::types::DataType::Integer)
            );
            if let Some((table, pk)) = reference {
                column.push_str(&format!(" REFERENCES {} ({})", table, pk));
            }
            columns.push(column);
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            meta.table,
            columns.join(", ")
        )
    }
}
