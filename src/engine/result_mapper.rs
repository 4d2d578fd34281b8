use std::collections::HashMap;
use std::sync::Arc;
use crate::engine::query_compiler::{FetchLayout, LayoutItem, RowLayout};
use crate::expr::expression::Expression;
use crate::expr::kinds::{FromValue, SqlKind};
use crate::expr::path::EntityPath;
use crate::expr::projection::Projection;
use crate::metadata::entity::{Cardinality, EntityMeta};
use crate::metadata::record::{AssociationHandle, EntityRecord, LoadedAssociation};
use crate::metadata::registry::MetadataRegistry;
use crate::utils::error::ExecutionError;
use crate::utils::types::{DataType, QueryResult, Value};

/// One output position of a result row
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Value(Value),
    /// `None` when the entity's key is NULL, e.g. the empty side of an outer join
    Entity(Option<EntityRecord>),
}

/// A result row addressable by position, by projection expression or by label
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    projections: Arc<Vec<Projection>>,
    cells: Vec<Cell>,
}

impl Tuple {
    pub fn new(projections: Arc<Vec<Projection>>, cells: Vec<Cell>) -> Self {
        Self { projections, cells }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [Cell] {
        &mut self.cells
    }

    pub fn into_cells(self) -> Vec<Cell> {
        self.cells
    }

    pub fn labels(&self) -> Vec<String> {
        self.projections.iter().map(Projection::label).collect()
    }

    pub fn get_at(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    /// Scalar at `index`; `None` for entity cells and out of range positions
    pub fn value_at(&self, index: usize) -> Option<&Value> {
        match self.cells.get(index) {
            Some(Cell::Value(value)) => Some(value),
            _ => None,
        }
    }

    /// Value of the projection built from `expr`
    pub fn get<T: SqlKind>(&self, expr: &Expression<T>) -> Option<T::Native> {
        let index = self.projections.iter().position(|projection| match projection {
            Projection::Expr(candidate) => candidate == expr.expr(),
            Projection::Entity(_) => false,
        })?;
        self.value_at(index).and_then(T::Native::from_value)
    }

    /// Value of the first projection labelled `label`
    pub fn get_named<T: FromValue>(&self, label: &str) -> Option<T> {
        let index = self.index_of(label)?;
        self.value_at(index).and_then(T::from_value)
    }

    /// Entity projected through `path`
    pub fn entity(&self, path: &EntityPath) -> Option<&EntityRecord> {
        let index = self
            .projections
            .iter()
            .position(|projection| matches!(projection, Projection::Entity(p) if p == path))?;
        match self.cells.get(index) {
            Some(Cell::Entity(record)) => record.as_ref(),
            _ => None,
        }
    }

    pub fn entity_at(&self, index: usize) -> Option<&EntityRecord> {
        match self.cells.get(index) {
            Some(Cell::Entity(record)) => record.as_ref(),
            _ => None,
        }
    }

    fn index_of(&self, label: &str) -> Option<usize> {
        self.projections.iter().position(|p| p.label() == label)
    }

    /// Non-null value at `index`, for positional projection types
    pub fn required_at<T: FromValue>(&self, index: usize) -> Result<T, ExecutionError> {
        let value = self
            .value_at(index)
            .ok_or_else(|| ExecutionError::Mapping(format!("no scalar at position {}", index)))?;
        convert(value, &format!("position {}", index))
    }

    /// Nullable value at `index`
    pub fn optional_at<T: FromValue>(&self, index: usize) -> Result<Option<T>, ExecutionError> {
        match self.value_at(index) {
            Some(Value::Null) => Ok(None),
            Some(value) => convert(value, &format!("position {}", index)).map(Some),
            None => Err(ExecutionError::Mapping(format!("no scalar at position {}", index))),
        }
    }

    /// Non-null value labelled `label`, for projection types populated by name
    pub fn required_named<T: FromValue>(&self, label: &str) -> Result<T, ExecutionError> {
        let index = self
            .index_of(label)
            .ok_or_else(|| ExecutionError::Mapping(format!("no projection labelled '{}'", label)))?;
        self.required_at(index)
    }

    fn single(self) -> Result<Cell, ExecutionError> {
        if self.cells.len() != 1 {
            return Err(ExecutionError::Mapping(format!(
                "expected a single projection, found {}",
                self.cells.len()
            )));
        }
        self.cells
            .into_iter()
            .next()
            .ok_or_else(|| ExecutionError::Mapping("empty row".to_string()))
    }

    fn single_value(self) -> Result<Value, ExecutionError> {
        match self.single()? {
            Cell::Value(value) => Ok(value),
            Cell::Entity(_) => Err(ExecutionError::Mapping(
                "expected a scalar projection, found an entity".to_string(),
            )),
        }
    }
}

fn convert<T: FromValue>(value: &Value, location: &str) -> Result<T, ExecutionError> {
    if value.is_null() {
        return Err(ExecutionError::Mapping(format!(
            "unexpected NULL at {} for {}",
            location,
            T::TYPE_NAME
        )));
    }
    T::from_value(value).ok_or_else(|| {
        ExecutionError::Mapping(format!("cannot read {} at {} as {}", value, location, T::TYPE_NAME))
    })
}

/// Decoding of a result row into a caller-facing type
///
/// Implemented for entities, tuples, raw values and scalar types. Projection
/// types implement it by reading the tuple positionally or by label.
pub trait FromResultRow: Sized + Send + 'static {
    fn from_row(row: Tuple) -> Result<Self, ExecutionError>;
}

impl FromResultRow for Tuple {
    fn from_row(row: Tuple) -> Result<Self, ExecutionError> {
        Ok(row)
    }
}

impl FromResultRow for EntityRecord {
    fn from_row(row: Tuple) -> Result<Self, ExecutionError> {
        match row.single()? {
            Cell::Entity(Some(record)) => Ok(record),
            Cell::Entity(None) => Err(ExecutionError::Mapping("entity projection is NULL".to_string())),
            Cell::Value(_) => Err(ExecutionError::Mapping(
                "expected an entity projection, found a scalar".to_string(),
            )),
        }
    }
}

impl FromResultRow for Option<EntityRecord> {
    fn from_row(row: Tuple) -> Result<Self, ExecutionError> {
        match row.single()? {
            Cell::Entity(record) => Ok(record),
            Cell::Value(_) => Err(ExecutionError::Mapping(
                "expected an entity projection, found a scalar".to_string(),
            )),
        }
    }
}

impl FromResultRow for Value {
    fn from_row(row: Tuple) -> Result<Self, ExecutionError> {
        row.single_value()
    }
}

macro_rules! impl_from_result_row_for_scalar {
    ($($ty:ty),+) => {
        $(
            impl FromResultRow for $ty {
                fn from_row(row: Tuple) -> Result<Self, ExecutionError> {
                    convert(&row.single_value()?, "position 0")
                }
            }

            impl FromResultRow for Option<$ty> {
                fn from_row(row: Tuple) -> Result<Self, ExecutionError> {
                    match row.single_value()? {
                        Value::Null => Ok(None),
                        value => convert(&value, "position 0").map(Some),
                    }
                }
            }
        )+
    };
}

impl_from_result_row_for_scalar!(i64, f64, String, bool);

/// Turns raw rows into tuples following a compiled row layout
#[derive(Debug, Clone)]
pub struct ResultMapper {
    registry: Arc<MetadataRegistry>,
}

impl ResultMapper {
    pub fn new(registry: Arc<MetadataRegistry>) -> Self {
        Self { registry }
    }

    /// Decode every row, attach fetch-joined entities and merge to-many fetch rows per root
    pub fn map_rows(
        &self,
        result: &QueryResult,
        layout: &RowLayout,
        projections: Arc<Vec<Projection>>,
    ) -> Result<Vec<Tuple>, ExecutionError> {
        let width = layout.width();
        let merge = layout.fetches.iter().any(|f| f.to_many);
        let mut tuples: Vec<Tuple> = Vec::with_capacity(result.rows.len());
        let mut seen: HashMap<String, usize> = HashMap::new();

        for row in &result.rows {
            if row.values.len() < width {
                return Err(ExecutionError::Mapping(format!(
                    "row has {} columns, layout needs {}",
                    row.values.len(),
                    width
                )));
            }

            let tuple = self.map_row(&row.values, layout, projections.clone())?;

            if merge {
                let key = identity_key(&tuple);
                if let Some(&index) = seen.get(&key) {
                    merge_tuple(&mut tuples[index], tuple);
                    continue;
                }
                seen.insert(key, tuples.len());
            }
            tuples.push(tuple);
        }

        Ok(tuples)
    }

    fn map_row(
        &self,
        values: &[Value],
        layout: &RowLayout,
        projections: Arc<Vec<Projection>>,
    ) -> Result<Tuple, ExecutionError> {
        let mut cursor = 0;
        let mut cells = Vec::with_capacity(layout.items.len());

        for item in &layout.items {
            match item {
                LayoutItem::Scalar { .. } => cells.push(Cell::Value(values[cursor].clone())),
                LayoutItem::Entity { entity, width, .. } => {
                    let meta = self.meta(entity)?;
                    cells.push(Cell::Entity(decode_entity(meta, &values[cursor..cursor + width])));
                }
            }
            cursor += item.width();
        }

        let mut fetched: Vec<Option<EntityRecord>> = Vec::with_capacity(layout.fetches.len());
        for fetch in &layout.fetches {
            let meta = self.meta(&fetch.entity)?;
            fetched.push(decode_entity(meta, &values[cursor..cursor + fetch.width]));
            cursor += fetch.width;
        }

        // Deepest joins first, so a fetched entity is complete before it moves into its source
        for index in (0..layout.fetches.len()).rev() {
            let fetch = &layout.fetches[index];
            let target = fetched[index].take();
            let (earlier, _) = fetched.split_at_mut(index);

            let source = earlier
                .iter_mut()
                .zip(&layout.fetches)
                .rev()
                .find(|(_, candidate)| candidate.alias == fetch.source_alias)
                .and_then(|(record, _)| record.as_mut());

            let source = match source {
                Some(record) => Some(record),
                None => find_projected(&mut cells, layout, &fetch.source_alias),
            };

            if let Some(source) = source {
                attach(source, fetch, target);
            }
        }

        Ok(Tuple::new(projections, cells))
    }

    fn meta(&self, entity: &str) -> Result<&Arc<EntityMeta>, ExecutionError> {
        self.registry
            .get(entity)
            .ok_or_else(|| ExecutionError::Mapping(format!("unknown entity '{}'", entity)))
    }
}

fn find_projected<'c>(
    cells: &'c mut [Cell],
    layout: &RowLayout,
    alias: &str,
) -> Option<&'c mut EntityRecord> {
    let index = layout.items.iter().position(|item| {
        matches!(item, LayoutItem::Entity { alias: candidate, .. } if candidate == alias)
    })?;
    match cells.get_mut(index) {
        Some(Cell::Entity(Some(record))) => Some(record),
        _ => None,
    }
}

fn attach(source: &mut EntityRecord, fetch: &FetchLayout, target: Option<EntityRecord>) {
    let loaded = if fetch.to_many {
        LoadedAssociation::Many(target.into_iter().collect())
    } else {
        LoadedAssociation::One(target.map(Box::new))
    };
    source.set_association(fetch.association.clone(), AssociationHandle::Loaded(loaded));
}

/// Decode `values` laid out as key, scalar fields, foreign keys
pub fn decode_entity(meta: &EntityMeta, values: &[Value]) -> Option<EntityRecord> {
    let id = values.first()?;
    if id.is_null() {
        return None;
    }

    let mut record = EntityRecord::new(meta.name.clone()).with_id(id.clone());
    let mut cursor = 1;

    for field in meta.scalar_fields() {
        let value = values.get(cursor).cloned().unwrap_or(Value::Null);
        record.set(field.name.clone(), normalize(value, field.data_type));
        cursor += 1;
    }

    for association in &meta.associations {
        let handle = match association.cardinality {
            Cardinality::ToOne => {
                let key = values.get(cursor).cloned().unwrap_or(Value::Null);
                cursor += 1;
                if key.is_null() {
                    AssociationHandle::Loaded(LoadedAssociation::One(None))
                } else {
                    AssociationHandle::Unloaded {
                        target: association.target.clone(),
                        key,
                    }
                }
            }
            Cardinality::ToMany => AssociationHandle::Unloaded {
                target: association.target.clone(),
                key: id.clone(),
            },
        };
        record.set_association(association.name.clone(), handle);
    }

    Some(record)
}

/// Coerce driver values to the declared field type
fn normalize(value: Value, data_type: DataType) -> Value {
    match (value, data_type) {
        (Value::Integer(i), DataType::Boolean) => Value::Boolean(i != 0),
        (Value::Integer(i), DataType::Float) => Value::Float(i as f64),
        (value, _) => value,
    }
}

/// Identity of a row for to-many fetch merging: entity keys and scalar values
fn identity_key(tuple: &Tuple) -> String {
    tuple
        .cells()
        .iter()
        .map(|cell| match cell {
            Cell::Value(value) => format!("v:{:?}", value),
            Cell::Entity(Some(record)) => format!("e:{}:{:?}", record.entity(), record.id()),
            Cell::Entity(None) => "e:null".to_string(),
        })
        .collect::<Vec<_>>()
        .join("|")
}

fn merge_tuple(existing: &mut Tuple, incoming: Tuple) {
    for (current, next) in existing.cells.iter_mut().zip(incoming.cells) {
        if let (Cell::Entity(Some(current)), Cell::Entity(Some(next))) = (current, next) {
            merge_record(current, next);
        }
    }
}

/// Fold loaded associations of a duplicate row into the record seen first
fn merge_record(existing: &mut EntityRecord, incoming: EntityRecord) {
    let handles: Vec<(String, AssociationHandle)> = incoming
        .associations()
        .map(|(name, handle)| (name.clone(), handle.clone()))
        .collect();

    for (name, handle) in handles {
        match (existing.association_mut(&name), handle) {
            (
                Some(AssociationHandle::Loaded(LoadedAssociation::Many(items))),
                AssociationHandle::Loaded(LoadedAssociation::Many(new_items)),
            ) => {
                for item in new_items {
                    match items.iter_mut().find(|candidate| candidate.id() == item.id()) {
                        Some(candidate) => merge_record(candidate, item),
                        None => items.push(item),
                    }
                }
            }
            (
                Some(AssociationHandle::Loaded(LoadedAssociation::One(Some(current)))),
                AssociationHandle::Loaded(LoadedAssociation::One(Some(next))),
            ) if current.id() == next.id() => merge_record(current, *next),
            _ => {}
        }
    }
}
