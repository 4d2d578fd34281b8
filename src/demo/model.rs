use std::ops::Deref;
use std::sync::Arc;
use crate::{
    engine::{result_mapper::{FromResultRow, Tuple}, session::Session},
    expr::{
        expression::Expression,
        kinds::{Int, Text},
        path::{AssociationPath, EntityPath},
        projection::{IntoProjections, Projection},
    },
    metadata::{
        entity::{AssociationMeta, EntityMeta, FieldMeta},
        record::EntityRecord,
        registry::MetadataRegistry,
    },
    utils::{
        error::{ExecutionError, RelqResult},
        types::DataType,
    },
};

pub const MEMBER: &str = "Member";
pub const TEAM: &str = "Team";

/// Member/Team model: members belong to at most one team
pub fn registry() -> RelqResult<Arc<MetadataRegistry>> {
    let mut registry = MetadataRegistry::new();
    registry.register(
        EntityMeta::new(MEMBER, "member")
            .with_id_column("id", "member_id")
            .with_field(FieldMeta::new("username", DataType::Text))
            .with_field(FieldMeta::new("age", DataType::Integer).not_null())
            .with_association(AssociationMeta::to_one("team", TEAM, "team_id")),
    )?;
    registry.register(
        EntityMeta::new(TEAM, "team")
            .with_id_column("id", "team_id")
            .with_field(FieldMeta::new("name", DataType::Text))
            .with_association(AssociationMeta::to_many("members", MEMBER, "team")),
    )?;
    Ok(registry.freeze()?)
}

macro_rules! entity_path_wrapper {
    ($name:ident) => {
        impl Deref for $name {
            type Target = EntityPath;

            fn deref(&self) -> &EntityPath {
                &self.path
            }
        }

        impl AsRef<EntityPath> for $name {
            fn as_ref(&self) -> &EntityPath {
                &self.path
            }
        }

        impl From<&$name> for Projection {
            fn from(path: &$name) -> Self {
                Projection::Entity(path.path.clone())
            }
        }

        impl IntoProjections for &$name {
            fn into_projections(self) -> Vec<Projection> {
                vec![Projection::from(self)]
            }
        }
    };
}

/// Typed paths over `Member`
#[derive(Debug, Clone, PartialEq)]
pub struct MemberPath {
    path: EntityPath,
}

impl MemberPath {
    pub fn new(alias: &str) -> Self {
        Self {
            path: EntityPath::new(MEMBER, alias),
        }
    }

    pub fn id(&self) -> Expression<Int> {
        self.path.column("id")
    }

    pub fn username(&self) -> Expression<Text> {
        self.path.column("username")
    }

    pub fn age(&self) -> Expression<Int> {
        self.path.column("age")
    }

    pub fn team(&self) -> AssociationPath {
        self.path.association("team")
    }
}

entity_path_wrapper!(MemberPath);

/// Typed paths over `Team`
#[derive(Debug, Clone, PartialEq)]
pub struct TeamPath {
    path: EntityPath,
}

impl TeamPath {
    pub fn new(alias: &str) -> Self {
        Self {
            path: EntityPath::new(TEAM, alias),
        }
    }

    pub fn id(&self) -> Expression<Int> {
        self.path.column("id")
    }

    pub fn name(&self) -> Expression<Text> {
        self.path.column("name")
    }

    pub fn members(&self) -> AssociationPath {
        self.path.association("members")
    }
}

entity_path_wrapper!(TeamPath);

/// Flat projection of a member, filled by position
#[derive(Debug, Clone, PartialEq)]
pub struct MemberDto {
    pub username: Option<String>,
    pub age: i64,
}

impl FromResultRow for MemberDto {
    fn from_row(row: Tuple) -> Result<Self, ExecutionError> {
        Ok(Self {
            username: row.optional_at(0)?,
            age: row.required_at(1)?,
        })
    }
}

/// Same shape, filled by projection label
#[derive(Debug, Clone, PartialEq)]
pub struct UserDto {
    pub name: String,
    pub age: i64,
}

impl FromResultRow for UserDto {
    fn from_row(row: Tuple) -> Result<Self, ExecutionError> {
        Ok(Self {
            name: row.required_named("username")?,
            age: row.required_named("age")?,
        })
    }
}

pub fn new_team(name: &str) -> EntityRecord {
    EntityRecord::new(TEAM).with_value("name", name)
}

pub fn new_member(username: Option<&str>, age: i64) -> EntityRecord {
    EntityRecord::new(MEMBER)
        .with_value("username", username)
        .with_value("age", age)
}

/// Persist a new member of `team`, or of no team
pub async fn add_member(
    session: &Session,
    username: Option<&str>,
    age: i64,
    team: Option<&mut EntityRecord>,
) -> RelqResult<EntityRecord> {
    let mut member = new_member(username, age);
    if let Some(team) = team {
        session.registry().link(&mut member, "team", team)?;
    }
    session.persist(&mut member).await?;
    Ok(member)
}

/// Create the schema and the standard fixture: teamA with member1 (10) and
/// member2 (20), teamB with member3 (30) and member4 (40)
pub async fn seed(session: &Session) -> RelqResult<(EntityRecord, EntityRecord)> {
    session.create_schema().await?;

    let mut team_a = new_team("teamA");
    let mut team_b = new_team("teamB");
    session.persist(&mut team_a).await?;
    session.persist(&mut team_b).await?;

    add_member(session, Some("member1"), 10, Some(&mut team_a)).await?;
    add_member(session, Some("member2"), 20, Some(&mut team_a)).await?;
    add_member(session, Some("member3"), 30, Some(&mut team_b)).await?;
    add_member(session, Some("member4"), 40, Some(&mut team_b)).await?;

    Ok((team_a, team_b))
}
