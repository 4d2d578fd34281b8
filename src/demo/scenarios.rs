use clap::ValueEnum;
use crate::{
    demo::model::{MemberPath, TeamPath},
    engine::{
        query_builder::{Query, QueryFactory, SubQuery},
        dialect::Dialect,
        query_compiler::{CompiledQuery, QueryCompiler},
        result_mapper::{Cell, Tuple},
        session::Session,
    },
    expr::{case_builder::CaseBuilder, expression::Expressions},
    metadata::record::EntityRecord,
    utils::{error::RelqResult, types::Value},
};

/// Member/team queries runnable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Lookup by username
    Basic,
    /// AND-ed predicates with BETWEEN
    Search,
    /// Age descending, username ascending with NULLs last
    Sort,
    /// Second page of two ordered by username
    Paging,
    /// COUNT, SUM, AVG, MAX and MIN over all members
    Aggregation,
    /// Average age per team
    GroupBy,
    /// Members of teamA through an inner join
    Join,
    /// Outer join restricted with ON
    JoinOn,
    /// Members with their team loaded in the same statement
    FetchJoin,
    /// Cross join of members and teams filtered on unrelated columns
    ThetaJoin,
    /// Oldest member through a scalar subquery
    Subquery,
    /// Simple and searched CASE
    Case,
    /// Constants and string concatenation
    Concat,
}

impl Scenario {
    pub fn all() -> &'static [Scenario] {
        &[
            Scenario::Basic,
            Scenario::Search,
            Scenario::Sort,
            Scenario::Paging,
            Scenario::Aggregation,
            Scenario::GroupBy,
            Scenario::Join,
            Scenario::JoinOn,
            Scenario::FetchJoin,
            Scenario::ThetaJoin,
            Scenario::Subquery,
            Scenario::Case,
            Scenario::Concat,
        ]
    }

    pub fn name(&self) -> String {
        self.to_possible_value()
            .map(|value| value.get_name().to_string())
            .unwrap_or_else(|| format!("{:?}", self))
    }
}

/// Rows produced by one scenario
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Total of the unpaged query, for paged scenarios
    pub total: Option<i64>,
}

fn build(factory: &QueryFactory, scenario: Scenario) -> RelqResult<Query<Tuple>> {
    let member = MemberPath::new("member");
    let team = TeamPath::new("team");
    let member_sub = MemberPath::new("memberSub");

    let query = match scenario {
        Scenario::Basic => factory
            .select(&member)
            .from(&member)
            .filter(member.username().eq("member1")),
        Scenario::Search => factory
            .select(&member)
            .from(&member)
            .filter(member.username().eq("member1").and(member.age().between(10, 30))),
        Scenario::Sort => factory
            .select(&member)
            .from(&member)
            .order_by([member.age().desc(), member.username().asc().nulls_last()]),
        Scenario::Paging => factory
            .select(&member)
            .from(&member)
            .order_by(member.username().desc())
            .offset(1)
            .limit(2),
        Scenario::Aggregation => factory
            .select((
                member.count(),
                member.age().sum(),
                member.age().avg(),
                member.age().max(),
                member.age().min(),
            ))
            .from(&member),
        Scenario::GroupBy => factory
            .select((team.name(), member.age().avg()))
            .from(&member)
            .join(member.team(), &team)
            .group_by(team.name())
            .order_by(team.name().asc()),
        Scenario::Join => factory
            .select(&member)
            .from(&member)
            .join(member.team(), &team)
            .filter(team.name().eq("teamA"))
            .order_by(member.username().asc()),
        Scenario::JoinOn => factory
            .select((&member, &team))
            .from(&member)
            .left_join(member.team(), &team)
            .on(team.name().eq("teamA"))?
            .order_by(member.username().asc()),
        Scenario::FetchJoin => factory
            .select(&member)
            .from(&member)
            .join(member.team(), &team)
            .fetch_join()?
            .order_by(member.username().asc()),
        Scenario::ThetaJoin => factory
            .select(&member)
            .from((&member, &team))
            .filter(member.username().eq(team.name())),
        Scenario::Subquery => factory
            .select(&member)
            .from(&member)
            .filter(member.age().eq(SubQuery::select(member_sub.age().max()).from(&member_sub))),
        Scenario::Case => factory
            .select((
                member.username(),
                member.age().when(10).then("ten").when(20).then("twenty").otherwise("other"),
                CaseBuilder::new()
                    .when(member.age().between(0, 20))
                    .then("student")
                    .otherwise("adult"),
            ))
            .from(&member)
            .order_by(member.username().asc()),
        Scenario::Concat => factory
            .select((
                member.username().concat("_").concat(member.age().string_value()),
                Expressions::constant("A"),
            ))
            .from(&member)
            .filter(member.username().eq("member1")),
    };
    Ok(query)
}

/// Statements `scenario` compiles to in `dialect`, without executing them
pub fn explain(session: &Session, scenario: Scenario, dialect: Dialect) -> RelqResult<Vec<CompiledQuery>> {
    let query = build(&session.query(), scenario)?;
    let compiler = QueryCompiler::new(session.registry().clone(), dialect);
    let mut compiled = vec![compiler.compile(query.spec())?];
    if scenario == Scenario::Paging {
        compiled.push(compiler.compile_count(query.spec())?);
    }
    Ok(compiled)
}

/// Run `scenario` against a seeded session
pub async fn run(session: &Session, scenario: Scenario) -> RelqResult<ScenarioReport> {
    let query = build(&session.query(), scenario)?;

    let (tuples, total) = if scenario == Scenario::Paging {
        let page = query.fetch_results().await?;
        (page.results, Some(page.total))
    } else {
        (query.fetch().await?, None)
    };

    let columns = query
        .spec()
        .projections
        .iter()
        .map(|projection| projection.label())
        .collect();
    let rows = tuples.into_iter().map(tuple_values).collect();

    Ok(ScenarioReport {
        scenario,
        columns,
        rows,
        total,
    })
}

fn tuple_values(tuple: Tuple) -> Vec<Value> {
    tuple
        .into_cells()
        .into_iter()
        .map(|cell| match cell {
            Cell::Value(value) => value,
            Cell::Entity(Some(record)) => Value::Text(describe(&record)),
            Cell::Entity(None) => Value::Null,
        })
        .collect()
}

/// Record text with loaded to-one targets appended
fn describe(record: &EntityRecord) -> String {
    let mut text = record.to_string();
    for (name, _) in record.associations() {
        if let Some(target) = record.to_one(name) {
            text.push_str(&format!(" {}={}", name, target));
        }
    }
    text
}
