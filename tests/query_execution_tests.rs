use relq_engine::demo::{add_member, registry, seed, MemberDto, MemberPath, TeamPath, UserDto};
use relq_engine::{
    CaseBuilder, EntityRecord, Expressions, Predicate, RelqError, RelqResult, Session,
    SqliteContext, SubQuery, Tuple, Value,
};
use std::sync::Arc;

async fn seeded_session() -> RelqResult<Session> {
    let context = Arc::new(SqliteContext::open_in_memory()?);
    let session = Session::new(registry()?, context);
    seed(&session).await?;
    Ok(session)
}

fn usernames(records: &[EntityRecord]) -> Vec<Option<String>> {
    records.iter().map(|r| r.get_as::<String>("username")).collect()
}

/// Lookup by a unique column returns the single matching member
#[tokio::test]
async fn test_basic_lookup() -> RelqResult<()> {
    let session = seeded_session().await?;
    let member = MemberPath::new("member");

    let found: Option<EntityRecord> = session
        .query()
        .select(&member)
        .from(&member)
        .filter(member.username().eq("member1"))
        .fetch_one()
        .await?;

    let found = found.expect("member1 exists");
    assert_eq!(found.get_as::<String>("username"), Some("member1".to_string()));
    assert_eq!(found.get_as::<i64>("age"), Some(10));
    Ok(())
}

/// Chained AND, varargs filters and repeated filter calls select the same rows
#[tokio::test]
async fn test_search_forms_agree() -> RelqResult<()> {
    let session = seeded_session().await?;
    let member = MemberPath::new("member");
    let base = session.query().select_from(&member);

    let chained = base
        .clone()
        .filter(member.username().eq("member1").and(member.age().eq(10)))
        .fetch()
        .await?;
    let listed = base
        .clone()
        .filter_all([member.username().eq("member1"), member.age().eq(10)])
        .fetch()
        .await?;
    let repeated = base
        .filter(member.username().eq("member1"))
        .filter(member.age().eq(10))
        .fetch()
        .await?;

    assert_eq!(chained.len(), 1);
    assert_eq!(chained, listed);
    assert_eq!(chained, repeated);
    Ok(())
}

/// Predicates assembled from optional inputs; absent inputs add nothing
#[tokio::test]
async fn test_dynamic_predicates() -> RelqResult<()> {
    let session = seeded_session().await?;
    let member = MemberPath::new("member");

    let search = |username: Option<&str>, age: Option<i64>| {
        let mut predicates: Vec<Predicate> = Vec::new();
        if let Some(username) = username {
            predicates.push(member.username().eq(username));
        }
        if let Some(age) = age {
            predicates.push(member.age().eq(age));
        }
        session.query().select_from(&member).filter_all(predicates)
    };

    assert_eq!(search(Some("member1"), Some(10)).fetch().await?.len(), 1);
    assert_eq!(search(None, Some(30)).fetch().await?.len(), 1);
    assert_eq!(search(None, None).fetch().await?.len(), 4);
    Ok(())
}

/// Descending age, then username ascending with NULLs last
#[tokio::test]
async fn test_sort_with_nulls_last() -> RelqResult<()> {
    let session = seeded_session().await?;
    add_member(&session, None, 100, None).await?;
    add_member(&session, Some("member5"), 100, None).await?;
    add_member(&session, Some("member6"), 100, None).await?;
    let member = MemberPath::new("member");

    let rows: Vec<EntityRecord> = session
        .query()
        .select_from(&member)
        .filter(member.age().in_list([10, 100]))
        .order_by([member.age().desc(), member.username().asc().nulls_last()])
        .fetch()
        .await?;

    assert_eq!(
        usernames(&rows),
        vec![
            Some("member5".to_string()),
            Some("member6".to_string()),
            None,
            Some("member1".to_string()),
        ]
    );
    Ok(())
}

/// NULLs stay last when the key sorts descending
#[tokio::test]
async fn test_sort_descending_with_nulls_last() -> RelqResult<()> {
    let session = seeded_session().await?;
    add_member(&session, None, 100, None).await?;
    add_member(&session, Some("member5"), 100, None).await?;
    add_member(&session, Some("member6"), 100, None).await?;
    let member = MemberPath::new("member");

    let rows: Vec<EntityRecord> = session
        .query()
        .select_from(&member)
        .filter(member.age().eq(100))
        .order_by([member.username().desc().nulls_last()])
        .fetch()
        .await?;

    assert_eq!(
        usernames(&rows),
        vec![Some("member6".to_string()), Some("member5".to_string()), None]
    );
    Ok(())
}

/// Offset and limit apply to rows; the total ignores them
#[tokio::test]
async fn test_paging_with_total() -> RelqResult<()> {
    let session = seeded_session().await?;
    let member = MemberPath::new("member");

    let page = session
        .query()
        .select_from(&member)
        .order_by(member.username().desc())
        .offset(1)
        .limit(2)
        .fetch_results()
        .await?;

    assert_eq!(page.total, 4);
    assert_eq!(page.limit, Some(2));
    assert_eq!(page.offset, Some(1));
    assert_eq!(
        usernames(&page.results),
        vec![Some("member3".to_string()), Some("member2".to_string())]
    );
    Ok(())
}

/// A page past the end is empty but still reports the total
#[tokio::test]
async fn test_paging_past_end() -> RelqResult<()> {
    let session = seeded_session().await?;
    let member = MemberPath::new("member");

    let page = session.query().select_from(&member).offset(10).limit(2).fetch_results().await?;

    assert!(page.is_empty());
    assert_eq!(page.total, 4);
    Ok(())
}

/// COUNT, SUM, AVG, MAX and MIN in one row
#[tokio::test]
async fn test_aggregation() -> RelqResult<()> {
    let session = seeded_session().await?;
    let member = MemberPath::new("member");
    let count = member.count();
    let sum = member.age().sum();
    let avg = member.age().avg();
    let max = member.age().max();
    let min = member.age().min();

    let rows: Vec<Tuple> = session
        .query()
        .select((&count, &sum, &avg, &max, &min))
        .from(&member)
        .fetch()
        .await?;

    let row = &rows[0];
    assert_eq!(row.get(&count), Some(4));
    assert_eq!(row.get(&sum), Some(100));
    assert_eq!(row.get(&avg), Some(25.0));
    assert_eq!(row.get(&max), Some(40));
    assert_eq!(row.get(&min), Some(10));
    Ok(())
}

/// Average age per team through an association join
#[tokio::test]
async fn test_group_by_team() -> RelqResult<()> {
    let session = seeded_session().await?;
    let member = MemberPath::new("member");
    let team = TeamPath::new("team");
    let avg = member.age().avg();

    let rows: Vec<Tuple> = session
        .query()
        .select((team.name(), &avg))
        .from(&member)
        .join(member.team(), &team)
        .group_by(team.name())
        .order_by(team.name().asc())
        .fetch()
        .await?;

    let averages: Vec<(Option<String>, Option<f64>)> = rows
        .iter()
        .map(|row| (row.get(&team.name()), row.get(&avg)))
        .collect();
    assert_eq!(
        averages,
        vec![
            (Some("teamA".to_string()), Some(15.0)),
            (Some("teamB".to_string()), Some(35.0)),
        ]
    );
    Ok(())
}

/// HAVING keeps only the groups whose aggregate passes
#[tokio::test]
async fn test_having_filters_groups() -> RelqResult<()> {
    let session = seeded_session().await?;
    let member = MemberPath::new("member");
    let team = TeamPath::new("team");

    let names: Vec<String> = session
        .query()
        .select(team.name())
        .from(&member)
        .join(member.team(), &team)
        .group_by(team.name())
        .having(member.age().avg().gt(20))
        .fetch()
        .await?;

    assert_eq!(names, vec!["teamB"]);
    Ok(())
}

/// Inner join through the association filtered on the joined side
#[tokio::test]
async fn test_join_filter_on_target() -> RelqResult<()> {
    let session = seeded_session().await?;
    let member = MemberPath::new("member");
    let team = TeamPath::new("team");

    let rows: Vec<EntityRecord> = session
        .query()
        .select_from(&member)
        .join(member.team(), &team)
        .filter(team.name().eq("teamA"))
        .order_by(member.username().asc())
        .fetch()
        .await?;

    assert_eq!(
        usernames(&rows),
        vec![Some("member1".to_string()), Some("member2".to_string())]
    );
    Ok(())
}

/// Left join restricted with ON keeps members whose team does not match
#[tokio::test]
async fn test_left_join_on() -> RelqResult<()> {
    let session = seeded_session().await?;
    let member = MemberPath::new("member");
    let team = TeamPath::new("team");

    let rows: Vec<Tuple> = session
        .query()
        .select((&member, &team))
        .from(&member)
        .left_join(member.team(), &team)
        .on(team.name().eq("teamA"))?
        .order_by(member.username().asc())
        .fetch()
        .await?;

    assert_eq!(rows.len(), 4);
    let teams: Vec<Option<String>> = rows
        .iter()
        .map(|row| row.entity(&team).and_then(|t| t.get_as::<String>("name")))
        .collect();
    assert_eq!(
        teams,
        vec![Some("teamA".to_string()), Some("teamA".to_string()), None, None]
    );
    Ok(())
}

/// Cross join matched on unrelated columns
#[tokio::test]
async fn test_theta_join() -> RelqResult<()> {
    let session = seeded_session().await?;
    add_member(&session, Some("teamA"), 0, None).await?;
    add_member(&session, Some("teamB"), 0, None).await?;
    add_member(&session, Some("teamC"), 0, None).await?;
    let member = MemberPath::new("member");
    let team = TeamPath::new("team");

    let rows: Vec<EntityRecord> = session
        .query()
        .select(&member)
        .from((&member, &team))
        .filter(member.username().eq(team.name()))
        .order_by(member.username().asc())
        .fetch()
        .await?;

    assert_eq!(
        usernames(&rows),
        vec![Some("teamA".to_string()), Some("teamB".to_string())]
    );
    Ok(())
}

/// Entity join on unrelated columns needs an explicit ON
#[tokio::test]
async fn test_unrelated_entity_left_join() -> RelqResult<()> {
    let session = seeded_session().await?;
    add_member(&session, Some("teamA"), 0, None).await?;
    let member = MemberPath::new("member");
    let team = TeamPath::new("team");

    let rows: Vec<Tuple> = session
        .query()
        .select((&member, &team))
        .from(&member)
        .left_join_entity(&team)
        .on(member.username().eq(team.name()))?
        .fetch()
        .await?;

    assert_eq!(rows.len(), 5);
    let matched = rows.iter().filter(|row| row.entity(&team).is_some()).count();
    assert_eq!(matched, 1);
    Ok(())
}

/// Scalar subqueries in WHERE over a second alias of the same table
#[tokio::test]
async fn test_subqueries_in_where() -> RelqResult<()> {
    let session = seeded_session().await?;
    let member = MemberPath::new("member");
    let member_sub = MemberPath::new("memberSub");

    let oldest: Vec<i64> = session
        .query()
        .select(member.age())
        .from(&member)
        .filter(member.age().eq(SubQuery::select(member_sub.age().max()).from(&member_sub)))
        .fetch()
        .await?;
    assert_eq!(oldest, vec![40]);

    let above_average: Vec<i64> = session
        .query()
        .select(member.age())
        .from(&member)
        .filter(member.age().goe(SubQuery::select(member_sub.age().avg()).from(&member_sub)))
        .order_by(member.age().asc())
        .fetch()
        .await?;
    assert_eq!(above_average, vec![30, 40]);

    let older_than_ten: Vec<i64> = session
        .query()
        .select(member.age())
        .from(&member)
        .filter(member.age().in_subquery(
            SubQuery::select(member_sub.age())
                .from(&member_sub)
                .filter(member_sub.age().gt(10)),
        ))
        .order_by(member.age().asc())
        .fetch()
        .await?;
    assert_eq!(older_than_ten, vec![20, 30, 40]);
    Ok(())
}

/// Scalar subquery in the select list
#[tokio::test]
async fn test_subquery_in_select() -> RelqResult<()> {
    let session = seeded_session().await?;
    let member = MemberPath::new("member");
    let member_sub = MemberPath::new("memberSub");
    let average = SubQuery::select(member_sub.age().avg()).from(&member_sub);

    let rows: Vec<Tuple> = session
        .query()
        .select((member.username(), average))
        .from(&member)
        .order_by(member.username().asc())
        .fetch()
        .await?;

    assert_eq!(rows.len(), 4);
    for row in &rows {
        assert_eq!(row.value_at(1), Some(&Value::Float(25.0)));
    }
    Ok(())
}

/// Simple and searched CASE in the projection
#[tokio::test]
async fn test_case_expressions() -> RelqResult<()> {
    let session = seeded_session().await?;
    let member = MemberPath::new("member");

    let simple: Vec<String> = session
        .query()
        .select(member.age().when(10).then("ten").when(20).then("twenty").otherwise("other"))
        .from(&member)
        .order_by(member.username().asc())
        .fetch()
        .await?;
    assert_eq!(simple, vec!["ten", "twenty", "other", "other"]);

    let searched: Vec<String> = session
        .query()
        .select(
            CaseBuilder::new()
                .when(member.age().between(0, 20))
                .then("0~20")
                .when(member.age().between(21, 30))
                .then("21~30")
                .otherwise("etc"),
        )
        .from(&member)
        .order_by(member.username().asc())
        .fetch()
        .await?;
    assert_eq!(searched, vec!["0~20", "0~20", "21~30", "etc"]);
    Ok(())
}

/// Constants and concatenation with an explicit text conversion
#[tokio::test]
async fn test_constant_and_concat() -> RelqResult<()> {
    let session = seeded_session().await?;
    let member = MemberPath::new("member");
    let label = member.username().concat("_").concat(member.age().string_value());
    let constant = Expressions::constant("A");

    let row: Option<Tuple> = session
        .query()
        .select((&label, &constant))
        .from(&member)
        .filter(member.username().eq("member1"))
        .fetch_one()
        .await?;

    let row = row.expect("member1 exists");
    assert_eq!(row.get(&label), Some("member1_10".to_string()));
    assert_eq!(row.get(&constant), Some("A".to_string()));
    Ok(())
}

/// Positional and label-based DTO projections
#[tokio::test]
async fn test_dto_projections() -> RelqResult<()> {
    let session = seeded_session().await?;
    let member = MemberPath::new("member");

    let positional: Vec<MemberDto> = session
        .query()
        .select((member.username(), member.age()))
        .from(&member)
        .order_by(member.age().asc())
        .limit(1)
        .fetch()
        .await?;
    assert_eq!(
        positional,
        vec![MemberDto {
            username: Some("member1".to_string()),
            age: 10
        }]
    );

    let by_label: Vec<UserDto> = session
        .query()
        .select((member.username(), member.age()))
        .from(&member)
        .order_by(member.age().desc())
        .fetch()
        .await?;
    assert_eq!(by_label[0].name, "member4");
    assert_eq!(by_label[0].age, 40);
    Ok(())
}

/// fetch_one: zero rows is None, more than one is an error
#[tokio::test]
async fn test_fetch_one_cardinality() -> RelqResult<()> {
    let session = seeded_session().await?;
    let member = MemberPath::new("member");

    let none = session
        .query()
        .select_from(&member)
        .filter(member.username().eq("nobody"))
        .fetch_one()
        .await?;
    assert!(none.is_none());

    match session.query().select_from(&member).fetch_one().await {
        Err(RelqError::TooManyResults { count }) => assert_eq!(count, 4),
        _ => panic!("Expected TooManyResults error"),
    }
    Ok(())
}

/// fetch_first takes the first row in query order
#[tokio::test]
async fn test_fetch_first() -> RelqResult<()> {
    let session = seeded_session().await?;
    let member = MemberPath::new("member");
    let query = session
        .query()
        .select_from(&member)
        .order_by(member.age().desc());

    let first = query.fetch_first().await?.expect("members exist");
    assert_eq!(first.get_as::<String>("username"), Some("member4".to_string()));
    assert_eq!(query.fetch_count().await?, 4);
    assert!(query.spec().limit.is_none());
    Ok(())
}

/// fetch_first never widens an explicit smaller limit
#[tokio::test]
async fn test_fetch_first_keeps_zero_limit() -> RelqResult<()> {
    let session = seeded_session().await?;
    let member = MemberPath::new("member");
    let query = session.query().select_from(&member).limit(0);

    assert!(query.fetch().await?.is_empty());
    assert!(query.fetch_first().await?.is_none());
    Ok(())
}

/// Text patterns escape wildcards in the literal part
#[tokio::test]
async fn test_like_predicates() -> RelqResult<()> {
    let session = seeded_session().await?;
    add_member(&session, Some("50%_off"), 1, None).await?;
    let member = MemberPath::new("member");

    let prefixed = session
        .query()
        .select_from(&member)
        .filter(member.username().starts_with("member"))
        .fetch_count()
        .await?;
    assert_eq!(prefixed, 4);

    let literal: Vec<String> = session
        .query()
        .select(member.username())
        .from(&member)
        .filter(member.username().contains("%_"))
        .fetch()
        .await?;
    assert_eq!(literal, vec!["50%_off"]);
    Ok(())
}

/// DISTINCT collapses duplicate projections
#[tokio::test]
async fn test_distinct() -> RelqResult<()> {
    let session = seeded_session().await?;
    let member = MemberPath::new("member");
    let team = TeamPath::new("team");

    let names: Vec<String> = session
        .query()
        .select(team.name())
        .from(&member)
        .join(member.team(), &team)
        .distinct()
        .order_by(team.name().asc())
        .fetch()
        .await?;

    assert_eq!(names, vec!["teamA", "teamB"]);
    Ok(())
}
