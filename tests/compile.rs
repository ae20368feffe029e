//! End-to-end compile scenarios: fixed pipelines against fixed catalogs,
//! asserted against the literal SQL text they must produce.

use relq::ir::build::*;
use relq::{Catalog, Dialect, SerializeOptions, Table};

fn person_catalog() -> Catalog {
    Catalog::new(
        [Table::new("person", ["person_id", "year_of_birth", "gender_concept_id", "location_id"]).unwrap()],
        Dialect::sqlite(),
    )
    .unwrap()
}

#[test]
fn where_then_select_projects_requested_columns() {
    let catalog = person_catalog();
    let query = select(
        r#where(from("person"), get("year_of_birth").eq(lit(1980))),
        [get("person_id")],
    )
    .unwrap();

    let sql = catalog.compile(&query.0).unwrap();
    assert_eq!(
        sql.text,
        r#"SELECT "person_1"."person_id" FROM "person" AS "person_1" WHERE ("person_1"."year_of_birth" = 1980)"#
    );
    assert!(sql.vars.is_empty());
}

#[test]
fn where_after_order_limit_closes_into_a_subquery() {
    let catalog = person_catalog();
    let query = r#where(
        limit(order(from("person"), [get("year_of_birth")]), None, Some(3), false),
        get("gender_concept_id").eq(lit(8507)),
    );

    let sql = catalog.compile(&query.0).unwrap();
    assert!(sql.text.starts_with(r#"SELECT "person_2"."#));
    assert!(sql.text.contains(r#"FROM "person" AS "person_1""#));
    assert!(sql.text.contains("ORDER BY"));
    assert!(sql.text.contains("LIMIT 3"));
    assert!(sql.text.contains(r#"AS "person_2""#));
    assert!(sql.text.contains(r#"WHERE ("person_2"."gender_concept_id" = 8507)"#));
}

#[test]
fn group_with_count_aggregates_per_key() {
    let catalog = person_catalog();
    let query = select(
        group(from("person"), [get("year_of_birth")]).unwrap(),
        [get("year_of_birth"), count()],
    )
    .unwrap();

    let sql = catalog.compile(&query.0).unwrap();
    assert_eq!(
        sql.text,
        r#"SELECT "person_1"."year_of_birth", COUNT(*) AS "count" FROM "person" AS "person_1" GROUP BY "person_1"."year_of_birth""#
    );
}

#[test]
fn left_join_with_aliased_joinee_and_nested_get() {
    let catalog = Catalog::new(
        [
            Table::new("person", ["person_id", "location_id"]).unwrap(),
            Table::new("location", ["location_id", "state"]).unwrap(),
        ],
        Dialect::sqlite(),
    )
    .unwrap();

    let location = from("location").r#as("l");
    let query = select(
        left_join(
            from("person"),
            location.clone(),
            get("location_id").eq(location.get("location_id")),
        ),
        [get("person_id"), location.get("state")],
    )
    .unwrap();

    let sql = catalog.compile(&query.0).unwrap();
    assert_eq!(
        sql.text,
        r#"SELECT "person_1"."person_id", "location_1"."state" FROM "person" AS "person_1" LEFT JOIN "location" AS "location_1" ON ("person_1"."location_id" = "location_1"."location_id")"#
    );
}

#[test]
fn named_cte_referenced_from_an_in_subquery() {
    let catalog = Catalog::new(
        [
            Table::new("condition_occurrence", ["person_id", "condition_concept_id"]).unwrap(),
            Table::new("person", ["person_id"]).unwrap(),
        ],
        Dialect::sqlite(),
    )
    .unwrap();

    let ess_htn = r#where(
        from("condition_occurrence"),
        get("condition_concept_id").eq(lit(320128)),
    );
    let membership = fun_vec(
        "in",
        vec![get("person_id"), select(from("ess_htn"), [get("person_id")]).unwrap()],
    )
    .unwrap();
    let query = with(
        r#where(from("person"), membership),
        [("ess_htn", ess_htn)],
        false,
    )
    .unwrap();

    let sql = catalog.compile(&query.0).unwrap();
    assert!(sql.text.starts_with(r#"WITH "ess_htn_1" ("person_id") AS (SELECT"#));
    assert!(sql.text.contains("320128"));
    assert!(sql.text.contains(r#"FROM "person" AS "person_1""#));
    assert!(sql.text.contains(r#""person_1"."person_id" IN (SELECT"#));
    assert!(sql.text.contains(r#"FROM "ess_htn_1" AS "ess_htn_2""#));
}

#[test]
fn recursive_iterate_emits_with_recursive() {
    let catalog = Catalog::new(Vec::<Table>::new(), Dialect::sqlite()).unwrap();

    let seed = define(from_nothing(), [("n", lit(1)), ("f", lit(1))]).unwrap();
    let body = r#where(
        define(
            define(from("factorial"), [("n", get("n") + lit(1))]).unwrap(),
            [("f", get("f") * get("n"))],
        )
        .unwrap(),
        get("n").lte(lit(10)),
    )
    .r#as("factorial");

    let query = iterate(seed, body);
    let sql = catalog.compile(&query.0).unwrap();

    assert!(sql.text.starts_with(r#"WITH RECURSIVE "factorial_1" AS (SELECT 1 AS "n", 1 AS "f" UNION ALL SELECT"#));
    assert!(sql.text.contains(r#"FROM "factorial_1" AS "factorial_2""#));
    assert!(sql.text.contains(r#""factorial_2"."n", "factorial_2"."f""#));
}

#[test]
fn pretty_and_compact_renders_are_token_equivalent() {
    let catalog = person_catalog();
    let query = select(
        r#where(from("person"), get("year_of_birth").eq(lit(1980))),
        [get("person_id")],
    )
    .unwrap();

    let compact = catalog.compile_with(&query.0, SerializeOptions::compact()).unwrap();
    let pretty = catalog.compile_with(&query.0, SerializeOptions::pretty()).unwrap();

    let squash = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
    assert_eq!(squash(&compact.text), squash(&pretty.text));
}

#[test]
fn postgres_dialect_uses_numbered_parameters() {
    let catalog = Catalog::new(
        [Table::new("person", ["person_id", "year_of_birth"]).unwrap()],
        Dialect::postgres(),
    )
    .unwrap();
    let query = r#where(from("person"), get("year_of_birth").eq(var("dob")));
    let sql = catalog.compile(&query.0).unwrap();
    assert!(sql.text.contains("$1"));
    assert_eq!(sql.vars, vec!["dob".to_string()]);
}

#[test]
fn ambiguous_unqualified_get_across_a_join_is_an_error() {
    let catalog = Catalog::new(
        [
            Table::new("a", ["id", "shared"]).unwrap(),
            Table::new("b", ["id", "shared"]).unwrap(),
        ],
        Dialect::sqlite(),
    )
    .unwrap();
    let query = select(join(from("a"), from("b"), lit(true), false, false, false, false), [get("shared")]).unwrap();
    let err = catalog.compile(&query.0).unwrap_err();
    let messages = relq::error::downcast(err);
    assert!(messages.to_string().contains("ambiguous"));
}
