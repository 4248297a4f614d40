//! End-to-end compilation scenarios: SQL text in, FetchXML plus
//! pipeline out, with the pipeline executed over hand-built rows.

use indexmap::IndexMap;

use crate::compiler::test_support::account_contact_metadata;
use crate::compiler::{CompileError, CompileOptions, CompiledQuery, CompiledSelect, QueryCompiler};
use crate::executor::{apply_extensions, QueryExtension, Row, RowIter, Value};
use crate::fetch::{Condition, Fetch, FetchAttribute, FilterItem, FilterType, Item, LinkType};

fn compile(sql: &str) -> CompiledQuery {
    let meta = account_contact_metadata();
    QueryCompiler::new(&meta).compile(sql).expect("compile")
}

fn compile_err(sql: &str) -> CompileError {
    let meta = account_contact_metadata();
    QueryCompiler::new(&meta).compile(sql).expect_err("should fail")
}

fn select(sql: &str) -> CompiledSelect {
    match compile(sql) {
        CompiledQuery::Select(s) => s,
        other => panic!("expected select plan, got {other:?}"),
    }
}

fn row(pairs: &[(&str, Value)]) -> Row {
    let mut r = Row::new();
    for (k, v) in pairs {
        r.insert(*k, v.clone());
    }
    r
}

fn s(v: &str) -> Value {
    Value::String(v.into())
}

/// Emulate the runtime: feed platform rows through the pipeline, then
/// project the declared output columns.
fn run(plan: &CompiledSelect, rows: Vec<Row>) -> Vec<IndexMap<String, Value>> {
    let input: RowIter = Box::new(rows.into_iter());
    apply_extensions(&plan.extensions, input)
        .map(|r| plan.columns.iter().map(|c| (c.clone(), r.get(c))).collect())
        .collect()
}

fn attribute_names(fetch: &Fetch) -> Vec<String> {
    fetch
        .entity
        .items
        .iter()
        .filter_map(|i| match i {
            Item::Attribute(a) => Some(a.name.clone()),
            _ => None,
        })
        .collect()
}

fn root_filter(fetch: &Fetch) -> Option<&crate::fetch::Filter> {
    fetch.entity.items.iter().find_map(|i| match i {
        Item::Filter(f) => Some(f),
        _ => None,
    })
}

// ---- plain SELECT ----

#[test]
fn select_two_columns_is_pure_native() {
    let plan = select("SELECT accountid, name FROM account");
    let fetch = plan.fetch.as_ref().expect("fetch");
    assert_eq!(fetch.entity.name, "account");
    assert_eq!(attribute_names(fetch), vec!["accountid", "name"]);
    assert!(plan.extensions.is_empty());
    assert_eq!(plan.columns, vec!["accountid", "name"]);
    assert!(plan.all_pages);
    assert!(plan.aggregate_alternative.is_none());
}

#[test]
fn fetchxml_round_trips_for_native_plans() {
    for sql in [
        "SELECT accountid, name FROM account",
        "SELECT accountid, name FROM account WHERE name = 'test'",
        "SELECT TOP 5 name FROM account ORDER BY name DESC",
    ] {
        let plan = select(sql);
        assert!(plan.extensions.is_empty(), "{sql} should be pure native");
        let fetch = plan.fetch.expect("fetch");
        let reparsed = Fetch::parse(&fetch.to_xml()).expect("reparse");
        assert_eq!(reparsed, fetch, "{sql}");
    }
}

#[test]
fn where_equality_lowers_to_condition() {
    let plan = select("SELECT accountid, name FROM account WHERE name = 'test'");
    let fetch = plan.fetch.as_ref().expect("fetch");
    let filter = root_filter(fetch).expect("filter");
    assert_eq!(filter.filter_type, FilterType::And);
    assert_eq!(
        filter.items,
        vec![FilterItem::Condition(Condition::new("name", "eq").with_value("test"))]
    );
    assert!(plan.extensions.is_empty());
}

// ---- fallback protocol ----

#[test]
fn column_comparison_falls_back_to_where_and_projection() {
    let plan = select("SELECT contactid FROM contact WHERE firstname = lastname");
    let fetch = plan.fetch.as_ref().expect("fetch");
    assert_eq!(attribute_names(fetch), vec!["firstname", "lastname", "contactid"]);
    assert!(root_filter(fetch).is_none());
    assert_eq!(plan.extensions.len(), 2);
    assert!(matches!(plan.extensions[0], QueryExtension::Where(_)));
    assert!(matches!(plan.extensions[1], QueryExtension::Projection(_)));
    assert_eq!(plan.columns, vec!["contactid"]);

    let id = uuid::Uuid::new_v4();
    let out = run(
        &plan,
        vec![
            row(&[
                ("firstname", s("Mark")),
                ("lastname", s("Carrington")),
                ("contactid", Value::Guid(uuid::Uuid::new_v4())),
            ]),
            row(&[
                ("firstname", s("Mark")),
                ("lastname", s("Mark")),
                ("contactid", Value::Guid(id)),
            ]),
        ],
    );
    assert_eq!(out.len(), 1);
    assert_eq!(out[0]["contactid"], Value::Guid(id));
}

#[test]
fn null_operands_are_filtered_by_the_fallback() {
    let plan = select("SELECT contactid FROM contact WHERE firstname = lastname");
    let out = run(
        &plan,
        vec![row(&[
            ("firstname", Value::Null),
            ("lastname", s("Mark")),
            ("contactid", Value::Guid(uuid::Uuid::new_v4())),
        ])],
    );
    assert!(out.is_empty());
}

#[test]
fn top_moves_to_the_pipeline_after_a_fallback() {
    let plan = select("SELECT TOP 10 firstname FROM contact WHERE firstname = lastname");
    let fetch = plan.fetch.as_ref().expect("fetch");
    assert_eq!(fetch.top, None);
    assert!(matches!(plan.extensions.first(), Some(QueryExtension::Where(_))));
    match plan.extensions.last() {
        Some(QueryExtension::Top(10)) => {}
        other => panic!("expected Top(10) last, got {other:?}"),
    }
    // Top is strictly last, after the projection to output columns
    assert_eq!(plan.extensions.len(), 3);
    assert!(matches!(plan.extensions[1], QueryExtension::Projection(_)));
}

// ---- aggregates ----

#[test]
fn group_by_count_compiles_native_with_alternative() {
    let plan = select("SELECT name, count(*) FROM account GROUP BY name ORDER BY 2 DESC");
    let fetch = plan.fetch.as_ref().expect("fetch");
    assert_eq!(fetch.aggregate, Some(true));

    let attrs: Vec<&FetchAttribute> = fetch
        .entity
        .items
        .iter()
        .filter_map(|i| match i {
            Item::Attribute(a) => Some(a),
            _ => None,
        })
        .collect();
    assert!(attrs
        .iter()
        .any(|a| a.name == "name" && a.group_by == Some(true) && a.alias.as_deref() == Some("name")));
    assert!(attrs.iter().any(|a| {
        a.name == "accountid"
            && a.aggregate.as_deref() == Some("count")
            && a.alias.as_deref() == Some("accountid_count")
    }));
    // the sort runs natively, by alias
    assert!(fetch.entity.items.iter().any(|i| matches!(
        i,
        Item::Order(o) if o.alias.as_deref() == Some("accountid_count") && o.descending
    )));
    assert_eq!(plan.columns, vec!["name", "accountid_count"]);

    let alternative = plan.aggregate_alternative.as_ref().expect("alternative plan");
    assert_eq!(alternative.columns, plan.columns);
    assert_eq!(alternative.fetch.as_ref().map(|f| f.aggregate), Some(None));
}

#[test]
fn aggregate_alternative_computes_the_same_groups_in_memory() {
    let plan = select("SELECT name, count(*) FROM account GROUP BY name ORDER BY 2 DESC");
    let alternative = plan.aggregate_alternative.expect("alternative plan");

    // the platform returns the alternative's rows ordered by name
    let out = run(
        &alternative,
        vec![
            row(&[("name", Value::Null)]),
            row(&[("name", s("Data8"))]),
            row(&[("name", s("data8"))]),
            row(&[("name", s("Microsoft"))]),
        ],
    );
    assert_eq!(out.len(), 3);
    assert_eq!(out[0]["accountid_count"], Value::Int(2));
    assert_eq!(out[0]["name"], s("Data8"));
    let counts: Vec<Value> = out.iter().map(|r| r["accountid_count"].clone()).collect();
    assert_eq!(counts, vec![Value::Int(2), Value::Int(1), Value::Int(1)]);
}

#[test]
fn having_becomes_a_pipeline_filter() {
    let plan = select("SELECT name, count(*) FROM account GROUP BY name HAVING count(*) > 1");
    assert_eq!(plan.extensions.len(), 1);
    assert!(matches!(plan.extensions[0], QueryExtension::Having(_)));

    // rows as the platform returns them for the aggregate fetch
    let out = run(
        &plan,
        vec![
            row(&[("name", s("data8")), ("accountid_count", Value::Int(2))]),
            row(&[("name", s("microsoft")), ("accountid_count", Value::Int(1))]),
        ],
    );
    assert_eq!(out.len(), 1);
    assert_eq!(out[0]["name"], s("data8"));
}

#[test]
fn date_grouping_lowers_natively() {
    let plan = select(
        "SELECT datepart(month, createdon), count(*) FROM account GROUP BY datepart(month, createdon)",
    );
    let fetch = plan.fetch.as_ref().expect("fetch");
    assert_eq!(fetch.aggregate, Some(true));
    assert!(fetch.entity.items.iter().any(|i| matches!(
        i,
        Item::Attribute(a)
            if a.name == "createdon"
                && a.date_grouping.as_deref() == Some("month")
                && a.group_by == Some(true)
    )));
}

#[test]
fn mixed_date_part_and_raw_groupings_do_not_collide() {
    // grouping on year(createdon) and createdon together is undefined
    // platform behavior, but it must compile to two distinct groupings
    let plan = select(
        "SELECT count(*) FROM account GROUP BY datepart(year, createdon), createdon",
    );
    let fetch = plan.fetch.as_ref().expect("fetch");
    let grouped: Vec<&FetchAttribute> = fetch
        .entity
        .items
        .iter()
        .filter_map(|i| match i {
            Item::Attribute(a) if a.group_by == Some(true) => Some(a),
            _ => None,
        })
        .collect();
    assert_eq!(grouped.len(), 2);
}

#[test]
fn distinct_aggregate_takes_the_expression_path() {
    let plan = select("SELECT sum(DISTINCT numberofemployees) FROM account");
    let fetch = plan.fetch.as_ref().expect("fetch");
    // no native aggregate: the fetch reads plain attributes instead
    assert_eq!(fetch.aggregate, None);
    assert!(plan
        .extensions
        .iter()
        .any(|e| matches!(e, QueryExtension::Aggregate { .. })));
    assert!(plan.aggregate_alternative.is_none());
}

// ---- joins ----

#[test]
fn inner_join_produces_a_link_entity() {
    let plan = select(
        "SELECT name, c.firstname FROM account a \
         INNER JOIN contact c ON a.accountid = c.parentcustomerid",
    );
    let fetch = plan.fetch.as_ref().expect("fetch");
    let link = fetch
        .entity
        .items
        .iter()
        .find_map(|i| match i {
            Item::Link(l) => Some(l),
            _ => None,
        })
        .expect("link-entity");
    assert_eq!(link.name, "contact");
    assert_eq!(link.alias.as_deref(), Some("c"));
    assert_eq!(link.link_type, LinkType::Inner);
    // from = outer-side attribute, to = newcomer attribute
    assert_eq!(link.from, "accountid");
    assert_eq!(link.to, "parentcustomerid");
    assert_eq!(plan.columns, vec!["name", "firstname"]);
}

#[test]
fn left_outer_join_sets_link_type() {
    let plan = select(
        "SELECT name FROM account a \
         LEFT OUTER JOIN contact c ON a.accountid = c.parentcustomerid",
    );
    let fetch = plan.fetch.as_ref().expect("fetch");
    let link = fetch
        .entity
        .items
        .iter()
        .find_map(|i| match i {
            Item::Link(l) => Some(l),
            _ => None,
        })
        .expect("link-entity");
    assert_eq!(link.link_type, LinkType::Outer);
}

#[test]
fn join_residual_condition_stays_in_the_link() {
    let plan = select(
        "SELECT name FROM account a \
         INNER JOIN contact c ON a.accountid = c.parentcustomerid AND c.statecode = 0",
    );
    let fetch = plan.fetch.as_ref().expect("fetch");
    let link = fetch
        .entity
        .items
        .iter()
        .find_map(|i| match i {
            Item::Link(l) => Some(l),
            _ => None,
        })
        .expect("link-entity");
    let filter = link
        .items
        .iter()
        .find_map(|i| match i {
            Item::Filter(f) => Some(f),
            _ => None,
        })
        .expect("link filter");
    assert!(matches!(
        &filter.items[0],
        FilterItem::Condition(c) if c.attribute == "statecode"
    ));
}

#[test]
fn unliftable_join_residual_is_rewrite_as_where() {
    let err = compile_err(
        "SELECT name FROM account a \
         INNER JOIN contact c ON a.accountid = c.parentcustomerid \
         AND len(c.firstname) = 5",
    );
    assert!(matches!(err, CompileError::RewriteAsWhere(table) if table == "c"));
}

#[test]
fn second_join_key_is_rejected() {
    let err = compile_err(
        "SELECT name FROM account a \
         INNER JOIN contact c ON a.accountid = c.parentcustomerid \
         AND a.primarycontactid = c.contactid",
    );
    assert!(matches!(err, CompileError::NotSupported { .. }));
}

// ---- DISTINCT / TOP / OFFSET ----

#[test]
fn distinct_is_native_when_the_pipeline_is_empty() {
    let plan = select("SELECT DISTINCT name FROM account");
    assert_eq!(plan.fetch.as_ref().and_then(|f| f.distinct), Some(true));
    assert!(plan.extensions.is_empty());
}

#[test]
fn offset_on_a_page_boundary_uses_native_paging() {
    let plan = select(
        "SELECT name FROM account ORDER BY name OFFSET 50 ROWS FETCH NEXT 25 ROWS ONLY",
    );
    let fetch = plan.fetch.as_ref().expect("fetch");
    assert_eq!(fetch.count, Some(25));
    assert_eq!(fetch.page, Some(3));
    assert!(plan.extensions.is_empty());
    assert!(!plan.all_pages);
}

#[test]
fn offset_off_page_boundary_is_an_operator() {
    let plan = select(
        "SELECT name FROM account ORDER BY name OFFSET 10 ROWS FETCH NEXT 3 ROWS ONLY",
    );
    let fetch = plan.fetch.as_ref().expect("fetch");
    assert_eq!(fetch.count, None);
    match plan.extensions.as_slice() {
        [QueryExtension::Offset { skip: 10, take: Some(3) }] => {}
        other => panic!("expected a single Offset, got {other:?}"),
    }
}

#[test]
fn top_percent_is_unsupported() {
    assert!(matches!(
        compile_err("SELECT TOP 10 PERCENT name FROM account"),
        CompileError::NotSupported { .. }
    ));
}

// ---- ORDER BY ----

#[test]
fn order_by_expression_sorts_in_memory() {
    let plan = select("SELECT name FROM account ORDER BY len(name) DESC, name");
    let fetch = plan.fetch.as_ref().expect("fetch");
    assert!(!fetch.entity.items.iter().any(|i| matches!(i, Item::Order(_))));
    match plan.extensions.as_slice() {
        [QueryExtension::Sort(keys)] => {
            assert_eq!(keys.len(), 2);
            assert!(keys.iter().all(|k| !k.native_prefix));
        }
        other => panic!("expected a single Sort, got {other:?}"),
    }

    let out = run(
        &plan,
        vec![row(&[("name", s("bb"))]), row(&[("name", s("a"))]), row(&[("name", s("ccc"))])],
    );
    let names: Vec<Value> = out.into_iter().map(|mut r| r.swap_remove("name").unwrap()).collect();
    assert_eq!(names, vec![s("ccc"), s("bb"), s("a")]);
}

#[test]
fn later_link_sort_forces_in_memory_prefix() {
    // the link table sorts first in SQL order, so the root sort that
    // follows cannot stay native
    let plan = select(
        "SELECT name, c.firstname FROM account a \
         INNER JOIN contact c ON a.accountid = c.parentcustomerid \
         ORDER BY c.firstname, name",
    );
    match plan.extensions.as_slice() {
        [QueryExtension::Sort(keys)] => {
            assert!(keys[0].native_prefix);
            assert!(!keys[1].native_prefix);
        }
        other => panic!("expected a single Sort, got {other:?}"),
    }
}

// ---- DML ----

#[test]
fn update_selects_keys_and_referenced_attributes() {
    let plan = compile("UPDATE contact SET firstname = 'Hello ' + lastname");
    let CompiledQuery::Update(update) = plan else {
        panic!("expected update plan");
    };
    assert_eq!(update.entity_name, "contact");
    assert_eq!(update.id_column, "contactid");
    assert_eq!(update.fetch.distinct, Some(true));
    assert_eq!(attribute_names(&update.fetch), vec!["lastname", "contactid"]);

    let value = update.updates.get("firstname").expect("firstname update");
    let r = row(&[("lastname", s("Carrington"))]);
    match value {
        crate::compiler::UpdateValue::Expr(e) => {
            assert_eq!(e.eval(&r), s("Hello Carrington"));
        }
        other => panic!("expected expression update, got {other:?}"),
    }
}

#[test]
fn update_literal_is_preconverted() {
    let plan = compile("UPDATE account SET numberofemployees = '250'");
    let CompiledQuery::Update(update) = plan else {
        panic!("expected update plan");
    };
    match update.updates.get("numberofemployees") {
        Some(crate::compiler::UpdateValue::Literal(Value::Int(250))) => {}
        other => panic!("expected converted literal, got {other:?}"),
    }
}

#[test]
fn delete_uses_the_primary_key() {
    let plan = compile("DELETE FROM account WHERE name = 'old'");
    let CompiledQuery::Delete(delete) = plan else {
        panic!("expected delete plan");
    };
    assert_eq!(delete.id_columns, vec!["accountid"]);
    assert!(root_filter(&delete.fetch).is_some());
}

#[test]
fn delete_on_intersect_entity_selects_the_pair() {
    let plan = compile("DELETE FROM accountleads");
    let CompiledQuery::Delete(delete) = plan else {
        panic!("expected delete plan");
    };
    assert_eq!(delete.id_columns, vec!["accountid", "leadid"]);
}

#[test]
fn delete_on_listmember_selects_list_and_entity() {
    let plan = compile("DELETE FROM listmember");
    let CompiledQuery::Delete(delete) = plan else {
        panic!("expected delete plan");
    };
    assert_eq!(delete.id_columns, vec!["listid", "entityid"]);
}

#[test]
fn insert_values_are_converted_per_attribute() {
    let id = uuid::Uuid::new_v4();
    let plan = compile(&format!(
        "INSERT INTO contact (firstname, numberofemployees, parentcustomerid) \
         VALUES ('Mark', '12', '{id}')"
    ));
    let CompiledQuery::Insert(insert) = plan else {
        panic!("expected insert plan");
    };
    match &insert.source {
        crate::compiler::CompiledInsertSource::Rows(rows) => {
            assert_eq!(rows.len(), 1);
            match rows[0].as_slice() {
                [crate::compiler::InsertCell::Literal(Value::String(first)), crate::compiler::InsertCell::Literal(Value::Int(12)), crate::compiler::InsertCell::Literal(Value::Guid(got))] =>
                {
                    assert_eq!(first, "Mark");
                    assert_eq!(*got, id);
                }
                other => panic!("unexpected cells {other:?}"),
            }
        }
        other => panic!("expected rows, got {other:?}"),
    }
}

#[test]
fn insert_select_requires_matching_column_counts() {
    let err = compile_err("INSERT INTO contact (firstname, lastname) SELECT name FROM account");
    assert!(matches!(err, CompileError::NotSupported { .. }));

    let plan = compile("INSERT INTO contact (firstname) SELECT name FROM account");
    let CompiledQuery::Insert(insert) = plan else {
        panic!("expected insert plan");
    };
    assert!(matches!(insert.source, crate::compiler::CompiledInsertSource::Select(_)));
}

// ---- options, hints and errors ----

#[test]
fn nolock_hint_sets_the_fetch_flag() {
    let plan = select("SELECT name FROM account WITH (NOLOCK)");
    assert_eq!(plan.fetch.as_ref().and_then(|f| f.no_lock), Some(true));

    assert!(matches!(
        compile_err("SELECT name FROM account WITH (TABLOCK)"),
        CompileError::NotSupported { .. }
    ));
}

#[test]
fn quoted_identifiers_follow_the_option() {
    let meta = account_contact_metadata();
    let compiler = QueryCompiler::with_options(
        &meta,
        CompileOptions { quoted_identifiers: true, ..Default::default() },
    );
    assert!(compiler.compile("SELECT \"name\" FROM account").is_ok());

    let strict = QueryCompiler::new(&meta);
    assert!(strict.compile("SELECT \"name\" FROM account").is_err());
}

#[test]
fn raw_sql_fallback_carries_the_text() {
    let meta = account_contact_metadata();
    let compiler = QueryCompiler::with_options(
        &meta,
        CompileOptions { tsql_endpoint_available: true, ..Default::default() },
    );
    let plan = compiler
        .compile("SELECT TOP 10 PERCENT name FROM account")
        .expect("fallback plan");
    match plan {
        CompiledQuery::Select(s) => {
            assert!(s.fetch.is_none());
            assert_eq!(s.sql, "SELECT TOP 10 PERCENT name FROM account");
        }
        other => panic!("expected select, got {other:?}"),
    }
}

#[test]
fn binding_failures_are_precise() {
    assert!(matches!(compile_err("SELECT nope FROM account"), CompileError::UnknownAttribute(_)));
    assert!(matches!(compile_err("SELECT name FROM nope"), CompileError::UnknownTable(_)));
    assert!(matches!(
        compile_err(
            "SELECT createdon FROM account a \
             INNER JOIN contact c ON a.accountid = c.parentcustomerid"
        ),
        CompileError::AmbiguousAttribute(_)
    ));
}

#[test]
fn batches_compile_statement_by_statement() {
    let meta = account_contact_metadata();
    let plans = QueryCompiler::new(&meta)
        .compile_batch("SELECT name FROM account; DELETE FROM contact WHERE statecode = 1")
        .expect("batch");
    assert_eq!(plans.len(), 2);
    assert!(matches!(plans[0], CompiledQuery::Select(_)));
    assert!(matches!(plans[1], CompiledQuery::Delete(_)));
}

#[test]
fn wildcard_expands_to_readable_attributes_sorted_by_name() {
    let plan = select("SELECT * FROM account");
    let fetch = plan.fetch.as_ref().expect("fetch");
    assert!(fetch.entity.items.iter().any(|i| matches!(i, Item::AllAttributes)));
    let mut expected = vec![
        "accountid",
        "createdon",
        "name",
        "numberofemployees",
        "ownerid",
        "primarycontactid",
        "revenue",
        "statecode",
    ];
    expected.sort_unstable();
    assert_eq!(plan.columns, expected);
}

#[test]
fn calculated_select_column_runs_through_projection() {
    let plan = select("SELECT firstname + ' ' + lastname AS greeting FROM contact");
    assert_eq!(plan.columns, vec!["greeting"]);
    assert_eq!(plan.extensions.len(), 1);
    match &plan.extensions[0] {
        QueryExtension::Projection(map) => assert!(map.contains_key("greeting")),
        other => panic!("expected projection, got {other:?}"),
    }

    let out = run(
        &plan,
        vec![row(&[("firstname", s("Mark")), ("lastname", s("Carrington"))])],
    );
    assert_eq!(out[0]["greeting"], s("Mark Carrington"));
}

#[test]
fn unnamed_expressions_get_generated_names() {
    let plan = select("SELECT len(name), name + '!' FROM account");
    assert_eq!(plan.columns, vec!["Expr1", "Expr2"]);
}
