// Integration tests for traceframe: end-to-end plan compilation and execution

use traceframe::*;
use std::sync::Arc;
use proptest::prelude::*;

fn make_slices() -> Dataframe {
    DataframeBuilder::new()
        .int_column("ts", vec![100, 200, 300, 400])
        .int_column("dur", vec![5, 1, 5, 3])
        .nullable_int_column("depth", vec![Some(0), None, Some(1), Some(0)])
        .float_column("cpu", vec![0.25, 0.5, 0.75, 1.0])
        .string_column("name", vec![Some("sched_switch"), Some("irq_handler"), Some("sched_wakeup"), None])
        .build()
        .expect("build")
}

fn make_engine() -> QueryEngine {
    QueryEngine::new(Arc::new(make_slices()))
}

#[test]
fn test_filter_then_sort() {
    let engine = make_engine();
    let plan = QueryPlan::new()
        .filter(Predicate::compare("dur", CompareOp::Gt, 2))
        .sort(vec![SortKey::asc("dur")]);
    let mut cursor = engine.query(&plan).unwrap();
    assert_eq!(cursor.collect_rows(), vec![3, 0, 2]);
}

#[test]
fn test_filter_then_sort_without_index_walk() {
    let df = Arc::new(make_slices());
    let config = EngineConfig {
        compile: CompileOptions { index_sorts: false, ..Default::default() },
        ..Default::default()
    };
    let engine = QueryEngine::with_config(df, config);
    let plan = QueryPlan::new()
        .filter(Predicate::compare("dur", CompareOp::Gt, 2))
        .sort(vec![SortKey::asc("dur")]);
    let program = engine.compile(&plan).unwrap();
    assert_eq!(program.count_named("SortRows"), 1);
    assert_eq!(engine.execute(&program).unwrap().collect_rows(), vec![3, 0, 2]);
}

#[test]
fn test_indexed_filter_and_sort_share_index() {
    let engine = make_engine();
    let plan = QueryPlan::new()
        .indexed_filter("dur", CompareOp::Ge, 3)
        .sort(vec![SortKey::asc("dur")]);
    let program = engine.compile(&plan).unwrap();
    assert_eq!(program.count_named("LoadIndex"), 1);
    assert_eq!(program.count_named("LoadColumn"), program.outputs().len());
    assert_eq!(engine.execute(&program).unwrap().collect_rows(), vec![3, 0, 2]);
    assert!(engine.dataframe().column("dur").unwrap().has_index());
}

#[test]
fn test_unknown_column_produces_no_program() {
    let engine = make_engine();
    let plan = QueryPlan::new()
        .filter(Predicate::compare("dur", CompareOp::Gt, 2))
        .sort(vec![SortKey::asc("thread_dur")]);
    match engine.compile(&plan) {
        Err(TraceframeError::UnknownColumn(name)) => assert_eq!(name, "thread_dur"),
        other => panic!("expected UnknownColumn, got {:?}", other.map(|p| p.to_string())),
    }
}

#[test]
fn test_compilation_is_deterministic() {
    let df = make_slices();
    let plan = QueryPlan::new()
        .filter(Predicate::compare("name", CompareOp::Glob, "sched*").or(Predicate::IsNull("depth".into())))
        .filter(Predicate::compare("cpu", CompareOp::Lt, 1))
        .sort(vec![SortKey::desc("ts"), SortKey::asc("depth").nulls_last()])
        .limit(3)
        .project(["ts", "name"]);
    let options = CompileOptions::default();
    let a = QueryCompiler::compile(&plan, &df, &options).unwrap();
    let b = QueryCompiler::compile(&plan, &df, &options).unwrap();
    assert_eq!(a.to_string(), b.to_string());
    assert_eq!(a.layout(), b.layout());
    assert_eq!(a.outputs(), b.outputs());
}

#[test]
fn test_caching_reduces_column_loads() {
    let df = make_slices();
    let plan = QueryPlan::new()
        .filter(Predicate::compare("dur", CompareOp::Gt, 0))
        .filter(Predicate::compare("dur", CompareOp::Lt, 10))
        .sort(vec![SortKey::desc("dur")])
        .project(["dur", "ts"]);
    let cached = QueryCompiler::compile(&plan, &df, &CompileOptions::default()).unwrap();
    let uncached_options = CompileOptions { register_caching: false, ..Default::default() };
    let uncached = QueryCompiler::compile(&plan, &df, &uncached_options).unwrap();
    assert_eq!(cached.count_named("LoadColumn"), 2);
    assert_eq!(uncached.count_named("LoadColumn"), 5);

    // Both programs compute the same rows.
    let exec = ExecOptions::default();
    let a = Interpreter::new(&cached, &df, &exec).run().unwrap().collect_rows();
    let b = Interpreter::new(&uncached, &df, &exec).run().unwrap().collect_rows();
    assert_eq!(a, b);
}

#[test]
fn test_empty_filter_exits_early() {
    let engine = make_engine();
    let plan = QueryPlan::new()
        .filter(Predicate::compare("ts", CompareOp::Gt, 10_000))
        .sort(vec![SortKey::asc("dur")])
        .project(["ts", "dur"]);
    let program = engine.compile(&plan).unwrap();
    assert_eq!(program.count_named("ExitIfEmpty"), 1);
    let mut cursor = engine.execute(&program).unwrap();
    assert!(!cursor.advance());
    assert_eq!(cursor.outputs().iter().map(|o| o.name.as_str()).collect::<Vec<_>>(), vec!["ts", "dur"]);
}

#[test]
fn test_aggregates_over_empty_selection() {
    let engine = make_engine();
    let plan = QueryPlan::new()
        .filter(Predicate::compare("ts", CompareOp::Gt, 10_000))
        .aggregate(vec![
            AggregateSpec::count_rows(),
            AggregateSpec::new(AggregateFunc::Sum, "dur").alias("total"),
            AggregateSpec::new(AggregateFunc::Max, "cpu"),
        ]);
    let mut cursor = engine.query(&plan).unwrap();
    assert!(cursor.advance());
    assert_eq!(cursor.get_i64(cursor.column_index("count").unwrap()).unwrap(), Some(0));
    assert_eq!(cursor.value(cursor.column_index("total").unwrap()).unwrap(), Value::Null);
    assert!(cursor.is_null(cursor.column_index("max(cpu)").unwrap()).unwrap());
    assert!(!cursor.advance());
}

#[test]
fn test_aggregates() {
    let engine = make_engine();
    let plan = QueryPlan::new()
        .filter(Predicate::compare("name", CompareOp::Glob, "sched_*"))
        .aggregate(vec![
            AggregateSpec::count_rows(),
            AggregateSpec::new(AggregateFunc::Sum, "dur"),
            AggregateSpec::new(AggregateFunc::Avg, "cpu"),
            AggregateSpec::new(AggregateFunc::Min, "ts"),
        ]);
    let mut cursor = engine.query(&plan).unwrap();
    assert!(cursor.advance());
    assert_eq!(cursor.get_i64(0).unwrap(), Some(2));
    assert_eq!(cursor.get_i64(1).unwrap(), Some(10));
    assert_eq!(cursor.get_f64(2).unwrap(), Some(0.5));
    assert_eq!(cursor.get_i64(3).unwrap(), Some(100));
}

#[test]
fn test_null_ordering() {
    let engine = make_engine();
    let first = QueryPlan::new().sort(vec![SortKey::asc("depth")]);
    assert_eq!(engine.query(&first).unwrap().collect_rows(), vec![1, 0, 3, 2]);
    let last = QueryPlan::new().sort(vec![SortKey::asc("depth").nulls_last()]);
    assert_eq!(engine.query(&last).unwrap().collect_rows(), vec![0, 3, 2, 1]);
    let desc = QueryPlan::new().sort(vec![SortKey::desc("depth")]);
    assert_eq!(engine.query(&desc).unwrap().collect_rows(), vec![1, 2, 0, 3]);
}

#[test]
fn test_limit_and_offset() {
    let engine = make_engine();
    let plan = QueryPlan::new().sort(vec![SortKey::desc("ts")]).limit(2);
    assert_eq!(engine.query(&plan).unwrap().collect_rows(), vec![3, 2]);
    let plan = QueryPlan::new().limit_offset(Some(10), 3);
    assert_eq!(engine.query(&plan).unwrap().collect_rows(), vec![3]);
}

#[test]
fn test_glob_filter() {
    let engine = make_engine();
    let plan = QueryPlan::new()
        .filter(Predicate::compare("name", CompareOp::Glob, "*_*er"))
        .project(["name"]);
    let mut cursor = engine.query(&plan).unwrap();
    assert!(cursor.advance());
    assert_eq!(cursor.get_str(0).unwrap(), Some("irq_handler"));
    assert!(!cursor.advance());
}

#[test]
fn test_glob_wildcards_against_literal_wildcard_names() {
    let df = DataframeBuilder::new()
        .string_column("name", vec![Some("*slice_b"), Some("xb"), Some("é"), Some("a?c")])
        .build()
        .unwrap();
    let engine = QueryEngine::new(Arc::new(df));
    let glob = |pattern: &str| {
        let plan = QueryPlan::new().filter(Predicate::compare("name", CompareOp::Glob, pattern));
        engine.query(&plan).unwrap().collect_rows()
    };
    assert_eq!(glob("*b"), vec![0, 1]);
    assert_eq!(glob("?"), vec![2]);
    assert_eq!(glob("a?c"), vec![3]);
    assert_eq!(glob("*"), vec![0, 1, 2, 3]);
}

#[test]
fn test_float_filter_treats_signed_zeros_alike() {
    let df = DataframeBuilder::new()
        .float_column("cpu", vec![-0.0, 0.5, 0.0, -1.0])
        .build()
        .unwrap();
    let engine = QueryEngine::new(Arc::new(df));
    let scan = QueryPlan::new().filter(Predicate::compare("cpu", CompareOp::Eq, 0.0));
    assert_eq!(engine.query(&scan).unwrap().collect_rows(), vec![0, 2]);
    let indexed = QueryPlan::new().indexed_filter("cpu", CompareOp::Le, 0);
    assert_eq!(engine.query(&indexed).unwrap().collect_rows(), vec![0, 2, 3]);
}

#[cfg(feature = "regex")]
#[test]
fn test_regex_filter() {
    let engine = make_engine();
    let plan = QueryPlan::new().filter(Predicate::compare("name", CompareOp::Regex, "^sched_(switch|wakeup)$"));
    assert_eq!(engine.query(&plan).unwrap().collect_rows(), vec![0, 2]);
}

#[test]
fn test_plan_from_json() {
    let json = r#"{"ops":[
        {"Filter":{"Compare":{"column":"dur","op":"Gt","operand":{"Literal":{"Int":2}}}}},
        {"Sort":[{"column":"dur","direction":"Asc","nulls":"NullsFirst"}]},
        {"Project":["ts"]}
    ]}"#;
    let plan: QueryPlan = serde_json::from_str(json).unwrap();
    let mut cursor = make_engine().query(&plan).unwrap();
    let mut ts = Vec::new();
    while cursor.advance() {
        ts.push(cursor.get_i64(0).unwrap().unwrap());
    }
    assert_eq!(ts, vec![400, 100, 300]);
}

#[test]
fn test_program_rejected_by_other_dataframe() {
    let engine = make_engine();
    let program = engine.compile(&QueryPlan::new().project(["ts"])).unwrap();
    let other = make_slices();
    let res = Interpreter::new(&program, &other, &ExecOptions::default()).run();
    assert!(matches!(res, Err(TraceframeError::ExecutionError(_))));
}

#[test]
fn test_register_ceiling() {
    let df = make_slices();
    let options = CompileOptions { register_limit: 3, ..Default::default() };
    let res = QueryCompiler::compile(&QueryPlan::new(), &df, &options);
    assert!(matches!(res, Err(TraceframeError::PlanTooLarge(_))));
}

fn naive_matches(v: Option<i64>, op: CompareOp, x: i64) -> bool {
    match v {
        None => false,
        Some(v) => match op {
            CompareOp::Eq => v == x,
            CompareOp::Ne => v != x,
            CompareOp::Lt => v < x,
            CompareOp::Le => v <= x,
            CompareOp::Gt => v > x,
            _ => v >= x,
        },
    }
}

fn ordering_op() -> impl Strategy<Value = CompareOp> {
    prop_oneof![
        Just(CompareOp::Eq),
        Just(CompareOp::Ne),
        Just(CompareOp::Lt),
        Just(CompareOp::Le),
        Just(CompareOp::Gt),
        Just(CompareOp::Ge),
    ]
}

proptest! {
    #[test]
    fn filter_agrees_with_naive_scan(
        values in prop::collection::vec(prop::option::of(-20i64..20), 0..64),
        op in ordering_op(),
        x in -20i64..20,
        indexed in any::<bool>(),
    ) {
        let df = DataframeBuilder::new()
            .nullable_int_column("v", values.clone())
            .build()
            .unwrap();
        let plan = if indexed {
            QueryPlan::new().indexed_filter("v", op, x)
        } else {
            QueryPlan::new().filter(Predicate::compare("v", op, x))
        };
        let engine = QueryEngine::new(Arc::new(df));
        let rows = engine.query(&plan).unwrap().collect_rows();
        let expected: Vec<u32> = values
            .iter()
            .enumerate()
            .filter(|(_, v)| naive_matches(**v, op, x))
            .map(|(i, _)| i as u32)
            .collect();
        prop_assert_eq!(rows, expected);
    }

    #[test]
    fn sort_is_stable_with_nulls_first(
        values in prop::collection::vec(prop::option::of(0i64..5), 0..64),
        index_sorts in any::<bool>(),
    ) {
        let df = DataframeBuilder::new()
            .nullable_int_column("v", values.clone())
            .build()
            .unwrap();
        let config = EngineConfig {
            compile: CompileOptions { index_sorts, ..Default::default() },
            ..Default::default()
        };
        let engine = QueryEngine::with_config(Arc::new(df), config);
        let rows = engine.query(&QueryPlan::new().sort(vec![SortKey::asc("v")])).unwrap().collect_rows();
        let mut expected: Vec<u32> = (0..values.len() as u32).collect();
        // Option orders None first, matching the default null placement.
        expected.sort_by_key(|&r| values[r as usize]);
        prop_assert_eq!(rows, expected);
    }

    #[test]
    fn cache_is_idempotent(picks in prop::collection::vec(0usize..8, 1..64)) {
        let ids: Vec<ObjectId> = (0..8).map(|_| ObjectId::next()).collect();
        let mut builder = BytecodeBuilder::default();
        let mut cache = RegisterCache::new(&mut builder);
        let mut seen = std::collections::HashMap::new();
        for &p in &picks {
            let cached = cache.get_or_allocate::<ColumnRef>(ids[p]).unwrap();
            match seen.get(&p) {
                Some(reg) => {
                    prop_assert!(!cached.inserted);
                    prop_assert_eq!(*reg, cached.reg);
                }
                None => {
                    prop_assert!(cached.inserted);
                    seen.insert(p, cached.reg);
                }
            }
        }
        prop_assert_eq!(cache.len(), seen.len());
        prop_assert_eq!(cache.hits(), picks.len() - seen.len());
        prop_assert_eq!(cache.builder().register_count(), seen.len());
    }
}
