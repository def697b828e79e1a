//! End-to-end facade tests against in-memory SQLite.

#![cfg(feature = "sqlite")]

use jrm::prelude::*;
use jrm::stream::StreamWriteOptions;

fn sqlite_pool() -> Pool {
    let cfg = DatabaseConfig {
        backend: BackendType::Sqlite,
        database: Some(":memory:".into()),
        ..DatabaseConfig::default()
    };
    // One connection so every checkout sees the same in-memory database.
    Pool::builder(cfg).min_size(1).max_size(1).build().unwrap()
}

fn sqlite_pool_with_fetch_limit(limit: u64) -> Pool {
    let cfg = DatabaseConfig {
        backend: BackendType::Sqlite,
        database: Some(":memory:".into()),
        ..DatabaseConfig::default()
    };
    Pool::builder(cfg)
        .min_size(1)
        .max_size(1)
        .fetch_limit(limit)
        .build()
        .unwrap()
}

#[test]
fn insert_then_select_round_trips() {
    let pool = sqlite_pool();
    let mut client = pool.client().unwrap();
    let mut db = client.db();

    db.execute("CREATE TABLE t (id INTEGER, name TEXT, score REAL)", ())
        .into_result()
        .unwrap();
    let record = Record::new()
        .with("id", 7)
        .with("name", "alice")
        .with("score", 9.5);
    let inserted = db.insert("t", &record, None);
    assert_eq!(inserted.status, 0);
    assert_eq!(inserted.count, 1);

    let found = db.select("t", &[], Some(&Condition::new().eq("id", 7)), None);
    assert_eq!(found.count, 1);
    assert_eq!(found.data[0].get("name"), Some(&DbValue::Text("alice".into())));
    assert_eq!(found.data[0].get("score"), Some(&DbValue::Float(9.5)));
    assert_eq!(found.columns, vec!["id", "name", "score"]);
}

#[test]
fn backtick_keyword_round_trip() {
    let pool = sqlite_pool();
    let mut client = pool.client().unwrap();
    let mut db = client.db();

    db.execute("CREATE TABLE events (id INTEGER, ts TEXT)", ())
        .into_result()
        .unwrap();
    let record = Record::new().with("id", 1).with("ts", "`CURRENT_TIMESTAMP`");
    assert_eq!(db.insert("events", &record, None).status, 0);

    let found = db.select(
        "events",
        &["id", "ts"],
        Some(&Condition::new().eq("id", 1)),
        None,
    );
    assert_eq!(found.count, 1);
    let ts = found.data[0].get("ts").unwrap();
    assert!(!ts.is_null());
    assert!(ts.as_timestamp().is_some(), "ts should parse: {ts:?}");
}

#[test]
fn bulk_insert_chunks_and_counts() {
    let pool = sqlite_pool();
    let mut client = pool.client().unwrap();
    let mut db = client.db();

    db.execute("CREATE TABLE bulk (id INTEGER)", ())
        .into_result()
        .unwrap();
    let rows: Vec<Record> = (1..=2500).map(|i| Record::new().with("id", i)).collect();
    let result = db.insert_bulk("bulk", &rows, 1000);
    assert_eq!(result.status, 0);
    assert_eq!(result.count, 2500);

    let counted = db.query("SELECT COUNT(*) AS n FROM bulk", ());
    assert_eq!(counted.data[0].get("n"), Some(&DbValue::Int(2500)));
}

#[test]
fn bulk_insert_binds_null_for_missing_columns() {
    let pool = sqlite_pool();
    let mut client = pool.client().unwrap();
    let mut db = client.db();

    db.execute("CREATE TABLE sparse (id INTEGER, note TEXT)", ())
        .into_result()
        .unwrap();
    let rows = vec![
        Record::new().with("id", 1).with("note", "full"),
        Record::new().with("id", 2),
    ];
    assert_eq!(db.insert_bulk("sparse", &rows, 0).status, 0);

    let found = db.select("sparse", &[], Some(&Condition::new().eq("id", 2)), None);
    assert!(found.data[0].get("note").unwrap().is_null());
}

#[test]
fn merge_updates_existing_row() {
    let pool = sqlite_pool();
    let mut client = pool.client().unwrap();
    let mut db = client.db();

    db.execute("CREATE TABLE m (id INTEGER PRIMARY KEY, n TEXT)", ())
        .into_result()
        .unwrap();
    db.insert("m", &Record::new().with("id", 1).with("n", "A"), None);

    let merged = db.merge(
        "m",
        &[Record::new().with("id", 1).with("n", "B")],
        &["id"],
        None,
        false,
    );
    assert_eq!(merged.status, 0);

    let found = db.select("m", &[], None, None);
    assert_eq!(found.count, 1);
    assert_eq!(found.data[0].get("n"), Some(&DbValue::Text("B".into())));
}

#[test]
fn merge_no_update_keeps_existing_row() {
    let pool = sqlite_pool();
    let mut client = pool.client().unwrap();
    let mut db = client.db();

    db.execute("CREATE TABLE m (id INTEGER PRIMARY KEY, n TEXT)", ())
        .into_result()
        .unwrap();
    db.insert("m", &Record::new().with("id", 1).with("n", "A"), None);

    let merged = db.merge(
        "m",
        &[Record::new().with("id", 1).with("n", "B")],
        &["id"],
        None,
        true,
    );
    assert_eq!(merged.status, 0);

    let found = db.select("m", &[], None, None);
    assert_eq!(found.data[0].get("n"), Some(&DbValue::Text("A".into())));
}

#[test]
fn merge_is_idempotent() {
    let pool = sqlite_pool();
    let mut client = pool.client().unwrap();
    let mut db = client.db();

    db.execute("CREATE TABLE m (id INTEGER PRIMARY KEY, n TEXT)", ())
        .into_result()
        .unwrap();
    let row = [Record::new().with("id", 5).with("n", "x")];
    db.merge("m", &row, &["id"], None, false);
    db.merge("m", &row, &["id"], None, false);

    let found = db.select("m", &[], None, None);
    assert_eq!(found.count, 1);
    assert_eq!(found.data[0].get("n"), Some(&DbValue::Text("x".into())));
}

#[test]
fn merge_rejects_missing_key_column() {
    let pool = sqlite_pool();
    let mut client = pool.client().unwrap();
    let mut db = client.db();
    db.execute("CREATE TABLE m (id INTEGER PRIMARY KEY, n TEXT)", ())
        .into_result()
        .unwrap();

    let result = db.merge("m", &[Record::new().with("n", "B")], &["id"], None, false);
    assert_eq!(result.status, -1);
    assert!(result.message.contains("key column"));
}

#[test]
fn transaction_rollback_discards_writes() {
    let pool = sqlite_pool();
    {
        let mut client = pool.client().unwrap();
        client
            .db()
            .execute("CREATE TABLE tx (id INTEGER)", ())
            .into_result()
            .unwrap();
    }

    {
        let mut tx = pool.transaction(None).unwrap();
        let inserted = tx.db().insert("tx", &Record::new().with("id", 1), None);
        assert_eq!(inserted.status, 0);
        // Dropped without commit: rolls back.
    }

    let mut client = pool.client().unwrap();
    let found = client
        .db()
        .select("tx", &[], Some(&Condition::new().eq("id", 1)), None);
    assert_eq!(found.count, 0);
}

#[test]
fn transaction_commit_persists_writes() {
    let pool = sqlite_pool();
    {
        let mut client = pool.client().unwrap();
        client
            .db()
            .execute("CREATE TABLE tx (id INTEGER)", ())
            .into_result()
            .unwrap();
    }

    let mut tx = pool.transaction(Some(IsolationLevel::Serializable)).unwrap();
    tx.db().insert("tx", &Record::new().with("id", 1), None);
    tx.commit().unwrap();

    let mut client = pool.client().unwrap();
    let found = client.db().select("tx", &[], None, None);
    assert_eq!(found.count, 1);
}

#[test]
fn named_placeholders_against_question_backend() {
    let pool = sqlite_pool();
    let mut client = pool.client().unwrap();
    let mut db = client.db();

    db.execute("CREATE TABLE u (n TEXT, a INTEGER)", ())
        .into_result()
        .unwrap();
    db.insert("u", &Record::new().with("n", "J").with("a", 25), None);

    let params: Vec<(String, DbValue)> = vec![
        ("n".to_string(), DbValue::from("J")),
        ("a".to_string(), DbValue::Int(25)),
    ];
    let found = db.query("SELECT * FROM u WHERE n=:n AND a=:a", params);
    assert_eq!(found.status, 0);
    assert_eq!(found.count, 1);
}

#[test]
fn like_and_range_conditions() {
    let pool = sqlite_pool();
    let mut client = pool.client().unwrap();
    let mut db = client.db();

    db.execute("CREATE TABLE people (email TEXT, age INTEGER)", ())
        .into_result()
        .unwrap();
    for (email, age) in [("a@x.com", 20), ("b@y.org", 40), ("c@x.com", 70)] {
        db.insert(
            "people",
            &Record::new().with("email", email).with("age", age),
            None,
        );
    }

    let liked = db.select(
        "people",
        &[],
        Some(&Condition::new().op("email", "LIKE", "%@x.com")),
        None,
    );
    assert_eq!(liked.count, 2);

    let ranged = db.select(
        "people",
        &[],
        Some(&Condition::new().op("age", ">", 18).op("age", "<=", 65)),
        None,
    );
    assert_eq!(ranged.count, 2);

    let listed = db.select(
        "people",
        &[],
        Some(&Condition::new().op("age", "IN", vec![DbValue::Int(20), DbValue::Int(70)])),
        None,
    );
    assert_eq!(listed.count, 2);
}

#[test]
fn update_and_delete_with_and_without_condition() {
    let pool = sqlite_pool();
    let mut client = pool.client().unwrap();
    let mut db = client.db();

    db.execute("CREATE TABLE rows (id INTEGER, v TEXT)", ())
        .into_result()
        .unwrap();
    for i in 1..=3 {
        db.insert("rows", &Record::new().with("id", i).with("v", "old"), None);
    }

    let updated = db.update(
        "rows",
        &Record::new().with("v", "new"),
        Some(&Condition::new().eq("id", 2)),
    );
    assert_eq!(updated.count, 1);

    // Null condition updates everything; caller responsibility.
    let updated_all = db.update("rows", &Record::new().with("v", "all"), None);
    assert_eq!(updated_all.count, 3);

    let deleted = db.delete("rows", Some(&Condition::new().eq("id", 1)));
    assert_eq!(deleted.count, 1);
    let deleted_all = db.delete("rows", None);
    assert_eq!(deleted_all.count, 2);
}

#[test]
fn select_limit_zero_emits_no_clause_but_caps_fetch() {
    let pool = sqlite_pool_with_fetch_limit(10);
    let mut client = pool.client().unwrap();
    let mut db = client.db();

    db.execute("CREATE TABLE caps (id INTEGER)", ())
        .into_result()
        .unwrap();
    let rows: Vec<Record> = (1..=20).map(|i| Record::new().with("id", i)).collect();
    db.insert_bulk("caps", &rows, 0);

    // Default: the fetch cap is the limit.
    let capped = db.select("caps", &[], None, None);
    assert_eq!(capped.count, 10);

    // limit 0: no LIMIT clause, fetch loop still stops at the cap.
    let uncapped = db.select("caps", &[], None, Some(&SelectOptions::new().limit(0)));
    assert_eq!(uncapped.count, 10);

    let three = db.select(
        "caps",
        &[],
        None,
        Some(&SelectOptions::new().limit(3).order_by("id desc")),
    );
    assert_eq!(three.count, 3);
    assert_eq!(three.data[0].get("id"), Some(&DbValue::Int(20)));
}

#[test]
fn stream_query_matches_query() {
    let pool = sqlite_pool();
    let mut client = pool.client().unwrap();
    let mut db = client.db();

    db.execute("CREATE TABLE s (id INTEGER)", ())
        .into_result()
        .unwrap();
    let rows: Vec<Record> = (1..=50).map(|i| Record::new().with("id", i)).collect();
    db.insert_bulk("s", &rows, 0);

    let queried = db.query("SELECT id FROM s ORDER BY id", ());
    let streamed: Vec<Record> = db
        .stream_query("SELECT id FROM s ORDER BY id", (), 0)
        .unwrap()
        .map(|row| {
            assert_eq!(row.status, RowStatus::Ok);
            row.record
        })
        .collect();
    assert_eq!(streamed.len(), queried.data.len());
    assert_eq!(streamed, queried.data);
}

#[test]
fn stream_query_batch_accumulates_counts() {
    let pool = sqlite_pool();
    let mut client = pool.client().unwrap();
    let mut db = client.db();

    db.execute("CREATE TABLE sb (id INTEGER)", ())
        .into_result()
        .unwrap();
    let rows: Vec<Record> = (1..=25).map(|i| Record::new().with("id", i)).collect();
    db.insert_bulk("sb", &rows, 0);

    let batches: Vec<StreamBatch> = db
        .stream_query_batch("SELECT id FROM sb", (), 10, 0)
        .unwrap()
        .collect();
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[0].rows.len(), 10);
    assert_eq!(batches[2].rows.len(), 5);
    assert_eq!(batches[2].count, 25);
}

#[test]
fn stream_writers_apply_and_commit() {
    let pool = sqlite_pool();
    let mut client = pool.client().unwrap();
    let mut db = client.db();

    db.execute("CREATE TABLE sw (id INTEGER PRIMARY KEY, v TEXT)", ())
        .into_result()
        .unwrap();

    let source: Vec<Record> = (1..=37)
        .map(|i| Record::new().with("id", i).with("v", "seed"))
        .collect();
    let options = StreamWriteOptions {
        commit_every: 10,
        max_errors: 0,
    };
    let written = db.stream_insert(source.clone(), "sw", &options);
    assert_eq!(written.status, 0);
    assert_eq!(written.count, 37);

    let updates: Vec<Record> = (1..=37)
        .map(|i| Record::new().with("id", i).with("v", "changed"))
        .collect();
    let updated = db.stream_update(updates, "sw", &["id"], &options);
    assert_eq!(updated.status, 0);
    let check = db.select("sw", &[], Some(&Condition::new().eq("id", 37)), None);
    assert_eq!(check.data[0].get("v"), Some(&DbValue::Text("changed".into())));

    // stream_merge honors no_update.
    let merges: Vec<Record> = (30..=45)
        .map(|i| Record::new().with("id", i).with("v", "merged"))
        .collect();
    let merged = db.stream_merge(merges, "sw", &["id"], None, true, &options);
    assert_eq!(merged.status, 0);
    let kept = db.select("sw", &[], Some(&Condition::new().eq("id", 30)), None);
    assert_eq!(kept.data[0].get("v"), Some(&DbValue::Text("changed".into())));
    let added = db.select("sw", &[], Some(&Condition::new().eq("id", 45)), None);
    assert_eq!(added.count, 1);
}

#[test]
fn stream_to_csv_writes_header_rows_and_nulls() {
    let pool = sqlite_pool();
    let mut client = pool.client().unwrap();
    let mut db = client.db();

    db.execute("CREATE TABLE csv_t (id INTEGER, name TEXT)", ())
        .into_result()
        .unwrap();
    db.insert("csv_t", &Record::new().with("id", 1).with("name", "a,b"), None);
    db.insert(
        "csv_t",
        &Record::new().with("id", 2).with("name", DbValue::Null),
        None,
    );

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.csv");
    let options = CsvOptions {
        null_value: "NULL".to_string(),
        ..CsvOptions::default()
    };
    let result = db.stream_to_csv("SELECT id, name FROM csv_t ORDER BY id", (), &path, &options);
    assert_eq!(result.status, 0);
    assert_eq!(result.count, 2);

    let content = std::fs::read_to_string(&path).unwrap();
    let mut lines = content.lines();
    assert_eq!(lines.next(), Some("id,name"));
    assert_eq!(lines.next(), Some("1,\"a,b\""));
    assert_eq!(lines.next(), Some("2,NULL"));
}

#[test]
fn generic_bulk_load_reads_csv_stream() {
    let pool = sqlite_pool();
    let mut client = pool.client().unwrap();
    let mut db = client.db();

    db.execute("CREATE TABLE loaded (id TEXT, name TEXT)", ())
        .into_result()
        .unwrap();

    let data = "id,name\n1,alice\n2,bob\n3,\n";
    let request = LoadRequest::from_reader(Box::new(std::io::Cursor::new(data.to_string())))
        .header(true);
    let result = db.bulk_load("loaded", request);
    assert_eq!(result.status, 0);
    assert_eq!(result.count, 3);

    let found = db.select("loaded", &[], None, None);
    assert_eq!(found.count, 3);
}

#[test]
fn execute_batch_commits_all_or_nothing() {
    let pool = sqlite_pool();
    {
        let mut client = pool.client().unwrap();
        client
            .db()
            .execute("CREATE TABLE batch (id INTEGER)", ())
            .into_result()
            .unwrap();
    }

    let ok_ops = vec![
        BatchOp::Insert {
            table: "batch".to_string(),
            rows: vec![Record::new().with("id", 1)],
        },
        BatchOp::Execute {
            sql: "INSERT INTO batch VALUES (2)".to_string(),
            params: vec![],
        },
    ];
    let results = pool.execute_batch(&ok_ops, None).unwrap();
    assert_eq!(results.len(), 2);

    let bad_ops = vec![
        BatchOp::Insert {
            table: "batch".to_string(),
            rows: vec![Record::new().with("id", 3)],
        },
        BatchOp::Execute {
            sql: "INSERT INTO no_such_table VALUES (1)".to_string(),
            params: vec![],
        },
    ];
    assert!(pool.execute_batch(&bad_ops, None).is_err());

    let mut client = pool.client().unwrap();
    let found = client.db().select("batch", &[], None, None);
    // Rows 1 and 2 committed; row 3 rolled back with the failing batch.
    assert_eq!(found.count, 2);
}

#[test]
fn run_script_executes_statements_in_order() {
    let pool = sqlite_pool();
    let mut client = pool.client().unwrap();
    let mut db = client.db();

    let script = "\
        CREATE TABLE sc (id INTEGER, note TEXT);\n\
        INSERT INTO sc VALUES (1, 'semi;colon');\n\
        INSERT INTO sc VALUES (2, 'plain');";
    let results = db.run_script(script, true);
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(DbResult::is_ok));

    let found = db.select("sc", &[], None, None);
    assert_eq!(found.count, 2);
}

#[test]
fn soft_pool_resets_connections_on_return() {
    let cfg = DatabaseConfig {
        backend: BackendType::Sqlite,
        database: Some(":memory:".into()),
        ..DatabaseConfig::default()
    };
    let pool = Pool::builder(cfg)
        .backend(PoolBackend::Soft)
        .max_cached(2)
        .build()
        .unwrap();

    {
        let mut client = pool.client().unwrap();
        let mut db = client.db();
        db.execute("CREATE TABLE soft (id INTEGER)", ())
            .into_result()
            .unwrap();
        // Leave an open transaction behind; the return path must clean it.
        client.connection().set_autocommit(false).unwrap();
        client
            .connection()
            .execute("INSERT INTO soft VALUES (1)", &[])
            .unwrap();
    }

    // Same cached connection, reset: table exists, write rolled back.
    let mut client = pool.client().unwrap();
    assert!(client.connection().autocommit());
    let found = client.db().select("soft", &[], None, None);
    assert_eq!(found.status, 0);
    assert_eq!(found.count, 0);

    pool.dispose();
}

#[test]
fn failed_sql_returns_error_envelope() {
    let pool = sqlite_pool();
    let mut client = pool.client().unwrap();
    let mut db = client.db();

    let result = db.query("SELECT * FROM missing_table", ());
    assert_eq!(result.status, -1);
    assert!(result.message.contains("missing_table"));
    assert!(result.data.is_empty());
}
