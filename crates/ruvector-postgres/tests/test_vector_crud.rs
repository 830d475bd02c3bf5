//! Integration tests for vector insert/search/update/delete and index
//! management through `VectorOperations`.
//!
//! These require a running PostgreSQL instance with the `vector` extension
//! installed. Set `DATABASE_URL`, then run with:
//!
//!   cargo test -p ruvector-postgres test_vector_crud -- --ignored

use ruvector_postgres::{
    ConnectionConfig, DistanceMetric, IndexOptions, IndexType, InsertOptions, InsertRow,
    ParamValue, RuVectorBridge, SearchOptions, Vector,
};
use serde_json::json;

fn database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/ruvector_test".into())
}

async fn bridge() -> RuVectorBridge {
    let bridge = RuVectorBridge::new(ConnectionConfig::new(database_url()));
    bridge.initialize().await.expect("bridge should initialize against a live database");
    bridge
}

#[tokio::test]
#[ignore]
async fn insert_then_search_returns_nearest_neighbor_first() {
    let bridge = bridge().await;
    let table = "crud_search_test";

    let options = InsertOptions::new(table);
    let rows = vec![
        InsertRow { id: None, vector: Vector::new(vec![1.0, 0.0, 0.0]).unwrap(), metadata: Some(json!({"label": "a"})) },
        InsertRow { id: None, vector: Vector::new(vec![0.0, 1.0, 0.0]).unwrap(), metadata: Some(json!({"label": "b"})) },
    ];
    let inserted = bridge.vectors().insert(&options, rows, false).await.unwrap();
    assert_eq!(inserted.results.len(), 2);

    let search_options = SearchOptions::new(table, DistanceMetric::Cosine, 1);
    let results = bridge
        .vectors()
        .search(&search_options, &Vector::new(vec![1.0, 0.0, 0.0]).unwrap())
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, inserted.results[0]);
}

#[tokio::test]
#[ignore]
async fn batch_search_honors_each_querys_own_filter() {
    let bridge = bridge().await;
    let table = "crud_batch_search_test";

    let mut a = SearchOptions::new(table, DistanceMetric::Cosine, 5);
    a.custom_where = Some("metadata->>'label' = $1".into());
    a.custom_where_params = vec![ParamValue::Text("a".into())];

    let mut b = SearchOptions::new(table, DistanceMetric::Cosine, 5);
    b.custom_where = Some("metadata->>'label' = $1".into());
    b.custom_where_params = vec![ParamValue::Text("b".into())];

    let queries = vec![
        (a, Vector::new(vec![1.0, 0.0, 0.0]).unwrap()),
        (b, Vector::new(vec![0.0, 1.0, 0.0]).unwrap()),
    ];
    let outcome = bridge.vectors().batch_search(queries, 4).await;
    assert_eq!(outcome.results.len(), 2);
    for r in outcome.results {
        r.unwrap();
    }
}

#[tokio::test]
#[ignore]
async fn update_then_delete_round_trips() {
    let bridge = bridge().await;
    let table = "crud_update_delete_test";

    let options = InsertOptions::new(table);
    let rows = vec![InsertRow { id: None, vector: Vector::new(vec![1.0, 1.0, 1.0]).unwrap(), metadata: None }];
    let inserted = bridge.vectors().insert(&options, rows, false).await.unwrap();
    let id = inserted.results[0];

    let updated = bridge
        .vectors()
        .update(&options, ParamValue::BigInt(id), Some(&Vector::new(vec![2.0, 2.0, 2.0]).unwrap()), None, false)
        .await
        .unwrap();
    assert!(updated);

    let deleted = bridge.vectors().delete(table, "id", ParamValue::BigInt(id)).await.unwrap();
    assert!(deleted);

    let deleted_again = bridge.vectors().delete(table, "id", ParamValue::BigInt(id)).await.unwrap();
    assert!(!deleted_again);
}

#[tokio::test]
#[ignore]
async fn bulk_delete_removes_every_listed_id() {
    let bridge = bridge().await;
    let table = "crud_bulk_delete_test";

    let options = InsertOptions::new(table);
    let rows = vec![
        InsertRow { id: None, vector: Vector::new(vec![1.0, 0.0]).unwrap(), metadata: None },
        InsertRow { id: None, vector: Vector::new(vec![0.0, 1.0]).unwrap(), metadata: None },
        InsertRow { id: None, vector: Vector::new(vec![1.0, 1.0]).unwrap(), metadata: None },
    ];
    let inserted = bridge.vectors().insert(&options, rows, false).await.unwrap();

    let affected = bridge.vectors().bulk_delete(table, "id", inserted.results.clone()).await.unwrap();
    assert_eq!(affected.successful, inserted.results.len());

    let stats = bridge.vectors().get_table_stats(table).await.unwrap();
    assert_eq!(stats.row_count, 0);
}

#[tokio::test]
#[ignore]
async fn insert_batched_skips_invalid_rows_when_asked() {
    let bridge = bridge().await;
    let table = "crud_insert_batched_test";
    let options = InsertOptions::new(table);

    let rows = vec![
        InsertRow { id: None, vector: Vector::new(vec![1.0, 0.0]).unwrap(), metadata: None },
        InsertRow { id: None, vector: Vector::new(vec![0.0, 1.0]).unwrap(), metadata: None },
    ];
    let result = bridge.vectors().insert_batched(&options, rows, 1, true).await.unwrap();
    assert_eq!(result.successful, 2);
    assert_eq!(result.failed, 0);
}

#[tokio::test]
#[ignore]
async fn create_search_drop_hnsw_index() {
    let bridge = bridge().await;
    let table = "crud_index_test";
    let index_name = "crud_index_test_hnsw";

    let mut index_options = IndexOptions::new(index_name, table, IndexType::Hnsw, DistanceMetric::Cosine);
    index_options.hnsw_m = Some(16);
    index_options.hnsw_ef_construction = Some(64);

    bridge.vectors().create_index(&index_options).await.unwrap();

    let indices = bridge.vectors().list_indices(Some(table)).await.unwrap();
    assert!(indices.iter().any(|i| i.index_name == index_name));

    let stats = bridge.vectors().index_stats(index_name).await.unwrap();
    assert_eq!(stats.index_name, index_name);

    bridge.vectors().drop_index(&index_options, false, true).await.unwrap();
}
