//! Test for connection retry logic
//!
//! Run with: cargo test --test connection_retry_test -- --nocapture

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use schemaver_core::adapters::duckdb::{DuckDbStore, DEFAULT_OPEN_RETRIES};
use schemaver_core::{fetch_schema_version, migrate, StatementCatalog};

fn catalog() -> StatementCatalog {
    StatementCatalog::from_static(&[
        "CREATE TABLE a (x INTEGER)",
        "CREATE TABLE b (y INTEGER)",
    ])
}

/// A process restarting repeatedly finds its ledger every time
#[test]
fn test_sequential_connections() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test_sequential.duckdb");

    for i in 0..5 {
        let start = Instant::now();
        let store = DuckDbStore::open(&db_path, DEFAULT_OPEN_RETRIES).unwrap();
        let report = migrate(&store, &catalog()).unwrap();
        println!("Connection {}: migrated in {:?}", i, start.elapsed());

        if i == 0 {
            assert_eq!(report.applied, vec![1, 2]);
        } else {
            assert!(report.applied.is_empty());
            assert_eq!(report.already_applied, 2);
        }
        // Connection dropped at end of loop
    }
}

/// An instance starting while another still holds the file waits for it
#[test]
fn test_open_waits_for_busy_file() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = Arc::new(temp_dir.path().join("test_busy.duckdb"));
    let barrier = Arc::new(Barrier::new(2));

    let holder = {
        let db_path = Arc::clone(&db_path);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let store = DuckDbStore::open(&db_path, DEFAULT_OPEN_RETRIES).unwrap();
            migrate(&store, &catalog()).unwrap();
            barrier.wait();
            // Hold the file briefly to create contention
            thread::sleep(Duration::from_millis(100));
        })
    };

    barrier.wait();
    let start = Instant::now();
    let store = DuckDbStore::open(&db_path, DEFAULT_OPEN_RETRIES).unwrap();
    println!("Second instance opened after {:?}", start.elapsed());
    holder.join().unwrap();

    let report = migrate(&store, &catalog()).unwrap();
    assert!(report.applied.is_empty());
    assert_eq!(fetch_schema_version(&store).unwrap().len(), 2);
}
