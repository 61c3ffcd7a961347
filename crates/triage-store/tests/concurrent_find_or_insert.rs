//! Concurrent writers racing `find_or_insert_bug` on one match key must end
//! up sharing a single bug row.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use triage_store::{Database, NewProject, StoreOptions};
use triage_types::{CommitId, EnvironmentId, NewBug, SearchCriteria, Timestamp};

fn new_bug(env: EnvironmentId) -> NewBug {
    NewBug {
        environment_id: env,
        deploy_id: None,
        criteria: SearchCriteria {
            class_name: "ArgumentError".to_owned(),
            file: "lib/a.rb".to_owned(),
            line: 5,
            blamed_revision: Some(CommitId::parse(&"c".repeat(40)).expect("valid commit")),
            message: None,
        },
        message_template: "wrong number of arguments".to_owned(),
        special_file: false,
        first_occurrence_at: Timestamp::from_millis(1),
    }
}

#[test]
fn test_racing_writers_create_one_bug() {
    let n_threads = 8;
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let db = Database::open(
        dir.path().join("triage.db"),
        StoreOptions {
            busy_timeout: Duration::from_secs(10),
            pool_size: n_threads,
        },
    )
    .expect("database should open");
    let env = db
        .immediate(|tx| {
            let project = tx.insert_project(&NewProject::new("p", "k", "repo"))?;
            tx.find_or_create_environment(project.id, "production")
        })
        .expect("seed should succeed")
        .id;

    let barrier = Arc::new(Barrier::new(n_threads));
    let handles: Vec<_> = (0..n_threads)
        .map(|_| {
            let db = db.clone();
            let bar = Arc::clone(&barrier);
            thread::spawn(move || {
                bar.wait();
                loop {
                    match db.immediate(|tx| tx.find_or_insert_bug(&new_bug(env))) {
                        Ok(result) => return result,
                        Err(err) if err.is_transient() => thread::yield_now(),
                        Err(err) => panic!("unexpected error: {err}"),
                    }
                }
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("writer thread should not panic"))
        .collect();

    let created = results.iter().filter(|(_, created)| *created).count();
    assert_eq!(created, 1, "exactly one writer must create the bug");
    let first_id = results[0].0.id;
    assert!(results.iter().all(|(bug, _)| bug.id == first_id));
    let count = db
        .read(|tx| tx.count_bugs(env))
        .expect("count should succeed");
    assert_eq!(count, 1);
}
