use shared::domain::{Direction, EventId, OrgId};
use storage::Storage;

async fn temp_storage(tag: &str) -> (Storage, std::path::PathBuf) {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = std::env::temp_dir().join(format!("kiosk_ledger_{tag}_{suffix}"));
    let db_path = temp_root.join("ledger.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));
    (Storage::new(&database_url).await.expect("db"), temp_root)
}

#[tokio::test]
async fn interleaved_appends_keep_per_employee_histories_consistent() {
    let (storage, temp_root) = temp_storage("interleaved").await;
    let org = OrgId(7);

    let mut employees = Vec::new();
    for name in ["alice", "bob", "carol"] {
        employees.push(storage.add_employee(org, name).await.expect("employee"));
    }

    // Round-robin toggling: each employee alternates independently even
    // though the appends interleave in the ledger.
    let mut last: Vec<Option<EventId>> = vec![None; employees.len()];
    for round in 0..4 {
        for (i, employee) in employees.iter().enumerate() {
            let direction = if round % 2 == 0 {
                Direction::In
            } else {
                Direction::Out
            };
            let event = storage
                .append_event(employee.id, org, direction, last[i])
                .await
                .expect("append")
                .expect("committed");
            last[i] = Some(event.id);
        }
    }

    for employee in &employees {
        let history = storage
            .events_for_employee(employee.id)
            .await
            .expect("history");
        assert_eq!(history.len(), 4);
        assert!(history
            .windows(2)
            .all(|w| w[0].direction != w[1].direction));
        assert_eq!(history[0].direction, Direction::In);
    }

    let batched = storage.latest_events_for_org(org).await.expect("batched");
    for employee in &employees {
        let single = storage
            .latest_event_for(employee.id)
            .await
            .expect("latest")
            .expect("event");
        assert_eq!(batched[&employee.id].id, single.id);
        assert_eq!(single.direction, Direction::Out);
    }

    std::fs::remove_dir_all(temp_root).expect("cleanup");
}

#[tokio::test]
async fn soft_deleted_employee_keeps_ledger_history() {
    let (storage, temp_root) = temp_storage("softdelete").await;
    let org = OrgId(7);
    let employee = storage.add_employee(org, "mallory").await.expect("employee");

    let event = storage
        .append_event(employee.id, org, Direction::In, None)
        .await
        .expect("append")
        .expect("committed");
    storage
        .soft_delete_employee(employee.id)
        .await
        .expect("soft delete");

    assert!(storage
        .list_active_employees(org)
        .await
        .expect("roster")
        .is_empty());
    let history = storage
        .events_for_employee(employee.id)
        .await
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, event.id);

    std::fs::remove_dir_all(temp_root).expect("cleanup");
}
