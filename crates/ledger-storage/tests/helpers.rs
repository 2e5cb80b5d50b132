use std::fs;

use ledger_core::store::{PendingRecord, VoteKey};
use ledger_storage::SledStore;
use tempfile::{tempdir, TempDir};

#[allow(dead_code)]
pub fn create_temp_store() -> (TempDir, SledStore) {
    // Create a temporary directory for the sled database
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().to_path_buf();
    (
        temp_dir,
        SledStore::open(&db_path).expect("Failed to open SledStore"),
    )
}

#[allow(dead_code)]
pub fn teardown_store(temp_dir: TempDir, store: SledStore) {
    let db_path = temp_dir.path().to_path_buf();
    store.clear().expect("Failed to clear the store");
    drop(store);
    temp_dir.close().expect("Failed to delete temp dir");
    let _ = fs::remove_dir_all(&db_path);
    assert!(!db_path.exists(), "Database directory should be removed");
}

#[allow(dead_code)]
pub fn vote_record(voter: &str, election: &str, candidate: &str) -> (VoteKey, PendingRecord) {
    let key = VoteKey::new(voter, election, format!("id-{candidate}"));
    let record = PendingRecord::vote(&key, candidate, "ELECTION_SYSTEM");
    (key, record)
}
