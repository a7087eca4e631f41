//! `GitStore` against a scratch repository.
//!
//! Skipped when no `git` binary is on the PATH.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;
use tickbox_core::clock::ManualClock;
use tickbox_core::store::{GitStore, Transaction, VersionedStore};
use tickbox_core::{Author, CreateOptions, StoreError, TicketError, Tracker};

const EPOCH: i64 = 1_720_000_000;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git should run");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim_end().to_string()
}

fn scratch_repo() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    git(dir.path(), &["init", "-q"]);
    git(dir.path(), &["config", "user.email", "dev@example.com"]);
    git(dir.path(), &["config", "user.name", "Dev"]);
    git(dir.path(), &["config", "commit.gpgsign", "false"]);
    dir
}

fn open_tracker(dir: &Path) -> Tracker<GitStore, Arc<ManualClock>> {
    let store = GitStore::open(dir, "ticgit").expect("open store");
    let author = Author::resolve(&store, &Default::default()).expect("author");
    Tracker::with_clock(store, author, Arc::new(ManualClock::at(EPOCH))).with_seed(7)
}

#[test]
fn outside_a_repository_is_rejected() {
    if !git_available() {
        return;
    }
    let dir = TempDir::new().expect("tempdir");
    let err = GitStore::open(dir.path(), "ticgit").expect_err("should fail");
    assert!(matches!(err, StoreError::NotARepository(_)));
}

#[test]
fn mutations_land_on_the_maintenance_branch() -> Result<(), TicketError> {
    if !git_available() {
        return Ok(());
    }
    let repo = scratch_repo();
    let mut tracker = open_tracker(repo.path());
    assert_eq!(tracker.author().email, "dev@example.com");
    assert_eq!(tracker.author().name.as_deref(), Some("Dev"));

    let mut ticket = tracker.create(
        "Crash on save",
        &CreateOptions {
            comment: Some("stack trace attached".into()),
            tags: vec!["urgent".into()],
        },
    )?;
    tracker.change_state(&mut ticket, Some("resolved"))?;
    tracker.add_tag(&mut ticket, "backend, urgent")?;
    tracker.remove_tag(&mut ticket, "urgent")?;
    tracker.change_points(&mut ticket, 3)?;
    tracker.attach(&mut ticket, "trace.txt", b"at main.rs:1")?;

    let name = ticket.ticket_name.clone();
    let log = git(repo.path(), &["log", "--format=%s", "ticgit"]);
    let subjects: Vec<&str> = log.lines().rev().collect();
    assert_eq!(
        subjects,
        vec![
            format!("added ticket {name}"),
            format!("added state (resolved) to ticket {name}"),
            format!("added tags (backend) to ticket {name}"),
            format!("removed tags (urgent) from ticket {name}"),
            format!("set points to 3 for ticket {name}"),
            format!("added attachment trace.txt to ticket {name}"),
        ]
    );

    let listing = git(repo.path(), &["ls-tree", "--name-only", "ticgit", &format!("{name}/")]);
    assert!(listing.contains(&format!("{name}/STATE_resolved")));
    assert!(!listing.contains(&format!("{name}/STATE_open")));
    assert!(listing.contains(&format!("{name}/TAG_backend")));

    // a fresh store sees exactly what the first one committed
    let reopened = open_tracker(repo.path()).open(&name)?;
    assert_eq!(reopened, ticket);
    assert_eq!(reopened.points, Some(3));
    assert_eq!(
        reopened.attachments[0].load(tracker.store())?,
        b"at main.rs:1".to_vec()
    );
    Ok(())
}

#[test]
fn user_checkout_is_left_alone() -> Result<(), TicketError> {
    if !git_available() {
        return Ok(());
    }
    let repo = scratch_repo();
    std::fs::write(repo.path().join("README"), "hello").expect("write file");
    git(repo.path(), &["add", "README"]);
    git(repo.path(), &["commit", "-q", "-m", "initial"]);
    std::fs::write(repo.path().join("notes.txt"), "wip").expect("write file");
    git(repo.path(), &["add", "notes.txt"]);

    let mut tracker = open_tracker(repo.path());
    tracker.create("Stay out of my index", &CreateOptions::default())?;

    let staged = git(repo.path(), &["diff", "--cached", "--name-only"]);
    assert_eq!(staged, "notes.txt");
    let head = git(repo.path(), &["log", "-1", "--format=%s"]);
    assert_eq!(head, "initial");
    Ok(())
}

#[test]
fn concurrent_writer_is_detected() -> Result<(), TicketError> {
    if !git_available() {
        return Ok(());
    }
    let repo = scratch_repo();
    let mut first = open_tracker(repo.path());
    let ticket = first.create("Race", &CreateOptions::default())?;

    let mut store = first.into_store();
    let mut tx = Transaction::begin(&mut store)?;
    tx.write(&format!("{}/TAG_late", ticket.ticket_name), "TAG_late")?;

    // another writer advances the branch meanwhile
    let mut other = open_tracker(repo.path());
    let mut theirs = other.open(&ticket.ticket_name)?;
    other.add_tag(&mut theirs, "early")?;
    let tip_after_other = git(repo.path(), &["rev-parse", "ticgit"]);

    let err = tx.commit("added tags (late)").expect_err("should fail");
    assert!(matches!(err, StoreError::BranchMoved { .. }));
    assert_eq!(git(repo.path(), &["rev-parse", "ticgit"]), tip_after_other);

    // the losing store can begin again from the new tip
    store.begin()?;
    assert!(store.exists(&format!("{}/TAG_early", ticket.ticket_name))?);
    store.rollback()?;
    Ok(())
}
