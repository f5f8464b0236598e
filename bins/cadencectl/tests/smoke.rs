use assert_cmd::Command;
use predicates::prelude::*;

fn ctl() -> Command {
    Command::cargo_bin("cadencectl").unwrap()
}

#[test]
fn preview_prints_bounded_sequence() {
    ctl()
        .args(["preview", "--start", "2023-03-06T14:00:00+05:00", "--unit", "hour", "--repeat", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2023-03-06T14:00:00+05:00"))
        .stdout(predicate::str::contains("2023-03-06T16:00:00+05:00"))
        .stdout(predicate::str::contains("3 fire time(s) total"));
}

#[test]
fn preview_clamps_month_end() {
    ctl()
        .args([
            "preview", "--start", "2024-01-31T00:00:00Z", "--unit", "month", "--repeat", "-1", "--limit", "2",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("2024-02-29T00:00:00+00:00"))
        .stdout(predicate::str::contains("repeats indefinitely"));
}

#[test]
fn preview_rejects_negative_period() {
    ctl()
        .args(["preview", "--start", "2024-01-01T00:00:00Z", "--period=-5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("period must not be negative"));
}

#[test]
fn validate_accepts_good_job() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job.json");
    std::fs::write(
        &path,
        r#"{
            "id": "nightly",
            "trigger": {"start_time": "2030-01-01T02:00:00+01:00", "period": 1, "period_unit": "day", "repeat_count": -1},
            "recipient": {"type": "http", "url": "https://example.test/hook", "method": "POST"}
        }"#,
    )
    .unwrap();
    ctl()
        .arg("validate")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("ok id=nightly"))
        .stdout(predicate::str::contains("2030-01-01T02:00:00+01:00"));
}

#[test]
fn validate_rejects_bad_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job.json");
    std::fs::write(
        &path,
        r#"{
            "trigger": {"start_time": "2030-01-01T00:00:00Z", "period": 1, "period_unit": "hour"},
            "recipient": {"type": "http", "url": "ftp://example.test"}
        }"#,
    )
    .unwrap();
    ctl()
        .arg("validate")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid recipient url"));
}

#[test]
fn jobs_on_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    ctl()
        .arg("--data-dir")
        .arg(dir.path())
        .arg("jobs")
        .assert()
        .success()
        .stdout(predicate::str::contains("no jobs"));
}

#[test]
fn purge_unknown_job_fails() {
    let dir = tempfile::tempdir().unwrap();
    ctl()
        .arg("--data-dir")
        .arg(dir.path())
        .args(["purge", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no job ghost"));
}
