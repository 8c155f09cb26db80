use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_thesisd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn thesisd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
    expected_code: &str,
) -> Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    assert_eq!(
        value["error"]["code"].as_str(),
        Some(expected_code),
        "{} error: {}",
        method,
        value
    );
    value["error"].clone()
}

fn id_of(result: &Value) -> String {
    result["id"].as_str().expect("result id").to_string()
}

#[test]
fn actions_are_gated_by_explicit_role_checks() {
    let workspace = temp_dir("thesisd-perms");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let s = &mut stdin;
    let r = &mut reader;

    request_ok(
        s,
        r,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // First staff account bootstraps without an actor; afterwards the
    // elevated roles are staff-granted only.
    let staff = id_of(&request_ok(
        s,
        r,
        "u-staff",
        "users.create",
        json!({ "username": "staff", "password": "secret", "fullName": "Academic Affairs", "role": "staff" }),
    ));
    request_err(
        s,
        r,
        "u-rogue",
        "users.create",
        json!({ "username": "rogue", "password": "secret", "fullName": "Rogue", "role": "staff" }),
        "forbidden",
    );
    request_ok(
        s,
        r,
        "u-staff2",
        "users.create",
        json!({ "actorId": staff, "username": "staff2", "password": "secret", "fullName": "Second Staff", "role": "staff" }),
    );
    request_err(
        s,
        r,
        "u-dup",
        "users.create",
        json!({ "username": "staff", "password": "secret", "fullName": "Copy" }),
        "conflict",
    );

    let lecturer_user = id_of(&request_ok(
        s,
        r,
        "u-lect",
        "users.create",
        json!({ "username": "lect", "password": "secret", "fullName": "Lecturer", "role": "lecturer" }),
    ));
    let ministry = id_of(&request_ok(
        s,
        r,
        "u-min",
        "users.create",
        json!({ "actorId": staff, "username": "ministry", "password": "secret", "fullName": "Ministry", "role": "ministry" }),
    ));

    let major = id_of(&request_ok(
        s,
        r,
        "major",
        "majors.create",
        json!({ "actorId": staff, "name": "Computer Science" }),
    ));
    let year = id_of(&request_ok(
        s,
        r,
        "year",
        "school_years.create",
        json!({ "actorId": staff, "name": "2024-2025" }),
    ));

    // Thesis creation: staff only.
    request_err(
        s,
        r,
        "t-anon",
        "theses.create",
        json!({ "code": "T100", "name": "Nope", "majorId": major, "schoolYearId": year }),
        "forbidden",
    );
    request_err(
        s,
        r,
        "t-lect",
        "theses.create",
        json!({ "actorId": lecturer_user, "code": "T100", "name": "Nope",
                "majorId": major, "schoolYearId": year }),
        "forbidden",
    );
    request_ok(
        s,
        r,
        "t-ok",
        "theses.create",
        json!({ "actorId": staff, "code": "T100", "name": "Allowed",
                "majorId": major, "schoolYearId": year }),
    );

    // Catalog creation is staff work too.
    request_err(
        s,
        r,
        "m-lect",
        "majors.create",
        json!({ "actorId": lecturer_user, "name": "Economics" }),
        "forbidden",
    );

    // Self-profile requires authentication and edits only the caller.
    request_err(s, r, "me-anon", "users.current", json!({}), "forbidden");
    let me = request_ok(
        s,
        r,
        "me",
        "users.current",
        json!({ "actorId": lecturer_user }),
    );
    assert_eq!(me["username"].as_str(), Some("lect"));
    let renamed = request_ok(
        s,
        r,
        "me-edit",
        "users.update_current",
        json!({ "actorId": lecturer_user, "fullName": "Dr. Lecturer", "password": "rotated" }),
    );
    assert_eq!(renamed["fullName"].as_str(), Some("Dr. Lecturer"));

    request_err(
        s,
        r,
        "me-ghost",
        "users.current",
        json!({ "actorId": "missing" }),
        "forbidden",
    );

    // Ministry statistics: ministry only.
    request_err(s, r, "st-anon", "stats.summary", json!({}), "forbidden");
    request_err(
        s,
        r,
        "st-staff",
        "stats.summary",
        json!({ "actorId": staff }),
        "forbidden",
    );
    let stats = request_ok(
        s,
        r,
        "st-min",
        "stats.summary",
        json!({ "actorId": ministry }),
    );
    let by_year = stats["bySchoolYear"].as_array().expect("by year");
    assert_eq!(by_year.len(), 1);
    assert_eq!(by_year[0]["thesisCount"].as_i64(), Some(1));
    assert_eq!(by_year[0]["scoredCount"].as_i64(), Some(0));
    assert!(by_year[0]["averageTotalScore"].is_null());

    drop(stdin);
    let _ = child.wait();
}
