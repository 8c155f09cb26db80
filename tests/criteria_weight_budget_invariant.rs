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
fn criteria_weights_for_a_thesis_never_exceed_one() {
    let workspace = temp_dir("thesisd-weights");
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
    let staff = id_of(&request_ok(
        s,
        r,
        "u1",
        "users.create",
        json!({ "username": "staff", "password": "secret", "fullName": "Academic Affairs", "role": "staff" }),
    ));
    let major = id_of(&request_ok(
        s,
        r,
        "m1",
        "majors.create",
        json!({ "actorId": staff, "name": "Computer Science" }),
    ));
    let year = id_of(&request_ok(
        s,
        r,
        "y1",
        "school_years.create",
        json!({ "actorId": staff, "name": "2024-2025" }),
    ));
    let thesis = id_of(&request_ok(
        s,
        r,
        "t1",
        "theses.create",
        json!({ "actorId": staff, "code": "T001", "name": "Query planning for embedded stores",
                "majorId": major, "schoolYearId": year }),
    ));

    let content = id_of(&request_ok(
        s,
        r,
        "c1",
        "criteria.create",
        json!({ "actorId": staff, "name": "Content", "evaluationMethod": "Committee review" }),
    ));
    let defense = id_of(&request_ok(
        s,
        r,
        "c2",
        "criteria.create",
        json!({ "actorId": staff, "name": "Defense", "evaluationMethod": "Oral presentation" }),
    ));

    // Out-of-range weights are rejected outright.
    request_err(
        s,
        r,
        "w0",
        "theses.add_criteria",
        json!({ "actorId": staff, "thesisId": thesis, "criteriaId": content, "weight": 1.2 }),
        "validation",
    );
    request_err(
        s,
        r,
        "w1",
        "theses.add_criteria",
        json!({ "actorId": staff, "thesisId": thesis, "criteriaId": content, "weight": -0.1 }),
        "validation",
    );

    // 0.6 fits; adding 0.5 would push the total to 1.1.
    request_ok(
        s,
        r,
        "w2",
        "theses.add_criteria",
        json!({ "actorId": staff, "thesisId": thesis, "criteriaId": content, "weight": 0.6 }),
    );
    let over = request_err(
        s,
        r,
        "w3",
        "theses.add_criteria",
        json!({ "actorId": staff, "thesisId": thesis, "criteriaId": defense, "weight": 0.5 }),
        "validation",
    );
    assert!(
        (over["details"]["weightSpent"].as_f64().expect("spent") - 0.6).abs() < 1e-9
    );

    // Re-attaching the same criteria is a conflict, not a weight issue.
    request_err(
        s,
        r,
        "w4",
        "theses.add_criteria",
        json!({ "actorId": staff, "thesisId": thesis, "criteriaId": content, "weight": 0.2 }),
        "conflict",
    );

    // Exactly filling the budget is fine.
    request_ok(
        s,
        r,
        "w5",
        "theses.add_criteria",
        json!({ "actorId": staff, "thesisId": thesis, "criteriaId": defense, "weight": 0.4 }),
    );
    let listed = request_ok(
        s,
        r,
        "w6",
        "theses.criteria",
        json!({ "thesisId": thesis }),
    );
    assert_eq!(listed["items"].as_array().expect("items").len(), 2);
    assert!((listed["weightSpent"].as_f64().expect("spent") - 1.0).abs() < 1e-9);
    assert!(listed["weightRemaining"].as_f64().expect("remaining").abs() < 1e-9);

    // Unknown references come back as not_found.
    request_err(
        s,
        r,
        "w7",
        "theses.add_criteria",
        json!({ "actorId": staff, "thesisId": "missing", "criteriaId": content, "weight": 0.1 }),
        "not_found",
    );
    request_err(
        s,
        r,
        "w8",
        "theses.add_criteria",
        json!({ "actorId": staff, "thesisId": thesis, "criteriaId": "missing", "weight": 0.1 }),
        "not_found",
    );

    drop(stdin);
    let _ = child.wait();
}
