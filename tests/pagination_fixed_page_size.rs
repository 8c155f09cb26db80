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
fn lists_page_five_at_a_time_with_filters() {
    let workspace = temp_dir("thesisd-paging");
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
        "u-staff",
        "users.create",
        json!({ "username": "staff", "password": "secret", "fullName": "Academic Affairs", "role": "staff" }),
    ));

    for i in 0..7 {
        request_ok(
            s,
            r,
            &format!("l{}", i),
            "lecturers.create",
            json!({
                "actorId": staff,
                "fullName": format!("Lecturer {:02}", i),
                "faculty": if i < 4 { "IT" } else { "Math" },
            }),
        );
    }

    let page1 = request_ok(s, r, "p1", "lecturers.list", json!({}));
    assert_eq!(page1["items"].as_array().expect("items").len(), 5);
    assert_eq!(page1["page"].as_i64(), Some(1));
    assert_eq!(page1["pageSize"].as_i64(), Some(5));
    assert_eq!(page1["total"].as_i64(), Some(7));
    assert_eq!(page1["pageCount"].as_i64(), Some(2));
    assert_eq!(
        page1["items"][0]["fullName"].as_str(),
        Some("Lecturer 00")
    );

    let page2 = request_ok(s, r, "p2", "lecturers.list", json!({ "page": 2 }));
    assert_eq!(page2["items"].as_array().expect("items").len(), 2);
    assert_eq!(
        page2["items"][1]["fullName"].as_str(),
        Some("Lecturer 06")
    );

    let page3 = request_ok(s, r, "p3", "lecturers.list", json!({ "page": 3 }));
    assert_eq!(page3["items"].as_array().expect("items").len(), 0);

    request_err(
        s,
        r,
        "p0",
        "lecturers.list",
        json!({ "page": 0 }),
        "bad_params",
    );

    // Filters compose with paging: 3 Math lecturers fit one page.
    let math = request_ok(s, r, "f1", "lecturers.list", json!({ "faculty": "Math" }));
    assert_eq!(math["total"].as_i64(), Some(3));
    assert_eq!(math["pageCount"].as_i64(), Some(1));

    let named = request_ok(s, r, "f2", "lecturers.list", json!({ "q": "lecturer 0" }));
    assert_eq!(named["total"].as_i64(), Some(7));

    drop(stdin);
    let _ = child.wait();
}
