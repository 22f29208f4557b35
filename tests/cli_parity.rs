use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

fn temp_workspace(name: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!("fuzzstate-cli-{name}-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&root).expect("create temp workspace");
    root
}

fn run_cli(cwd: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_fuzzstate"))
        .current_dir(cwd)
        .env_remove("FUZZSTATE_BASE_URL")
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("run cli")
}

fn write_cases(ws: &Path, lines: &[&str]) -> String {
    let path = ws.join("cases.jsonl");
    std::fs::write(&path, lines.join("\n")).expect("write cases");
    path.to_string_lossy().to_string()
}

fn read_request(stream: &mut std::net::TcpStream) -> (String, String) {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut buf).unwrap_or(0);
        if n == 0 {
            break raw.len();
        }
        raw.extend_from_slice(&buf[..n]);
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&raw[..header_end.min(raw.len())]).to_string();
    let content_length = head
        .lines()
        .find_map(|l| {
            let (k, v) = l.split_once(':')?;
            k.eq_ignore_ascii_case("content-length").then(|| v.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);
    while raw.len() < header_end + content_length {
        let n = stream.read(&mut buf).unwrap_or(0);
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&buf[..n]);
    }
    let request_line = head.lines().next().unwrap_or_default().to_string();
    let body = String::from_utf8_lossy(&raw[header_end.min(raw.len())..]).to_string();
    (request_line, body)
}

/// Minimal user API: list, create (201 + relative Location), delete (204).
fn spawn_user_api_server() -> (String, Arc<Mutex<Vec<String>>>, mpsc::Sender<()>) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind http listener");
    listener
        .set_nonblocking(true)
        .expect("set nonblocking listener");
    let addr = listener.local_addr().expect("local addr");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    thread::spawn(move || {
        let start = std::time::Instant::now();
        let mut users: Vec<(i64, String)> = Vec::new();
        let mut next_id = 1i64;
        loop {
            if stop_rx.try_recv().is_ok() || start.elapsed() > Duration::from_secs(10) {
                break;
            }
            match listener.accept() {
                Ok((mut stream, _)) => {
                    let _ = stream.set_nonblocking(false);
                    let (line, body) = read_request(&mut stream);
                    let mut parts = line.split_whitespace();
                    let method = parts.next().unwrap_or_default().to_string();
                    let target = parts.next().unwrap_or_default().to_string();
                    let path = target.split('?').next().unwrap_or_default().to_string();
                    log.lock().expect("request log").push(format!("{method} {path}"));

                    let (status, extra, payload) = match (method.as_str(), path.as_str()) {
                        ("GET", "/api/v1/users") => {
                            let list: Vec<serde_json::Value> = users
                                .iter()
                                .map(|(id, name)| serde_json::json!({ "id": id, "name": name }))
                                .collect();
                            ("200 OK", String::new(), serde_json::json!({ "users": list }).to_string())
                        }
                        ("POST", "/api/v1/users") => {
                            let name = serde_json::from_str::<serde_json::Value>(&body)
                                .ok()
                                .and_then(|v| v["name"].as_str().map(str::to_string))
                                .unwrap_or_default();
                            let id = next_id;
                            next_id += 1;
                            users.push((id, name));
                            ("201 Created", format!("Location: /api/v1/users/{id}\r\n"), String::new())
                        }
                        ("DELETE", p) if p.starts_with("/api/v1/users/") => {
                            let id = p.trim_start_matches("/api/v1/users/").parse::<i64>().ok();
                            match id.and_then(|id| users.iter().position(|(uid, _)| *uid == id)) {
                                Some(idx) => {
                                    users.remove(idx);
                                    ("204 No Content", String::new(), String::new())
                                }
                                None => ("404 Not Found", String::new(), String::new()),
                            }
                        }
                        _ => ("404 Not Found", String::new(), String::new()),
                    };
                    let response = format!(
                        "HTTP/1.1 {status}\r\n{extra}Content-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
                        payload.len()
                    );
                    let _ = stream.write_all(response.as_bytes());
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(_) => break,
            }
        }
    });
    (format!("http://{addr}"), seen, stop_tx)
}

#[test]
fn drive_against_http_double_shapes_and_reconciles() {
    let (base_url, seen, stop_tx) = spawn_user_api_server();
    let ws = temp_workspace("host");
    let cases = write_cases(
        &ws,
        &[
            r#"{"method":"POST","path":"/api/v1/users","body":{"name":""}}"#,
            r#"{"method":"DELETE","path":"/api/v1/users/{user_id}","path_parameters":{"user_id":999}}"#,
        ],
    );
    let trace = ws.join("run.trace.json");
    let trace_arg = trace.to_string_lossy().to_string();

    let out = run_cli(
        &ws,
        &["drive", "--cases", &cases, "--base-url", &base_url, "--seed", "5", "--trace-out", &trace_arg],
    );
    let _ = stop_tx.send(());
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));

    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("[fuzzstate] run statistics"), "stdout={stdout}");
    assert_eq!(stdout.matches("run statistics").count(), 1, "stdout={stdout}");
    assert!(!String::from_utf8_lossy(&out.stderr).contains("run statistics"));
    assert!(stdout.contains("total cases: 2"), "stdout={stdout}");
    assert!(stdout.contains("status 201: 1"), "stdout={stdout}");
    assert!(stdout.contains("status 204: 1"), "stdout={stdout}");

    let requests = seen.lock().expect("request log").clone();
    assert_eq!(
        requests,
        vec![
            "GET /api/v1/users".to_string(),
            "POST /api/v1/users".to_string(),
            "POST /api/v1/users".to_string(),
            "DELETE /api/v1/users/2".to_string(),
        ]
    );

    let saved = fuzzstate::TraceFile::read_json(&trace).expect("trace written");
    assert_eq!(saved.stats.total, 2);
    assert!(saved.events.iter().any(|e| e.name == "mirror_remove"));
}

/// Accepts connections and never answers, so every request runs into its timeout.
fn spawn_stalled_server() -> (String, mpsc::Sender<()>) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind http listener");
    listener
        .set_nonblocking(true)
        .expect("set nonblocking listener");
    let addr = listener.local_addr().expect("local addr");
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    thread::spawn(move || {
        let start = std::time::Instant::now();
        let mut held = Vec::new();
        loop {
            if stop_rx.try_recv().is_ok() || start.elapsed() > Duration::from_secs(30) {
                break;
            }
            match listener.accept() {
                Ok((stream, _)) => held.push(stream),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(_) => break,
            }
        }
    });
    (format!("http://{addr}"), stop_tx)
}

#[cfg(unix)]
#[test]
fn interrupt_stops_the_run_and_still_reports() {
    let (base_url, stop_tx) = spawn_stalled_server();
    let ws = temp_workspace("interrupt");
    let line = r#"{"method":"GET","path":"/api/v1/users"}"#;
    let cases = write_cases(&ws, &[line, line, line, line, line]);
    let trace = ws.join("interrupted.trace.json");
    let trace_arg = trace.to_string_lossy().to_string();

    let child = Command::new(env!("CARGO_BIN_EXE_fuzzstate"))
        .current_dir(&ws)
        .env_remove("FUZZSTATE_BASE_URL")
        .env_remove("RUST_LOG")
        .args([
            "drive",
            "--cases",
            &cases,
            "--base-url",
            &base_url,
            "--timeout",
            "1s",
            "--trace-out",
            &trace_arg,
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn cli");

    thread::sleep(Duration::from_millis(1500));
    let kill = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .expect("send SIGINT");
    assert!(kill.success());

    let out = child.wait_with_output().expect("wait cli");
    let _ = stop_tx.send(());
    assert_eq!(out.status.code(), Some(130), "stderr={}", String::from_utf8_lossy(&out.stderr));

    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("[fuzzstate] run statistics"), "stdout={stdout}");
    assert!(!stdout.contains("total cases: 5"), "stdout={stdout}");
    assert!(String::from_utf8_lossy(&out.stderr).contains("interrupt received"));

    let saved = fuzzstate::TraceFile::read_json(&trace).expect("trace written on interrupt");
    assert!(saved.stats.total >= 1 && saved.stats.total < 5);
}

#[test]
fn drive_shapes_stdin_cases_before_eof() {
    let ws = temp_workspace("stream");
    let mut child = Command::new(env!("CARGO_BIN_EXE_fuzzstate"))
        .current_dir(&ws)
        .env_remove("FUZZSTATE_BASE_URL")
        .env_remove("RUST_LOG")
        .args(["drive", "--backend", "scripted"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn cli");

    let mut stdin = child.stdin.take().expect("stdin");
    stdin
        .write_all(b"{\"method\":\"GET\",\"path\":\"/api/v1/users\"}\n")
        .expect("write stdin");
    stdin.flush().expect("flush stdin");

    let stderr = child.stderr.take().expect("stderr");
    let (line_tx, line_rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        for line in std::io::BufRead::lines(std::io::BufReader::new(stderr)).map_while(Result::ok) {
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    let mut shaped_while_open = false;
    while let Some(left) = deadline.checked_duration_since(std::time::Instant::now()) {
        match line_rx.recv_timeout(left) {
            Ok(line) if line.contains("case generated") => {
                shaped_while_open = true;
                break;
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    drop(stdin);
    let out = child.wait_with_output().expect("wait cli");
    assert!(shaped_while_open, "no case was shaped before stdin closed");
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("total cases: 1"));
}

#[test]
fn drive_scripted_backend_emits_json_report_and_skips_bad_lines() {
    let ws = temp_workspace("scripted");
    let cases = write_cases(
        &ws,
        &[
            r#"{"method":"GET","path":"/api/v1/users"}"#,
            "not json at all",
            "",
            r#"{"method":"GET","path":"/api/v1/users/{user_id}","path_parameters":{"user_id":"abc"}}"#,
            r#"{"method":"PATCH","path":"/api/v1/users/{user_id}","path_parameters":{"user_id":"abc"}}"#,
        ],
    );

    let out = run_cli(&ws, &["--json", "drive", "--backend", "scripted", "--cases", &cases]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));

    let report: fuzzstate::StatsReport =
        serde_json::from_slice(&out.stdout).expect("stats report json");
    assert_eq!(report.total, 3);
    assert_eq!(report.statuses.iter().map(|s| s.count).sum::<u64>(), 3);
    assert!(!report.started_at.is_empty());

    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("skipping malformed case on line 2"), "stderr={stderr}");
}

#[test]
fn drive_reads_cases_from_stdin() {
    let ws = temp_workspace("stdin");
    let mut child = Command::new(env!("CARGO_BIN_EXE_fuzzstate"))
        .current_dir(&ws)
        .env_remove("FUZZSTATE_BASE_URL")
        .args(["drive", "--backend", "scripted"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn cli");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(b"{\"method\":\"POST\",\"path\":\"/api/v1/users\"}\n")
        .expect("write stdin");
    let out = child.wait_with_output().expect("wait cli");
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("total cases: 1"), "stdout={stdout}");
    assert!(stdout.contains("status 201: 1"), "stdout={stdout}");
}

#[test]
fn missing_cases_file_exits_with_code_two() {
    let ws = temp_workspace("missing");
    let out = run_cli(&ws, &["--json", "drive", "--backend", "scripted", "--cases", "nope.jsonl"]);
    assert_eq!(out.status.code(), Some(2));
    let doc: serde_json::Value = serde_json::from_slice(&out.stdout).expect("error json");
    assert_eq!(doc["status"], "error");
    assert!(doc["message"].as_str().unwrap_or_default().contains("nope.jsonl"));
}

#[test]
fn version_and_env_report_metadata() {
    let ws = temp_workspace("env");
    let version = run_cli(&ws, &["--json", "version"]);
    assert!(version.status.success());
    let doc: serde_json::Value = serde_json::from_slice(&version.stdout).expect("version json");
    assert_eq!(doc["version"], env!("CARGO_PKG_VERSION"));

    std::fs::write(ws.join("fuzzstate.toml"), "name_prefix = \"probe-\"\nseed = 9\n").expect("write config");
    let env = Command::new(env!("CARGO_BIN_EXE_fuzzstate"))
        .current_dir(&ws)
        .env("FUZZSTATE_BASE_URL", "http://api.test:9000")
        .args(["--json", "env"])
        .output()
        .expect("run cli");
    assert!(env.status.success());
    let doc: serde_json::Value = serde_json::from_slice(&env.stdout).expect("env json");
    assert_eq!(doc["config"]["base_url"], "http://api.test:9000");
    assert_eq!(doc["config"]["name_prefix"], "probe-");
    assert_eq!(doc["name_source"], "chacha20(seed=9)");
    assert_eq!(doc["os"], std::env::consts::OS);
}
