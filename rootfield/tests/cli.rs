use rootfield::RenderResponse;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

fn binary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_rootfield"))
}

fn scratch(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("rootfield-cli-{}-{}", std::process::id(), name))
}

#[test]
fn render_writes_a_response_file() {
    let request = scratch("request.json");
    let response = scratch("response.json");
    std::fs::write(
        &request,
        r#"{
            "degree": 3,
            "coeffs": {"3": "1", "0": "-1"},
            "n_pairs": 500,
            "grid_resolution": 48,
            "use_parallel": true,
            "max_workers": 2
        }"#,
    )
    .unwrap();

    let status = binary().arg("render").arg(&request).arg("-o").arg(&response).status().unwrap();
    assert!(status.success());

    let body = std::fs::read_to_string(&response).unwrap();
    std::fs::remove_file(&request).ok();
    std::fs::remove_file(&response).ok();
    match serde_json::from_str::<RenderResponse>(&body).unwrap() {
        RenderResponse::Success(output) => {
            assert_eq!(output.total_roots, 1500);
            assert_eq!(output.grid_size, 48);
            assert_eq!(output.density_grid.len(), 48);
            assert!(output.density_grid.iter().all(|row| row.len() == 48));
        }
        RenderResponse::Failure { error } => panic!("render failed: {}", error),
    }
}

#[test]
fn request_errors_still_produce_a_response() {
    let request = scratch("bad-request.json");
    std::fs::write(&request, r#"{"degree": 2, "terms": [{"k": 2, "coeff": "1"}], "t1_domain": {"domain_type": "torus"}}"#)
        .unwrap();
    let output = binary().arg("render").arg(&request).output().unwrap();
    std::fs::remove_file(&request).ok();

    assert!(output.status.success());
    let response: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let error = response["error"].as_str().unwrap();
    assert!(error.starts_with("Domain sampling error"));
    assert!(error.contains("torus"));
}

#[test]
fn worker_speaks_json_over_pipes() {
    let mut child = binary()
        .arg("worker")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    // x^2 + 1 with bit-encoded coefficients
    let one = 1.0f64.to_bits();
    let job = format!(
        r#"{{"backend": {{"kind": "standard"}}, "native_library": null, "rows": [[[{one}, 0], [0, 0], [{one}, 0]]]}}"#
    );
    child.stdin.take().unwrap().write_all(job.as_bytes()).unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());

    let answer: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let roots = answer["roots"][0].as_array().unwrap();
    assert_eq!(roots.len(), 2);
    for root in roots {
        let re = f64::from_bits(root[0].as_u64().unwrap());
        let im = f64::from_bits(root[1].as_u64().unwrap());
        assert!(re.abs() < 1e-12);
        assert!((im.abs() - 1.0).abs() < 1e-12);
    }
}

#[test]
fn worker_fails_on_garbage() {
    let mut child = binary().arg("worker").stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::null()).spawn().unwrap();
    child.stdin.take().unwrap().write_all(b"{ not json").unwrap();
    assert!(!child.wait_with_output().unwrap().status.success());
}

#[test]
fn demo_runs_small() {
    let output = binary().args(["demo", "--n-pairs", "200", "--resolution", "16"]).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("chebyshev"));
}
