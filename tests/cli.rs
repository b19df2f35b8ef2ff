use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

const HEADER: &str = "id,age,sex,dataset,cp,trestbps,chol,fbs,restecg,thalch,exang,oldpeak,slope,ca,thal,num";

fn patient(id: usize, age: i64, chol: i64, num: i64) -> String {
    format!(
        "{},{},Female,Hungary,non-anginal,120,{},FALSE,normal,160,FALSE,0.0,upsloping,0,normal,{}",
        id, age, chol, num
    )
}

fn heartmr(args: &[&str], stdin: &[u8]) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_heartmr"))
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(stdin).unwrap();
    let out = child.wait_with_output().unwrap();
    assert!(out.status.success(), "{:?} failed: {}", args, String::from_utf8_lossy(&out.stderr));
    out
}

fn csv() -> String {
    [
        HEADER.to_string(),
        patient(1, 63, 233, 0),
        patient(2, 25, 180, 1),
        patient(3, 67, 286, 2),
        patient(4, 61, 229, 1),
        patient(5, 28, 150, 0),
        "6,,Female".to_string(),
    ]
    .join("\n")
}

#[test]
fn map_sort_reduce_through_pipes() {
    let mapped = heartmr(&["map"], csv().as_bytes());
    let mut pairs: Vec<&str> = std::str::from_utf8(&mapped.stdout).unwrap().lines().collect();
    assert_eq!(pairs.len(), 5);
    pairs.sort_unstable();
    let sorted = pairs.join("\n") + "\n";

    let reduced = heartmr(&["reduce", "--input-order", "verified"], sorted.as_bytes());
    assert_eq!(
        String::from_utf8(reduced.stdout).unwrap(),
        "20-29,0-199\tTotal: 2, Heart Disease: 1, Percentage: 50.00%\n\
         60-69,200-239\tTotal: 2, Heart Disease: 1, Percentage: 50.00%\n\
         60-69,240+\tTotal: 1, Heart Disease: 1, Percentage: 100.00%\n"
    );
}

#[test]
fn reduce_to_file_and_run_with_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("reduced.txt");
    let stats = dir.path().join("stats.json");
    heartmr(
        &[
            "reduce",
            "--output",
            out.to_str().unwrap(),
            "--stats",
            stats.to_str().unwrap(),
        ],
        b"30-39,0-199\t1\nbogus\n30-39,0-199\t0\n",
    );
    assert_eq!(
        fs::read_to_string(&out).unwrap(),
        "30-39,0-199\tTotal: 2, Heart Disease: 1, Percentage: 50.00%\n"
    );
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&stats).unwrap()).unwrap();
    assert_eq!(json["skipped"]["total"], 1);
    assert!(!Path::new(&format!("{}.tmp", out.display())).exists());

    let input = dir.path().join("patients.csv");
    fs::write(&input, csv()).unwrap();
    let prefix = dir.path().join("part_").display().to_string();
    let temp = dir.path().join("intermediate");
    let ran = heartmr(
        &[
            "run",
            input.to_str().unwrap(),
            "--mappers",
            "2",
            "--reducers",
            "2",
            "--output-prefix",
            &prefix,
            "--temp-dir",
            temp.to_str().unwrap(),
        ],
        b"",
    );
    let outputs: Vec<String> = String::from_utf8(ran.stdout).unwrap().lines().map(String::from).collect();
    assert_eq!(outputs.len(), 2);
    let total_lines: usize = outputs.iter().map(|p| fs::read_to_string(p).unwrap().lines().count()).sum();
    assert_eq!(total_lines, 3);
    assert!(!temp.exists());
}

#[test]
fn reduce_rejects_zero_reducers_in_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("job.toml");
    fs::write(&config, "reducers = 0\n").unwrap();

    let out = Command::new(env!("CARGO_BIN_EXE_heartmr"))
        .args(["reduce", "--config", config.to_str().unwrap()])
        .stdin(Stdio::null())
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(out.stdout.is_empty());
}
