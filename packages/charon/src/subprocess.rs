//! Shared JSON-contract subprocess runner.
//!
//! The authoritative model-path resolver and the custom-node registry probe
//! both live outside this process (the former runs inside the ComfyUI
//! embedded interpreter so it shares its extra `model_paths` configuration,
//! the latter drives a browser). Both communicate the same way: JSON on
//! stdin, JSON on stdout, run with a fixed timeout from the project root
//! (`cwd = comfy_dir`). The teacher's own `RustcMetadata::from_argv`
//! (`cargo/metadata.rs`) spawns `rustc`, sets its working directory, and
//! parses its stdout as JSON the same way; this adds a JSON stdin body
//! since, unlike `rustc --print target-spec-json`, these scripts need a
//! payload (the references/classes to resolve), not just flags. See
//! DESIGN.md for why a JSON-over-stdio contract (rather than, say, an HTTP
//! call into a sidecar) was chosen for these two probes.

use std::process::Stdio;
use std::time::Duration;

use color_eyre::{Result, eyre::Context, eyre::ContextCompat, eyre::bail};
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;
use tracing::{instrument, warn};

use crate::path::{AbsDirPath, AbsFilePath};

/// Timeout for the model-path resolver script.
pub const MODEL_RESOLVER_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout for the browser-based custom-node registry probe.
pub const NODE_REGISTRY_PROBE_TIMEOUT: Duration = Duration::from_secs(180);

/// Run `script` with `python3`, feeding `input` as JSON on stdin and parsing
/// stdout as JSON, bounded by `timeout`. `cwd` is set so the script can pick
/// up the target ComfyUI installation's own environment.
#[instrument(skip(input), fields(%script))]
pub async fn run_json_script<I, O>(
    script: &AbsFilePath,
    args: &[&str],
    cwd: &AbsDirPath,
    input: &I,
    timeout: Duration,
) -> Result<O>
where
    I: Serialize,
    O: DeserializeOwned,
{
    let body = serde_json::to_vec(input).context("serialize subprocess input")?;

    let run = async {
        let mut command = tokio::process::Command::new("python3");
        command
            .arg(script.as_std_path())
            .args(args)
            .current_dir(cwd.as_std_path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().context("spawn subprocess")?;
        let mut stdin = child.stdin.take().context("take subprocess stdin")?;
        stdin.write_all(&body).await.context("write subprocess input")?;
        stdin.flush().await.context("flush subprocess input")?;
        drop(stdin);

        let output = child.wait_with_output().await.context("wait for subprocess")?;
        if !output.status.success() {
            warn!(
                target: "charon::subprocess_output",
                status = ?output.status,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "subprocess exited non-zero"
            );
            bail!(
                "subprocess exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        serde_json::from_slice(&output.stdout).context("parse subprocess output as json")
    };

    match tokio::time::timeout(timeout, run).await {
        Ok(result) => result,
        Err(_) => bail!("subprocess timed out after {timeout:?}"),
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use tempfile::tempdir;

    use super::*;

    #[derive(Serialize)]
    struct Input {
        value: u32,
    }

    #[derive(Deserialize, PartialEq, Debug)]
    struct Output {
        doubled: u32,
    }

    fn python3_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .is_ok()
    }

    #[tokio::test]
    async fn runs_script_and_parses_json_output() {
        if !python3_available() {
            eprintln!("skipping: python3 not available");
            return;
        }

        let dir = tempdir().unwrap();
        let script_path = dir.path().join("double.py");
        std::fs::write(
            &script_path,
            "import sys, json\n\
             data = json.load(sys.stdin)\n\
             print(json.dumps({'doubled': data['value'] * 2}))\n",
        )
        .unwrap();

        let script = AbsFilePath::try_from(script_path).unwrap();
        let cwd = AbsDirPath::try_from(dir.path().to_path_buf()).unwrap();

        let result: Output = run_json_script(&script, &[], &cwd, &Input { value: 21 }, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(result, Output { doubled: 42 });
    }

    #[tokio::test]
    async fn times_out_on_slow_script() {
        if !python3_available() {
            eprintln!("skipping: python3 not available");
            return;
        }

        let dir = tempdir().unwrap();
        let script_path = dir.path().join("slow.py");
        std::fs::write(&script_path, "import time\ntime.sleep(5)\n").unwrap();

        let script = AbsFilePath::try_from(script_path).unwrap();
        let cwd = AbsDirPath::try_from(dir.path().to_path_buf()).unwrap();

        let result: Result<Output> =
            run_json_script(&script, &[], &cwd, &Input { value: 1 }, Duration::from_millis(200)).await;
        assert!(result.is_err());
    }
}
