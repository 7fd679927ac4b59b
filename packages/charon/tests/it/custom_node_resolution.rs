//! End-to-end "missing custom node" scenario: a workflow references an
//! unmapped class, the orchestrator reports it missing, a batched install
//! through the (stubbed) installer script records the outcome in the local
//! mirror, and a second validation run's `attempts` counter reflects that
//! one prior install attempt.

use charon_core::{
    cache::CacheStore,
    mirror::LocalMirror,
    path::{AbsFilePath, TryJoinWith as _},
    resolve::MissingPack,
    validate::{ValidateOptions, WorkflowBundle, install_missing_node_packs, validate_comfy_environment},
};
use serde_json::json;

use crate::temporary_directory;

fn python3_available() -> bool {
    std::process::Command::new("python3").arg("--version").output().is_ok()
}

#[tokio::test]
async fn missing_node_is_detected_installed_and_recorded() {
    if !python3_available() {
        eprintln!("skipping: python3 not available");
        return;
    }

    let (_root, comfy_dir) = temporary_directory();
    std::fs::create_dir_all(comfy_dir.as_std_path()).unwrap();
    let python_exe = comfy_dir.try_join_file("python").unwrap();
    std::fs::write(python_exe.as_std_path(), b"").unwrap();

    let cache = CacheStore::with_memory_cap_mb(64);
    let (_mirror_guard, mirror_root) = temporary_directory();
    let mirror = LocalMirror::new(mirror_root, comfy_dir.as_str_lossy().to_string());
    let transfers = charon_core::resolve::model::ModelTransferManager::new();

    let remote_folder = format!("{}/wf", comfy_dir.as_str_lossy());
    let bundle = WorkflowBundle {
        remote_folder: remote_folder.clone(),
        workflow_folder: "wf".to_string(),
        workflow_name: "wf".to_string(),
        payload: json!({
            "nodes": [
                { "type": "UpscaleToolsNode", "widgets_values": [] }
            ]
        }),
    };

    let first = validate_comfy_environment(
        &comfy_dir,
        &python_exe,
        &bundle,
        &cache,
        &mirror,
        &transfers,
        ValidateOptions {
            include_environment: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let node_issue = first.issues.iter().find(|i| i.key == "custom_nodes").unwrap();
    assert!(!node_issue.ok, "no mapping/catalog/aux_id resolves the class yet");
    let missing_packs: Vec<MissingPack> = serde_json::from_value(node_issue.data["missing_packs"].clone()).unwrap();
    assert_eq!(missing_packs.len(), 1);
    assert_eq!(missing_packs[0].repo, "UpscaleToolsNode");

    // A stand-in Manager-UI installer: echoes back success for every repo
    // it's asked to install, with a restart requirement.
    let script_path = comfy_dir.as_std_path().join("install.py");
    std::fs::write(
        &script_path,
        "import sys, json\n\
         data = json.load(sys.stdin)\n\
         outcomes = [{'repo': r, 'resolve_status': 'success', 'resolve_method': 'Installed via Playwright', 'resolve_failed': None} for r in data['repos']]\n\
         print(json.dumps({'outcomes': outcomes, 'restart_required': True}))\n",
    )
    .unwrap();
    let script = AbsFilePath::try_from(script_path).unwrap();

    let restart_required = install_missing_node_packs(&script, &comfy_dir, &mirror, &remote_folder, &missing_packs)
        .await
        .unwrap();
    assert!(restart_required);

    let install_log = mirror.read_node_install_log(&remote_folder).await.unwrap();
    assert_eq!(install_log.len(), 1);
    assert_eq!(install_log[0]["repo"], "UpscaleToolsNode");
    assert_eq!(install_log[0]["resolve_status"], "success");

    // A second validation run still reports the class as missing (no probe
    // script is configured to confirm the Manager's own view), but the
    // attempts counter now reflects the one install attempt just logged.
    let second = validate_comfy_environment(
        &comfy_dir,
        &python_exe,
        &bundle,
        &cache,
        &mirror,
        &transfers,
        ValidateOptions {
            include_environment: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let node_issue_2 = second.issues.iter().find(|i| i.key == "custom_nodes").unwrap();
    let attempts: std::collections::HashMap<String, u32> =
        serde_json::from_value(node_issue_2.data["attempts"].clone()).unwrap();
    assert_eq!(attempts.get("UpscaleToolsNode").copied(), Some(1));
}
