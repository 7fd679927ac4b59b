//! End-to-end "source drift" scenario: a workflow is synced, validated, and
//! accumulates resolve/install history, then the shared source changes
//! underneath it. The local mirror must drop `validated` and every
//! accumulated validation artifact, not just the validated payload file.

use charon_core::mirror::LocalMirror;
use serde_json::json;

use crate::temporary_directory;

#[tokio::test]
async fn drift_clears_validated_flag_and_accumulated_logs() {
    let (_root, mirror_root) = temporary_directory();
    let mirror = LocalMirror::new(mirror_root, r"\\shared\repo");
    let remote = r"\\shared\repo\folderA\wf";

    let first = json!({"nodes": [{"type": "KSampler"}]});
    mirror.synchronize_remote_payload(remote, &first, "source").await.unwrap();
    mirror
        .append_resolve_log(
            remote,
            &json!({"original": "foo.safetensors", "category": "loras", "status": "copied", "resolved_path": "/models/loras/foo.safetensors", "method": "copied", "attempts": 1}),
        )
        .await
        .unwrap();
    mirror
        .append_node_install_log(remote, &json!({"repo": "owner/pack", "resolve_status": "success"}))
        .await
        .unwrap();
    mirror.mark_validated_workflow(remote, &first).await.unwrap();

    let before_drift = mirror.read_resolve_log(remote).await.unwrap();
    assert_eq!(before_drift.len(), 1);

    let drifted = json!({"nodes": [{"type": "KSampler"}, {"type": "VAEDecode"}]});
    let (local_dir, state) = mirror.synchronize_remote_payload(remote, &drifted, "source").await.unwrap();

    assert!(!state.validated);
    assert!(state.validated_hash.is_none());

    // Both logs are gone: the whole `.charon_cache` subtree was purged, not
    // merely the validated-flag.
    assert!(mirror.read_resolve_log(remote).await.unwrap().is_empty());
    assert!(mirror.read_node_install_log(remote).await.unwrap().is_empty());

    let validated_content =
        std::fs::read_to_string(local_dir.as_std_path().join("workflow_validated.json")).unwrap();
    let validated_value: serde_json::Value = serde_json::from_str(&validated_content).unwrap();
    assert_eq!(validated_value, drifted);

    // Post-drift, a fresh resolve attempt starts its attempts counter at
    // zero again since the prior log entry was purged.
    mirror
        .append_resolve_log(
            remote,
            &json!({"original": "foo.safetensors", "category": "loras", "status": "failed", "resolved_path": null, "method": "retry", "attempts": 1}),
        )
        .await
        .unwrap();
    let after = mirror.read_resolve_log(remote).await.unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0]["attempts"], 1);
}
