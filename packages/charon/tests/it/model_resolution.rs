//! End-to-end "model auto-resolve" scenario: a workflow references a lora by
//! basename only; the file exists elsewhere under `models/`, gets copied
//! into the expected category directory, and the workflow's own reference
//! string (and the committed validated payload) get rewritten to match.

use charon_core::{
    path::{AbsDirPath, TryJoinWith as _},
    resolve::{
        ResolveStatus,
        model::{ModelTransferManager, extract_model_references, format_category_relative, resolve_reference},
    },
};
use serde_json::json;

use crate::temporary_directory;

#[tokio::test]
async fn lora_reference_is_found_copied_and_rewritten_into_workflow() {
    let (_root, comfy_dir) = temporary_directory();
    let comfy_dir: AbsDirPath = comfy_dir;

    // The file exists somewhere under models/, but nested past the shallow
    // index's depth bound (3) and not yet in its category folder, so none of
    // `search_path`'s own lookup steps find it directly — only the
    // unbounded recursive search in the copy-from-local-tree fallback does.
    let models_dir = comfy_dir.try_join_dir("models").unwrap();
    let nested_dir = models_dir.as_std_path().join("a").join("b").join("c").join("d");
    std::fs::create_dir_all(&nested_dir).unwrap();
    std::fs::write(nested_dir.join("foo.safetensors"), b"lora-bytes").unwrap();

    // The workflow references it by a made-up subpath, not its bare
    // basename, so the category-relative rewrite below actually changes it.
    let mut payload = json!({
        "nodes": [
            {
                "type": "LoraLoader",
                "widgets_values": ["custom/foo.safetensors", 1.0]
            }
        ]
    });

    let references = extract_model_references(&payload);
    assert_eq!(references.len(), 1);
    let reference = &references[0];
    assert_eq!(reference.category, "loras");

    let transfers = ModelTransferManager::new();
    let outcome = resolve_reference(reference, &comfy_dir, None, None, &transfers, || false)
        .await
        .unwrap();

    assert_eq!(outcome.status, ResolveStatus::Copied);
    let resolved_path = outcome.resolved_path.unwrap();
    assert!(resolved_path.ends_with("loras/foo.safetensors") || resolved_path.ends_with(r"loras\foo.safetensors"));
    assert!(
        std::fs::read(&resolved_path).unwrap() == b"lora-bytes",
        "copied file must have the same content as the source"
    );

    // Rewrite the workflow's own reference string to the category-relative
    // form and commit it as the validated payload.
    let replacement = format_category_relative(&reference.category, &reference.name, "foo.safetensors");
    let changed = charon_core::resolve::override_writer::replace_workflow_model_paths(
        &mut payload,
        &[(reference.name.clone(), replacement.clone())],
    );
    assert!(changed);
    assert_eq!(payload["nodes"][0]["widgets_values"][0], json!(replacement));

    let (_mirror_root_guard, mirror_root) = temporary_directory();
    let mirror = charon_core::mirror::LocalMirror::new(mirror_root, comfy_dir.as_str_lossy().to_string());
    let remote = format!("{}/wf", comfy_dir.as_str_lossy());
    // Establish the source-hash baseline first, then validate; a later sync
    // of the same payload must not see drift and must keep `validated` set.
    mirror.synchronize_remote_payload(&remote, &payload, "source").await.unwrap();
    mirror.mark_validated_workflow(&remote, &payload).await.unwrap();

    let state = mirror.synchronize_remote_payload(&remote, &payload, "source").await.unwrap().1;
    assert!(state.validated);

    // Re-resolving is a no-op: the file is now found directly in place.
    let second_outcome = resolve_reference(
        &charon_core::resolve::ModelReference {
            name: replacement,
            category: reference.category.clone(),
            node_type: reference.node_type.clone(),
        },
        &comfy_dir,
        None,
        None,
        &transfers,
        || false,
    )
    .await
    .unwrap();
    assert_eq!(second_outcome.status, ResolveStatus::Success);
    assert_eq!(second_outcome.method, "found on disk");
}
