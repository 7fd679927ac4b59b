use charon_core::{
    path::AbsDirPath,
    resolve::model::{ModelTransferManager, extract_model_references, resolve_reference},
};
use color_eyre::{Result, eyre::Context};

use super::ModelsOpts;

pub async fn exec(opts: ModelsOpts) -> Result<()> {
    let comfy_dir = AbsDirPath::try_from(opts.comfy_dir)?;
    let payload_text = tokio::fs::read_to_string(&opts.workflow)
        .await
        .context("read workflow payload")?;
    let payload: serde_json::Value = serde_json::from_str(&payload_text).context("parse workflow payload as json")?;

    let references = extract_model_references(&payload);
    let transfers = ModelTransferManager::new();

    let mut outcomes = Vec::new();
    for reference in &references {
        let outcome = resolve_reference(
            reference,
            &comfy_dir,
            opts.shared_models_root.as_deref(),
            None,
            &transfers,
            || false,
        )
        .await?;
        outcomes.push(serde_json::json!({
            "reference": reference,
            "outcome": outcome,
        }));
    }

    println!("{}", serde_json::to_string_pretty(&outcomes)?);
    Ok(())
}
