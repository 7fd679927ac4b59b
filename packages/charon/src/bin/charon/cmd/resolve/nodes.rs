use charon_core::resolve::node::extract_required_node_classes;
use color_eyre::{Result, eyre::Context};

use super::NodesOpts;

pub async fn exec(opts: NodesOpts) -> Result<()> {
    let payload_text = tokio::fs::read_to_string(&opts.workflow)
        .await
        .context("read workflow payload")?;
    let payload: serde_json::Value = serde_json::from_str(&payload_text).context("parse workflow payload as json")?;

    let mut classes: Vec<_> = extract_required_node_classes(&payload).into_iter().collect();
    classes.sort();

    println!("{}", serde_json::to_string_pretty(&classes)?);
    Ok(())
}
