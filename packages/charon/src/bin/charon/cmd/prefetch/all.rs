use std::sync::atomic::AtomicBool;

use charon_core::{cache::CacheStore, path::AbsDirPath, prefetch};
use color_eyre::Result;

use super::AllOpts;

pub async fn exec(opts: AllOpts) -> Result<()> {
    let base = AbsDirPath::try_from(opts.base)?;
    let cache = CacheStore::with_memory_cap_mb(256);
    let shutdown = AtomicBool::new(false);
    prefetch::prefetch_all_folders(&base, &opts.host, &cache, &shutdown).await?;
    println!("{}", serde_json::to_string_pretty(&cache.get_stats())?);
    Ok(())
}
