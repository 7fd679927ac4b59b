use charon_core::{cache::CacheStore, path::AbsDirPath, prefetch};
use color_eyre::Result;

use super::FolderOpts;

pub async fn exec(opts: FolderOpts) -> Result<()> {
    let folder = AbsDirPath::try_from(opts.folder)?;
    let cache = CacheStore::with_memory_cap_mb(256);
    prefetch::prefetch_folder(&folder, &cache).await?;
    println!("{}", serde_json::to_string_pretty(&cache.get_stats())?);
    Ok(())
}
