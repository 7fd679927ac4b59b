use charon_core::cache::CacheStore;
use color_eyre::Result;

pub async fn exec() -> Result<()> {
    let cache = CacheStore::with_memory_cap_mb(256);
    cache.reset();
    println!("cache reset");
    Ok(())
}
