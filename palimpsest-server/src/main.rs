use palimpsest_server::{
    MemoryBlobStore, RocksBlobStore, RocksConfig, ServerConfig, StorageBackend, VersionServer,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    let config = ServerConfig::from_env()?;
    log::info!("Starting palimpsestd on {}", config.bind_addr);

    match config.storage.clone() {
        StorageBackend::Memory => {
            log::warn!("Using in-memory storage; versions are lost on exit");
            VersionServer::new(config, MemoryBlobStore::new()).run().await
        }
        StorageBackend::Rocks(path) => {
            let store = RocksBlobStore::open(RocksConfig {
                path,
                ..RocksConfig::default()
            })?;
            VersionServer::new(config, store).run().await
        }
    }
}
