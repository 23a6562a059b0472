// [apps/engine/src/main.rs]
use octolab_engine::config::EngineConfig;
use octolab_engine::Kernel;

fn main() {
    dotenvy::dotenv().ok();
    octolab_telemetry::init_tracing("octolabd");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build the tokio runtime");

    runtime.block_on(async {
        let config = EngineConfig::from_env();
        let kernel = Kernel::ignite(config).await;
        kernel.run().await;
    });
}
