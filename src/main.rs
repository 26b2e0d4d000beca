use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cfg = homekey_reader::config::Config::parse();
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async {
            if cfg.wipe {
                homekey_reader::wipe(cfg).await
            } else if let Some(request) = cfg.control_point.clone() {
                homekey_reader::control_point(cfg, &request).await
            } else {
                homekey_reader::run(cfg).await
            }
        })
}
