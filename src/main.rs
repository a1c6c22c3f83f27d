use isahp_rs::settings;

fn main() {
    env_logger::init();

    let config = settings();
    log::info!("isahp-rs starting");
    log::info!("Data dir: {:?}", config.isahp.data_dir);
    log::info!("CI mode: {}", config.testing.ci);
}
