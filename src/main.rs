mod app;

use app::FogViewApp;
use eframe::egui;
use fogview::{cli, ipc, logger, settings::HostConfig};

fn main() -> Result<(), eframe::Error> {
    // -- CLI / headless mode ---------------------------------------------
    if cli::CliArgs::is_cli_mode() {
        use clap::Parser;
        let args = cli::CliArgs::parse();
        let code = cli::run(args);
        std::process::exit(if code == std::process::ExitCode::SUCCESS { 0 } else { 1 });
    }

    // -- GUI mode -----------------------------------------------------
    logger::init();
    let config = HostConfig::load();
    let startup_files = ipc::collect_startup_files();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("FogView")
            .with_inner_size([1280.0, 800.0])
            .with_min_inner_size([480.0, 320.0]),
        ..Default::default()
    };

    eframe::run_native(
        "FogView",
        options,
        Box::new(move |cc| Box::new(FogViewApp::new(cc, config, startup_files))),
    )
}
