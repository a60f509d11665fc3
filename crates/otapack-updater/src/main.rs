use otapack_updater::{init_logging, Updater};

fn main() {
    init_logging();
    let args = std::env::args_os().collect::<Vec<_>>();
    let exit = Updater::stock().run(&args);
    std::process::exit(exit.code());
}
