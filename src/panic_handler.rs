use std::panic;

use log::error;

pub fn initialize_panic_handler() {
    better_panic::install();

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        // The log file is often the only trace of a panic on a render worker.
        error!("{panic_info}");
        log::logger().flush();

        default_hook(panic_info);

        std::process::exit(1);
    }));
}
