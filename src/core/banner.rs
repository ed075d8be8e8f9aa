//! Startup banner.

use super::constants::APP_NAME;

/// Print the startup banner: listen address and the plugin/queue
/// configuration the server came up with.
pub fn print_banner(listen: &str, plugin_names: &[String], plugin_timeout_ms: u64, broadcast_queue_depth: usize) {
    const W: usize = 20;

    println!();
    println!("  \x1b[1m\x1b[36m{}\x1b[0m \x1b[90mv{}\x1b[0m", APP_NAME, env!("CARGO_PKG_VERSION"));
    println!();
    println!("  \x1b[32m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m {}", "Listening:", listen);

    if plugin_names.is_empty() {
        println!("  \x1b[90m➜  {:<W$} none loaded\x1b[0m", "Plugins:");
    } else {
        println!("  \x1b[33m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m {}", "Plugins:", plugin_names.join(", "));
    }

    println!("  \x1b[90m➜  {:<W$} {} ms\x1b[0m", "Plugin timeout:", plugin_timeout_ms);
    println!("  \x1b[90m➜  {:<W$} {} events\x1b[0m", "Broadcast queue:", broadcast_queue_depth);
    println!();
}
