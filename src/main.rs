//! Process entry point (spec.md §6). Grounded on
//! `original_source/src/platform/main.c`: parse the command line, install the tracing
//! subscriber (the original's `InitializeLogger`), load `MENABREA_APP_LIST`, and hand off to
//! the dispatcher bootstrap, which does not return until every dispatcher core has exited.

use clap::Parser;
use platform_config::Args;
use platform_dispatch::DispatchConfig;
use tracing_subscriber::EnvFilter;

fn main() {
    let args = Args::parse();
    install_tracing();

    tracing::info!(
        node_id = args.node_id,
        net_if = %args.net_if,
        "starting menabrea platform"
    );

    let core_count = num_cpus::get();
    let app_lib_names = platform_config::app_list_from_env();
    let app_libs = platform_dispatch::load_application_libraries(&app_lib_names);

    platform_dispatch::run_event_dispatchers(DispatchConfig {
        core_count,
        node_id: args.node_id,
        app_libs,
        net_if: Some(args.net_if.clone()),
    });

    tracing::info!("menabrea platform exited cleanly");
}

/// `LOG_VERBOSE=1` raises the default level to debug; otherwise info, matching the
/// original's two-level verbosity switch. `RUST_LOG` still overrides either default, since
/// `EnvFilter` consults it first — an ambient convenience the original's fixed two-level
/// switch never had, but one every `tracing-subscriber` consumer in this workspace's
/// dependency tree expects to work.
fn install_tracing() {
    let default_level = if platform_config::log_verbose_from_env() { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
