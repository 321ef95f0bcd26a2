//! Tracing setup shared by the `jm`, `tm`, and `se` binaries.

/// Initialize a `tracing_subscriber::fmt` layer honoring `RUST_LOG`, falling
/// back to `info` (or `debug` for this crate family when `verbose` is set).
pub fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "info,spits_core=debug,spits_net=debug,spits_tm=debug,spits_jm=debug"
    } else {
        "info"
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .try_init();
}
