use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, Layer, Registry};

/// Install a global `fmt` subscriber.
///
/// `RUST_LOG` directives refine `level`. Output is pretty-printed unless
/// `GUARDSIM_LOG_FORMAT=json`; `GUARDSIM_LOG_TO_STDERR` redirects it to
/// stderr so reports on stdout stay machine readable.
pub(crate) fn init_tracer(level: Option<LevelFilter>) -> anyhow::Result<()> {
    let default_filter = if cfg!(any(test, debug_assertions)) {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter_layer = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(level.unwrap_or(default_filter).into())
        .from_env_lossy();

    let use_json = std::env::var("GUARDSIM_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let to_stderr = std::env::var("GUARDSIM_LOG_TO_STDERR").is_ok();
    let with_location = cfg!(any(test, debug_assertions));

    let fmt_layer = match (use_json, to_stderr) {
        (true, true) => tracing_subscriber::fmt::layer()
            .with_level(true)
            .json()
            .with_file(with_location)
            .with_line_number(with_location)
            .with_writer(std::io::stderr)
            .boxed(),
        (true, false) => tracing_subscriber::fmt::layer()
            .with_level(true)
            .json()
            .with_file(with_location)
            .with_line_number(with_location)
            .boxed(),
        (false, true) => tracing_subscriber::fmt::layer()
            .with_level(true)
            .pretty()
            .with_file(with_location)
            .with_line_number(with_location)
            .with_writer(std::io::stderr)
            .boxed(),
        (false, false) => tracing_subscriber::fmt::layer()
            .with_level(true)
            .pretty()
            .with_file(with_location)
            .with_line_number(with_location)
            .boxed(),
    };

    let subscriber = Registry::default().with(fmt_layer.with_filter(filter_layer));
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| anyhow::anyhow!("error setting subscriber: {err}"))?;
    Ok(())
}
