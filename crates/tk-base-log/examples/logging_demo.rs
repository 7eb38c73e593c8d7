//! Call-logging wrappers attributing log lines to their call sites.

use tk_base_log::{
    create_logger_wrapper, emit, info, init, CallArgs, CallLogger, Layered, LogConfig, LogFormat,
    LogLevel, LogMode,
};

fn checkout(cart: Vec<u32>) -> u32 {
    cart.iter().sum()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = LogConfig {
        level: LogLevel::Debug,
        format: LogFormat::Compact,
        ..LogConfig::from_env()
    };
    let handle = init(config)?;

    let logger = CallLogger::new("shop").with_mode(LogMode::Detailed);

    let cart = vec![3, 4, 5];
    let args = CallArgs::new().arg("cart", &cart);
    // Attributed to this line, not to the wrapper internals.
    let total = logger.call("checkout", args, || checkout(cart.clone()));
    info!(total, "checkout finished");

    // A thin wrapper in front of the same logger.
    let wrapper = create_logger_wrapper(logger.clone());
    wrapper.call("checkout", CallArgs::new(), || checkout(vec![1]));

    // Three stacked layers; still attributed here.
    let layered = Layered::new(logger)
        .layer("audit")
        .layer("timing")
        .layer("metrics");
    layered.call("checkout", CallArgs::new(), || checkout(vec![10, 20]));

    emit!(LogLevel::InfoUtils, "category levels emit as DEBUG with a category field");

    // Raise the threshold past the categories, then restore it.
    handle.set_level(LogLevel::Info)?;
    emit!(LogLevel::InfoCore, "dropped while the threshold is INFO");
    handle.reset()?;
    emit!(LogLevel::InfoCore, "visible again after reset");

    Ok(())
}
