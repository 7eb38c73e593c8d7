//! Call-logging wrappers.
//!
//! [`CallLogger`] logs the start, result and duration of a wrapped call and
//! attributes every event to the user's call site through
//! [`resolve_origin`](crate::origin::resolve_origin). Wrappers compose: a thin
//! wrapper such as [`LoggerWrapper`] or an ordered [`Layered`] stack pushes its
//! own tagged frames before handing off to the shared `CallLogger`, and the
//! resolver skips all of them.

use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use serde::Deserialize;
use tracing::Instrument;

use crate::origin::{resolve_origin, Frame, ResolvedOrigin, SkipSet};
use crate::spans::call_span;

/// Module path recorded on frames pushed by this module.
pub const WRAPPER_MODULE: &str = module_path!();

/// Routine names of the frames this module pushes.
pub const WRAPPER_ROUTINES: &[&str] = &["wrapper", "logger_wrapper", "layer"];

const RICH_ROUTINE: &str = "wrapper";
const THIN_ROUTINE: &str = "logger_wrapper";

/// Name of the shared logger used by [`logger_wrapper`].
pub const DEFAULT_LOGGER_NAME: &str = "tk_base";

/// How much a wrapper logs on entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogMode {
    /// Start events at DEBUG.
    #[default]
    Simple,
    /// Start events at INFO.
    #[serde(alias = "default")]
    Detailed,
}

impl LogMode {
    /// Parse from string; `default` is accepted for `Detailed`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "simple" => Some(Self::Simple),
            "detailed" | "default" => Some(Self::Detailed),
            _ => None,
        }
    }
}

/// Rendered argument list of a wrapped call.
///
/// Rendered eagerly so the wrapped closure can take ownership of the values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallArgs(String);

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `name=value` using the value's `Debug` form.
    pub fn arg(mut self, name: &str, value: &dyn fmt::Debug) -> Self {
        if !self.0.is_empty() {
            self.0.push_str(", ");
        }
        self.0.push_str(&format!("{name}={value:?}"));
        self
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0)
    }
}

/// Logs wrapped calls under a logger name.
#[derive(Debug, Clone)]
pub struct CallLogger {
    name: Arc<str>,
    mode: LogMode,
    skip: Arc<SkipSet>,
    absolute_paths: bool,
}

impl CallLogger {
    /// Create a logger with the default skip set.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            mode: LogMode::default(),
            skip: Arc::new(SkipSet::default()),
            absolute_paths: false,
        }
    }

    /// Switch between DEBUG and INFO start events.
    pub fn with_mode(mut self, mode: LogMode) -> Self {
        self.mode = mode;
        self
    }

    /// Replace the skip set used to resolve call sites.
    pub fn with_skip_set(mut self, skip: SkipSet) -> Self {
        self.skip = Arc::new(skip);
        self
    }

    /// Record full paths instead of bare file names.
    pub fn with_absolute_paths(mut self, absolute: bool) -> Self {
        self.absolute_paths = absolute;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> LogMode {
        self.mode
    }

    pub fn skip_set(&self) -> &SkipSet {
        &self.skip
    }

    /// Run `f`, logging the call as made from the caller of this method.
    #[track_caller]
    pub fn call<R, F>(&self, function: &str, args: CallArgs, f: F) -> R
    where
        F: FnOnce() -> R,
        R: fmt::Debug,
    {
        let site = Frame::from_location(Location::caller(), "");
        self.call_from(&site, function, args, f)
    }

    /// Run a fallible `f`, logging its error on failure.
    #[track_caller]
    pub fn try_call<T, E, F>(&self, function: &str, args: CallArgs, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        T: fmt::Debug,
        E: fmt::Display,
    {
        let site = Frame::from_location(Location::caller(), "");
        self.try_call_from(&site, function, args, f)
    }

    /// Await `future`, logging it as a call made from the caller of this method.
    #[track_caller]
    pub fn call_async<'s, F>(
        &'s self,
        function: &'s str,
        args: CallArgs,
        future: F,
    ) -> impl Future<Output = F::Output> + 's
    where
        F: Future + 's,
        F::Output: fmt::Debug,
    {
        let location = Location::caller();
        let span = call_span(function);
        async move {
            let site = Frame::from_location(location, "");
            let frame = self.frame().with_caller(&site);
            let origin = resolve_origin(&frame, &self.skip);
            let started = Instant::now();
            self.started(&origin, function, &args);
            let output = future.await;
            self.succeeded(&origin, function, &output, started);
            output
        }
        .instrument(span)
    }

    /// Run `f` as a call made from `caller`.
    ///
    /// This is the entry point for wrappers layered on top of this logger.
    pub fn call_from<R, F>(&self, caller: &Frame<'_>, function: &str, args: CallArgs, f: F) -> R
    where
        F: FnOnce() -> R,
        R: fmt::Debug,
    {
        let frame = self.frame().with_caller(caller);
        let origin = resolve_origin(&frame, &self.skip);
        let _entered = call_span(function).entered();

        let started = Instant::now();
        self.started(&origin, function, &args);
        let result = f();
        self.succeeded(&origin, function, &result, started);
        result
    }

    /// Fallible form of [`CallLogger::call_from`].
    pub fn try_call_from<T, E, F>(
        &self,
        caller: &Frame<'_>,
        function: &str,
        args: CallArgs,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        T: fmt::Debug,
        E: fmt::Display,
    {
        let frame = self.frame().with_caller(caller);
        let origin = resolve_origin(&frame, &self.skip);
        let _entered = call_span(function).entered();

        let started = Instant::now();
        self.started(&origin, function, &args);
        let result = f();
        match &result {
            Ok(value) => self.succeeded(&origin, function, value, started),
            Err(error) => self.failed(&origin, function, error, started),
        }
        result
    }

    fn frame(&self) -> Frame<'static> {
        Frame::wrapper(file!(), line!(), WRAPPER_MODULE, RICH_ROUTINE)
    }

    fn file<'o>(&self, origin: &ResolvedOrigin<'o>) -> &'o str {
        if self.absolute_paths {
            origin.file
        } else {
            origin.file_name()
        }
    }

    fn started(&self, origin: &ResolvedOrigin<'_>, function: &str, args: &CallArgs) {
        let file = self.file(origin);
        match self.mode {
            LogMode::Simple => tracing::debug!(
                logger = %self.name,
                function,
                args = args.as_str(),
                caller.file = file,
                caller.line = origin.line,
                caller.routine = origin.routine,
                "call started"
            ),
            LogMode::Detailed => tracing::info!(
                logger = %self.name,
                function,
                args = args.as_str(),
                caller.file = file,
                caller.line = origin.line,
                caller.routine = origin.routine,
                "call started"
            ),
        }
    }

    fn succeeded(
        &self,
        origin: &ResolvedOrigin<'_>,
        function: &str,
        value: &dyn fmt::Debug,
        started: Instant,
    ) {
        tracing::info!(
            logger = %self.name,
            function,
            result = ?value,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            caller.file = self.file(origin),
            caller.line = origin.line,
            caller.routine = origin.routine,
            "call succeeded"
        );
    }

    fn failed(
        &self,
        origin: &ResolvedOrigin<'_>,
        function: &str,
        error: &dyn fmt::Display,
        started: Instant,
    ) {
        tracing::warn!(
            logger = %self.name,
            function,
            error = %error,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            caller.file = self.file(origin),
            caller.line = origin.line,
            caller.routine = origin.routine,
            "call failed"
        );
    }
}

/// The logger shared by every [`logger_wrapper`].
pub fn default_logger() -> &'static CallLogger {
    static DEFAULT: OnceLock<CallLogger> = OnceLock::new();
    DEFAULT.get_or_init(|| CallLogger::new(DEFAULT_LOGGER_NAME))
}

/// Thin wrapper over a shared [`CallLogger`].
///
/// Pushes one extra frame of its own before delegating, which the resolver
/// skips.
#[derive(Debug, Clone)]
pub struct LoggerWrapper {
    inner: CallLogger,
}

/// Wrapper around the shared default logger with the given mode.
pub fn logger_wrapper(mode: LogMode) -> LoggerWrapper {
    LoggerWrapper {
        inner: default_logger().clone().with_mode(mode),
    }
}

/// Wrapper around a caller-supplied logger.
pub fn create_logger_wrapper(logger: CallLogger) -> LoggerWrapper {
    LoggerWrapper { inner: logger }
}

impl LoggerWrapper {
    /// The logger this wrapper delegates to.
    pub fn logger(&self) -> &CallLogger {
        &self.inner
    }

    /// [`CallLogger::call`] behind one extra wrapper frame.
    #[track_caller]
    pub fn call<R, F>(&self, function: &str, args: CallArgs, f: F) -> R
    where
        F: FnOnce() -> R,
        R: fmt::Debug,
    {
        let site = Frame::from_location(Location::caller(), "");
        let frame = Frame::wrapper(file!(), line!(), WRAPPER_MODULE, THIN_ROUTINE)
            .with_caller(&site);
        self.inner.call_from(&frame, function, args, f)
    }

    /// [`CallLogger::try_call`] behind one extra wrapper frame.
    #[track_caller]
    pub fn try_call<T, E, F>(&self, function: &str, args: CallArgs, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        T: fmt::Debug,
        E: fmt::Display,
    {
        let site = Frame::from_location(Location::caller(), "");
        let frame = Frame::wrapper(file!(), line!(), WRAPPER_MODULE, THIN_ROUTINE)
            .with_caller(&site);
        self.inner.try_call_from(&frame, function, args, f)
    }
}

/// An ordered stack of named wrapping layers in front of a [`CallLogger`].
///
/// Each layer contributes one tagged frame, outermost first; none of them
/// appear as the origin of a log event.
#[derive(Debug, Clone)]
pub struct Layered {
    layers: Vec<String>,
    logger: CallLogger,
}

impl Layered {
    /// A stack with no layers yet; calls go straight to `logger`.
    pub fn new(logger: CallLogger) -> Self {
        Self {
            layers: Vec::new(),
            logger,
        }
    }

    /// Add a layer inside the existing ones.
    pub fn layer(mut self, name: impl Into<String>) -> Self {
        self.layers.push(name.into());
        self
    }

    pub fn layers(&self) -> &[String] {
        &self.layers
    }

    /// Run `f` through every layer, attributed to the caller of this method.
    #[track_caller]
    pub fn call<R, F>(&self, function: &str, args: CallArgs, f: F) -> R
    where
        F: FnOnce() -> R,
        R: fmt::Debug,
    {
        let site = Frame::from_location(Location::caller(), "");
        self.descend(0, &site, |caller| {
            self.logger.call_from(caller, function, args, f)
        })
    }

    /// Fallible form of [`Layered::call`].
    #[track_caller]
    pub fn try_call<T, E, F>(&self, function: &str, args: CallArgs, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        T: fmt::Debug,
        E: fmt::Display,
    {
        let site = Frame::from_location(Location::caller(), "");
        self.descend(0, &site, |caller| {
            self.logger.try_call_from(caller, function, args, f)
        })
    }

    /// Push one frame per remaining layer, then hand the innermost frame to
    /// `finish`.
    fn descend<T>(
        &self,
        depth: usize,
        caller: &Frame<'_>,
        finish: impl FnOnce(&Frame<'_>) -> T,
    ) -> T {
        match self.layers.get(depth) {
            Some(layer) => {
                let frame = Frame::wrapper(file!(), line!(), WRAPPER_MODULE, layer)
                    .with_caller(caller);
                self.descend(depth + 1, &frame, finish)
            }
            None => finish(caller),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
        }
    }

    fn capture<F: FnOnce()>(f: F) -> String {
        let buffer = Capture::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        buffer.contents()
    }

    fn add(a: i32, b: i32) -> i32 {
        a + b
    }

    #[test]
    fn test_call_attributes_to_call_site() {
        let logger = CallLogger::new("orders");
        let args = CallArgs::new().arg("a", &1).arg("b", &2);
        let mut expected = 0;
        let output = capture(|| {
            expected = line!() + 1;
            let sum = logger.call("add", args, || add(1, 2));
            assert_eq!(sum, 3);
        });

        assert!(output.contains("call succeeded"));
        assert!(output.contains("caller.file=\"wrapper.rs\""));
        assert!(output.contains(&format!("caller.line={expected}")));
        assert!(output.contains("result=3"));
    }

    #[test]
    fn test_thin_wrapper_skips_its_own_frame() {
        let wrapper = create_logger_wrapper(CallLogger::new("thin"));
        let mut expected = 0;
        let output = capture(|| {
            expected = line!() + 1;
            wrapper.call("add", CallArgs::new(), || add(2, 2));
        });

        assert!(output.contains(&format!("caller.line={expected}")));
        assert!(output.contains("caller.routine=\"<caller>\""));
    }

    #[test]
    fn test_layered_skips_every_layer() {
        let layered = Layered::new(CallLogger::new("stack"))
            .layer("timing")
            .layer("audit")
            .layer("metrics");
        assert_eq!(layered.layers().len(), 3);

        let mut expected = 0;
        let output = capture(|| {
            expected = line!() + 1;
            layered.call("add", CallArgs::new(), || add(3, 4));
        });

        assert!(output.contains(&format!("caller.line={expected}")));
        assert!(output.contains("result=7"));
    }

    #[test]
    fn test_layered_try_call_reports_failure_at_call_site() {
        let layered = Layered::new(CallLogger::new("stack"))
            .layer("retry")
            .layer("audit");
        let mut expected = 0;
        let output = capture(|| {
            expected = line!() + 1;
            let result = layered.try_call("load", CallArgs::new(), || Err::<u8, _>("gone"));
            assert_eq!(result, Err("gone"));
        });

        assert!(output.contains("call failed"));
        assert!(output.contains("gone"));
        assert!(output.contains(&format!("caller.line={expected}")));
        assert!(output.contains("caller.routine=\"<caller>\""));
    }

    #[test]
    fn test_call_from_explicit_frame() {
        let logger = CallLogger::new("explicit").with_absolute_paths(true);
        let site = Frame::call("/srv/app/src/jobs.rs", 77, "app::jobs", "run_job");
        let output = capture(|| {
            logger.call_from(&site, "noop", CallArgs::new(), || ());
        });

        assert!(output.contains("caller.file=\"/srv/app/src/jobs.rs\""));
        assert!(output.contains("caller.line=77"));
        assert!(output.contains("caller.routine=\"run_job\""));
    }

    #[test]
    fn test_mode_controls_start_level() {
        let simple = CallLogger::new("simple");
        let detailed = CallLogger::new("detailed").with_mode(LogMode::Detailed);

        let output = capture(|| {
            simple.call("noop", CallArgs::new(), || ());
            detailed.call("noop", CallArgs::new(), || ());
        });

        let started: Vec<&str> = output.lines().filter(|l| l.contains("call started")).collect();
        assert_eq!(started.len(), 2);
        assert!(started[0].contains("DEBUG"));
        assert!(started[1].contains("INFO"));
    }

    #[test]
    fn test_try_call_logs_failure() {
        let logger = CallLogger::new("fallible");
        let output = capture(|| {
            let args = CallArgs::new().arg("input", &"x");
            let result: Result<u8, String> =
                logger.try_call("parse", args, || Err("bad digit".to_string()));
            assert!(result.is_err());
        });

        assert!(output.contains("call failed"));
        assert!(output.contains("bad digit"));
        assert!(output.contains("WARN"));
        assert!(output.contains("input=\\\"x\\\""));
    }

    #[tokio::test]
    async fn test_call_async_returns_output() {
        let logger = CallLogger::new("async");
        let value = logger
            .call_async("compute", CallArgs::new(), async { 40 + 2 })
            .await;
        assert_eq!(value, 42);
    }

    #[test]
    fn test_call_async_attributes_to_call_site() {
        let logger = CallLogger::new("async");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let mut expected = 0;
        let output = capture(|| {
            expected = line!() + 1;
            let pending = logger.call_async("compute", CallArgs::new(), async { 40 + 2 });
            assert_eq!(runtime.block_on(pending), 42);
        });

        assert!(output.contains("call succeeded"));
        assert!(output.contains("caller.file=\"wrapper.rs\""));
        assert!(output.contains(&format!("caller.line={expected}")));
        assert!(output.contains("result=42"));
        assert!(output.contains("call{function=compute}"));
    }

    #[test]
    fn test_call_args_rendering() {
        let args = CallArgs::new().arg("id", &7).arg("name", &"widget");
        assert_eq!(args.as_str(), "id=7, name=\"widget\"");
        assert_eq!(args.to_string(), "(id=7, name=\"widget\")");
        assert_eq!(CallArgs::new().to_string(), "()");
    }

    #[test]
    fn test_log_mode_parse() {
        assert_eq!(LogMode::parse("default"), Some(LogMode::Detailed));
        assert_eq!(LogMode::parse("SIMPLE"), Some(LogMode::Simple));
        assert_eq!(LogMode::parse("loud"), None);
    }

    #[test]
    fn test_logger_wrapper_uses_shared_logger_name() {
        let wrapper = logger_wrapper(LogMode::Detailed);
        assert_eq!(wrapper.logger().name(), DEFAULT_LOGGER_NAME);
        assert_eq!(wrapper.logger().mode(), LogMode::Detailed);
    }
}
