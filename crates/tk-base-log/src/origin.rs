//! Call-origin resolution for logging wrappers.
//!
//! Every wrapping layer between user code and the emitter records a [`Frame`]
//! that borrows the frame of whoever called it, so the caller chain is an
//! explicit linked list living on the stack. [`resolve_origin`] walks that
//! list past every frame belonging to the wrapping machinery and reports the
//! first user call site.

use std::borrow::Cow;
use std::fmt;
use std::panic::Location;
use std::path::Path;

/// Routine name used for frames captured from a `#[track_caller]` location,
/// where the enclosing function is not known.
pub const UNKNOWN_ROUTINE: &str = "<caller>";

/// Whether a frame is user code or part of a wrapping layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Ordinary call site.
    Call,
    /// Synthetic frame pushed by a logging wrapper.
    Wrapper,
}

/// One record of the caller chain.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    /// Source file of the call site.
    pub file: &'a str,
    pub line: u32,
    /// Module path the frame belongs to; matched against a [`SkipSet`].
    pub module: &'a str,
    /// Function or layer name; matched against a [`SkipSet`].
    pub routine: &'a str,
    pub kind: FrameKind,
    /// The frame that called this one, `None` at the root of the chain.
    pub caller: Option<&'a Frame<'a>>,
}

impl<'a> Frame<'a> {
    /// A user call-site frame with no caller.
    pub const fn call(file: &'a str, line: u32, module: &'a str, routine: &'a str) -> Self {
        Self {
            file,
            line,
            module,
            routine,
            kind: FrameKind::Call,
            caller: None,
        }
    }

    /// A wrapper frame with no caller.
    pub const fn wrapper(file: &'a str, line: u32, module: &'a str, routine: &'a str) -> Self {
        Self {
            file,
            line,
            module,
            routine,
            kind: FrameKind::Wrapper,
            caller: None,
        }
    }

    /// A call-site frame from a `#[track_caller]` location.
    pub fn from_location(location: &'static Location<'static>, module: &'a str) -> Self {
        Self::call(location.file(), location.line(), module, UNKNOWN_ROUTINE)
    }

    /// Frame for the location this function was called from.
    #[track_caller]
    pub fn here(module: &'a str, routine: &'a str) -> Self {
        let location = Location::caller();
        Self::call(location.file(), location.line(), module, routine)
    }

    /// Link this frame to the frame that called it.
    pub fn with_caller(mut self, caller: &'a Frame<'a>) -> Self {
        self.caller = Some(caller);
        self
    }

    /// Number of frames from here to the root, inclusive.
    pub fn depth(&self) -> usize {
        self.ancestors().count()
    }

    /// Iterate this frame and all of its callers, innermost first.
    pub fn ancestors(&self) -> impl Iterator<Item = &Frame<'a>> {
        std::iter::successors(Some(self), |frame| frame.caller)
    }
}

/// Build a [`Frame`] for the current source position.
///
/// `frame!()` names the routine after the enclosing module; `frame!("name")`
/// names it explicitly.
#[macro_export]
macro_rules! frame {
    () => {
        $crate::origin::Frame::call(file!(), line!(), module_path!(), module_path!())
    };
    ($routine:expr) => {
        $crate::origin::Frame::call(file!(), line!(), module_path!(), $routine)
    };
}

/// Declarative set of `(module, routine)` pairs that identify wrapper frames.
///
/// Frames tagged [`FrameKind::Wrapper`] are always skipped; the set lets
/// wrappers that cannot tag their frames register themselves instead.
#[derive(Debug, Clone)]
pub struct SkipSet {
    entries: Vec<(Cow<'static, str>, Cow<'static, str>)>,
}

impl SkipSet {
    /// An empty set: only tagged frames are skipped.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a `(module, routine)` pair as wrapper machinery.
    pub fn register(
        &mut self,
        module: impl Into<Cow<'static, str>>,
        routine: impl Into<Cow<'static, str>>,
    ) -> &mut Self {
        let entry = (module.into(), routine.into());
        if !self.entries.contains(&entry) {
            self.entries.push(entry);
        }
        self
    }

    /// Builder form of [`SkipSet::register`].
    pub fn with(
        mut self,
        module: impl Into<Cow<'static, str>>,
        routine: impl Into<Cow<'static, str>>,
    ) -> Self {
        self.register(module, routine);
        self
    }

    /// Whether the exact `(module, routine)` pair was registered.
    pub fn contains(&self, module: &str, routine: &str) -> bool {
        self.entries
            .iter()
            .any(|(m, r)| m.as_ref() == module && r.as_ref() == routine)
    }

    /// Whether a frame belongs to the wrapping machinery.
    pub fn skips(&self, frame: &Frame<'_>) -> bool {
        frame.kind == FrameKind::Wrapper || self.contains(frame.module, frame.routine)
    }

    /// Number of registered pairs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SkipSet {
    /// The set containing this crate's own wrapper routines.
    fn default() -> Self {
        let mut set = Self::empty();
        for routine in crate::wrapper::WRAPPER_ROUTINES {
            set.register(crate::wrapper::WRAPPER_MODULE, *routine);
        }
        set
    }
}

/// The call site a log line is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedOrigin<'a> {
    /// File as recorded in the frame, usually relative to the crate root.
    pub file: &'a str,
    /// 1-based line number.
    pub line: u32,
    /// Routine name, or [`UNKNOWN_ROUTINE`] for `#[track_caller]` sites.
    pub routine: &'a str,
}

impl<'a> ResolvedOrigin<'a> {
    /// File name without its directory.
    pub fn file_name(&self) -> &'a str {
        Path::new(self.file)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(self.file)
    }
}

impl<'a> From<&Frame<'a>> for ResolvedOrigin<'a> {
    fn from(frame: &Frame<'a>) -> Self {
        Self {
            file: frame.file,
            line: frame.line,
            routine: frame.routine,
        }
    }
}

impl fmt::Display for ResolvedOrigin<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.file, self.line, self.routine)
    }
}

/// Resolve the user call site for a log event fired inside `frame`.
///
/// Starts at `frame.caller` and advances while the current frame is wrapper
/// machinery, re-checking after every step so any number of composed layers
/// is skipped. If the chain runs out first, the deepest frame reached is
/// returned. Never panics.
pub fn resolve_origin<'a>(frame: &Frame<'a>, skip: &SkipSet) -> ResolvedOrigin<'a> {
    let Some(mut current) = frame.caller else {
        return ResolvedOrigin::from(frame);
    };

    while skip.skips(current) {
        match current.caller {
            Some(next) => current = next,
            None => break,
        }
    }

    ResolvedOrigin::from(current)
}
