//! Streaming record extraction.
//!
//! One pass over a line's tokens reconstructs only the objects some handler
//! is registered for. Several reconstructions may be open at once, for example
//! a whole envelope and a nested `web_channel` object inside it; every token is
//! fed to all of them.

pub mod frame;
pub mod registry;
pub mod token;

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::ExtractError;
use crate::record::MetricRecord;

pub use frame::ReconstructionFrame;
pub use registry::{Handler, HandlerRef, HandlerRegistry, HandlerRegistryBuilder};
pub use token::{TokenEvent, Tokenizer};

/// Segment appended to the path of an array's elements.
pub const ARRAY_ITEM: &str = "item";

/// Extracts metric records from lines using a shared registry.
#[derive(Debug, Clone)]
pub struct Extractor {
    registry: Arc<HandlerRegistry>,
}

impl Extractor {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Lazily extract records from one line.
    pub fn extract<'a>(&'a self, line: &'a [u8]) -> Extraction<'a> {
        Extraction {
            registry: &self.registry,
            tokens: Tokenizer::new(line),
            path: String::new(),
            levels: Vec::new(),
            frames: Vec::new(),
            ready: VecDeque::new(),
            errors: Vec::new(),
            done: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum LevelKind {
    Object {
        /// Offset in `path` where the current member name starts.
        name_start: Option<usize>,
    },
    Array,
}

#[derive(Debug, Clone, Copy)]
struct Level {
    /// Length of the container's own path.
    own_len: usize,
    kind: LevelKind,
}

struct ActiveFrame {
    key: String,
    handler: HandlerRef,
    frame: ReconstructionFrame,
}

/// Records of one line, produced as the tokens are consumed.
///
/// Single use: iterate again by calling [`Extractor::extract`] again. Handler
/// failures and a tokenizer failure do not end the sequence early; they are
/// collected and available from [`Extraction::errors`].
pub struct Extraction<'a> {
    registry: &'a HandlerRegistry,
    tokens: Tokenizer<'a>,
    /// Dotted path of the current value position.
    path: String,
    levels: Vec<Level>,
    frames: Vec<ActiveFrame>,
    ready: VecDeque<MetricRecord>,
    errors: Vec<ExtractError>,
    done: bool,
}

impl Extraction<'_> {
    /// Problems seen so far.
    pub fn errors(&self) -> &[ExtractError] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<ExtractError> {
        std::mem::take(&mut self.errors)
    }

    /// Whether the line stopped tokenizing before its end.
    pub fn is_malformed(&self) -> bool {
        self.errors
            .iter()
            .any(|e| matches!(e, ExtractError::Tokenize { .. }))
    }

    fn consume(&mut self, event: TokenEvent) {
        let mut closed = false;
        for active in &mut self.frames {
            closed |= active.frame.feed(&event);
        }
        if closed {
            self.fire_completed();
        }

        match event {
            TokenEvent::StartObject => {
                self.open_frames();
                self.levels.push(Level {
                    own_len: self.path.len(),
                    kind: LevelKind::Object { name_start: None },
                });
            }
            TokenEvent::StartArray => {
                self.levels.push(Level {
                    own_len: self.path.len(),
                    kind: LevelKind::Array,
                });
                self.push_segment(ARRAY_ITEM);
            }
            TokenEvent::EndObject | TokenEvent::EndArray => {
                if let Some(level) = self.levels.pop() {
                    self.path.truncate(level.own_len);
                }
            }
            TokenEvent::Key(key) => {
                if let Some(level) = self.levels.last().copied() {
                    self.path.truncate(level.own_len);
                    let name_start = self.push_segment(&key);
                    if let Some(top) = self.levels.last_mut() {
                        top.kind = LevelKind::Object {
                            name_start: Some(name_start),
                        };
                    }
                }
            }
            TokenEvent::Scalar(_) => {}
        }
    }

    /// Append a path segment, returning where it starts.
    fn push_segment(&mut self, segment: &str) -> usize {
        if !self.path.is_empty() {
            self.path.push('.');
        }
        let start = self.path.len();
        self.path.push_str(segment);
        start
    }

    /// Start frames for an object opening at the current path.
    fn open_frames(&mut self) {
        let registry = self.registry;
        let full = self.path.as_str();
        let name = match self.levels.last() {
            Some(Level {
                kind: LevelKind::Object {
                    name_start: Some(start),
                },
                ..
            }) => Some(&self.path[*start..]),
            _ => None,
        };

        let mut keys = vec![full];
        if let Some(name) = name.filter(|name| *name != full) {
            keys.push(name);
        }

        for key in keys {
            for handler in registry.lookup(key) {
                self.frames.push(ActiveFrame {
                    key: key.to_string(),
                    handler: Arc::clone(handler),
                    frame: ReconstructionFrame::new(),
                });
            }
        }
    }

    fn fire_completed(&mut self) {
        let (complete, open): (Vec<_>, Vec<_>) = std::mem::take(&mut self.frames)
            .into_iter()
            .partition(|active| active.frame.is_complete());
        self.frames = open;
        for active in complete {
            self.fire(active);
        }
    }

    fn fire(&mut self, active: ActiveFrame) {
        let value = active.frame.into_value();
        match active.handler.handle(&value) {
            Ok(records) => self.ready.extend(records),
            Err(source) => self.errors.push(ExtractError::Handler {
                key: active.key,
                source,
            }),
        }
    }

    /// Run the handlers of frames left open by a truncated line, outermost first.
    fn finalize_open(&mut self) {
        for active in std::mem::take(&mut self.frames) {
            self.fire(active);
        }
    }
}

impl Iterator for Extraction<'_> {
    type Item = MetricRecord;

    fn next(&mut self) -> Option<MetricRecord> {
        loop {
            if let Some(record) = self.ready.pop_front() {
                return Some(record);
            }
            if self.done {
                return None;
            }
            match self.tokens.next() {
                Some(Ok(event)) => self.consume(event),
                Some(Err(source)) => {
                    self.done = true;
                    self.finalize_open();
                    self.errors.push(ExtractError::Tokenize { source });
                }
                None => {
                    self.done = true;
                    self.frames.clear();
                }
            }
        }
    }
}
