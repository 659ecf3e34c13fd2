//! Error values for every pipeline stage.
//!
//! Mirrors the teacher's own hand-rolled, stage-separated error enum
//! (`ReplError`): no derive-macro error crate, a manual `Display`, and a
//! `From` impl per stage so `?` carries each stage's concrete error up into
//! the single value callers see via [`TemplateError`].

use std::fmt;

use crate::location::Location;

/// Which subsystem raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    None,
    Engine,
    Loader,
    Tokenizer,
    Parser,
    Compiler,
    Renderer,
}

impl Component {
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Engine => "Engine",
            Self::Loader => "Loader",
            Self::Tokenizer => "Tokenizer",
            Self::Parser => "Parser",
            Self::Compiler => "Compiler",
            Self::Renderer => "Renderer",
        }
    }
}

/// A specific failure kind. The numeric discriminants follow the reference
/// implementation's grouped-by-stage convention (Loader=100s, Tokenizer=200s,
/// Parser=300s, Compiler=400s, Renderer=500s) so the code is stable and
/// comparable even though callers normally match on the variant itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Kind {
    NoError = 0,
    TemplateNotFound = 100,
    UnknownToken = 200,
    SyntaxError = 300,
    BadEndblockName = 301,
    NonConstantExpression = 400,
    EmptyTemplateName = 401,
    NoParentBlock = 402,
    InvalidRegularExpression = 403,
    InvalidEscapeMode = 404,
    NoProgram = 500,
    VariableNotSet = 501,
}

impl Kind {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::NoError => "NoError",
            Self::TemplateNotFound => "TemplateNotFound",
            Self::UnknownToken => "UnknownToken",
            Self::SyntaxError => "SyntaxError",
            Self::BadEndblockName => "BadEndblockName",
            Self::NonConstantExpression => "NonConstantExpression",
            Self::EmptyTemplateName => "EmptyTemplateName",
            Self::NoParentBlock => "NoParentBlock",
            Self::InvalidRegularExpression => "InvalidRegularExpression",
            Self::InvalidEscapeMode => "InvalidEscapeMode",
            Self::NoProgram => "NoProgram",
            Self::VariableNotSet => "VariableNotSet",
        }
    }
}

/// `(component, kind, message, location)` — the error value every stage
/// reports through. Not a panic type; `render`/`compile` paths that hit one
/// of these store it and unwind their own step, they never abort the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateError {
    pub component: Component,
    pub kind: Kind,
    pub message: String,
    pub location: Location,
}

impl TemplateError {
    pub fn new(component: Component, kind: Kind, message: impl Into<String>, location: Location) -> Self {
        Self { component, kind, message: message.into(), location }
    }

    pub fn has_failed(&self) -> bool {
        !matches!(self.kind, Kind::NoError)
    }

    pub fn none() -> Self {
        Self { component: Component::None, kind: Kind::NoError, message: String::new(), location: Location::default() }
    }
}

impl Default for TemplateError {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.has_failed() {
            return write!(f, "no error");
        }
        write!(f, "{}/{} at {}: {}", self.component.name(), self.kind.name(), self.location, self.message)
    }
}

impl std::error::Error for TemplateError {}

/// Tokenizer-stage failure, before it is lifted into a [`TemplateError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizeError {
    pub message: String,
    pub location: Location,
}

impl From<TokenizeError> for TemplateError {
    fn from(error: TokenizeError) -> Self {
        Self::new(Component::Tokenizer, Kind::UnknownToken, error.message, error.location)
    }
}

/// Parser-stage failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub kind: Kind,
    pub message: String,
    pub location: Location,
}

impl From<ParseError> for TemplateError {
    fn from(error: ParseError) -> Self {
        Self::new(Component::Parser, error.kind, error.message, error.location)
    }
}

/// Compiler-stage failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub kind: Kind,
    pub message: String,
    pub location: Location,
}

impl From<CompileError> for TemplateError {
    fn from(error: CompileError) -> Self {
        Self::new(Component::Compiler, error.kind, error.message, error.location)
    }
}

/// Renderer-stage failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderError {
    pub kind: Kind,
    pub message: String,
    pub location: Location,
}

impl From<RenderError> for TemplateError {
    fn from(error: RenderError) -> Self {
        Self::new(Component::Renderer, error.kind, error.message, error.location)
    }
}

/// Loader-stage failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderError {
    pub message: String,
}

impl From<LoaderError> for TemplateError {
    fn from(error: LoaderError) -> Self {
        Self::new(Component::Loader, Kind::TemplateNotFound, error.message, Location::default())
    }
}
