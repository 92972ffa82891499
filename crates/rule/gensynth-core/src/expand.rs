//! Command template parsing and expansion.
//!
//! A template is parsed once into [`Segment`]s and can then be expanded any
//! number of times. Expansion never stops at the first bad reference: every
//! failing `$(...)` is recorded and the whole list is returned, so a user
//! sees all problems in a command at once.

use std::path::{Path, PathBuf};

use crate::error::ErrorKind;
use crate::label::LabelResolver;
use crate::sandbox::SandboxMapper;

/// Text substituted for a reference that failed to expand.
const ERROR_PLACEHOLDER: &str = "GENSYNTH_ERROR";

/// One piece of a parsed command template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Plain text, never containing `$`.
    Literal(String),
    /// A `$(name)` reference; the name has surrounding whitespace trimmed.
    Variable(String),
    /// The `$$` escape.
    Dollar,
}

/// A parsed command template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a command template.
    pub fn parse(src: &str) -> Result<Self, ErrorKind> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = src.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            if c != '$' {
                literal.push(c);
                continue;
            }

            let Some(&(next_pos, next)) = chars.peek() else {
                return Err(syntax("expected character after '$'"));
            };

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }

            match next {
                '$' => {
                    chars.next();
                    segments.push(Segment::Dollar);
                }
                '(' => {
                    let body_start = next_pos + 1;
                    let Some(close) = src[body_start..].find(')') else {
                        return Err(syntax("missing )"));
                    };
                    let name = src[body_start..body_start + close].trim();
                    segments.push(Segment::Variable(name.to_string()));
                    // Skip past the closing paren.
                    while chars.next_if(|&(i, _)| i <= body_start + close).is_some() {}
                }
                c if c.is_whitespace() => {
                    return Err(syntax(&format!("unexpected character '{c}' after '$'")));
                }
                _ => {
                    let rest = &src[pos + 1..];
                    let word = rest
                        .split(char::is_whitespace)
                        .next()
                        .unwrap_or(rest);
                    return Err(syntax(&format!(
                        "expected '(' after '$', did you mean $({word})?"
                    )));
                }
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self {
            source: src.to_string(),
            segments,
        })
    }

    /// The template text this was parsed from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// The parsed segments, in template order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Names of every `$(...)` reference, in template order.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Variable(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

fn syntax(msg: &str) -> ErrorKind {
    ErrorKind::TemplateSyntax(msg.to_string())
}

/// Everything besides labels that a template can refer to.
pub struct ExpandContext<'a> {
    /// All resolved rule sources (`$(in)`), in declaration order.
    pub sources: &'a [String],
    /// The task's declared outputs (`$(out)`), as host paths.
    pub outputs: &'a [PathBuf],
    /// The task's sandbox directory (`$(genDir)`), as a host path.
    pub sandbox_dir: &'a Path,
    /// Whether the rule enabled dependency-file tracking.
    pub depfile: bool,
    /// Whether the rule declared any `tools` or `tool_files`.
    pub has_tools: bool,
    /// Renders host paths as sandbox paths.
    pub mapper: &'a dyn SandboxMapper,
}

/// A successfully expanded command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    /// The final command text.
    pub command: String,
    /// Whether `$(depfile)` appeared in the template.
    pub referenced_depfile: bool,
}

/// Expand `template` against `labels` and `ctx`.
///
/// Returns every per-reference error found. A template that never
/// references `$(depfile)` while depfile tracking is enabled also fails with
/// [`ErrorKind::DepfileUnreferenced`], after any per-reference errors.
pub fn expand(
    template: &Template,
    labels: &LabelResolver,
    ctx: &ExpandContext<'_>,
) -> Result<Expansion, Vec<ErrorKind>> {
    let mut command = String::new();
    let mut errors = Vec::new();
    let mut referenced_depfile = false;

    for segment in template.segments() {
        match segment {
            Segment::Literal(text) => command.push_str(text),
            Segment::Dollar => command.push('$'),
            Segment::Variable(name) => {
                if name == "depfile" {
                    referenced_depfile = true;
                }
                match expand_variable(name, labels, ctx) {
                    Ok(value) => command.push_str(&value),
                    Err(e) => {
                        errors.push(e);
                        command.push_str(ERROR_PLACEHOLDER);
                    }
                }
            }
        }
    }

    if ctx.depfile && !referenced_depfile {
        errors.push(ErrorKind::DepfileUnreferenced);
    }
    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(Expansion {
        command,
        referenced_depfile,
    })
}

fn expand_variable(
    name: &str,
    labels: &LabelResolver,
    ctx: &ExpandContext<'_>,
) -> Result<String, ErrorKind> {
    match name {
        "location" => {
            if !ctx.has_tools {
                return Err(ErrorKind::NoDefaultLabel);
            }
            labels.resolve_default_single().map(str::to_string)
        }
        "in" => Ok(ctx.sources.join(" ")),
        "out" => Ok(ctx
            .outputs
            .iter()
            .map(|out| ctx.mapper.output_path(out, ctx.sandbox_dir))
            .collect::<Vec<_>>()
            .join(" ")),
        "depfile" => {
            if ctx.depfile {
                Ok(ctx.mapper.depfile_path())
            } else {
                Err(ErrorKind::DepfileNotEnabled)
            }
        }
        "genDir" => Ok(ctx.mapper.output_path(ctx.sandbox_dir, ctx.sandbox_dir)),
        _ => {
            if let Some(label) = name.strip_prefix("location ") {
                labels.resolve_single(label.trim()).map(str::to_string)
            } else if let Some(label) = name.strip_prefix("locations ") {
                labels.resolve_plural(label.trim()).map(|paths| paths.join(" "))
            } else {
                Err(ErrorKind::UnknownVariable(name.to_string()))
            }
        }
    }
}

/// Substitute only the variables `lookup` knows about.
///
/// Every other reference and every `$$` is written back verbatim, and `$`
/// inside substituted values is doubled, so the result parses again into a
/// template with the same remaining references.
pub fn expand_partial(template: &Template, mut lookup: impl FnMut(&str) -> Option<String>) -> String {
    let mut out = String::new();
    for segment in template.segments() {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Dollar => out.push_str("$$"),
            Segment::Variable(name) => match lookup(name) {
                Some(value) => out.push_str(&value.replace('$', "$$")),
                None => {
                    out.push_str("$(");
                    out.push_str(name);
                    out.push(')');
                }
            },
        }
    }
    out
}
