//! Kernel source documents.
//!
//! The runtime does not compile kernel language itself. It scans the source
//! for what the build step needs: `__kernel` entry points, enabled extension
//! pragmas and `#error` directives. Directives are only counted on lines
//! left active by `#if`/`#ifdef`/`#ifndef` guards, given the macros defined
//! in the source and on the build command line.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelDecl {
    pub name: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub value: String,
    pub line: usize,
}

/// Preprocessor directives that survive conditional compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    pub extensions: Vec<Directive>,
    pub errors: Vec<Directive>,
}

/// One self-contained kernel source unit.
#[derive(Debug, Clone)]
pub struct KernelSource {
    label: String,
    path: Option<PathBuf>,
    text: String,
    stripped: String,
    kernels: Vec<KernelDecl>,
    directives: Directives,
}

impl KernelSource {
    pub fn new<L: Into<String>, T: Into<String>>(label: L, text: T) -> Self {
        let text = text.into();
        let stripped = strip_comments(&text);
        let directives = scan_directives(&stripped, &[]);
        let kernels = scan_kernels(&stripped);

        Self {
            label: label.into(),
            path: None,
            text,
            stripped,
            kernels,
            directives,
        }
    }

    /// Load a source file. A missing file is [`Error::SourceNotFound`];
    /// other read failures are I/O errors.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::SourceNotFound {
                path: path.to_path_buf(),
            },
            _ => Error::Io(e),
        })?;

        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mut source = Self::new(label, text);
        source.path = Some(path.to_path_buf());
        Ok(source)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn declarations(&self) -> &[KernelDecl] {
        &self.kernels
    }

    pub fn kernel_names(&self) -> impl Iterator<Item = &str> {
        self.kernels.iter().map(|k| k.name.as_str())
    }

    /// Extension pragmas active with no command-line defines.
    pub fn enabled_extensions(&self) -> &[Directive] {
        &self.directives.extensions
    }

    /// `#error` lines active with no command-line defines.
    pub fn error_directives(&self) -> &[Directive] {
        &self.directives.errors
    }

    /// Directives active once `defines` (`-D name[=value]`) are applied.
    pub fn directives(&self, defines: &[(String, Option<String>)]) -> Directives {
        if defines.is_empty() {
            return self.directives.clone();
        }
        scan_directives(&self.stripped, defines)
    }
}

// Replace comments with spaces, keeping newlines so line numbers survive.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, chars.peek().copied()) {
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

struct Branch {
    parent_active: bool,
    taken: bool,
}

struct Conditions {
    macros: HashMap<String, String>,
    branches: Vec<Branch>,
    active: bool,
}

impl Conditions {
    fn new(defines: &[(String, Option<String>)]) -> Self {
        let macros = defines
            .iter()
            .map(|(name, value)| (name.clone(), value.clone().unwrap_or_else(|| "1".to_string())))
            .collect();
        Self {
            macros,
            branches: Vec::new(),
            active: true,
        }
    }

    fn open(&mut self, cond: bool) {
        self.branches.push(Branch {
            parent_active: self.active,
            taken: cond,
        });
        self.active = self.active && cond;
    }

    fn alternative(&mut self, cond: Option<bool>) {
        if let Some(branch) = self.branches.last_mut() {
            let cond = !branch.taken && cond.unwrap_or(true);
            branch.taken |= cond;
            self.active = branch.parent_active && cond;
        }
    }

    fn close(&mut self) {
        if let Some(branch) = self.branches.pop() {
            self.active = branch.parent_active;
        }
    }

    // Understands integers, `defined(X)`, `defined X`, a leading `!` and
    // bare macro names. Anything else counts as true.
    fn eval(&self, expr: &str) -> bool {
        let expr = expr.trim();
        if let Some(inner) = expr.strip_prefix('!') {
            return !self.eval(inner);
        }
        if let Some(rest) = expr.strip_prefix("defined") {
            let name = rest.trim().trim_start_matches('(').trim_end_matches(')').trim();
            return self.macros.contains_key(name);
        }
        if let Ok(n) = expr.parse::<i64>() {
            return n != 0;
        }
        match self.macros.get(expr) {
            Some(value) => value.trim().parse::<i64>().map_or(true, |n| n != 0),
            None if expr.chars().all(|c| c.is_alphanumeric() || c == '_') => false,
            None => true,
        }
    }
}

fn first_word(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or("")
}

fn scan_directives(text: &str, defines: &[(String, Option<String>)]) -> Directives {
    let mut found = Directives::default();
    let mut cond = Conditions::new(defines);

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let Some(rest) = line.trim_start().strip_prefix('#') else {
            continue;
        };
        let rest = rest.trim_start();
        let keyword = rest
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .next()
            .unwrap_or("");
        let args = &rest[keyword.len()..];

        match keyword {
            "ifdef" => {
                let defined = cond.macros.contains_key(first_word(args));
                cond.open(defined);
            }
            "ifndef" => {
                let defined = cond.macros.contains_key(first_word(args));
                cond.open(!defined);
            }
            "if" => {
                let value = cond.eval(args);
                cond.open(value);
            }
            "elif" => {
                let value = cond.eval(args);
                cond.alternative(Some(value));
            }
            "else" => cond.alternative(None),
            "endif" => cond.close(),
            _ if !cond.active => {}
            "define" => {
                let mut parts = args.trim().splitn(2, char::is_whitespace);
                if let Some(name) = parts.next().filter(|n| !n.is_empty()) {
                    let value = parts.next().unwrap_or("1").trim().to_string();
                    cond.macros.insert(name.to_string(), value);
                }
            }
            "undef" => {
                cond.macros.remove(first_word(args));
            }
            "pragma" => {
                let tokens: Vec<&str> = args
                    .split(|c: char| c.is_whitespace() || c == ':')
                    .filter(|t| !t.is_empty())
                    .collect();
                if let ["OPENCL", "EXTENSION", name, "enable", ..] = tokens.as_slice() {
                    if *name != "all" {
                        found.extensions.push(Directive {
                            value: name.to_string(),
                            line: line_no,
                        });
                    }
                }
            }
            "error" => found.errors.push(Directive {
                value: args.trim().to_string(),
                line: line_no,
            }),
            _ => {}
        }
    }

    found
}

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Word(&'a str),
    Punct(char),
}

fn tokenize(text: &str) -> Vec<(Token<'_>, usize)> {
    let mut tokens = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        // preprocessor lines never declare kernels
        if line.trim_start().starts_with('#') {
            continue;
        }
        let mut start = None;
        for (pos, c) in line.char_indices() {
            let word_char = c.is_alphanumeric() || c == '_';
            match (word_char, start) {
                (true, None) => start = Some(pos),
                (false, Some(s)) => {
                    tokens.push((Token::Word(&line[s..pos]), idx + 1));
                    start = None;
                }
                _ => {}
            }
            if !word_char && !c.is_whitespace() {
                tokens.push((Token::Punct(c), idx + 1));
            }
        }
        if let Some(s) = start {
            tokens.push((Token::Word(&line[s..]), idx + 1));
        }
    }
    tokens
}

fn scan_kernels(text: &str) -> Vec<KernelDecl> {
    let tokens = tokenize(text);
    let mut kernels = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        let is_kernel = matches!(tokens[i].0, Token::Word("__kernel") | Token::Word("kernel"));
        i += 1;
        if !is_kernel {
            continue;
        }

        // skip qualifiers and attributes up to the return type
        while i < tokens.len() {
            match tokens[i].0 {
                Token::Word("void") => {
                    if let Some((Token::Word(name), line)) = tokens.get(i + 1) {
                        kernels.push(KernelDecl {
                            name: name.to_string(),
                            line: *line,
                        });
                    }
                    i += 1;
                    break;
                }
                Token::Punct('{') | Token::Punct(';') => break,
                _ => i += 1,
            }
        }
    }

    kernels
}
