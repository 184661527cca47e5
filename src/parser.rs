use std::fmt;

use crate::redirect::Redirection;

/// A parsed command: program name plus arguments, plus any redirections
/// attached to it by the per-command walk in [`parse_command`].
#[derive(Debug, PartialEq)]
pub struct Command {
    pub args: Vec<String>,
    pub redirections: Vec<Redirection>,
}

impl Command {
    pub fn program(&self) -> &str {
        &self.args[0]
    }
}

/// Either a single command, or two commands joined by one pipe.
#[derive(Debug)]
pub enum Pipeline {
    Single(Command),
    Piped(Command, Command),
}

/// A fully parsed input line: a pipeline plus whether it was backgrounded.
#[derive(Debug)]
pub struct ParsedLine {
    pub pipeline: Pipeline,
    pub background: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// A redirection operator (`<` or `>`) was not followed by a filename,
    /// or was followed by another operator.
    SyntaxRedirection(&'static str),
    /// A pipe was present but one side produced no command at all.
    SyntaxMissingCommand,
    /// Redirections were given but no command word preceded them.
    SyntaxEmptyCommand,
    /// One side of a pipe is a builtin; this shell's builtins are not pipe-safe.
    BuiltinInPipeline(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::SyntaxRedirection(op) => {
                write!(f, "ca$h: syntax error: expected filename after '{op}'")
            }
            ParseError::SyntaxMissingCommand => {
                write!(f, "ca$h: syntax error: missing command for pipe")
            }
            ParseError::SyntaxEmptyCommand => {
                write!(f, "ca$h: syntax error: redirection with no command")
            }
            ParseError::BuiltinInPipeline(name) => {
                write!(f, "ca$h: {name}: builtins cannot appear in a pipeline")
            }
        }
    }
}

/// States for the tokenizer state machine.
enum State {
    /// Between tokens — whitespace is skipped
    Normal,
    /// Building an unquoted word — whitespace ends it
    InWord,
    /// Inside double quotes — whitespace is preserved
    InDoubleQuote,
    /// Inside single quotes — everything is literal
    InSingleQuote,
}

fn is_word_separator(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n' | '\u{7}')
}

/// Tokenize a shell input line into a list of words.
///
/// Splits on any run of spaces, tabs, CR, LF, or bell. Handles
/// double-quoted and single-quoted strings and backslash escapes; `<`, `>`,
/// `|`, `&` are ordinary characters here and only become operators once a
/// token is recognized as standing alone (see [`parse_command`]).
pub fn tokenize(input: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut state = State::Normal;
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        match (&state, ch) {
            (State::Normal, c) if is_word_separator(c) => {}
            (State::Normal, '"') => state = State::InDoubleQuote,
            (State::Normal, '\'') => state = State::InSingleQuote,
            (State::Normal, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                state = State::InWord;
            }
            (State::Normal, c) => {
                current.push(c);
                state = State::InWord;
            }

            (State::InWord, c) if is_word_separator(c) => {
                tokens.push(std::mem::take(&mut current));
                state = State::Normal;
            }
            (State::InWord, '"') => state = State::InDoubleQuote,
            (State::InWord, '\'') => state = State::InSingleQuote,
            (State::InWord, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (State::InWord, c) => current.push(c),

            (State::InDoubleQuote, '"') => state = State::InWord,
            (State::InDoubleQuote, '\\') => match chars.peek() {
                Some(&'"' | &'\\' | &'$' | &'`') => {
                    current.push(chars.next().unwrap());
                }
                _ => current.push('\\'),
            },
            (State::InDoubleQuote, c) => current.push(c),

            (State::InSingleQuote, '\'') => state = State::InWord,
            (State::InSingleQuote, c) => current.push(c),
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// Parse one already-tokenized command segment (no `|` inside) into a
/// `Command`, per spec §4.1's "Per-command parse": walk tokens left to
/// right, diverting `<`/`>` operators into redirections and everything
/// else into the argument list.
///
/// Returns `Ok(None)` for a blank segment (no tokens at all), and
/// `Err(SyntaxEmptyCommand)` if redirections were seen but no argument
/// ever appeared.
pub fn parse_command(tokens: &[String]) -> Result<Option<Command>, ParseError> {
    let mut args = Vec::new();
    let mut redirections = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        match tokens[i].as_str() {
            "<" => {
                i += 1;
                let path = expect_filename(tokens, i, "<")?;
                redirections.push(Redirection::input(path));
            }
            ">" => {
                i += 1;
                let path = expect_filename(tokens, i, ">")?;
                redirections.push(Redirection::output(path));
            }
            other => args.push(other.to_string()),
        }
        i += 1;
    }

    if args.is_empty() {
        if redirections.is_empty() {
            return Ok(None);
        }
        return Err(ParseError::SyntaxEmptyCommand);
    }

    Ok(Some(Command { args, redirections }))
}

fn expect_filename(tokens: &[String], i: usize, operator: &'static str) -> Result<String, ParseError> {
    match tokens.get(i) {
        Some(tok) if tok != "<" && tok != ">" => Ok(tok.clone()),
        _ => Err(ParseError::SyntaxRedirection(operator)),
    }
}

/// Parse a full input line into a [`ParsedLine`], per spec §4.1.
///
/// `is_builtin` gates the pipeline-level `BuiltinInPipeline` check; this
/// shell has no pure-filter builtins, so any builtin on either side of a
/// pipe is rejected.
pub fn parse_line(line: &str, is_builtin: impl Fn(&str) -> bool) -> Result<Option<ParsedLine>, ParseError> {
    let mut trimmed = line.trim_end();
    let background = trimmed.ends_with('&');
    if background {
        trimmed = trimmed[..trimmed.len() - 1].trim_end();
    }

    if trimmed.trim().is_empty() {
        return Ok(None);
    }

    let tokens = tokenize(trimmed);
    let pipe_at = tokens.iter().position(|t| t == "|");

    let pipeline = match pipe_at {
        None => {
            let Some(cmd) = parse_command(&tokens)? else {
                return Ok(None);
            };
            Pipeline::Single(cmd)
        }
        Some(idx) => {
            let (left_tokens, rest) = tokens.split_at(idx);
            let right_tokens = &rest[1..];

            let left = parse_command(left_tokens)?.ok_or(ParseError::SyntaxMissingCommand)?;
            let mut right = parse_command(right_tokens)?.ok_or(ParseError::SyntaxMissingCommand)?;

            if is_builtin(left.program()) {
                return Err(ParseError::BuiltinInPipeline(left.program().to_string()));
            }
            if is_builtin(right.program()) {
                return Err(ParseError::BuiltinInPipeline(right.program().to_string()));
            }

            let mut left = left;
            if left.redirections.iter().any(Redirection::is_output) {
                eprintln!(
                    "ca$h: warning: output redirection on left side of pipe is ignored"
                );
                left.redirections.retain(|r| !r.is_output());
            }
            if right.redirections.iter().any(Redirection::is_input) {
                eprintln!(
                    "ca$h: warning: input redirection on right side of pipe is ignored"
                );
                right.redirections.retain(|r| !r.is_input());
            }

            Pipeline::Piped(left, right)
        }
    };

    Ok(Some(ParsedLine {
        pipeline,
        background,
    }))
}
