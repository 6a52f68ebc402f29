//! Entry point detection for compiled languages
//!
//! Submissions may be a complete program or a bare list of statements. The
//! source is scanned with comments and literals blanked out; if no top-level
//! entry point is found, the statements are wrapped in a synthesized one.

use crate::config::EntryPoint;

/// Source ready to be written into the sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PreparedSource {
    /// Program text
    pub text: String,
    /// File name inside the working directory
    pub file_name: String,
    /// Run target substituted for `{entry}`
    pub entry: String,
}

/// Prepare a submission according to the language's entry point strategy
pub(crate) fn prepare(
    strategy: EntryPoint,
    source: &str,
    source_name: &str,
    output_name: &str,
) -> PreparedSource {
    match strategy {
        EntryPoint::None => PreparedSource {
            text: source.to_owned(),
            file_name: source_name.to_owned(),
            entry: output_name.to_owned(),
        },
        EntryPoint::CMain => PreparedSource {
            text: if has_c_main(source) {
                source.to_owned()
            } else {
                wrap_c_main(source)
            },
            file_name: source_name.to_owned(),
            entry: output_name.to_owned(),
        },
        EntryPoint::JavaClass => prepare_java(source),
    }
}

/// Whether the source defines `main` at file scope
pub(crate) fn has_c_main(source: &str) -> bool {
    let tokens = tokenize(&blank_comments_and_literals(source));
    tokens.windows(2).any(|pair| {
        pair[0].depth == 0 && pair[0].text == "main" && pair[1].text == "("
    })
}

fn wrap_c_main(source: &str) -> String {
    let (hoisted, body) = split_lines(source, |line| {
        line.starts_with('#') || line.starts_with("using ")
    });

    let mut out = String::new();
    if !hoisted.iter().any(|line| line.starts_with("#include")) {
        out.push_str("#include <bits/stdc++.h>\n");
        if !hoisted.iter().any(|line| line.starts_with("using namespace")) {
            out.push_str("using namespace std;\n");
        }
    }
    for line in &hoisted {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str("\nint main() {\n");
    push_indented(&mut out, &body, "    ");
    out.push_str("    return 0;\n}\n");
    out
}

#[derive(Debug)]
struct JavaClass {
    name: String,
    public: bool,
    has_main: bool,
}

fn prepare_java(source: &str) -> PreparedSource {
    let classes = java_classes(source);

    if classes.is_empty() {
        return PreparedSource {
            text: wrap_java_main(source),
            file_name: "Main.java".to_owned(),
            entry: "Main".to_owned(),
        };
    }

    let public = classes.iter().find(|class| class.public);
    let main = classes
        .iter()
        .find(|class| class.has_main)
        .or(public)
        .unwrap_or(&classes[0]);
    // A public class must live in a file of the same name
    let file_class = public.unwrap_or(main);

    PreparedSource {
        text: source.to_owned(),
        file_name: format!("{}.java", file_class.name),
        entry: main.name.clone(),
    }
}

/// Top-level classes with their visibility and whether they declare `main`
fn java_classes(source: &str) -> Vec<JavaClass> {
    let tokens = tokenize(&blank_comments_and_literals(source));
    let mut classes = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        if token.depth != 0 || token.text != "class" {
            i += 1;
            continue;
        }
        let Some(name) = tokens.get(i + 1).filter(|t| is_identifier(&t.text)) else {
            i += 1;
            continue;
        };

        // Modifiers run back to the end of the previous declaration
        let public = tokens[..i]
            .iter()
            .rev()
            .take_while(|t| !matches!(t.text.as_str(), ";" | "{" | "}"))
            .any(|t| t.text == "public");

        // Body spans from the first top-level `{` to its matching `}`
        let Some(open) =
            (i + 2..tokens.len()).find(|&j| tokens[j].text == "{" && tokens[j].depth == 0)
        else {
            break;
        };
        let close = (open + 1..tokens.len())
            .find(|&j| tokens[j].text == "}" && tokens[j].depth == 0)
            .unwrap_or(tokens.len());

        classes.push(JavaClass {
            name: name.text.clone(),
            public,
            has_main: declares_static_main(&tokens[open + 1..close]),
        });
        i = close + 1;
    }

    classes
}

/// Look for `static ... void main(` among a class body's members
fn declares_static_main(body: &[Token]) -> bool {
    (1..body.len().saturating_sub(1)).any(|j| {
        body[j].depth == 1
            && body[j].text == "main"
            && body[j + 1].text == "("
            && body[j - 1].text == "void"
            && body[..j - 1]
                .iter()
                .rev()
                .take_while(|t| !matches!(t.text.as_str(), ";" | "{" | "}"))
                .any(|t| t.text == "static")
    })
}

fn wrap_java_main(source: &str) -> String {
    let (hoisted, body) = split_lines(source, |line| line.starts_with("import "));

    let mut out = String::new();
    for line in &hoisted {
        out.push_str(line);
        out.push('\n');
    }
    if !hoisted.is_empty() {
        out.push('\n');
    }
    out.push_str("public class Main {\n");
    out.push_str("    public static void main(String[] args) throws Exception {\n");
    push_indented(&mut out, &body, "        ");
    out.push_str("    }\n}\n");
    out
}

/// Split lines into those matching `hoist` (trimmed) and the rest
fn split_lines<'a>(source: &'a str, hoist: impl Fn(&str) -> bool) -> (Vec<&'a str>, Vec<&'a str>) {
    let mut hoisted = Vec::new();
    let mut body = Vec::new();
    for line in source.lines() {
        if hoist(line.trim_start()) {
            hoisted.push(line.trim());
        } else {
            body.push(line);
        }
    }
    (hoisted, body)
}

fn push_indented(out: &mut String, lines: &[&str], indent: &str) {
    for line in lines {
        if !line.trim().is_empty() {
            out.push_str(indent);
            out.push_str(line);
        }
        out.push('\n');
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    text: String,
    /// Brace depth the token sits at; a `{` or `}` takes its outer depth
    depth: usize,
}

/// Split into identifiers and single punctuation characters, tracking braces
fn tokenize(source: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut chars = source.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        if c.is_whitespace() {
            continue;
        }
        if is_identifier_char(c) {
            let mut end = start + c.len_utf8();
            while let Some(&(idx, next)) = chars.peek() {
                if !is_identifier_char(next) {
                    break;
                }
                end = idx + next.len_utf8();
                chars.next();
            }
            tokens.push(Token {
                text: source[start..end].to_owned(),
                depth,
            });
            continue;
        }
        match c {
            '{' => {
                tokens.push(Token { text: "{".to_owned(), depth });
                depth += 1;
            }
            '}' => {
                depth = depth.saturating_sub(1);
                tokens.push(Token { text: "}".to_owned(), depth });
            }
            _ => tokens.push(Token {
                text: c.to_string(),
                depth,
            }),
        }
    }

    tokens
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn is_identifier(text: &str) -> bool {
    text.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
}

/// Replace comments and string/char literal contents with spaces
///
/// Newlines are preserved so line structure survives.
fn blank_comments_and_literals(source: &str) -> String {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Code,
        LineComment,
        BlockComment,
        Literal(char),
    }

    let mut out = String::with_capacity(source.len());
    let mut state = State::Code;
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::BlockComment;
                }
                '"' | '\'' => {
                    out.push(' ');
                    state = State::Literal(c);
                }
                _ => out.push(c),
            },
            State::LineComment => {
                if c == '\n' {
                    out.push('\n');
                    state = State::Code;
                } else {
                    out.push(' ');
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("  ");
                    state = State::Code;
                } else {
                    out.push(if c == '\n' { '\n' } else { ' ' });
                }
            }
            State::Literal(quote) => {
                if c == '\\' {
                    chars.next();
                    out.push_str("  ");
                } else if c == quote {
                    out.push(' ');
                    state = State::Code;
                } else {
                    out.push(if c == '\n' { '\n' } else { ' ' });
                }
            }
        }
    }

    out
}
