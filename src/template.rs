//! Text templates with `{{ .Field }}` placeholders.
//!
//! The language is a small subset of Go's text/template:
//!
//! * `{{ .Name }}` and dotted paths such as `{{ .Project.Name }}`
//! * helper calls with string arguments, `{{ .Variable "replicas" }}`
//! * `{{ if .Name }}...{{ else if .Other }}...{{ else }}...{{ end }}`
//! * comments, `{{/* ignored */}}`
//! * whitespace trimming with `{{- ` and ` -}}`
//!
//! Referencing something the [`Scope`] does not define is a render error,
//! except inside an `if` condition where it simply counts as false.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("template parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("template render error at line {line}: {message}")]
    Render { line: usize, message: String },
}

/// Values a template can refer to.
pub trait Scope {
    /// Look up a field by its dotted path, without the leading dot.
    fn field(&self, path: &str) -> Option<String>;

    /// Call a helper. `None` means no such helper exists.
    fn call(&self, _name: &str, _args: &[String]) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Expr {
    path: String,
    args: Vec<String>,
    line: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Value(Expr),
    If {
        condition: Expr,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

/// A parsed template, ready to render any number of times.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, Error> {
        let mut parser = Parser {
            items: lex(source)?.into_iter(),
        };
        let (nodes, terminator) = parser.parse_list()?;
        match terminator {
            None => Ok(Self { nodes }),
            Some(Terminator::End(line)) => Err(parse_error(line, "unexpected {{ end }}")),
            Some(Terminator::Else(_, line)) => Err(parse_error(line, "unexpected {{ else }}")),
        }
    }

    pub fn render(&self, scope: &dyn Scope) -> Result<String, Error> {
        let mut out = String::new();
        render_nodes(&self.nodes, scope, &mut out)?;
        Ok(out)
    }
}

/// Parse and render `source` in one go.
pub fn expand(source: &str, scope: &dyn Scope) -> Result<String, Error> {
    Template::parse(source)?.render(scope)
}

fn parse_error(line: usize, message: impl Into<String>) -> Error {
    Error::Parse {
        line,
        message: message.into(),
    }
}

#[derive(Debug, PartialEq)]
enum Word {
    Keyword(String),
    Field(String),
    Literal(String),
}

#[derive(Debug)]
enum Item {
    Text(String),
    Action { words: Vec<Word>, line: usize },
}

fn lex(source: &str) -> Result<Vec<Item>, Error> {
    let mut items = Vec::new();
    let mut rest = source;
    let mut line = 1;
    let mut trim_next_text = false;

    while let Some(open) = rest.find("{{") {
        let mut text = &rest[..open];
        if trim_next_text {
            text = text.trim_start();
        }

        let mut body = &rest[open + 2..];
        if body.starts_with('-') && body[1..].starts_with(char::is_whitespace) {
            text = text.trim_end();
            body = &body[1..];
        }
        if !text.is_empty() {
            items.push(Item::Text(text.to_string()));
        }
        line += rest[..open].matches('\n').count();

        let close = find_close(body).ok_or_else(|| parse_error(line, "unclosed action"))?;
        let mut inner = &body[..close];
        trim_next_text = false;
        if inner.ends_with('-') && inner[..inner.len() - 1].ends_with(char::is_whitespace) {
            inner = &inner[..inner.len() - 1];
            trim_next_text = true;
        }

        let trimmed = inner.trim();
        if !(trimmed.starts_with("/*") && trimmed.ends_with("*/")) {
            items.push(Item::Action {
                words: tokenize(trimmed, line)?,
                line,
            });
        }

        line += body[..close].matches('\n').count();
        rest = &body[close + 2..];
    }

    let text = if trim_next_text { rest.trim_start() } else { rest };
    if !text.is_empty() {
        items.push(Item::Text(text.to_string()));
    }
    Ok(items)
}

/// Offset of the `}}` closing an action, skipping over quoted strings and
/// the contents of a `/* */` comment.
fn find_close(body: &str) -> Option<usize> {
    let content = body.trim_start();
    if content.starts_with("/*") {
        let offset = body.len() - content.len();
        let comment_end = offset + content.find("*/")? + 2;
        return body[comment_end..].find("}}").map(|close| comment_end + close);
    }

    let bytes = body.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(b'"') if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'`' => quote = Some(b),
            None if b == b'}' && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn tokenize(action: &str, line: usize) -> Result<Vec<Word>, Error> {
    let mut words = Vec::new();
    let mut chars = action.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '.' {
            let mut path = String::new();
            while let Some(&c) = chars.peek() {
                if is_ident_char(c) || c == '.' {
                    path.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            let path = &path[1..];
            if path.is_empty() || path.split('.').any(str::is_empty) {
                return Err(parse_error(line, format!("malformed field reference '.{path}'")));
            }
            words.push(Word::Field(path.to_string()));
        } else if c == '"' {
            chars.next();
            let mut literal = String::new();
            loop {
                match chars.next() {
                    None => return Err(parse_error(line, "unterminated string")),
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some('n') => literal.push('\n'),
                        Some('t') => literal.push('\t'),
                        Some(other @ ('"' | '\\')) => literal.push(other),
                        Some(other) => {
                            return Err(parse_error(line, format!("unknown escape '\\{other}'")))
                        }
                        None => return Err(parse_error(line, "unterminated string")),
                    },
                    Some(other) => literal.push(other),
                }
            }
            words.push(Word::Literal(literal));
        } else if c == '`' {
            chars.next();
            let mut literal = String::new();
            loop {
                match chars.next() {
                    None => return Err(parse_error(line, "unterminated raw string")),
                    Some('`') => break,
                    Some(other) => literal.push(other),
                }
            }
            words.push(Word::Literal(literal));
        } else if c.is_ascii_alphabetic() {
            let mut keyword = String::new();
            while let Some(&c) = chars.peek() {
                if is_ident_char(c) {
                    keyword.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            words.push(Word::Keyword(keyword));
        } else {
            return Err(parse_error(line, format!("unexpected character '{c}'")));
        }
    }

    Ok(words)
}

enum Terminator {
    Else(Option<Expr>, usize),
    End(usize),
}

struct Parser {
    items: std::vec::IntoIter<Item>,
}

impl Parser {
    /// Parse nodes up to the next `else`/`end`, or the end of input.
    fn parse_list(&mut self) -> Result<(Vec<Node>, Option<Terminator>), Error> {
        let mut nodes = Vec::new();

        while let Some(item) = self.items.next() {
            let (mut words, line) = match item {
                Item::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Item::Action { words, line } => (words, line),
            };

            let keyword = match words.first() {
                Some(Word::Keyword(keyword)) => Some(keyword.clone()),
                _ => None,
            };
            match keyword.as_deref() {
                None => nodes.push(Node::Value(expression(words, line)?)),
                Some("if") => {
                    words.remove(0);
                    let condition = expression(words, line)?;
                    nodes.push(self.parse_if(condition)?);
                }
                Some("else") => {
                    words.remove(0);
                    let next = if words.is_empty() {
                        None
                    } else if matches!(words.first(), Some(Word::Keyword(kw)) if kw == "if") {
                        words.remove(0);
                        Some(expression(words, line)?)
                    } else {
                        return Err(parse_error(line, "unexpected words after else"));
                    };
                    return Ok((nodes, Some(Terminator::Else(next, line))));
                }
                Some("end") => {
                    if words.len() > 1 {
                        return Err(parse_error(line, "unexpected words after end"));
                    }
                    return Ok((nodes, Some(Terminator::End(line))));
                }
                Some(other) => {
                    return Err(parse_error(line, format!("unsupported action '{other}'")))
                }
            }
        }

        Ok((nodes, None))
    }

    fn parse_if(&mut self, condition: Expr) -> Result<Node, Error> {
        let opened_at = condition.line;
        let (then, terminator) = self.parse_list()?;
        let otherwise = match terminator {
            Some(Terminator::End(_)) => Vec::new(),
            // `else if` nests another conditional which consumes the shared `end`.
            Some(Terminator::Else(Some(next), _)) => vec![self.parse_if(next)?],
            Some(Terminator::Else(None, _)) => match self.parse_list()? {
                (otherwise, Some(Terminator::End(_))) => otherwise,
                (_, Some(Terminator::Else(_, line))) => {
                    return Err(parse_error(line, "unexpected {{ else }} after {{ else }}"))
                }
                (_, None) => return Err(parse_error(opened_at, "unclosed {{ if }}")),
            },
            None => return Err(parse_error(opened_at, "unclosed {{ if }}")),
        };

        Ok(Node::If {
            condition,
            then,
            otherwise,
        })
    }
}

fn expression(words: Vec<Word>, line: usize) -> Result<Expr, Error> {
    let mut words = words.into_iter();
    let path = match words.next() {
        Some(Word::Field(path)) => path,
        Some(other) => {
            return Err(parse_error(line, format!("expected a field reference, found {other:?}")))
        }
        None => return Err(parse_error(line, "empty action")),
    };

    let args = words
        .map(|word| match word {
            Word::Literal(literal) => Ok(literal),
            other => Err(parse_error(
                line,
                format!("arguments must be string literals, found {other:?}"),
            )),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Expr { path, args, line })
}

fn resolve(expr: &Expr, scope: &dyn Scope) -> Option<String> {
    if expr.args.is_empty() {
        scope
            .field(&expr.path)
            .or_else(|| scope.call(&expr.path, &[]))
    } else {
        scope.call(&expr.path, &expr.args)
    }
}

fn render_nodes(nodes: &[Node], scope: &dyn Scope, out: &mut String) -> Result<(), Error> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Value(expr) => {
                let value = resolve(expr, scope).ok_or_else(|| Error::Render {
                    line: expr.line,
                    message: if expr.args.is_empty() {
                        format!("undefined field .{}", expr.path)
                    } else {
                        format!("undefined function .{}", expr.path)
                    },
                })?;
                out.push_str(&value);
            }
            Node::If {
                condition,
                then,
                otherwise,
            } => {
                let truthy = resolve(condition, scope).is_some_and(|value| !value.is_empty());
                render_nodes(if truthy { then } else { otherwise }, scope, out)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct TestScope(HashMap<&'static str, &'static str>);

    impl Scope for TestScope {
        fn field(&self, path: &str) -> Option<String> {
            self.0.get(path).map(|value| value.to_string())
        }

        fn call(&self, name: &str, args: &[String]) -> Option<String> {
            match name {
                "Upper" => Some(args.join(" ").to_uppercase()),
                _ => None,
            }
        }
    }

    fn scope() -> TestScope {
        TestScope(HashMap::from([
            ("Name", "api"),
            ("Project.Name", "web"),
            ("Empty", ""),
            ("Branch", "main"),
        ]))
    }

    #[test]
    fn substitutes_fields() {
        assert_eq!(
            expand("image: {{ .Name }} of {{.Project.Name}}", &scope()).unwrap(),
            "image: api of web"
        );
    }

    #[test]
    fn calls_helpers_with_arguments() {
        assert_eq!(
            expand(r#"{{ .Upper "a" `b` "c\"d" }}"#, &scope()).unwrap(),
            "A B C\"D"
        );
    }

    #[test]
    fn undefined_field_is_an_error() {
        let err = expand("line one\n{{ .Missing }}", &scope()).unwrap_err();
        assert_eq!(
            err,
            Error::Render {
                line: 2,
                message: "undefined field .Missing".into()
            }
        );
        let err = expand(r#"{{ .Nope "x" }}"#, &scope()).unwrap_err();
        assert!(err.to_string().contains("undefined function .Nope"));
    }

    #[test]
    fn guarded_references_degrade() {
        let tpl = "Tag: {{if .Tag }}{{ .Tag }}{{else}}n/a{{end}}";
        assert_eq!(expand(tpl, &scope()).unwrap(), "Tag: n/a");

        let tpl = "{{ if .Empty }}yes{{ else }}no{{ end }}";
        assert_eq!(expand(tpl, &scope()).unwrap(), "no");

        let tpl = "{{ if .Branch }}{{ .Branch }}{{ end }}";
        assert_eq!(expand(tpl, &scope()).unwrap(), "main");
    }

    #[test]
    fn else_if_chains() {
        let tpl = "{{ if .Tag }}tag{{ else if .Branch }}branch {{ .Branch }}{{ else }}none{{ end }}";
        assert_eq!(expand(tpl, &scope()).unwrap(), "branch main");

        let nested = "{{ if .Name }}[{{ if .Missing }}x{{ else }}y{{ end }}]{{ end }}";
        assert_eq!(expand(nested, &scope()).unwrap(), "[y]");
    }

    #[test]
    fn trim_markers_and_comments() {
        let tpl = "a  {{- /* drop */ -}}  \n  b {{ .Name }}";
        assert_eq!(expand(tpl, &scope()).unwrap(), "ab api");
        assert_eq!(expand("x{{/* note */}}y", &scope()).unwrap(), "xy");
    }

    #[test]
    fn comments_may_contain_braces() {
        assert_eq!(expand("x{{/* }} */}}y", &scope()).unwrap(), "xy");
        assert_eq!(
            expand("a {{- /* {{ .Missing }} */ -}} b{{ .Name }}", &scope()).unwrap(),
            "abapi"
        );
        let err = expand("x{{/* never closed }}", &scope()).unwrap_err();
        assert!(err.to_string().contains("unclosed action"), "{err}");
    }

    #[test]
    fn braces_inside_strings() {
        assert_eq!(expand(r#"{{ .Upper "}}" }}"#, &scope()).unwrap(), "}}");
    }

    #[test]
    fn parse_errors() {
        for (source, fragment) in [
            ("{{ .Name", "unclosed action"),
            ("{{ if .Name }}open", "unclosed {{ if }}"),
            ("{{ end }}", "unexpected {{ end }}"),
            ("{{ else }}", "unexpected {{ else }}"),
            ("{{ range .Items }}{{ end }}", "unsupported action 'range'"),
            ("{{ }}", "empty action"),
            ("{{ .Upper .Name }}", "arguments must be string literals"),
            ("{{ . }}", "malformed field reference"),
            ("{{ .Name | x }}", "unexpected character '|'"),
        ] {
            let err = Template::parse(source).unwrap_err();
            assert!(
                matches!(err, Error::Parse { .. }) && err.to_string().contains(fragment),
                "{source}: {err}"
            );
        }
    }

    #[test]
    fn parse_error_lines() {
        let err = Template::parse("a\nb\n{{ if .X }}\nc").unwrap_err();
        assert_eq!(err, parse_error(3, "unclosed {{ if }}"));
    }
}
