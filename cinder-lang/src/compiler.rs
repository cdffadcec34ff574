//! Turns source text into a checked [`ast::Lambda`](crate::ast::Lambda) chunk.

pub mod parser;

use std::{path::Path, rc::Rc};

use parser::{Datum, Spanned};

use crate::{
    ast::{Expr, ExprKind, Lambda, Literal},
    utils::{
        error::ReportableError,
        metadata::{Location, Span},
    },
};

#[derive(Debug, Clone)]
pub struct SyntaxError {
    pub message: String,
    pub location: Location,
}
impl std::fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
impl std::error::Error for SyntaxError {}
impl ReportableError for SyntaxError {
    fn get_labels(&self) -> Vec<(Location, String)> {
        vec![(self.location.clone(), self.message.clone())]
    }
}

struct Lowering<'a> {
    path: &'a Path,
    errors: Vec<SyntaxError>,
}

impl Lowering<'_> {
    fn error(&mut self, message: impl Into<String>, span: Span) -> Expr {
        self.errors.push(SyntaxError {
            message: message.into(),
            location: Location::new(span.clone(), self.path.to_path_buf()),
        });
        Expr::new(ExprKind::Literal(Literal::Nil), span)
    }

    fn symbol<'d>(&mut self, d: &'d Spanned, what: &str) -> Option<&'d str> {
        match &d.datum {
            Datum::Symbol(s) => Some(s),
            _ => {
                self.error(format!("expected a symbol for {what}"), d.span.clone());
                None
            }
        }
    }

    fn body(&mut self, items: &[Spanned]) -> Vec<Expr> {
        items.iter().map(|d| self.expr(d)).collect()
    }

    fn params(&mut self, d: &Spanned) -> (Vec<Rc<str>>, Option<Rc<str>>) {
        let Datum::List(items) = &d.datum else {
            self.error("expected a parameter list", d.span.clone());
            return (vec![], None);
        };
        let mut params = vec![];
        let mut rest = None;
        let mut iter = items.iter();
        while let Some(p) = iter.next() {
            match self.symbol(p, "a parameter") {
                Some("&") => {
                    match iter.next().and_then(|r| self.symbol(r, "the rest parameter")) {
                        Some(name) => rest = Some(Rc::from(name)),
                        None => {
                            self.error("`&` must be followed by a name", p.span.clone());
                        }
                    }
                    if let Some(extra) = iter.next() {
                        self.error("nothing may follow the rest parameter", extra.span.clone());
                    }
                    break;
                }
                Some(name) => params.push(Rc::from(name)),
                None => {}
            }
        }
        (params, rest)
    }

    fn lambda(&mut self, name: Option<Rc<str>>, params: &Spanned, body: &[Spanned], span: Span) -> Expr {
        let (params, rest) = self.params(params);
        let body = self.body(body);
        let lambda = Lambda {
            name,
            params,
            rest,
            body,
            span: span.clone(),
        };
        Expr::new(ExprKind::Lambda(Rc::new(lambda)), span)
    }

    fn special_form(&mut self, head: &str, args: &[Spanned], span: Span) -> Option<Expr> {
        let kind = match (head, args) {
            ("define", [name, value]) => {
                let name = self.symbol(name, "define")?;
                ExprKind::Define(Rc::from(name), Box::new(self.expr(value)))
            }
            ("define", _) => return Some(self.error("define takes a name and a value", span)),
            ("set!", [name, value]) => {
                let name = self.symbol(name, "set!")?;
                ExprKind::Set(Rc::from(name), Box::new(self.expr(value)))
            }
            ("set!", _) => return Some(self.error("set! takes a name and a value", span)),
            ("fn", [params, body @ ..]) => return Some(self.lambda(None, params, body, span)),
            ("fn", _) => return Some(self.error("fn needs a parameter list", span)),
            ("defn", [name, params, body @ ..]) => {
                let name: Rc<str> = Rc::from(self.symbol(name, "defn")?);
                let lambda = self.lambda(Some(name.clone()), params, body, span.clone());
                ExprKind::Define(name, Box::new(lambda))
            }
            ("defn", _) => return Some(self.error("defn needs a name and a parameter list", span)),
            ("if", [cond, then]) => {
                ExprKind::If(Box::new(self.expr(cond)), Box::new(self.expr(then)), None)
            }
            ("if", [cond, then, otherwise]) => ExprKind::If(
                Box::new(self.expr(cond)),
                Box::new(self.expr(then)),
                Some(Box::new(self.expr(otherwise))),
            ),
            ("if", _) => return Some(self.error("if takes a condition and one or two branches", span)),
            ("do", body) => ExprKind::Do(self.body(body)),
            ("let", [bindings, body @ ..]) => {
                let Datum::List(pairs) = &bindings.datum else {
                    return Some(self.error("let needs a binding list", bindings.span.clone()));
                };
                let mut binds = vec![];
                for pair in pairs {
                    match &pair.datum {
                        Datum::List(kv) if kv.len() == 2 => {
                            if let Some(name) = self.symbol(&kv[0], "a let binding") {
                                binds.push((Rc::from(name), self.expr(&kv[1])));
                            }
                        }
                        _ => {
                            self.error("let bindings are (name value) pairs", pair.span.clone());
                        }
                    }
                }
                ExprKind::Let(binds, self.body(body))
            }
            ("let", _) => return Some(self.error("let needs a binding list", span)),
            ("while", [cond, body @ ..]) => ExprKind::While(Box::new(self.expr(cond)), self.body(body)),
            ("while", _) => return Some(self.error("while needs a condition", span)),
            ("and", items) => ExprKind::And(self.body(items)),
            ("or", items) => ExprKind::Or(self.body(items)),
            _ => return None,
        };
        Some(Expr::new(kind, span))
    }

    fn expr(&mut self, d: &Spanned) -> Expr {
        let span = d.span.clone();
        let kind = match &d.datum {
            Datum::Nil => ExprKind::Literal(Literal::Nil),
            Datum::Bool(b) => ExprKind::Literal(Literal::Bool(*b)),
            Datum::Number(n) => ExprKind::Literal(Literal::Number(*n)),
            Datum::Str(s) => ExprKind::Literal(Literal::Str(Rc::from(s.as_str()))),
            Datum::Symbol(s) => ExprKind::Var(Rc::from(s.as_str())),
            Datum::List(items) => match items.as_slice() {
                [] => ExprKind::Literal(Literal::Nil),
                [head, args @ ..] => {
                    if let Datum::Symbol(h) = &head.datum {
                        let before = self.errors.len();
                        if let Some(e) = self.special_form(h, args, span.clone()) {
                            return e;
                        }
                        if self.errors.len() > before {
                            return Expr::new(ExprKind::Literal(Literal::Nil), span);
                        }
                    }
                    ExprKind::Call(Box::new(self.expr(head)), self.body(args))
                }
            },
        };
        Expr::new(kind, span)
    }
}

/// Compile `src` into a parameterless chunk named `chunk_name`.
pub fn compile(src: &str, chunk_name: &str) -> Result<Rc<Lambda>, Vec<Box<dyn ReportableError>>> {
    let path = Path::new(chunk_name);
    let data = parser::read(src, path).map_err(|errs| {
        errs.into_iter()
            .map(|e| Box::new(e) as Box<dyn ReportableError>)
            .collect::<Vec<_>>()
    })?;
    let mut lowering = Lowering {
        path,
        errors: vec![],
    };
    let body = lowering.body(&data);
    if !lowering.errors.is_empty() {
        return Err(lowering
            .errors
            .into_iter()
            .map(|e| Box::new(e) as Box<dyn ReportableError>)
            .collect());
    }
    Ok(Rc::new(Lambda {
        name: Some(Rc::from("main chunk")),
        params: vec![],
        rest: None,
        body,
        span: 0..src.len(),
    }))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lowers_special_forms() {
        let chunk = compile("(defn add (a b) (+ a b)) (if true (add 1 2))", "t.cin").unwrap();
        assert_eq!(chunk.body.len(), 2);
        let ExprKind::Define(name, value) = &chunk.body[0].kind else {
            panic!("expected define")
        };
        assert_eq!(&**name, "add");
        let ExprKind::Lambda(l) = &value.kind else {
            panic!("expected lambda")
        };
        assert_eq!(l.params.len(), 2);
        assert_eq!(l.display_name(), "add");
        assert!(matches!(chunk.body[1].kind, ExprKind::If(_, _, None)));
    }

    #[test]
    fn rest_parameters() {
        let chunk = compile("(fn (a & more) more)", "t.cin").unwrap();
        let ExprKind::Lambda(l) = &chunk.body[0].kind else {
            panic!("expected lambda")
        };
        assert_eq!(l.params, vec![Rc::<str>::from("a")]);
        assert_eq!(l.rest.as_deref(), Some("more"));
    }

    #[test]
    fn malformed_forms_are_reported() {
        let errs = compile("(if) (let x 1) (define 1 2)", "bad.cin").expect_err("should fail");
        assert_eq!(errs.len(), 3);
        assert_eq!(errs[0].get_labels()[0].0.path, std::path::PathBuf::from("bad.cin"));
    }

    #[test]
    fn reader_errors_are_reported() {
        assert!(compile("(print \"unterminated)", "bad.cin").is_err());
    }
}
